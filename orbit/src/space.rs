use std::pin::pin;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use futures::{Stream, StreamExt};
use orbit_error::{OrbitError, OrbitResult, orbit_bail};
use orbit_file::{FileWriter, FileWriterOptions};
use orbit_io::{DEFAULT_FILE_SYSTEMS, FileSystem, FileSystemRegistry};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::delete_set::DeleteSet;
use crate::manifest::Manifest;
use crate::path::{FileKind, PathGenerator, UuidPathGenerator};
use crate::reader::RecordReader;
use crate::schema::schemas_match;
use crate::writer::DataFileWriter;
use crate::{ReadOption, SpaceOption, WriteOption};

/// A versioned table of rows stored as Parquet files under one URI.
///
/// Writers are serialized against each other; reads work from a snapshot and never block on
/// writers.
#[derive(Debug)]
pub struct Space {
    fs: Arc<dyn FileSystem>,
    manifest: RwLock<Arc<Manifest>>,
    deletes: RwLock<Arc<DeleteSet>>,
    paths: Arc<dyn PathGenerator>,
    file_options: FileWriterOptions,
    write_lock: Mutex<()>,
}

/// Settings for opening a [`Space`] beyond its schema and [`SpaceOption`].
#[derive(Debug, Clone)]
pub struct SpaceOpenOptions {
    schema: SchemaRef,
    option: SpaceOption,
    registry: FileSystemRegistry,
    paths: Arc<dyn PathGenerator>,
    file_options: FileWriterOptions,
}

impl SpaceOpenOptions {
    pub fn new(schema: SchemaRef, option: SpaceOption) -> Self {
        Self {
            schema,
            option,
            registry: DEFAULT_FILE_SYSTEMS.clone(),
            paths: Arc::new(UuidPathGenerator),
            file_options: FileWriterOptions::default(),
        }
    }

    /// Resolve the space's URI against `registry` instead of the default file systems.
    pub fn with_registry(mut self, registry: FileSystemRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_path_generator(mut self, paths: Arc<dyn PathGenerator>) -> Self {
        self.paths = paths;
        self
    }

    /// Parquet settings for every file the space writes.
    pub fn with_file_options(mut self, file_options: FileWriterOptions) -> Self {
        self.file_options = file_options;
        self
    }

    /// Open the space, creating it in memory if nothing has been committed at its URI yet.
    ///
    /// An existing space must have been created with the same schema and the same primary,
    /// version and vector columns.
    pub async fn open(self) -> OrbitResult<Space> {
        let fs = self.registry.resolve(&self.option.uri)?;
        let manifest = match Manifest::load(fs.as_ref()).await? {
            Some(manifest) => {
                if !schemas_match(manifest.schema().full(), &self.schema) {
                    orbit_bail!(
                        SchemaMismatch: "space at {} was created with a different schema",
                        self.option.uri
                    );
                }
                let stored = manifest.option();
                if stored.primary_column != self.option.primary_column
                    || stored.version_column != self.option.version_column
                    || stored.vector_column != self.option.vector_column
                {
                    orbit_bail!(
                        InvalidArgument: "space at {} was created with different key columns",
                        self.option.uri
                    );
                }
                manifest
            }
            None => Manifest::try_new(self.schema, self.option)?,
        };

        let deletes = DeleteSet::build(fs.as_ref(), &manifest).await?;
        log::debug!(
            "opened space {} at manifest version {}",
            manifest.option().uri,
            manifest.version()
        );
        Ok(Space {
            fs,
            manifest: RwLock::new(Arc::new(manifest)),
            deletes: RwLock::new(Arc::new(deletes)),
            paths: self.paths,
            file_options: self.file_options,
            write_lock: Mutex::new(()),
        })
    }
}

impl Space {
    /// Open the space described by `option` with default settings.
    pub async fn open(schema: SchemaRef, option: SpaceOption) -> OrbitResult<Self> {
        SpaceOpenOptions::new(schema, option).open().await
    }

    /// The space's full schema.
    pub fn schema(&self) -> SchemaRef {
        self.manifest.read().schema().full().clone()
    }

    /// The current manifest.
    pub fn manifest(&self) -> Arc<Manifest> {
        self.manifest.read().clone()
    }

    pub fn option(&self) -> SpaceOption {
        self.manifest.read().option().clone()
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Append every batch of `batches` to the space in one commit.
    ///
    /// Batches must carry the space's schema. Rows are spread over data files of at most
    /// [`WriteOption::max_record_per_file`] rows. Nothing becomes visible until the whole stream
    /// has been written and the manifest committed; if any batch or the commit fails, the space
    /// is left as it was and the files written so far are abandoned.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn write<S>(&self, batches: S, option: &WriteOption) -> OrbitResult<()>
    where
        S: Stream<Item = OrbitResult<RecordBatch>>,
    {
        option.validate()?;
        let _guard = self.write_lock.lock().await;
        let manifest = self.manifest();

        let mut writer = DataFileWriter::new(
            self.fs.as_ref(),
            self.paths.as_ref(),
            manifest.schema(),
            &self.file_options,
            option.max_record_per_file,
        );
        let mut batches = pin!(batches);
        let mut rows = 0;
        while let Some(batch) = batches.next().await {
            let written = match batch {
                Ok(batch) => {
                    rows += batch.num_rows();
                    writer.write(&batch).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                writer.close_after_error().await;
                return Err(e);
            }
        }

        let files = writer.finish().await?;
        if files.is_empty() {
            log::debug!("write produced no rows, leaving manifest unchanged");
            return Ok(());
        }

        let file_count = files.scalar.len();
        let mut next = Manifest::clone(&manifest);
        next.add_data_files(files.scalar, files.vector)?;
        next.commit(self.fs.as_ref()).await?;
        *self.manifest.write() = Arc::new(next);
        log::debug!("wrote {rows} rows in {file_count} file pairs");
        Ok(())
    }

    /// Delete rows by primary key (and version, for versioned spaces).
    ///
    /// Batches carry the space's delete schema: the primary-key column, then the version column
    /// if the space has one. A delete hides every row of its key with a version at or below the
    /// delete's version. The deletes are visible to new readers as each batch is accepted, and
    /// are rolled back if the stream or the commit fails.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn delete<S>(&self, batches: S) -> OrbitResult<()>
    where
        S: Stream<Item = OrbitResult<RecordBatch>>,
    {
        let _guard = self.write_lock.lock().await;
        let manifest = self.manifest();
        let rollback = self.deletes.read().clone();

        let mut writer: Option<FileWriter> = None;
        let mut batches = pin!(batches);
        let mut rows = 0;
        while let Some(batch) = batches.next().await {
            let accepted = match batch {
                Ok(batch) => self.accept_deletes(&manifest, &batch, &mut writer).await,
                Err(e) => Err(e),
            };
            match accepted {
                Ok(count) => rows += count,
                Err(e) => {
                    *self.deletes.write() = rollback;
                    if let Some(writer) = writer {
                        if let Err(close) = writer.close().await {
                            log::warn!("failed to close delete file after an error: {close}");
                        }
                    }
                    return Err(e);
                }
            }
        }

        let Some(writer) = writer else {
            return Ok(());
        };
        let committed = async {
            let file = writer.close().await?;
            let mut next = Manifest::clone(&manifest);
            next.add_delete_file(file.path);
            next.commit(self.fs.as_ref()).await?;
            Ok::<_, OrbitError>(next)
        }
        .await;
        match committed {
            Ok(next) => {
                *self.manifest.write() = Arc::new(next);
                log::debug!("deleted {rows} keys");
                Ok(())
            }
            Err(e) => {
                *self.deletes.write() = rollback;
                Err(e)
            }
        }
    }

    async fn accept_deletes(
        &self,
        manifest: &Manifest,
        batch: &RecordBatch,
        writer: &mut Option<FileWriter>,
    ) -> OrbitResult<usize> {
        let batch = manifest.schema().delete_batch(batch)?;
        if batch.num_rows() == 0 {
            return Ok(0);
        }

        let file = match writer.take() {
            Some(file) => file,
            None => {
                FileWriter::try_new(
                    self.fs.as_ref(),
                    self.paths.next_path(FileKind::Delete),
                    manifest.schema().delete().clone(),
                    &self.file_options,
                )
                .await?
            }
        };
        writer.insert(file).write(&batch).await?;

        let mut deletes = self.deletes.write();
        Arc::make_mut(&mut deletes).add(&batch)?;
        Ok(batch.num_rows())
    }

    /// Read the rows visible now, as restricted by `option`.
    ///
    /// The reader works from a snapshot of the manifest and deletes taken here.
    pub fn read(&self, option: ReadOption) -> OrbitResult<RecordReader> {
        RecordReader::try_new(
            self.fs.clone(),
            self.manifest(),
            self.deletes.read().clone(),
            option,
        )
    }
}
