use arrow_array::RecordBatch;
use orbit_error::OrbitResult;
use orbit_file::{FileWriter, FileWriterOptions};
use orbit_io::{FileSystem, Path};

use crate::path::{FileKind, PathGenerator};
use crate::schema::SpaceSchema;

/// Scalar and vector files written by one [`Space::write`](crate::Space::write) call.
#[derive(Debug, Default)]
pub(crate) struct DataFiles {
    pub scalar: Vec<Path>,
    pub vector: Vec<Path>,
}

impl DataFiles {
    pub fn is_empty(&self) -> bool {
        self.scalar.is_empty()
    }
}

/// Splits batches into scalar and vector parts and spreads them over file pairs of at most
/// `max_rows` rows each.
pub(crate) struct DataFileWriter<'a> {
    fs: &'a dyn FileSystem,
    paths: &'a dyn PathGenerator,
    schema: &'a SpaceSchema,
    options: &'a FileWriterOptions,
    max_rows: usize,
    current: Option<FilePair>,
    files: DataFiles,
}

impl<'a> DataFileWriter<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        paths: &'a dyn PathGenerator,
        schema: &'a SpaceSchema,
        options: &'a FileWriterOptions,
        max_rows: usize,
    ) -> Self {
        Self {
            fs,
            paths,
            schema,
            options,
            max_rows,
            current: None,
            files: DataFiles::default(),
        }
    }

    /// Append a batch of the space's full schema.
    pub async fn write(&mut self, batch: &RecordBatch) -> OrbitResult<()> {
        let (scalar, vector) = self.schema.split(batch)?;
        let rows = scalar.num_rows();

        let mut start = 0;
        while start < rows {
            let mut pair = match self.current.take() {
                Some(pair) => pair,
                None => FilePair::try_new(self.fs, self.paths, self.schema, self.options).await?,
            };
            let len = (self.max_rows - pair.count()).min(rows - start);
            let written = pair
                .write(
                    &scalar.slice(start, len),
                    vector.as_ref().map(|v| v.slice(start, len)).as_ref(),
                )
                .await;
            if let Err(e) = written {
                self.current = Some(pair);
                return Err(e);
            }
            start += len;

            if pair.count() >= self.max_rows {
                pair.close(&mut self.files).await?;
            } else {
                self.current = Some(pair);
            }
        }
        Ok(())
    }

    /// Close the open file pair and return every file written.
    pub async fn finish(mut self) -> OrbitResult<DataFiles> {
        if let Some(pair) = self.current.take() {
            pair.close(&mut self.files).await?;
        }
        Ok(self.files)
    }

    /// Close the open file pair after a failed write. The files are left unreferenced.
    pub async fn close_after_error(mut self) {
        if let Some(pair) = self.current.take() {
            if let Err(e) = pair.close(&mut self.files).await {
                log::warn!("failed to close data files after a write error: {e}");
            }
        }
        log::debug!(
            "abandoning {} scalar and {} vector files",
            self.files.scalar.len(),
            self.files.vector.len()
        );
    }
}

struct FilePair {
    scalar: FileWriter,
    vector: Option<FileWriter>,
}

impl FilePair {
    async fn try_new(
        fs: &dyn FileSystem,
        paths: &dyn PathGenerator,
        schema: &SpaceSchema,
        options: &FileWriterOptions,
    ) -> OrbitResult<Self> {
        let scalar = FileWriter::try_new(
            fs,
            paths.next_path(FileKind::Scalar),
            schema.scalar().clone(),
            options,
        )
        .await?;
        let vector = if schema.has_vector() {
            Some(
                FileWriter::try_new(
                    fs,
                    paths.next_path(FileKind::Vector),
                    schema.vector().clone(),
                    options,
                )
                .await?,
            )
        } else {
            None
        };
        Ok(Self { scalar, vector })
    }

    fn count(&self) -> usize {
        self.scalar.count()
    }

    async fn write(&mut self, scalar: &RecordBatch, vector: Option<&RecordBatch>) -> OrbitResult<()> {
        self.scalar.write(scalar).await?;
        if let (Some(writer), Some(batch)) = (self.vector.as_mut(), vector) {
            writer.write(batch).await?;
        }
        Ok(())
    }

    /// Close both files, recording the paths that made it to storage.
    async fn close(self, files: &mut DataFiles) -> OrbitResult<()> {
        let scalar = self.scalar.close().await?;
        let vector = match self.vector {
            Some(writer) => Some(writer.close().await?),
            None => None,
        };
        files.scalar.push(scalar.path);
        files.vector.extend(vector.map(|v| v.path));
        Ok(())
    }
}
