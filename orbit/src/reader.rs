use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::Int64Type;
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::SchemaRef;
use arrow_select::concat::concat_batches;
use arrow_select::filter::filter_record_batch;
use futures::Stream;
use itertools::Itertools;
use orbit_error::{OrbitResult, orbit_bail, orbit_err};
use orbit_expr::{Filter, evaluate_all, selected_count};
use orbit_file::{DEFAULT_BATCH_SIZE, FileReader, FileReaderOptions};
use orbit_io::FileSystem;

use crate::ReadOption;
use crate::delete_set::DeleteSet;
use crate::manifest::Manifest;
use crate::schema::OFFSET_COLUMN;

/// Streams the visible rows of a space snapshot.
///
/// The snapshot is fixed when the reader is created: commits and deletes that happen afterwards
/// are not observed. Data files are read one pair at a time, in manifest order.
pub struct RecordReader {
    fs: Arc<dyn FileSystem>,
    manifest: Arc<Manifest>,
    deletes: Arc<DeleteSet>,
    filters: Vec<Filter>,
    output: SchemaRef,
    scalar_columns: Vec<String>,
    read_vector: bool,
    limit: Option<usize>,
    pin: Option<i64>,
    batch_size: usize,
    next_fragment: usize,
    current: Option<Fragment>,
    emitted: usize,
}

impl RecordReader {
    pub(crate) fn try_new(
        fs: Arc<dyn FileSystem>,
        manifest: Arc<Manifest>,
        deletes: Arc<DeleteSet>,
        option: ReadOption,
    ) -> OrbitResult<Self> {
        let schema = manifest.schema();
        let full = schema.full();
        let vector_name = schema.vector_field().map(|f| f.name().as_str());

        let output = if option.columns.is_empty() {
            full.clone()
        } else {
            let indices: Vec<usize> = option
                .columns
                .iter()
                .map(|name| {
                    full.index_of(name).map_err(|_| {
                        orbit_err!(InvalidArgument: "column {name} is not in the space")
                    })
                })
                .try_collect()?;
            Arc::new(full.project(&indices)?)
        };

        for filter in &option.filters {
            for column in filter.columns() {
                if full.field_with_name(column).is_err() {
                    orbit_bail!(InvalidArgument: "filter {filter} references unknown column {column}");
                }
                if Some(column) == vector_name {
                    orbit_bail!(InvalidArgument: "cannot filter on vector column {column}");
                }
            }
        }

        if option.version.is_some() && !schema.has_version() {
            orbit_bail!(InvalidArgument: "version reads need a space with a version column");
        }

        let mut wanted: Vec<&str> = vec![schema.primary_field().name()];
        wanted.extend(schema.version_field().map(|f| f.name().as_str()));
        wanted.extend(option.filters.iter().flat_map(Filter::columns));
        wanted.extend(output.fields().iter().map(|f| f.name().as_str()));
        let scalar_columns = schema
            .scalar()
            .fields()
            .iter()
            .map(|f| f.name())
            .filter(|name| name.as_str() == OFFSET_COLUMN || wanted.contains(&name.as_str()))
            .cloned()
            .collect_vec();
        let read_vector = vector_name.is_some_and(|name| output.field_with_name(name).is_ok());

        Ok(Self {
            fs,
            manifest,
            deletes,
            filters: option.filters,
            output,
            scalar_columns,
            read_vector,
            limit: option.limit,
            pin: option.version,
            batch_size: DEFAULT_BATCH_SIZE,
            next_fragment: 0,
            current: None,
            emitted: 0,
        })
    }

    /// Decode data files `batch_size` rows at a time.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The schema of every batch this reader yields.
    pub fn schema(&self) -> &SchemaRef {
        &self.output
    }

    /// The manifest this reader is reading.
    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    /// The next non-empty batch of visible rows, or `None` when the snapshot is exhausted.
    pub async fn next_batch(&mut self) -> OrbitResult<Option<RecordBatch>> {
        loop {
            if self.limit.is_some_and(|limit| self.emitted >= limit) {
                return Ok(None);
            }

            let mut fragment = match self.current.take() {
                Some(fragment) => fragment,
                None => {
                    if self.next_fragment >= self.manifest.scalar_files().len() {
                        return Ok(None);
                    }
                    let fragment = self.open_fragment(self.next_fragment).await?;
                    self.next_fragment += 1;
                    fragment
                }
            };

            let Some(scalar) = fragment.scalar.next_batch()? else {
                fragment.finish()?;
                continue;
            };
            fragment.check_offsets(&scalar)?;
            let vector = fragment
                .vector
                .as_mut()
                .map(|vector| vector.take(scalar.num_rows()))
                .transpose()?;
            self.current = Some(fragment);

            if let Some(batch) = self.assemble(&scalar, vector.as_ref())? {
                return Ok(Some(batch));
            }
        }
    }

    /// Turn the reader into a stream of batches.
    pub fn into_stream(self) -> impl Stream<Item = OrbitResult<RecordBatch>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_batch().await?.map(|batch| (batch, reader)))
        })
    }

    async fn open_fragment(&mut self, idx: usize) -> OrbitResult<Fragment> {
        let missing = || orbit_err!(ManifestCorrupt: "manifest has no data file pair {idx}");
        let scalar_path = self.manifest.scalar_files().get(idx).ok_or_else(missing)?;
        let scalar = FileReader::try_open(
            self.fs.as_ref(),
            scalar_path,
            FileReaderOptions::default()
                .with_projection(self.scalar_columns.iter().cloned())
                .with_batch_size(self.batch_size),
        )
        .await
        .map_err(|e| e.with_context(format!("opening scalar file {scalar_path}")))?;

        let vector = if self.read_vector {
            let vector_path = self.manifest.vector_files().get(idx).ok_or_else(missing)?;
            let reader = FileReader::try_open(
                self.fs.as_ref(),
                vector_path,
                FileReaderOptions::default().with_batch_size(self.batch_size),
            )
            .await
            .map_err(|e| e.with_context(format!("opening vector file {vector_path}")))?;
            if reader.num_rows() != scalar.num_rows() {
                orbit_bail!(
                    ManifestCorrupt: "{scalar_path} has {} rows but {vector_path} has {}",
                    scalar.num_rows(),
                    reader.num_rows()
                );
            }
            Some(VectorCursor::new(reader))
        } else {
            None
        };

        log::trace!("reading {scalar_path} ({} rows)", scalar.num_rows());
        Ok(Fragment {
            scalar,
            vector,
            previous_offset: None,
        })
    }

    fn assemble(
        &mut self,
        scalar: &RecordBatch,
        vector: Option<&RecordBatch>,
    ) -> OrbitResult<Option<RecordBatch>> {
        let schema = self.manifest.schema();
        let pks = scalar
            .column_by_name(schema.primary_field().name())
            .ok_or_else(|| orbit_err!(ManifestCorrupt: "scalar file is missing the primary key"))?;
        let versions = schema
            .version_field()
            .map(|field| {
                scalar
                    .column_by_name(field.name())
                    .and_then(|column| column.as_primitive_opt::<Int64Type>())
                    .ok_or_else(
                        || orbit_err!(ManifestCorrupt: "scalar file is missing the version column"),
                    )
            })
            .transpose()?;

        let mut mask = self.deletes.visibility(pks, versions, self.pin)?;
        if let Some(filtered) = evaluate_all(&self.filters, scalar)? {
            mask = arrow_arith::boolean::and_kleene(&mask, &filtered)?;
        }
        let kept = selected_count(&mask);
        if kept == 0 {
            return Ok(None);
        }

        let (scalar, vector) = if kept == scalar.num_rows() {
            (scalar.clone(), vector.cloned())
        } else {
            (
                filter_record_batch(scalar, &mask)?,
                vector.map(|v| filter_record_batch(v, &mask)).transpose()?,
            )
        };

        let vector_name = schema.vector_field().map(|f| f.name());
        let columns: Vec<ArrayRef> = self
            .output
            .fields()
            .iter()
            .map(|field| {
                let column = if Some(field.name()) == vector_name {
                    vector.as_ref().map(|v| v.column(0))
                } else {
                    scalar.column_by_name(field.name())
                };
                column.cloned().ok_or_else(
                    || orbit_err!(ManifestCorrupt: "data files are missing column {}", field.name()),
                )
            })
            .try_collect()?;
        let mut batch = RecordBatch::try_new(self.output.clone(), columns)?;

        if let Some(limit) = self.limit {
            let remaining = limit.saturating_sub(self.emitted);
            if batch.num_rows() > remaining {
                batch = batch.slice(0, remaining);
            }
        }
        self.emitted += batch.num_rows();
        Ok(Some(batch))
    }
}

/// The reading position within one scalar file and its paired vector file.
struct Fragment {
    scalar: FileReader,
    vector: Option<VectorCursor>,
    previous_offset: Option<i64>,
}

impl Fragment {
    /// Within a file, each offset either starts a new write batch at zero or follows its
    /// predecessor.
    fn check_offsets(&mut self, scalar: &RecordBatch) -> OrbitResult<()> {
        let offsets = scalar
            .column_by_name(OFFSET_COLUMN)
            .and_then(|column| column.as_primitive_opt::<Int64Type>())
            .ok_or_else(|| {
                orbit_err!(ManifestCorrupt: "{} has no offset column", self.scalar.path())
            })?;
        if offsets.null_count() > 0 {
            orbit_bail!(ManifestCorrupt: "{} has null offsets", self.scalar.path());
        }
        for &offset in offsets.values() {
            let follows = match self.previous_offset {
                None => offset >= 0,
                Some(previous) => offset == 0 || offset == previous + 1,
            };
            if !follows {
                orbit_bail!(
                    ManifestCorrupt: "{} has offset {offset} out of sequence",
                    self.scalar.path()
                );
            }
            self.previous_offset = Some(offset);
        }
        Ok(())
    }

    fn finish(mut self) -> OrbitResult<()> {
        if let Some(vector) = self.vector.as_mut() {
            if vector.has_remaining()? {
                orbit_bail!(
                    ManifestCorrupt: "{} has more rows than {}",
                    vector.reader.path(),
                    self.scalar.path()
                );
            }
        }
        Ok(())
    }
}

/// Hands out vector rows in runs that line up with the scalar batches, whatever batch
/// boundaries the vector file itself decodes with.
struct VectorCursor {
    reader: FileReader,
    pending: Option<RecordBatch>,
}

impl VectorCursor {
    fn new(reader: FileReader) -> Self {
        Self {
            reader,
            pending: None,
        }
    }

    fn take(&mut self, rows: usize) -> OrbitResult<RecordBatch> {
        let mut parts = Vec::new();
        let mut needed = rows;
        while needed > 0 {
            let batch = match self.pending.take() {
                Some(batch) => batch,
                None => self.reader.next_batch()?.ok_or_else(|| {
                    orbit_err!(ManifestCorrupt: "{} ran out of rows", self.reader.path())
                })?,
            };
            if batch.num_rows() <= needed {
                needed -= batch.num_rows();
                parts.push(batch);
            } else {
                self.pending = Some(batch.slice(needed, batch.num_rows() - needed));
                parts.push(batch.slice(0, needed));
                needed = 0;
            }
        }

        match parts.len() {
            0 => Ok(RecordBatch::new_empty(self.reader.schema().clone())),
            1 => Ok(parts.remove(0)),
            _ => Ok(concat_batches(self.reader.schema(), &parts)?),
        }
    }

    fn has_remaining(&mut self) -> OrbitResult<bool> {
        if self.pending.as_ref().is_some_and(|b| b.num_rows() > 0) {
            return Ok(true);
        }
        while let Some(batch) = self.reader.next_batch()? {
            if batch.num_rows() > 0 {
                self.pending = Some(batch);
                return Ok(true);
            }
        }
        Ok(false)
    }
}
