use arrow_array::{RecordBatch, RecordBatchReader};
use arrow_schema::SchemaRef;
use itertools::Itertools;
use orbit_error::OrbitResult;
use orbit_io::{FileSystem, Path};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};

/// Default number of rows per batch produced by a [`FileReader`].
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Configuration for [`FileReader`].
#[derive(Debug, Clone)]
pub struct FileReaderOptions {
    projection: Option<Vec<String>>,
    batch_size: usize,
}

impl Default for FileReaderOptions {
    fn default() -> Self {
        Self {
            projection: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl FileReaderOptions {
    /// Only decode the named columns. Columns come back in file order.
    pub fn with_projection<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Reads the record batches of one Parquet file.
pub struct FileReader {
    path: Path,
    schema: SchemaRef,
    num_rows: usize,
    reader: ParquetRecordBatchReader,
}

impl FileReader {
    pub async fn try_open(
        fs: &dyn FileSystem,
        path: &Path,
        options: FileReaderOptions,
    ) -> OrbitResult<Self> {
        let bytes = fs.read(path).await?;
        let mut builder =
            ParquetRecordBatchReaderBuilder::try_new(bytes)?.with_batch_size(options.batch_size);

        if let Some(columns) = &options.projection {
            let file_schema = builder.schema().clone();
            let indices: Vec<usize> = columns
                .iter()
                .map(|name| file_schema.index_of(name))
                .try_collect()?;
            let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
            builder = builder.with_projection(mask);
        }

        let num_rows = usize::try_from(builder.metadata().file_metadata().num_rows())
            .unwrap_or_default();
        let reader = builder.build()?;
        let schema = reader.schema();
        log::trace!("opened {path} with {num_rows} rows");

        Ok(Self {
            path: path.clone(),
            schema,
            num_rows,
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The schema of the batches this reader yields, after projection.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Total rows in the file, regardless of how many have been read.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn next_batch(&mut self) -> OrbitResult<Option<RecordBatch>> {
        Ok(self.reader.next().transpose()?)
    }
}

impl Iterator for FileReader {
    type Item = OrbitResult<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}
