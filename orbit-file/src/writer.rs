use std::mem;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use bytes::Bytes;
use orbit_error::{OrbitResult, orbit_bail};
use orbit_io::{FileSink, FileSystem, Path};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

/// Configuration for [`FileWriter`].
#[derive(Debug, Clone)]
pub struct FileWriterOptions {
    properties: WriterProperties,
}

impl Default for FileWriterOptions {
    fn default() -> Self {
        Self {
            properties: WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build(),
        }
    }
}

impl FileWriterOptions {
    /// Replace the Parquet writer properties.
    pub fn with_properties(mut self, properties: WriterProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Use `compression` for every column, keeping the other properties at their defaults.
    pub fn with_compression(self, compression: Compression) -> Self {
        self.with_properties(
            WriterProperties::builder()
                .set_compression(compression)
                .build(),
        )
    }

    pub fn properties(&self) -> &WriterProperties {
        &self.properties
    }
}

/// What a closed [`FileWriter`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: Path,
    pub rows: usize,
}

/// Writes record batches of a single schema to one Parquet file.
///
/// Encoded row groups are streamed into a [`FileSink`] as they complete; the file becomes
/// visible only after [`FileWriter::close`]. A writer that is dropped without being closed
/// leaves no file behind.
pub struct FileWriter {
    path: Path,
    schema: SchemaRef,
    writer: ArrowWriter<Vec<u8>>,
    sink: Box<dyn FileSink>,
    count: usize,
}

impl FileWriter {
    pub async fn try_new(
        fs: &dyn FileSystem,
        path: Path,
        schema: SchemaRef,
        options: &FileWriterOptions,
    ) -> OrbitResult<Self> {
        let writer = ArrowWriter::try_new(
            Vec::new(),
            schema.clone(),
            Some(options.properties().clone()),
        )?;
        let sink = fs.open_sink(&path).await?;
        log::trace!("opened parquet writer for {path}");
        Ok(Self {
            path,
            schema,
            writer,
            sink,
            count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Number of rows written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Append `batch`, which must carry exactly the writer's schema.
    pub async fn write(&mut self, batch: &RecordBatch) -> OrbitResult<()> {
        if batch.schema().fields() != self.schema.fields() {
            orbit_bail!(
                SchemaMismatch: "batch written to {} does not match the file schema",
                self.path
            );
        }
        self.writer.write(batch)?;
        self.count += batch.num_rows();
        self.drain().await
    }

    /// Finish the Parquet footer and make the file visible.
    pub async fn close(mut self) -> OrbitResult<WrittenFile> {
        self.drain().await?;
        let tail = self.writer.into_inner()?;
        if !tail.is_empty() {
            self.sink.write_all(Bytes::from(tail)).await?;
        }
        self.sink.flush().await?;
        self.sink.shutdown().await?;
        log::debug!("closed {} with {} rows", self.path, self.count);
        Ok(WrittenFile {
            path: self.path,
            rows: self.count,
        })
    }

    /// Throw the file away.
    pub async fn abort(mut self) -> OrbitResult<()> {
        log::debug!("aborting {}", self.path);
        self.sink.abort().await
    }

    /// Hand the bytes encoded so far to the sink.
    async fn drain(&mut self) -> OrbitResult<()> {
        let encoded = mem::take(self.writer.inner_mut());
        if encoded.is_empty() {
            return Ok(());
        }
        self.sink.write_all(Bytes::from(encoded)).await
    }
}
