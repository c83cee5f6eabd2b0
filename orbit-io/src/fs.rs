use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path;
use orbit_error::OrbitResult;

/// The file system capability a space is built on.
///
/// Paths are relative to the root the file system was resolved for. Implementations must make
/// [`FileSystem::rename`] onto an existing path atomic: an observer reading `to` sees either the
/// old or the new contents, never a mix.
#[async_trait]
pub trait FileSystem: Debug + Send + Sync {
    /// Read the whole file at `path`.
    ///
    /// A missing file is reported as [`OrbitError::NotFound`](orbit_error::OrbitError::NotFound).
    async fn read(&self, path: &Path) -> OrbitResult<Bytes>;

    /// Create or replace the file at `path` in a single operation.
    async fn write(&self, path: &Path, bytes: Bytes) -> OrbitResult<()>;

    /// Open a streaming sink. The file becomes visible at `path` once the sink is shut down.
    async fn open_sink(&self, path: &Path) -> OrbitResult<Box<dyn FileSink>>;

    /// Move `from` onto `to`, replacing `to` if it exists.
    async fn rename(&self, from: &Path, to: &Path) -> OrbitResult<()>;

    /// Delete the file at `path`.
    async fn delete(&self, path: &Path) -> OrbitResult<()>;

    /// Returns true if a file exists at `path`.
    async fn exists(&self, path: &Path) -> OrbitResult<bool>;
}

/// A write-once output stream opened by [`FileSystem::open_sink`].
#[async_trait]
pub trait FileSink: Send {
    /// Append `bytes` to the sink.
    async fn write_all(&mut self, bytes: Bytes) -> OrbitResult<()>;

    /// Wait until all bytes handed to the sink so far have been accepted by the backend.
    async fn flush(&mut self) -> OrbitResult<()>;

    /// Complete the file. Calling any method after shutdown is an error.
    async fn shutdown(&mut self) -> OrbitResult<()>;

    /// Discard everything written so far; the file never becomes visible.
    async fn abort(&mut self) -> OrbitResult<()>;
}
