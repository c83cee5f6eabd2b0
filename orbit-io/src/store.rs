use std::fmt::{Debug, Display, Formatter};
use std::mem;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload, WriteMultipart};
use orbit_error::{OrbitError, OrbitResult, orbit_err};

use crate::{FileSink, FileSystem};

/// Chunk size used for multipart uploads.
const MULTIPART_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// A [`FileSystem`] backed by any [`ObjectStore`].
#[derive(Clone)]
pub struct ObjectStoreFileSystem {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreFileSystem {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

impl Debug for ObjectStoreFileSystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreFileSystem")
            .field("store", &self.store.to_string())
            .finish()
    }
}

impl Display for ObjectStoreFileSystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectStoreFileSystem({})", self.store)
    }
}

fn map_store_error(operation: &'static str, path: &Path, err: object_store::Error) -> OrbitError {
    match err {
        object_store::Error::NotFound { .. } => orbit_err!(NotFound: "{path}"),
        err => OrbitError::io_failure(operation, path, err),
    }
}

#[async_trait]
impl FileSystem for ObjectStoreFileSystem {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(path = %path)))]
    async fn read(&self, path: &Path) -> OrbitResult<Bytes> {
        let result = self
            .store
            .get(path)
            .await
            .map_err(|e| map_store_error("read", path, e))?;
        result
            .bytes()
            .await
            .map_err(|e| map_store_error("read", path, e))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(path = %path)))]
    async fn write(&self, path: &Path, bytes: Bytes) -> OrbitResult<()> {
        self.store
            .put(path, PutPayload::from(bytes))
            .await
            .map_err(|e| map_store_error("write", path, e))?;
        Ok(())
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(path = %path)))]
    async fn open_sink(&self, path: &Path) -> OrbitResult<Box<dyn FileSink>> {
        let upload = self
            .store
            .put_multipart(path)
            .await
            .map_err(|e| map_store_error("open", path, e))?;
        log::trace!("opened multipart sink for {path}");
        Ok(Box::new(ObjectStoreSink::new(
            path.clone(),
            WriteMultipart::new_with_chunk_size(upload, MULTIPART_CHUNK_SIZE),
        )))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(from = %from, to = %to)))]
    async fn rename(&self, from: &Path, to: &Path) -> OrbitResult<()> {
        self.store
            .rename(from, to)
            .await
            .map_err(|e| map_store_error("rename", from, e))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(path = %path)))]
    async fn delete(&self, path: &Path) -> OrbitResult<()> {
        self.store
            .delete(path)
            .await
            .map_err(|e| map_store_error("delete", path, e))
    }

    async fn exists(&self, path: &Path) -> OrbitResult<bool> {
        match self.store.head(path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_store_error("head", path, e)),
        }
    }
}

/// A [`FileSink`] that streams into an object store multipart upload.
pub struct ObjectStoreSink {
    path: Path,
    multipart: Option<WriteMultipart>,
}

impl ObjectStoreSink {
    pub fn new(path: Path, multipart: WriteMultipart) -> Self {
        Self {
            path,
            multipart: Some(multipart),
        }
    }

    fn multipart(&mut self) -> OrbitResult<&mut WriteMultipart> {
        let path = &self.path;
        self.multipart
            .as_mut()
            .ok_or_else(|| orbit_err!("multipart upload for {path} already finished"))
    }
}

#[async_trait]
impl FileSink for ObjectStoreSink {
    async fn write_all(&mut self, bytes: Bytes) -> OrbitResult<()> {
        self.multipart()?.write(&bytes);
        Ok(())
    }

    async fn flush(&mut self) -> OrbitResult<()> {
        let path = self.path.clone();
        self.multipart()?
            .wait_for_capacity(0)
            .await
            .map_err(|e| map_store_error("flush", &path, e))
    }

    async fn shutdown(&mut self) -> OrbitResult<()> {
        let mp = mem::take(&mut self.multipart)
            .ok_or_else(|| orbit_err!("multipart upload for {} already finished", self.path))?;
        mp.finish()
            .await
            .map_err(|e| map_store_error("close", &self.path, e))?;
        Ok(())
    }

    async fn abort(&mut self) -> OrbitResult<()> {
        match mem::take(&mut self.multipart) {
            Some(mp) => mp
                .abort()
                .await
                .map_err(|e| map_store_error("abort", &self.path, e)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    fn memory_fs() -> ObjectStoreFileSystem {
        ObjectStoreFileSystem::new(Arc::new(InMemory::new()))
    }

    #[tokio::test]
    async fn sink_is_visible_after_shutdown() {
        let fs = memory_fs();
        let path = Path::from("data/a.bin");

        let mut sink = fs.open_sink(&path).await.unwrap();
        sink.write_all(Bytes::from_static(b"hello ")).await.unwrap();
        sink.write_all(Bytes::from_static(b"world")).await.unwrap();
        sink.flush().await.unwrap();
        sink.shutdown().await.unwrap();

        assert_eq!(fs.read(&path).await.unwrap(), Bytes::from_static(b"hello world"));
        assert!(sink.shutdown().await.is_err());
    }

    #[tokio::test]
    async fn aborted_sink_leaves_nothing() {
        let fs = memory_fs();
        let path = Path::from("data/b.bin");

        let mut sink = fs.open_sink(&path).await.unwrap();
        sink.write_all(Bytes::from_static(b"partial")).await.unwrap();
        sink.abort().await.unwrap();

        assert!(!fs.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn missing_files_are_not_found() {
        let fs = memory_fs();
        let err = fs.read(&Path::from("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn rename_replaces_target() {
        let fs = memory_fs();
        let tmp = Path::from("_manifest.tmp");
        let target = Path::from("_manifest");

        fs.write(&target, Bytes::from_static(b"old")).await.unwrap();
        fs.write(&tmp, Bytes::from_static(b"new")).await.unwrap();
        fs.rename(&tmp, &target).await.unwrap();

        assert_eq!(fs.read(&target).await.unwrap(), Bytes::from_static(b"new"));
        assert!(!fs.exists(&tmp).await.unwrap());
    }
}
