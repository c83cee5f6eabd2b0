use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};

use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use orbit_error::{OrbitError, OrbitResult, orbit_err};
use parking_lot::{Mutex, RwLock};
use url::Url;

use crate::{FileSystem, ObjectStoreFileSystem};

/// Builds a [`FileSystem`] for URIs of one scheme.
pub trait FileSystemFactory: Debug + Send + Sync {
    /// Create the file system rooted at `url`, using whatever options the URI carries.
    fn build(&self, url: &Url) -> OrbitResult<Arc<dyn FileSystem>>;
}

/// Maps URI schemes to the factories that build their file systems.
///
/// The registry is cheap to clone; clones share their factories.
#[derive(Debug, Clone)]
pub struct FileSystemRegistry {
    factories: Arc<RwLock<HashMap<String, Arc<dyn FileSystemFactory>>>>,
}

/// The registry used when a space is opened without an explicit one.
pub static DEFAULT_FILE_SYSTEMS: LazyLock<FileSystemRegistry> =
    LazyLock::new(FileSystemRegistry::default);

impl Default for FileSystemRegistry {
    fn default() -> Self {
        let registry = Self::empty();
        registry.register("file", Arc::new(LocalFileSystemFactory));
        registry.register("memory", Arc::new(InMemoryFileSystemFactory::default()));
        registry
    }
}

impl FileSystemRegistry {
    /// A registry without any backends.
    pub fn empty() -> Self {
        Self {
            factories: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `factory` for `scheme`, returning the factory it replaced.
    pub fn register(
        &self,
        scheme: impl Into<String>,
        factory: Arc<dyn FileSystemFactory>,
    ) -> Option<Arc<dyn FileSystemFactory>> {
        self.factories.write().insert(scheme.into(), factory)
    }

    /// The registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.factories.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Resolve `uri` to the file system rooted at it.
    pub fn resolve(&self, uri: &str) -> OrbitResult<Arc<dyn FileSystem>> {
        let url = Url::parse(uri)?;
        self.resolve_url(&url)
    }

    pub fn resolve_url(&self, url: &Url) -> OrbitResult<Arc<dyn FileSystem>> {
        let factory = self
            .factories
            .read()
            .get(url.scheme())
            .cloned()
            .ok_or_else(|| orbit_err!(UnsupportedScheme: "Unsupported scheme: {}", url.scheme()))?;
        log::debug!("resolving {url}");
        factory.build(url)
    }
}

/// `file://` URIs: a local directory, created if it does not exist yet.
#[derive(Debug, Default)]
pub struct LocalFileSystemFactory;

impl FileSystemFactory for LocalFileSystemFactory {
    fn build(&self, url: &Url) -> OrbitResult<Arc<dyn FileSystem>> {
        let root = url
            .to_file_path()
            .map_err(|_| orbit_err!(InvalidArgument: "{url} is not a local directory path"))?;
        std::fs::create_dir_all(&root)
            .map_err(|e| OrbitError::io_failure("create", root.display(), e))?;
        let store = LocalFileSystem::new_with_prefix(&root)
            .map_err(|e| OrbitError::io_failure("open", root.display(), e))?;
        log::trace!("using LocalFileSystem rooted at {}", root.display());
        Ok(Arc::new(ObjectStoreFileSystem::new(Arc::new(store))))
    }
}

/// `memory://<name>` URIs: an in-process store, shared by every resolution of the same name.
#[derive(Debug, Default)]
pub struct InMemoryFileSystemFactory {
    stores: Mutex<HashMap<String, Arc<InMemory>>>,
}

impl FileSystemFactory for InMemoryFileSystemFactory {
    fn build(&self, url: &Url) -> OrbitResult<Arc<dyn FileSystem>> {
        let name = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
        let store = self
            .stores
            .lock()
            .entry(name)
            .or_insert_with(|| Arc::new(InMemory::new()))
            .clone();
        log::trace!("using InMemory object store for {url}");
        Ok(Arc::new(ObjectStoreFileSystem::new(store)))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use object_store::path::Path;
    use orbit_error::OrbitError;
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[rstest]
    #[case("s3://bucket/space", "s3")]
    #[case("hdfs://namenode/space", "hdfs")]
    #[case("gs://bucket/space", "gs")]
    fn unknown_schemes_are_rejected(#[case] uri: &str, #[case] scheme: &str) {
        let err = FileSystemRegistry::default().resolve(uri).unwrap_err();
        assert!(matches!(err, OrbitError::UnsupportedScheme(..)));
        assert!(err.to_string().contains(&format!("Unsupported scheme: {scheme}")));
    }

    #[test]
    fn default_schemes() {
        assert_eq!(FileSystemRegistry::default().schemes(), vec!["file", "memory"]);
    }

    #[tokio::test]
    async fn local_file_system_is_rooted_at_uri() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("space");
        let url = Url::from_directory_path(&root).unwrap();

        let fs = FileSystemRegistry::default().resolve(url.as_str()).unwrap();
        fs.write(&Path::from("a/b.bin"), Bytes::from_static(b"abc"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(root.join("a").join("b.bin")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn memory_stores_are_shared_by_name() {
        let registry = FileSystemRegistry::default();
        let path = Path::from("x");

        let first = registry.resolve("memory://shared").unwrap();
        first.write(&path, Bytes::from_static(b"1")).await.unwrap();

        let again = registry.resolve("memory://shared").unwrap();
        assert!(again.exists(&path).await.unwrap());

        let other = registry.resolve("memory://other").unwrap();
        assert!(!other.exists(&path).await.unwrap());
    }

    #[derive(Debug)]
    struct Refusing;

    impl FileSystemFactory for Refusing {
        fn build(&self, url: &Url) -> OrbitResult<Arc<dyn FileSystem>> {
            Err(orbit_err!(InvalidArgument: "refusing {url}"))
        }
    }

    #[test]
    fn registered_factories_are_used() {
        let registry = FileSystemRegistry::empty();
        assert!(registry.register("hdfs", Arc::new(Refusing)).is_none());

        let err = registry.resolve("hdfs://namenode/space").unwrap_err();
        assert!(matches!(err, OrbitError::InvalidArgument(..)));
    }
}
