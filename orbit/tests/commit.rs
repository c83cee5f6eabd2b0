use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrow_array::cast::AsArray;
use arrow_array::types::Int64Type;
use arrow_array::{ArrayRef, Int64Array, RecordBatch};
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::memory::InMemory;
use orbit::{
    MANIFEST_FILE, MANIFEST_TMP_FILE, Manifest, ReadOption, SequentialPathGenerator, Space,
    SpaceOpenOptions, SpaceOption, WriteOption,
};
use orbit_error::{OrbitResult, orbit_bail};
use orbit_io::{
    FileSink, FileSystem, FileSystemFactory, FileSystemRegistry, ObjectStoreFileSystem, Path,
};
use url::Url;

/// Delegates to an in-memory store, failing renames or deletes on demand.
#[derive(Debug)]
struct FaultyFileSystem {
    inner: ObjectStoreFileSystem,
    fail_rename: AtomicBool,
    fail_delete: AtomicBool,
}

impl FaultyFileSystem {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: ObjectStoreFileSystem::new(Arc::new(InMemory::new())),
            fail_rename: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl FileSystem for FaultyFileSystem {
    async fn read(&self, path: &Path) -> OrbitResult<Bytes> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &Path, bytes: Bytes) -> OrbitResult<()> {
        self.inner.write(path, bytes).await
    }

    async fn open_sink(&self, path: &Path) -> OrbitResult<Box<dyn FileSink>> {
        self.inner.open_sink(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> OrbitResult<()> {
        if self.fail_rename.load(Ordering::SeqCst) {
            orbit_bail!("injected rename failure for {from}");
        }
        self.inner.rename(from, to).await
    }

    async fn delete(&self, path: &Path) -> OrbitResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            orbit_bail!("injected delete failure for {path}");
        }
        self.inner.delete(path).await
    }

    async fn exists(&self, path: &Path) -> OrbitResult<bool> {
        self.inner.exists(path).await
    }
}

#[derive(Debug)]
struct Fixed(Arc<FaultyFileSystem>);

impl FileSystemFactory for Fixed {
    fn build(&self, _url: &Url) -> OrbitResult<Arc<dyn FileSystem>> {
        Ok(self.0.clone())
    }
}

fn schema() -> SchemaRef {
    ids(&[]).schema()
}

fn ids(values: &[i64]) -> RecordBatch {
    RecordBatch::try_from_iter([(
        "id",
        Arc::new(Int64Array::from(values.to_vec())) as ArrayRef,
    )])
    .unwrap()
}

async fn open(fs: &Arc<FaultyFileSystem>) -> Space {
    let registry = FileSystemRegistry::empty();
    registry.register("faulty", Arc::new(Fixed(fs.clone())));
    SpaceOpenOptions::new(schema(), SpaceOption::new("faulty://space", "id"))
        .with_registry(registry)
        .with_path_generator(Arc::new(SequentialPathGenerator::default()))
        .open()
        .await
        .unwrap()
}

async fn write(space: &Space, values: &[i64]) -> OrbitResult<()> {
    space
        .write(
            futures::stream::iter([Ok(ids(values))]),
            &WriteOption::default(),
        )
        .await
}

async fn read(space: &Space) -> Vec<i64> {
    let batches: Vec<RecordBatch> = space
        .read(ReadOption::default())
        .unwrap()
        .into_stream()
        .try_collect()
        .await
        .unwrap();
    batches
        .iter()
        .flat_map(|b| b.column(0).as_primitive::<Int64Type>().values().to_vec())
        .collect()
}

#[tokio::test]
async fn failed_rename_keeps_the_previous_manifest() {
    let fs = FaultyFileSystem::new();
    let space = open(&fs).await;
    write(&space, &[1, 2]).await.unwrap();
    let committed = fs.read(&Path::from(MANIFEST_FILE)).await.unwrap();

    fs.fail_rename.store(true, Ordering::SeqCst);
    assert!(write(&space, &[3]).await.is_err());
    assert!(
        space
            .delete(futures::stream::iter([Ok(ids(&[1]))]))
            .await
            .is_err()
    );

    assert_eq!(fs.read(&Path::from(MANIFEST_FILE)).await.unwrap(), committed);
    assert_eq!(space.manifest().version(), 1);
    assert_eq!(read(&space).await, vec![1, 2]);

    fs.fail_rename.store(false, Ordering::SeqCst);
    let reopened = open(&fs).await;
    assert_eq!(reopened.manifest().version(), 1);
    assert_eq!(read(&reopened).await, vec![1, 2]);
}

#[tokio::test]
async fn failed_cleanup_still_commits() {
    let fs = FaultyFileSystem::new();
    let space = open(&fs).await;

    fs.fail_delete.store(true, Ordering::SeqCst);
    write(&space, &[1]).await.unwrap();

    assert_eq!(space.manifest().version(), 1);
    let loaded = Manifest::load(fs.as_ref()).await.unwrap().unwrap();
    assert_eq!(loaded.scalar_files().len(), 1);
    assert_eq!(read(&space).await, vec![1]);
}

#[tokio::test]
async fn stale_temp_manifest_is_ignored() {
    let fs = FaultyFileSystem::new();
    fs.write(&Path::from(MANIFEST_TMP_FILE), Bytes::from_static(b"garbage"))
        .await
        .unwrap();

    let space = open(&fs).await;
    assert_eq!(space.manifest().version(), 0);
    write(&space, &[5]).await.unwrap();

    assert!(!fs.exists(&Path::from(MANIFEST_TMP_FILE)).await.unwrap());
    assert_eq!(read(&open(&fs).await).await, vec![5]);
}

#[tokio::test]
async fn corrupt_manifest_is_reported() {
    let fs = FaultyFileSystem::new();
    fs.write(&Path::from(MANIFEST_FILE), Bytes::from_static(b"{}"))
        .await
        .unwrap();

    let registry = FileSystemRegistry::empty();
    registry.register("faulty", Arc::new(Fixed(fs.clone())));
    let err = SpaceOpenOptions::new(schema(), SpaceOption::new("faulty://space", "id"))
        .with_registry(registry)
        .open()
        .await
        .unwrap_err();
    assert!(matches!(err, orbit_error::OrbitError::ManifestCorrupt(..)), "{err}");
}

#[tokio::test]
async fn missing_data_files_fail_reads() {
    let fs = FaultyFileSystem::new();
    let space = open(&fs).await;
    write(&space, &[1]).await.unwrap();

    let path = space.manifest().scalar_files()[0].clone();
    fs.delete(&path).await.unwrap();

    let mut reader = space.read(ReadOption::default()).unwrap();
    let err = reader.next_batch().await.unwrap_err();
    assert!(err.is_not_found(), "{err}");
}
