use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use orbit_file::PARQUET_FILE_EXTENSION;
use orbit_io::Path;
use uuid::Uuid;

/// Where the committed manifest lives, relative to the space root.
pub const MANIFEST_FILE: &str = "_manifest";
/// Where a manifest is staged before it is renamed onto [`MANIFEST_FILE`].
pub const MANIFEST_TMP_FILE: &str = "_manifest.tmp";

pub fn manifest_path() -> Path {
    Path::from(MANIFEST_FILE)
}

pub fn manifest_tmp_path() -> Path {
    Path::from(MANIFEST_TMP_FILE)
}

/// The kinds of files a space writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Scalar,
    Vector,
    Delete,
}

impl FileKind {
    /// The directory, relative to the space root, holding files of this kind.
    pub fn dir(self) -> &'static str {
        match self {
            FileKind::Scalar => "scalar",
            FileKind::Vector => "vector",
            FileKind::Delete => "delete",
        }
    }
}

/// Hands out a fresh path for every file a space creates.
///
/// Paths must never repeat for the lifetime of the space's storage, across processes.
pub trait PathGenerator: Debug + Send + Sync {
    fn next_path(&self, kind: FileKind) -> Path;
}

/// Random v4 UUID file names. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidPathGenerator;

impl PathGenerator for UuidPathGenerator {
    fn next_path(&self, kind: FileKind) -> Path {
        Path::from(format!(
            "{}/{}.{PARQUET_FILE_EXTENSION}",
            kind.dir(),
            Uuid::new_v4()
        ))
    }
}

/// Numbered file names from a counter, for deterministic layouts in tests.
///
/// Only unique within one generator; reopening a space needs a generator that starts past the
/// numbers already used.
#[derive(Debug, Default)]
pub struct SequentialPathGenerator {
    next: AtomicU64,
}

impl SequentialPathGenerator {
    pub fn starting_at(next: u64) -> Self {
        Self {
            next: AtomicU64::new(next),
        }
    }
}

impl PathGenerator for SequentialPathGenerator {
    fn next_path(&self, kind: FileKind) -> Path {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        Path::from(format!("{}/{id:08}.{PARQUET_FILE_EXTENSION}", kind.dir()))
    }
}
