use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use arrow_array::cast::AsArray;
use arrow_array::types::Int64Type;
use arrow_array::{Array, ArrayRef, BooleanArray, Int64Array, RecordBatch, StringArray};
use orbit_error::{OrbitResult, orbit_err};
use orbit_file::{FileReader, FileReaderOptions};
use orbit_io::FileSystem;
use rustc_hash::FxHashMap;

use crate::manifest::Manifest;
use crate::schema::check_schema;

/// Delete version recorded for deletes that carry no version. Hides every row of the key.
const ALL_VERSIONS: i64 = i64::MAX;
/// Version assumed for rows that carry no version.
const UNVERSIONED_ROW: i64 = i64::MIN;

/// A primary-key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimaryKey {
    Int(i64),
    Str(String),
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        PrimaryKey::Int(value)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        PrimaryKey::Str(value.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        PrimaryKey::Str(value)
    }
}

impl Display for PrimaryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimaryKey::Int(v) => write!(f, "{v}"),
            PrimaryKey::Str(v) => write!(f, "\"{v}\""),
        }
    }
}

/// The primary keys a space has deleted, each with the versions it was deleted at.
///
/// A row `(pk, v)` is hidden when some delete of `pk` has version `d >= v`. Reads pinned to a
/// version only consider deletes with `d` at or below the pin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSet {
    ints: FxHashMap<i64, BTreeSet<i64>>,
    strings: FxHashMap<String, BTreeSet<i64>>,
}

impl DeleteSet {
    /// Replay every delete file referenced by `manifest`.
    pub async fn build(fs: &dyn FileSystem, manifest: &Manifest) -> OrbitResult<Self> {
        let mut deletes = Self::default();
        for path in manifest.delete_files() {
            let reader = FileReader::try_open(fs, path, FileReaderOptions::default())
                .await
                .map_err(|e| e.with_context(format!("reading delete file {path}")))?;
            check_schema(manifest.schema().delete(), reader.schema(), "delete file")?;
            for batch in reader {
                deletes.add(&batch?)?;
            }
        }
        log::debug!(
            "replayed {} delete files into {} keys",
            manifest.delete_files().len(),
            deletes.len()
        );
        Ok(deletes)
    }

    /// Record the deletes in `batch`, whose first column is the primary key and whose optional
    /// second column is the delete version.
    pub fn add(&mut self, batch: &RecordBatch) -> OrbitResult<()> {
        let versions = batch
            .columns()
            .get(1)
            .map(|column| {
                column.as_primitive_opt::<Int64Type>().ok_or_else(|| {
                    orbit_err!(InvalidArgument: "delete version column must be Int64")
                })
            })
            .transpose()?;
        let version_at = |row: usize| match versions {
            Some(versions) if versions.is_valid(row) => versions.value(row),
            _ => ALL_VERSIONS,
        };

        match Keys::try_new(batch.column(0))? {
            Keys::Int(keys) => {
                for (row, key) in keys.iter().enumerate() {
                    let Some(key) = key else { continue };
                    self.ints.entry(key).or_default().insert(version_at(row));
                }
            }
            Keys::Str(keys) => {
                for (row, key) in keys.iter().enumerate() {
                    let Some(key) = key else { continue };
                    if let Some(versions) = self.strings.get_mut(key) {
                        versions.insert(version_at(row));
                    } else {
                        self.strings
                            .insert(key.to_string(), BTreeSet::from([version_at(row)]));
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of deleted keys.
    pub fn len(&self) -> usize {
        self.ints.len() + self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ints.is_empty() && self.strings.is_empty()
    }

    /// Whether the row `(pk, version)` is hidden, as seen by a read pinned at `pin`.
    pub fn contains(&self, pk: &PrimaryKey, version: Option<i64>, pin: Option<i64>) -> bool {
        let versions = match pk {
            PrimaryKey::Int(key) => self.ints.get(key),
            PrimaryKey::Str(key) => self.strings.get(key.as_str()),
        };
        versions.is_some_and(|versions| hides(versions, version, pin))
    }

    /// Visibility of every row in a batch. `true` means the row survives.
    ///
    /// Rows newer than `pin` are hidden as well.
    pub fn visibility(
        &self,
        pks: &ArrayRef,
        versions: Option<&Int64Array>,
        pin: Option<i64>,
    ) -> OrbitResult<BooleanArray> {
        let version_at = |row: usize| versions.filter(|v| v.is_valid(row)).map(|v| v.value(row));
        let newer_than_pin =
            |version: Option<i64>| matches!((version, pin), (Some(v), Some(p)) if v > p);

        let visible: Vec<bool> = match Keys::try_new(pks)? {
            Keys::Int(keys) => keys
                .iter()
                .enumerate()
                .map(|(row, key)| {
                    let version = version_at(row);
                    !newer_than_pin(version)
                        && !key
                            .and_then(|key| self.ints.get(&key))
                            .is_some_and(|deleted| hides(deleted, version, pin))
                })
                .collect(),
            Keys::Str(keys) => keys
                .iter()
                .enumerate()
                .map(|(row, key)| {
                    let version = version_at(row);
                    !newer_than_pin(version)
                        && !key
                            .and_then(|key| self.strings.get(key))
                            .is_some_and(|deleted| hides(deleted, version, pin))
                })
                .collect(),
        };
        Ok(BooleanArray::from(visible))
    }
}

fn hides(deleted: &BTreeSet<i64>, version: Option<i64>, pin: Option<i64>) -> bool {
    let low = version.unwrap_or(UNVERSIONED_ROW);
    let high = pin.unwrap_or(ALL_VERSIONS);
    low <= high && deleted.range(low..=high).next().is_some()
}

enum Keys<'a> {
    Int(&'a Int64Array),
    Str(&'a StringArray),
}

impl<'a> Keys<'a> {
    fn try_new(array: &'a ArrayRef) -> OrbitResult<Self> {
        if let Some(ints) = array.as_primitive_opt::<Int64Type>() {
            return Ok(Keys::Int(ints));
        }
        if let Some(strings) = array.as_string_opt::<i32>() {
            return Ok(Keys::Str(strings));
        }
        Err(orbit_err!(
            InvalidArgument: "primary keys must be Int64 or Utf8, found {}",
            array.data_type()
        ))
    }
}
