use std::sync::Arc;

use arrow_schema::{Schema, SchemaRef};
use bytes::Bytes;
use itertools::Itertools;
use orbit_error::{OrbitResult, orbit_bail, orbit_err};
use orbit_io::{FileSystem, Path};
use serde::{Deserialize, Serialize};

use crate::SpaceOption;
use crate::path::{manifest_path, manifest_tmp_path};
use crate::schema::{SpaceSchema, schemas_match};

/// Version of the manifest encoding written by this crate.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// The durable, versioned record of a space: its schemas, options and data files.
///
/// Scalar and vector files pair up by index; the `i`th vector file holds the vector column of
/// the rows in the `i`th scalar file, in the same order. A space without a vector column has no
/// vector files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    version: u64,
    option: SpaceOption,
    schema: SpaceSchema,
    scalar_files: Vec<Path>,
    vector_files: Vec<Path>,
    delete_files: Vec<Path>,
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    format_version: u32,
    version: u64,
    option: SpaceOption,
    schema: Schema,
    scalar_schema: Schema,
    vector_schema: Schema,
    delete_schema: Schema,
    scalar_files: Vec<String>,
    vector_files: Vec<String>,
    delete_files: Vec<String>,
}

impl Manifest {
    /// An empty manifest for a new space. Nothing is written until [`Manifest::commit`].
    pub fn try_new(schema: SchemaRef, option: SpaceOption) -> OrbitResult<Self> {
        let schema = SpaceSchema::try_new(schema, &option)?;
        Ok(Self {
            version: 0,
            option,
            schema,
            scalar_files: Vec::new(),
            vector_files: Vec::new(),
            delete_files: Vec::new(),
        })
    }

    /// Load the committed manifest, or `None` when the space has never been committed.
    pub async fn load(fs: &dyn FileSystem) -> OrbitResult<Option<Self>> {
        let bytes = match fs.read(&manifest_path()).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let manifest = Self::from_bytes(&bytes)?;
        log::debug!(
            "loaded manifest version {} with {} data and {} delete files",
            manifest.version,
            manifest.scalar_files.len(),
            manifest.delete_files.len()
        );
        Ok(Some(manifest))
    }

    /// Number of successful commits behind this manifest.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn option(&self) -> &SpaceOption {
        &self.option
    }

    pub fn schema(&self) -> &SpaceSchema {
        &self.schema
    }

    pub fn scalar_files(&self) -> &[Path] {
        &self.scalar_files
    }

    pub fn vector_files(&self) -> &[Path] {
        &self.vector_files
    }

    pub fn delete_files(&self) -> &[Path] {
        &self.delete_files
    }

    /// Append data files. `vector` must pair up with `scalar`, or be empty when the space has no
    /// vector column.
    pub fn add_data_files(&mut self, scalar: Vec<Path>, vector: Vec<Path>) -> OrbitResult<()> {
        let expected = if self.schema.has_vector() {
            scalar.len()
        } else {
            0
        };
        if vector.len() != expected {
            orbit_bail!(
                InvalidArgument: "{} scalar files given with {} vector files",
                scalar.len(),
                vector.len()
            );
        }
        self.scalar_files.extend(scalar);
        self.vector_files.extend(vector);
        Ok(())
    }

    pub fn add_delete_file(&mut self, path: Path) {
        self.delete_files.push(path);
    }

    /// Publish this manifest as the space's current state.
    ///
    /// The encoded manifest is staged at a temporary path and then renamed over the committed
    /// one, so readers observe either the previous manifest or this one in full. On success the
    /// manifest version is incremented; on failure the manifest is unchanged and the committed
    /// manifest is untouched.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(version = self.version + 1)))]
    pub async fn commit(&mut self, fs: &dyn FileSystem) -> OrbitResult<()> {
        let version = self.version + 1;
        let encoded = Bytes::from(serde_json::to_vec(&self.to_file(version))?);
        let tmp = manifest_tmp_path();

        let mut sink = fs.open_sink(&tmp).await?;
        let staged = async {
            sink.write_all(encoded).await?;
            sink.flush().await?;
            sink.shutdown().await
        }
        .await;
        if let Err(e) = staged {
            if let Err(abort) = sink.abort().await {
                log::warn!("failed to abort staged manifest {tmp}: {abort}");
            }
            return Err(e.with_context("staging manifest"));
        }

        fs.rename(&tmp, &manifest_path())
            .await
            .map_err(|e| e.with_context("publishing manifest"))?;
        self.version = version;

        match fs.delete(&tmp).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => log::warn!("failed to clean up {tmp}: {e}"),
        }
        log::debug!("committed manifest version {version}");
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> OrbitResult<Self> {
        let file: ManifestFile = serde_json::from_slice(bytes)
            .map_err(|e| orbit_err!(ManifestCorrupt: "cannot decode manifest: {e}"))?;
        Self::from_file(file)
    }

    fn to_file(&self, version: u64) -> ManifestFile {
        let paths = |paths: &[Path]| paths.iter().map(ToString::to_string).collect_vec();
        ManifestFile {
            format_version: MANIFEST_FORMAT_VERSION,
            version,
            option: self.option.clone(),
            schema: self.schema.full().as_ref().clone(),
            scalar_schema: self.schema.scalar().as_ref().clone(),
            vector_schema: self.schema.vector().as_ref().clone(),
            delete_schema: self.schema.delete().as_ref().clone(),
            scalar_files: paths(&self.scalar_files),
            vector_files: paths(&self.vector_files),
            delete_files: paths(&self.delete_files),
        }
    }

    fn from_file(file: ManifestFile) -> OrbitResult<Self> {
        if file.format_version > MANIFEST_FORMAT_VERSION {
            orbit_bail!(
                ManifestCorrupt: "unsupported manifest format version {}",
                file.format_version
            );
        }

        let schema = SpaceSchema::try_new(Arc::new(file.schema), &file.option)
            .map_err(|e| orbit_err!(ManifestCorrupt: "invalid space definition: {e}"))?;
        for (stored, derived, name) in [
            (&file.scalar_schema, schema.scalar(), "scalar"),
            (&file.vector_schema, schema.vector(), "vector"),
            (&file.delete_schema, schema.delete(), "delete"),
        ] {
            if !schemas_match(derived, stored) {
                orbit_bail!(ManifestCorrupt: "stored {name} schema disagrees with the space schema");
            }
        }

        let expected_vectors = if schema.has_vector() {
            file.scalar_files.len()
        } else {
            0
        };
        if file.vector_files.len() != expected_vectors {
            orbit_bail!(
                ManifestCorrupt: "{} scalar files recorded with {} vector files",
                file.scalar_files.len(),
                file.vector_files.len()
            );
        }

        Ok(Self {
            version: file.version,
            option: file.option,
            schema,
            scalar_files: parse_paths(file.scalar_files)?,
            vector_files: parse_paths(file.vector_files)?,
            delete_files: parse_paths(file.delete_files)?,
        })
    }
}

fn parse_paths(paths: Vec<String>) -> OrbitResult<Vec<Path>> {
    paths
        .into_iter()
        .map(|p| {
            Path::parse(&p)
                .map_err(|e| orbit_err!(ManifestCorrupt: "invalid file path '{p}': {e}"))
        })
        .try_collect()
}
