use orbit_error::{OrbitResult, orbit_bail};
use orbit_expr::Filter;
use serde::{Deserialize, Serialize};

/// Per-space configuration, fixed when the space is created and persisted in its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceOption {
    /// Where the space lives, e.g. `file:///data/space` or `memory://test`.
    pub uri: String,
    /// The primary-key column. Must be `Int64` or `Utf8` and never null.
    pub primary_column: String,
    /// The `Int64` version column used for deletes and snapshot reads.
    pub version_column: Option<String>,
    /// The fixed-length column stored in the vector partition.
    pub vector_column: Option<String>,
}

impl SpaceOption {
    pub fn new(uri: impl Into<String>, primary_column: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            primary_column: primary_column.into(),
            version_column: None,
            vector_column: None,
        }
    }

    pub fn with_version_column(mut self, column: impl Into<String>) -> Self {
        self.version_column = Some(column.into());
        self
    }

    pub fn with_vector_column(mut self, column: impl Into<String>) -> Self {
        self.vector_column = Some(column.into());
        self
    }
}

/// Options for [`Space::write`](crate::Space::write).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOption {
    /// Upper bound on the rows stored in one data file.
    pub max_record_per_file: usize,
}

impl Default for WriteOption {
    fn default() -> Self {
        Self {
            max_record_per_file: 1 << 20,
        }
    }
}

impl WriteOption {
    pub fn new(max_record_per_file: usize) -> Self {
        Self {
            max_record_per_file,
        }
    }

    pub(crate) fn validate(&self) -> OrbitResult<()> {
        if self.max_record_per_file == 0 {
            orbit_bail!(InvalidArgument: "max_record_per_file must be positive");
        }
        Ok(())
    }
}

/// Options for [`Space::read`](crate::Space::read).
#[derive(Debug, Clone, Default)]
pub struct ReadOption {
    /// Rows must pass every filter.
    pub filters: Vec<Filter>,
    /// Columns to return, in order. Empty means every column of the space.
    pub columns: Vec<String>,
    /// Stop after this many rows.
    pub limit: Option<usize>,
    /// Read the snapshot as of this version.
    pub version: Option<i64>,
}

impl ReadOption {
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Cap the number of rows returned. Zero or negative means unbounded.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = usize::try_from(limit).ok().filter(|l| *l > 0);
        self
    }

    /// Pin the read to a version. Zero or negative means the latest data.
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = (version > 0).then_some(version);
        self
    }
}
