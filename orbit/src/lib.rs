//! Orbit stores tables of Arrow record batches as Parquet files under a URI and tracks them with
//! an atomically committed manifest.
//!
//! A [`Space`] has a fixed schema with a primary-key column, an optional version column and an
//! optional fixed-length vector column. Writes split every row into a scalar part and a vector
//! part stored in paired files; deletes record `(primary key, version)` pairs in delete files;
//! reads stitch the two parts back together and hide deleted rows.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use arrow_array::{ArrayRef, Int64Array, RecordBatch};
//! # use futures::TryStreamExt;
//! # use orbit::{ReadOption, Space, SpaceOption, WriteOption};
//! # async fn run() -> orbit_error::OrbitResult<()> {
//! let batch = RecordBatch::try_from_iter([(
//!     "id",
//!     Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef,
//! )])?;
//! let space = Space::open(batch.schema(), SpaceOption::new("file:///tmp/space", "id")).await?;
//! space
//!     .write(futures::stream::iter([Ok(batch)]), &WriteOption::default())
//!     .await?;
//!
//! let batches: Vec<RecordBatch> = space
//!     .read(ReadOption::default())?
//!     .into_stream()
//!     .try_collect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub use delete_set::*;
pub use manifest::*;
pub use options::*;
pub use orbit_expr as expr;
pub use path::*;
pub use reader::*;
pub use schema::*;
pub use space::*;

mod delete_set;
mod manifest;
mod options;
mod path;
mod reader;
mod schema;
mod space;
mod writer;
