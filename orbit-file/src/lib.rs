//! Read and write the Parquet files that hold a space's data and deletes.
//!
//! Every file holds batches of a single Arrow schema. [`FileWriter`] encodes batches with the
//! `parquet` crate and streams the encoded bytes into an [`orbit_io::FileSink`], so a file is
//! only published once it has been closed. [`FileReader`] fetches a file through an
//! [`orbit_io::FileSystem`] and decodes it back into record batches, optionally projected down
//! to a subset of columns.

mod reader;
#[cfg(test)]
mod tests;
mod writer;

pub use reader::*;
pub use writer::*;

/// The extension used for every file written by Orbit.
pub const PARQUET_FILE_EXTENSION: &str = "parquet";
