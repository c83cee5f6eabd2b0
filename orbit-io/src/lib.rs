//! File system abstraction for Orbit spaces.
//!
//! A space talks to storage only through the [`FileSystem`] trait. Concrete file systems are
//! picked by URI scheme through a [`FileSystemRegistry`]; the default registry knows `file://`
//! and `memory://`, both served by [`object_store`] backends. New backends are added with
//! [`FileSystemRegistry::register`].

pub use fs::*;
pub use object_store::path::Path;
pub use registry::*;
pub use store::*;

mod fs;
mod registry;
mod store;
