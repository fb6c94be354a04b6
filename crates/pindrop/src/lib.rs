//! Pindrop resolves the transitive dependency closure of a set of Python package
//! requirements against one or more package indexes, without building or installing
//! anything, for a caller-described interpreter and operating system that need not match
//! the host. It produces a flat set of pinned `{name, version}` selections and the
//! dependency tree rooted at each input requirement.
//!
//! This library is not an installer: it only ever reads the metadata file out of an
//! artifact, never unpacks or executes one.

#![deny(missing_docs)]

pub mod artifacts;
pub mod index;
pub mod resolve;
pub mod tags;
pub mod types;
pub mod utils;

pub use resolve::{resolve, Resolution, ResolveError, ResolveOptions, TargetEnv};
pub use tags::Os;
pub use utils::normalize_index_url;
