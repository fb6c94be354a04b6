//! The distribution index: repositories, the caching HTTP layer, the shared artifact
//! cache, and the package database that merges it all.

mod file_store;
mod html;
mod http;
mod package_database;
mod repository;

pub use file_store::{CacheKey, FileStore};
pub use html::parse_project_info_html;
pub use http::{CacheMode, CacheStatus, Http, HttpRequestError, NotCached};
pub use package_database::{default_cache_dir, PackageDb, DEFAULT_CONCURRENCY};
pub use repository::{HttpRepository, Repository};
