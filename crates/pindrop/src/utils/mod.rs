//! Small IO helpers shared by the cache and HTTP layers.

mod seek_slice;
mod streaming_or_local;

use url::Url;

pub use seek_slice::SeekSlice;
pub use streaming_or_local::{ReadAndSeek, StreamingOrLocal};

/// Keep retrying a certain IO function until it either succeeds or until it doesn't return
/// [`std::io::ErrorKind::Interrupted`].
pub fn retry_interrupted<F, T>(mut f: F) -> std::io::Result<T>
where
    F: FnMut() -> std::io::Result<T>,
{
    loop {
        match f() {
            Ok(result) => return Ok(result),
            Err(err) if err.kind() != std::io::ErrorKind::Interrupted => {
                return Err(err);
            }
            _ => {
                // Otherwise keep looping!
            }
        }
    }
}

/// Normalize the URL of a package index so joining a project name onto it behaves: the
/// path must end with a slash.
pub fn normalize_index_url(mut url: Url) -> Url {
    let path = url.path();
    if !path.ends_with('/') {
        url.set_path(&format!("{path}/"));
    }
    url
}
