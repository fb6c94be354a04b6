use super::file_store::{FileLock, FileStore};
use crate::utils::{ReadAndSeek, SeekSlice, StreamingOrLocal};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use http_cache_semantics::{AfterResponse, BeforeRequest, CachePolicy};
use miette::Diagnostic;
use reqwest::{header::HeaderMap, Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use url::Url;

/// How a response was satisfied with respect to the local cache. Attached to responses as
/// an extension, mostly to make testing possible.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CacheStatus {
    Fresh,
    StaleButValidated,
    StaleAndChanged,
    Miss,
    Uncacheable,
}

/// Caching behavior of a single request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheMode {
    /// Apply regular HTTP caching semantics
    Default,
    /// If we have a valid cache entry, return it; otherwise fail with [`NotCached`]
    OnlyIfCached,
    /// Don't look in the cache, and don't write to it
    NoStore,
}

/// An HTTP client wrapped with an on-disk cache that follows standard HTTP caching
/// semantics, plus bounded retry for transient failures.
#[derive(Debug, Clone)]
pub struct Http {
    client: Client,
    http_cache: Arc<FileStore>,
}

/// Error returned by requests in [`CacheMode::OnlyIfCached`] when the cache has no entry.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("request not in cache, and cache_mode=OnlyIfCached")]
pub struct NotCached;

#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum HttpRequestError {
    /// A transport-level failure that survived the retry budget.
    #[error(transparent)]
    HttpError(#[from] reqwest::Error),

    #[error(transparent)]
    IoError(#[from] io::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    NotCached(#[from] NotCached),
}

impl HttpRequestError {
    /// Whether the failure is worth retrying at a higher level (a fresh run may succeed).
    pub fn is_transient(&self) -> bool {
        match self {
            HttpRequestError::HttpError(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.status().is_some()
            }
            HttpRequestError::IoError(_) => true,
            HttpRequestError::NotCached(_) => false,
        }
    }
}

// The retry policy pip ships: statuses worth a second chance, and exponential sleeps
// (0.25s * 2^n) with a bounded number of attempts.
const RETRY_STATUS: &[u16] = &[500, 503, 520, 527];
const RETRY_SLEEP_MS: &[u64] = &[250, 500, 1000, 2000, 4000];

impl Http {
    /// Constructs a new instance.
    pub fn new(client: Client, http_cache: FileStore) -> Self {
        Http {
            client,
            http_cache: Arc::new(http_cache),
        }
    }

    /// Executes a request, retrying transient transport errors and retryable status codes
    /// with exponential backoff before giving up.
    async fn execute_with_retry(
        &self,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut sleeps = RETRY_SLEEP_MS.iter();
        loop {
            let this_request = request
                .try_clone()
                .expect("bodyless requests are always cloneable");
            let result = self.client.execute(this_request).await;
            let retryable = match &result {
                Ok(response) => RETRY_STATUS.contains(&response.status().as_u16()),
                Err(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            };
            if !retryable {
                return result;
            }
            match sleeps.next() {
                Some(sleep_ms) => {
                    tracing::debug!(url=%request.url(), "transient failure, retrying in {sleep_ms}ms");
                    tokio::time::sleep(Duration::from_millis(*sleep_ms)).await;
                }
                None => return result,
            }
        }
    }

    /// Performs a single request, caching the result if the response allows it.
    pub async fn request(
        &self,
        url: Url,
        method: Method,
        headers: HeaderMap,
        cache_mode: CacheMode,
    ) -> Result<http::Response<StreamingOrLocal>, HttpRequestError> {
        tracing::info!(url=%url, cache_mode=?cache_mode, "executing request");

        let request = self
            .client
            .request(method.clone(), url.clone())
            .headers(headers.clone())
            .build()?;

        if cache_mode == CacheMode::NoStore {
            let response = self.execute_with_retry(request).await?.error_for_status()?;
            let mut response = convert_response(response).map(body_to_streaming_or_local);
            response.extensions_mut().insert(CacheStatus::Uncacheable);
            return Ok(response);
        }

        let key = key_for_request(&url, method, &headers);
        let lock = self.http_cache.lock(&key.as_slice())?;

        if let Some((old_policy, final_url, old_body)) = lock
            .reader()
            .and_then(|reader| read_cache(reader.detach_unlocked()).ok())
        {
            match old_policy.before_request(&request, SystemTime::now()) {
                BeforeRequest::Fresh(parts) => {
                    tracing::debug!(url=%url, "cache entry is fresh");
                    let mut response = http::Response::from_parts(
                        parts,
                        StreamingOrLocal::Local(Box::new(old_body)),
                    );
                    response.extensions_mut().insert(CacheStatus::Fresh);
                    response.extensions_mut().insert(final_url);
                    Ok(response)
                }
                BeforeRequest::Stale {
                    request: new_parts,
                    matches: _,
                } => {
                    if cache_mode == CacheMode::OnlyIfCached {
                        return Err(NotCached.into());
                    }

                    // Revalidate against the origin with the conditional headers the
                    // policy computed.
                    let request = convert_request(&self.client, new_parts)?;
                    let response = self
                        .execute_with_retry(
                            request.try_clone().expect("clone of request cannot fail"),
                        )
                        .await?;
                    let final_url = response.url().clone();

                    match old_policy.after_response(&request, &response, SystemTime::now()) {
                        AfterResponse::NotModified(new_policy, new_parts) => {
                            tracing::debug!(url=%url, "stale, but not modified");
                            let new_body = fill_cache(&new_policy, &final_url, old_body, lock)?;
                            Ok(make_response(
                                new_parts,
                                StreamingOrLocal::Local(Box::new(new_body)),
                                CacheStatus::StaleButValidated,
                                final_url,
                            ))
                        }
                        AfterResponse::Modified(new_policy, parts) => {
                            tracing::debug!(url=%url, "stale and modified");
                            drop(old_body);
                            let new_body = if new_policy.is_storable() {
                                let new_body = fill_cache_async(
                                    &new_policy,
                                    &final_url,
                                    response.bytes_stream(),
                                    lock,
                                )
                                .await?;
                                StreamingOrLocal::Local(Box::new(new_body))
                            } else {
                                lock.remove()?;
                                body_to_streaming_or_local(response.bytes_stream())
                            };
                            Ok(make_response(
                                parts,
                                new_body,
                                CacheStatus::StaleAndChanged,
                                final_url,
                            ))
                        }
                    }
                }
            }
        } else {
            if cache_mode == CacheMode::OnlyIfCached {
                return Err(NotCached.into());
            }

            let response = self
                .execute_with_retry(request.try_clone().expect("failed to clone request?"))
                .await?;

            // A plain 404 is meaningful to callers (the package does not exist); pass it
            // through uncached instead of turning it into an error.
            if response.status() == StatusCode::NOT_FOUND {
                let final_url = response.url().clone();
                let response = convert_response(response).map(body_to_streaming_or_local);
                return Ok(make_response(
                    response.into_parts().0,
                    StreamingOrLocal::Local(Box::new(io::Cursor::new(Vec::new()))),
                    CacheStatus::Uncacheable,
                    final_url,
                ));
            }

            let response = response.error_for_status()?;
            let final_url = response.url().clone();
            let response = convert_response(response);

            let new_policy = CachePolicy::new(&request, &response);
            let (parts, body) = response.into_parts();

            let new_body = if new_policy.is_storable() {
                let new_body = fill_cache_async(&new_policy, &final_url, body, lock).await?;
                StreamingOrLocal::Local(Box::new(new_body))
            } else {
                lock.remove()?;
                body_to_streaming_or_local(body)
            };
            Ok(make_response(parts, new_body, CacheStatus::Miss, final_url))
        }
    }
}

/// Constructs a `http::Response` from parts.
fn make_response(
    parts: http::response::Parts,
    body: StreamingOrLocal,
    cache_status: CacheStatus,
    url: Url,
) -> http::Response<StreamingOrLocal> {
    let mut response = http::Response::from_parts(parts, body);
    response.extensions_mut().insert(cache_status);
    response.extensions_mut().insert(url);
    response
}

/// Constructs a key for a request under which its cache entry is stored.
fn key_for_request(url: &Url, method: Method, headers: &HeaderMap) -> Vec<u8> {
    use http::header::{ACCEPT, CACHE_CONTROL};

    let mut key: Vec<u8> = Default::default();
    let method = method.to_string().into_bytes();
    key.extend(method.len().to_le_bytes());
    key.extend(method);

    // Add the url to the key but ignore the fragments.
    let mut url = url.clone();
    url.set_fragment(None);
    let uri = url.to_string();
    key.extend(uri.len().to_le_bytes());
    key.extend(uri.into_bytes());

    // Headers that influence the response representation take part in the key.
    for header_name in [ACCEPT, CACHE_CONTROL] {
        if let Some(value) = headers.get(&header_name) {
            let header_name = header_name.to_string().into_bytes();
            key.extend(header_name.len().to_le_bytes());
            key.extend(header_name);

            let header_value = value.as_bytes().to_vec();
            key.extend(header_value.len().to_le_bytes());
            key.extend(header_value);
        }
    }

    key
}

#[derive(Serialize, Deserialize)]
struct CacheData {
    policy: CachePolicy,
    url: Url,
}

/// Reads a cached response: the serialized policy header followed by the body.
fn read_cache<R>(mut f: R) -> std::io::Result<(CachePolicy, Url, impl ReadAndSeek)>
where
    R: Read + Seek,
{
    let data: CacheData = ciborium::de::from_reader(&mut f)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let start = f.stream_position()?;
    let end = f.seek(SeekFrom::End(0))?;
    let mut body = SeekSlice::new(f, start, end)?;
    body.rewind()?;
    Ok((data.policy, data.url, body))
}

fn fill_cache<R: Read>(
    policy: &CachePolicy,
    url: &Url,
    mut body: R,
    handle: FileLock,
) -> Result<impl Read + Seek, std::io::Error> {
    let mut cache_writer = handle.begin()?;
    ciborium::ser::into_writer(
        &CacheData {
            policy: policy.clone(),
            url: url.clone(),
        },
        &mut cache_writer,
    )
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let body_start = cache_writer.stream_position()?;
    std::io::copy(&mut body, &mut cache_writer)?;
    drop(body);
    let body_end = cache_writer.stream_position()?;
    let cache_entry = cache_writer.commit()?.detach_unlocked();
    SeekSlice::new(cache_entry, body_start, body_end)
}

async fn fill_cache_async(
    policy: &CachePolicy,
    url: &Url,
    mut body: impl Stream<Item = reqwest::Result<Bytes>> + Send + Unpin,
    handle: FileLock,
) -> Result<impl Read + Seek, std::io::Error> {
    let mut cache_writer = handle.begin()?;
    ciborium::ser::into_writer(
        &CacheData {
            policy: policy.clone(),
            url: url.clone(),
        },
        &mut cache_writer,
    )
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let body_start = cache_writer.stream_position()?;

    while let Some(bytes) = body.next().await {
        cache_writer.write_all(
            bytes
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
                .as_ref(),
        )?;
    }

    let body_end = cache_writer.stream_position()?;
    let cache_entry = cache_writer.commit()?.detach_unlocked();
    SeekSlice::new(cache_entry, body_start, body_end)
}

/// Converts from a `http::request::Parts` into a `reqwest::Request`.
fn convert_request(
    client: &Client,
    parts: http::request::Parts,
) -> Result<reqwest::Request, reqwest::Error> {
    client
        .request(
            parts.method,
            Url::from_str(&parts.uri.to_string()).expect("uris should be the same"),
        )
        .headers(parts.headers)
        .version(parts.version)
        .build()
}

fn convert_response(
    mut response: reqwest::Response,
) -> http::Response<impl Stream<Item = reqwest::Result<Bytes>>> {
    let mut builder = http::Response::builder()
        .version(response.version())
        .status(response.status());

    // Take the headers from the response
    let headers = builder.headers_mut().unwrap();
    *headers = std::mem::take(response.headers_mut());
    std::mem::swap(response.headers_mut(), headers);

    // Take the extensions from the response
    let extensions = builder.extensions_mut().unwrap();
    *extensions = std::mem::take(response.extensions_mut());
    extensions.insert(response.url().clone());

    builder
        .body(response.bytes_stream())
        .expect("building should never fail")
}

fn body_to_streaming_or_local(
    stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + Unpin + 'static,
) -> StreamingOrLocal {
    StreamingOrLocal::Streaming(Box::new(
        stream
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .into_async_read()
            .compat(),
    ))
}
