use super::html;
use super::http::{CacheMode, Http};
use crate::types::{ArtifactInfo, NormalizedPackageName, ProjectInfo, RawProjectInfo};
use crate::utils::normalize_index_url;
use async_trait::async_trait;
use http::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL};
use http::Method;
use miette::{IntoDiagnostic, WrapErr};
use reqwest::StatusCode;
use url::Url;

/// A source of distributions: one package index. The resolver consults repositories in
/// their declared priority order and never queries the same name twice per run.
#[async_trait]
pub trait Repository: Send + Sync {
    /// A human readable identity, used in logs and error messages.
    fn name(&self) -> String;

    /// Lists everything the repository publishes for the given package, or `None` when the
    /// repository does not know the package at all.
    async fn list(&self, name: &NormalizedPackageName) -> miette::Result<Option<ProjectInfo>>;

    /// Fetches the standalone metadata file of an artifact (PEP 658), when the repository
    /// offers one. `Ok(None)` means "not offered"; the caller falls back to downloading
    /// the artifact itself.
    async fn fetch_metadata(&self, artifact: &ArtifactInfo) -> miette::Result<Option<Vec<u8>>>;

    /// Fetches the bytes of an artifact, or `None` when this repository cannot provide it.
    async fn fetch_artifact(
        &self,
        artifact: &ArtifactInfo,
    ) -> miette::Result<Option<crate::utils::StreamingOrLocal>>;
}

/// A repository backed by a PEP 503 / PEP 691 simple index over HTTP.
pub struct HttpRepository {
    http: Http,
    index_url: Url,
}

impl HttpRepository {
    /// Creates a repository for the index rooted at `index_url`, e.g.
    /// `https://pypi.org/simple/`.
    pub fn new(http: Http, index_url: Url) -> Self {
        Self {
            http,
            index_url: normalize_index_url(index_url),
        }
    }
}

#[async_trait]
impl Repository for HttpRepository {
    fn name(&self) -> String {
        self.index_url.to_string()
    }

    async fn list(&self, name: &NormalizedPackageName) -> miette::Result<Option<ProjectInfo>> {
        let url = self
            .index_url
            .join(&format!("{}/", name.as_str()))
            .expect("invalid url");

        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
        // Prefer the JSON form of the simple API but accept the HTML one.
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "application/vnd.pypi.simple.v1+json, application/vnd.pypi.simple.v1+html;q=0.2, text/html;q=0.01",
            ),
        );

        let response = self
            .http
            .request(url.clone(), Method::GET, headers, CacheMode::Default)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to fetch index page {url}"))?;

        // The package simply does not exist in this index.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("text/html")
            .to_owned();

        let mut bytes = Vec::new();
        response
            .into_body()
            .read_to_end(&mut bytes)
            .await
            .into_diagnostic()?;

        if content_type.starts_with("application/vnd.pypi.simple.v1+json")
            || content_type.starts_with("application/json")
        {
            let raw: RawProjectInfo = serde_json::from_slice(&bytes)
                .into_diagnostic()
                .wrap_err_with(|| format!("invalid JSON index payload from {url}"))?;
            Ok(Some(ProjectInfo::from_raw(name, &url, raw)))
        } else {
            let body = String::from_utf8_lossy(&bytes);
            html::parse_project_info_html(&url, &body).map(Some)
        }
    }

    async fn fetch_metadata(&self, artifact: &ArtifactInfo) -> miette::Result<Option<Vec<u8>>> {
        if !artifact.dist_info_metadata.available {
            return Ok(None);
        }

        // PEP 658: the metadata lives at the artifact url with ".metadata" appended
        let mut url = artifact.url.clone();
        url.set_fragment(None);
        url.set_path(&format!("{}.metadata", url.path()));

        let response = self
            .http
            .request(url.clone(), Method::GET, HeaderMap::new(), CacheMode::Default)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to fetch metadata from {url}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        response
            .into_body()
            .read_to_end(&mut bytes)
            .await
            .into_diagnostic()?;
        Ok(Some(bytes))
    }

    async fn fetch_artifact(
        &self,
        artifact: &ArtifactInfo,
    ) -> miette::Result<Option<crate::utils::StreamingOrLocal>> {
        let mut url = artifact.url.clone();
        url.set_fragment(None);
        let response = self
            .http
            .request(url.clone(), Method::GET, HeaderMap::new(), CacheMode::Default)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to download {url}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.into_body()))
    }
}
