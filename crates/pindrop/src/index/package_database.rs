use super::file_store::FileStore;
use super::http::Http;
use super::repository::{HttpRepository, Repository};
use crate::artifacts::{SDist, Wheel};
use crate::types::{
    ArtifactInfo, NormalizedPackageName, PackageMetadata, ProjectInfo, Version,
};
use crate::utils::StreamingOrLocal;
use elsa::FrozenMap;
use futures::{stream, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use miette::{Context, IntoDiagnostic};
use rattler_digest::Sha256;
use reqwest::Client;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use url::Url;

/// The default number of concurrent index/artifact fetches.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// The per-user default cache root, e.g. `~/.cache/pindrop` on Linux. `None` when the
/// platform has no cache directory convention.
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("pindrop"))
}

/// The gateway between the resolver and its repositories: merges the artifact listings of
/// every configured repository, downloads artifacts into the shared on-disk cache, and
/// extracts distribution metadata without unpacking or running anything.
///
/// The in-memory listing memo lives for one run; the file stores are shared between runs
/// and between processes.
pub struct PackageDb {
    /// The repositories to query, in declared priority order.
    repositories: Vec<Box<dyn Repository>>,

    /// Memo of the merged artifact listings per package, versions descending.
    artifacts: FrozenMap<NormalizedPackageName, Box<IndexMap<Version, Vec<ArtifactInfo>>>>,

    /// Extracted metadata blobs, keyed by artifact hash.
    metadata_cache: FileStore,

    /// Whole downloaded artifacts, keyed `{name}/{version}/{filename}`.
    artifact_cache: FileStore,

    /// Root of all the on-disk caches.
    cache_dir: PathBuf,

    /// Concurrency cap for index fetches.
    concurrency: usize,
}

impl PackageDb {
    /// Constructs a new [`PackageDb`] over simple-index repositories at the given URLs,
    /// tried in the given order.
    pub fn new(client: Client, index_urls: &[Url], cache_dir: &Path) -> std::io::Result<Self> {
        let http = Http::new(client, FileStore::new(&cache_dir.join("http"))?);
        let repositories = index_urls
            .iter()
            .map(|url| {
                Box::new(HttpRepository::new(http.clone(), url.clone())) as Box<dyn Repository>
            })
            .collect();
        Self::with_repositories(repositories, cache_dir)
    }

    /// Constructs a [`PackageDb`] over caller-supplied repositories. This is how tests
    /// plug in an in-memory index.
    pub fn with_repositories(
        repositories: Vec<Box<dyn Repository>>,
        cache_dir: &Path,
    ) -> std::io::Result<Self> {
        Ok(Self {
            repositories,
            artifacts: Default::default(),
            metadata_cache: FileStore::new(&cache_dir.join("metadata"))?,
            artifact_cache: FileStore::new(&cache_dir.join("artifacts"))?,
            cache_dir: cache_dir.to_owned(),
            concurrency: DEFAULT_CONCURRENCY,
        })
    }

    /// Overrides the fetch concurrency cap.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Returns the cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Downloads and caches the merged artifact listing of a package: the union of every
    /// repository's files, artifacts of the same version unioned, with the
    /// earliest-declared repository winning on duplicate filenames. Versions are sorted
    /// descending, artifacts per version by filename. Each name is fetched at most once
    /// per run per repository.
    pub async fn available_artifacts(
        &self,
        p: &NormalizedPackageName,
    ) -> miette::Result<&IndexMap<Version, Vec<ArtifactInfo>>> {
        if let Some(cached) = self.artifacts.get(p) {
            return Ok(cached);
        }

        // Fetch the listing of every repository concurrently but merge in declared order.
        let listings: Vec<Option<ProjectInfo>> = stream::iter(
            self.repositories
                .iter()
                .map(|repo| repo.list(p))
                .collect::<Vec<_>>(),
        )
        .buffered(self.concurrency)
        .try_collect()
        .await?;

        let mut result: IndexMap<Version, Vec<ArtifactInfo>> = Default::default();
        let mut seen_filenames: HashSet<String> = HashSet::new();
        for listing in listings.into_iter().flatten() {
            for artifact in listing.files {
                if !seen_filenames.insert(artifact.filename.to_string()) {
                    continue;
                }
                result
                    .entry(artifact.filename.version().clone())
                    .or_default()
                    .push(artifact);
            }
        }

        // Deterministic order: artifacts by name, versions descending.
        for artifact_infos in result.values_mut() {
            artifact_infos.sort_by(|a, b| a.filename.cmp(&b.filename));
        }
        result.sort_unstable_by(|v1, _, v2, _| v2.cmp(v1));

        Ok(self.artifacts.insert(p.clone(), Box::new(result)))
    }

    /// Reads the metadata for the given artifact from the cache, or `None` on a miss.
    fn metadata_from_cache(&self, ai: &ArtifactInfo) -> Option<Vec<u8>> {
        let hashes = ai.hashes.as_ref().filter(|h| !h.is_empty())?;
        let mut data = self.metadata_cache.get(hashes)?;
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes).ok()?;
        Some(bytes)
    }

    /// Writes the metadata blob for the given artifact into the cache. An existing entry
    /// is left untouched.
    fn put_metadata_in_cache(&self, ai: &ArtifactInfo, blob: &[u8]) -> miette::Result<()> {
        if let Some(hash) = &ai.hashes {
            if !hash.is_empty() {
                self.metadata_cache
                    .get_or_set(&hash, |w| w.write_all(blob))
                    .into_diagnostic()?;
            }
        }
        Ok(())
    }

    /// Returns the metadata of a `{name, version}`, trying the given artifacts in
    /// preference order. Metadata is assumed consistent across the artifacts of a single
    /// version, so the first artifact that yields metadata wins.
    ///
    /// The lookup order per artifact: local metadata cache, the standalone metadata file
    /// (PEP 658), and finally the artifact itself. Only the metadata file of an artifact
    /// is ever read; nothing is unpacked or executed. Sdist metadata that does not
    /// guarantee static dependency information is rejected unless
    /// `allow_insecure_metadata` is set.
    pub async fn get_metadata(
        &self,
        artifacts: &[&ArtifactInfo],
        allow_insecure_metadata: bool,
    ) -> miette::Result<(PackageMetadata, String)> {
        let mut last_error = None;

        // Check the cache first.
        for ai in artifacts {
            if let Some(bytes) = self.metadata_from_cache(ai) {
                match parse_metadata(ai, &bytes).and_then(|metadata| {
                    check_sdist_reliability(ai, &metadata, allow_insecure_metadata)
                        .map(|_| metadata)
                }) {
                    Ok(metadata) => return Ok((metadata, ai.filename.to_string())),
                    Err(err) => {
                        tracing::warn!("rejecting cached metadata of {}: {err}", ai.filename);
                        last_error = Some(err);
                    }
                }
            }
        }

        // Then standalone metadata files, which spare us the artifact download entirely.
        for ai in artifacts {
            for repo in &self.repositories {
                match repo.fetch_metadata(ai).await {
                    Ok(Some(bytes)) => {
                        match parse_metadata(ai, &bytes).and_then(|metadata| {
                            check_sdist_reliability(ai, &metadata, allow_insecure_metadata)
                                .map(|_| metadata)
                        }) {
                            Ok(metadata) => {
                                self.put_metadata_in_cache(ai, &bytes)?;
                                return Ok((metadata, ai.filename.to_string()));
                            }
                            Err(err) => {
                                tracing::warn!(
                                    "rejecting metadata of {}: {err}",
                                    ai.filename
                                );
                                last_error = Some(err);
                                break;
                            }
                        }
                    }
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::warn!(
                            "failed to fetch metadata of {} from {}: {err}",
                            ai.filename,
                            repo.name()
                        );
                        last_error = Some(err);
                    }
                }
            }
        }

        // Finally, download artifacts and read the metadata file out of them.
        for ai in artifacts {
            match self
                .metadata_from_artifact(ai, allow_insecure_metadata)
                .await
            {
                Ok((metadata, bytes)) => {
                    self.put_metadata_in_cache(ai, &bytes)?;
                    return Ok((metadata, ai.filename.to_string()));
                }
                Err(err) => {
                    tracing::warn!("failed to read metadata from {}: {err}", ai.filename);
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) => Err(err),
            None => miette::bail!("no artifacts with readable metadata"),
        }
    }

    /// Downloads an artifact (through the shared cache) and extracts its metadata file.
    async fn metadata_from_artifact(
        &self,
        ai: &ArtifactInfo,
        allow_insecure_metadata: bool,
    ) -> miette::Result<(PackageMetadata, Vec<u8>)> {
        let path = self.get_artifact_path(ai).await?;
        let name: NormalizedPackageName = ai.filename.distribution().clone().into();
        let bytes = match &ai.filename {
            crate::types::ArtifactName::Wheel(_) => {
                Wheel::from_path(&path, &name)?.metadata_bytes()?
            }
            crate::types::ArtifactName::SDist(_) => {
                SDist::from_path(&path, &name)?.pkg_info_bytes()?
            }
        };
        let metadata = parse_metadata(ai, &bytes)?;
        check_sdist_reliability(ai, &metadata, allow_insecure_metadata)?;
        Ok((metadata, bytes))
    }

    /// Downloads an artifact into the shared artifact cache and returns its local path.
    /// Concurrent callers (including other processes) serialize on a per-artifact file
    /// lock; exactly one performs the download while the rest wait, and nobody ever
    /// observes a partial file.
    pub async fn get_artifact_path(&self, ai: &ArtifactInfo) -> miette::Result<PathBuf> {
        let lock = self
            .artifact_cache
            .lock(&ai.filename)
            .into_diagnostic()
            .wrap_err("failed to lock artifact cache entry")?;
        let path = lock.path().to_path_buf();
        if path.is_file() {
            return Ok(path);
        }

        let mut body = None;
        for repo in &self.repositories {
            match repo.fetch_artifact(ai).await {
                Ok(Some(found)) => {
                    body = Some(found);
                    break;
                }
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(
                        "failed to download {} from {}: {err}",
                        ai.filename,
                        repo.name()
                    );
                }
            }
        }
        let Some(body) = body else {
            miette::bail!("no repository could provide {}", ai.filename);
        };

        let mut writer = lock.begin().into_diagnostic()?;
        copy_body(body, &mut writer).await.into_diagnostic()?;
        writer.commit().into_diagnostic()?;

        // Verify the download against the published digest before anyone uses it.
        if let Some(expected) = ai.hashes.as_ref().and_then(|h| h.sha256) {
            let actual = rattler_digest::compute_file_digest::<Sha256>(&path)
                .into_diagnostic()
                .wrap_err("failed to hash downloaded artifact")?;
            if actual != expected {
                lock.remove().into_diagnostic()?;
                miette::bail!(
                    "hash mismatch for {}: expected {}, got {}",
                    ai.filename,
                    data_encoding::HEXLOWER.encode(&expected),
                    data_encoding::HEXLOWER.encode(&actual)
                );
            }
        }

        Ok(path)
    }
}

/// Streams a response body into a (synchronous) writer.
async fn copy_body(
    body: StreamingOrLocal,
    writer: &mut (impl Write + Send),
) -> std::io::Result<()> {
    match body {
        StreamingOrLocal::Local(mut local) => {
            std::io::copy(&mut local, writer)?;
        }
        StreamingOrLocal::Streaming(mut streaming) => {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = streaming.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                writer.write_all(&buf[..n])?;
            }
        }
    }
    Ok(())
}

fn parse_metadata(ai: &ArtifactInfo, bytes: &[u8]) -> miette::Result<PackageMetadata> {
    PackageMetadata::try_from(bytes)
        .into_diagnostic()
        .wrap_err_with(|| format!("invalid metadata in {}", ai.filename))
}

/// Sdists may compute their dependencies at build time; running that code is out of the
/// question. Only metadata recent enough to promise static dependency fields (PEP 643) is
/// trusted, unless the caller explicitly opted into best-effort static parsing.
fn check_sdist_reliability(
    ai: &ArtifactInfo,
    metadata: &PackageMetadata,
    allow_insecure_metadata: bool,
) -> miette::Result<()> {
    if ai.filename.as_sdist().is_none() || allow_insecure_metadata {
        return Ok(());
    }
    if !metadata.has_static_dependencies() {
        miette::bail!(
            "{} does not declare static dependency metadata (its build scripts would have to run to know them)",
            ai.filename
        );
    }
    Ok(())
}
