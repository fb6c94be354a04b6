use crate::index::PackageDb;
use crate::resolve::solve_options::{ResolveOptions, SDistResolution};
use crate::resolve::target::TargetEnv;
use crate::types::{
    ArtifactInfo, NormalizedPackageName, PackageMetadata, Version,
};
use elsa::FrozenMap;
use std::cmp::Reverse;

/// One selectable version of a package as the provider sees it.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    /// The version
    pub version: Version,
    /// True when every usable artifact of the version is yanked; such a version is only
    /// eligible through an exact `==` pin.
    pub yanked: bool,
}

/// How fetching a package's versions or metadata failed.
#[derive(Debug)]
pub(crate) enum ProviderError {
    /// The repositories could not be queried; a later run may succeed.
    Transient(miette::Report),
    /// The metadata of one specific version could not be obtained.
    MetadataUnavailable {
        name: NormalizedPackageName,
        version: Version,
        source: miette::Report,
    },
}

/// The synchronous-looking face the resolver core talks to: per-name candidate listings
/// and per-version metadata, both memoized for the run. All awaiting happens inside the
/// two fetching methods; everything the search iterates over is returned atomically.
pub(crate) struct MetadataProvider<'db> {
    db: &'db PackageDb,
    env: &'db TargetEnv,
    options: &'db ResolveOptions,
    versions: FrozenMap<NormalizedPackageName, Box<Vec<Candidate>>>,
    metadata: FrozenMap<(NormalizedPackageName, Version), Box<PackageMetadata>>,
}

impl<'db> MetadataProvider<'db> {
    pub fn new(db: &'db PackageDb, env: &'db TargetEnv, options: &'db ResolveOptions) -> Self {
        Self {
            db,
            env,
            options,
            versions: Default::default(),
            metadata: Default::default(),
        }
    }

    /// Whether this artifact can be used on the target environment at all.
    fn artifact_usable(&self, ai: &ArtifactInfo) -> bool {
        // The index sometimes publishes the python constraint next to the file; believe
        // it when it parses.
        if let Some(requires_python) = &ai.requires_python {
            if !requires_python
                .satisfied_by(self.env.python_full_version())
                .unwrap_or(true)
            {
                return false;
            }
        }
        match &ai.filename {
            crate::types::ArtifactName::Wheel(wheel) => wheel
                .all_tags_iter()
                .any(|tag| self.env.tags().is_compatible(&tag)),
            crate::types::ArtifactName::SDist(sdist) => sdist.format.is_supported(),
        }
    }

    /// The candidate versions of a package under the target environment, descending,
    /// restricted to versions with at least one usable artifact. Fetches (and memoizes)
    /// the merged repository listing on first use.
    pub async fn versions(
        &self,
        name: &NormalizedPackageName,
    ) -> Result<&[Candidate], ProviderError> {
        if let Some(cached) = self.versions.get(name) {
            return Ok(cached);
        }

        let artifacts = self
            .db
            .available_artifacts(name)
            .await
            .map_err(ProviderError::Transient)?;

        let mut candidates = Vec::new();
        for (version, artifact_infos) in artifacts.iter() {
            let usable: Vec<_> = artifact_infos
                .iter()
                .filter(|ai| self.artifact_usable(ai))
                .collect();
            if usable.is_empty() {
                // a version without usable artifacts is treated as absent
                continue;
            }
            candidates.push(Candidate {
                version: version.clone(),
                yanked: usable.iter().all(|ai| ai.yanked.yanked),
            });
        }

        tracing::debug!(
            "{name}: {} of {} versions usable on the target environment",
            candidates.len(),
            artifacts.len()
        );
        Ok(self.versions.insert(name.clone(), Box::new(candidates)))
    }

    /// The memoized candidate listing, if [`MetadataProvider::versions`] ran for this
    /// name before.
    pub fn cached_versions(&self, name: &NormalizedPackageName) -> Option<&[Candidate]> {
        self.versions.get(name).map(|v| v.as_slice())
    }

    /// The artifacts of one version in preference order: compatible wheels by descending
    /// tag specificity (filename as the tie-break), then the sdist, or the other way
    /// around when sdists are preferred.
    fn artifacts_by_preference<'a>(&self, version_artifacts: &'a [ArtifactInfo]) -> Vec<&'a ArtifactInfo> {
        let mut wheels: Vec<(i32, &ArtifactInfo)> = Vec::new();
        let mut sdists: Vec<&ArtifactInfo> = Vec::new();
        for ai in version_artifacts {
            if !self.artifact_usable(ai) {
                continue;
            }
            match &ai.filename {
                crate::types::ArtifactName::Wheel(wheel) => {
                    let best = wheel
                        .all_tags_iter()
                        .filter_map(|tag| self.env.tags().compatibility(&tag))
                        .max();
                    if let Some(score) = best {
                        wheels.push((score, ai));
                    }
                }
                crate::types::ArtifactName::SDist(_) => sdists.push(ai),
            }
        }
        wheels.sort_by_key(|(score, ai)| (Reverse(*score), ai.filename.to_string()));

        let wheels = wheels.into_iter().map(|(_, ai)| ai);
        match self.options.sdist_resolution {
            SDistResolution::PreferWheels => wheels.chain(sdists).collect(),
            SDistResolution::PreferSDists => sdists.into_iter().chain(wheels).collect(),
        }
    }

    /// The metadata of a `{name, version}`, fetched through the cache on first use and
    /// memoized for the rest of the run.
    pub async fn metadata(
        &self,
        name: &NormalizedPackageName,
        version: &Version,
    ) -> Result<&PackageMetadata, ProviderError> {
        let key = (name.clone(), version.clone());
        if let Some(cached) = self.metadata.get(&key) {
            return Ok(cached);
        }

        let artifacts = self
            .db
            .available_artifacts(name)
            .await
            .map_err(ProviderError::Transient)?;
        let version_artifacts = artifacts.get(version).map(Vec::as_slice).unwrap_or(&[]);
        let preferred = self.artifacts_by_preference(version_artifacts);
        if preferred.is_empty() {
            return Err(ProviderError::MetadataUnavailable {
                name: name.clone(),
                version: version.clone(),
                source: miette::miette!("no usable artifacts"),
            });
        }

        let (metadata, provenance) = self
            .db
            .get_metadata(&preferred, self.options.allow_insecure_metadata)
            .await
            .map_err(|source| ProviderError::MetadataUnavailable {
                name: name.clone(),
                version: version.clone(),
                source,
            })?;

        if metadata.name.as_str() != name.as_str() {
            tracing::warn!(
                "metadata of {provenance} names '{}' instead of '{name}'",
                metadata.name.as_str()
            );
        }
        tracing::debug!("{name} {version}: metadata read from {provenance}");

        Ok(self.metadata.insert(key, Box::new(metadata)))
    }
}
