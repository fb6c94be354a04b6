use crate::types::{Requirement, UserRequirement};

/// Defines how to handle source distributions relative to wheels during candidate
/// selection.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum SDistResolution {
    /// Prefer a compatible wheel of a version over its sdist. The default.
    #[default]
    PreferWheels,

    /// Prefer the sdist of a version over its wheels.
    PreferSDists,
}

/// Defines whether pre-release versions may be selected.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum PreReleaseResolution {
    /// A pre-release is only admitted for a name when a specifier on that name mentions a
    /// pre-release, or when the name has no stable release at all. The default.
    #[default]
    FromSpecs,

    /// Admit pre-releases everywhere.
    Allow,
}

impl PreReleaseResolution {
    /// Derives the strategy from root requirements the way pip's `--pre` heuristic does:
    /// stay with [`PreReleaseResolution::FromSpecs`] (the per-name rules already admit
    /// pre-releases for roots that mention one).
    pub fn from_specs(_specs: &[UserRequirement]) -> Self {
        PreReleaseResolution::FromSpecs
    }
}

/// Defines which version is attempted first among the candidates of a name.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum VersionStrategy {
    /// Highest stable version first, then pre-releases (when admitted). The default.
    #[default]
    Highest,

    /// Lowest admissible version first. Useful for testing lower bounds.
    Lowest,

    /// Strictly newest first, pre-releases sorting above the stable releases they precede.
    LatestIncludingPrereleases,
}

/// Additional options that influence the resolution process.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// How to handle source distributions.
    pub sdist_resolution: SDistResolution,

    /// Whether pre-releases may be selected.
    pub pre_release_resolution: PreReleaseResolution,

    /// Which candidate version to try first.
    pub version_strategy: VersionStrategy,

    /// Skip a candidate whose metadata cannot be obtained instead of failing the
    /// resolution.
    pub ignore_errors: bool,

    /// Trust statically-parsed sdist metadata even when the sdist does not promise that
    /// its dependencies are static. Nothing is ever executed either way.
    pub allow_insecure_metadata: bool,

    /// Upper bound on pin attempts before the resolution is abandoned.
    pub max_rounds: usize,

    /// Concurrency cap for index and artifact fetches.
    pub network_concurrency: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            sdist_resolution: Default::default(),
            pre_release_resolution: Default::default(),
            version_strategy: Default::default(),
            ignore_errors: false,
            allow_insecure_metadata: false,
            max_rounds: 200_000,
            network_concurrency: crate::index::DEFAULT_CONCURRENCY,
        }
    }
}

impl ResolveOptions {
    /// Whether pre-releases are admissible for a name given the specifiers currently
    /// active on it.
    pub(crate) fn admits_prerelease<'a>(
        &self,
        mut active_specifiers: impl Iterator<Item = &'a Requirement>,
        has_stable_candidate: bool,
    ) -> bool {
        match self.pre_release_resolution {
            PreReleaseResolution::Allow => true,
            PreReleaseResolution::FromSpecs => {
                !has_stable_candidate
                    || active_specifiers.any(|r| r.specifiers.mentions_prerelease())
            }
        }
    }
}
