use crate::types::rfc822ish::{FieldError, ParseRFC822ishError, RFC822ish};
use crate::types::{
    Extra, PackageName, PackageRequirement, ParsePackageNameError, Requirement, Specifiers,
    Version,
};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;

/// The resolver-relevant subset of a distribution's core metadata, parsed once per
/// `{name, version}` from the preferred artifact's METADATA (wheels) or PKG-INFO (sdists)
/// and immutable afterwards.
#[derive(Debug, Clone)]
pub struct PackageMetadata {
    /// The name of the package
    pub name: PackageName,
    /// The version of the package
    pub version: Version,
    /// Version of the metadata format itself
    pub metadata_version: MetadataVersion,
    /// The direct requirements of the distribution (Requires-Dist)
    pub requires_dist: Vec<Requirement>,
    /// Python versions this distribution supports (Requires-Python); empty means any
    pub requires_python: Specifiers,
    /// Extras provided by this distribution (Provides-Extra)
    pub extras: HashSet<Extra>,
    /// Fields declared as computed at build time (Dynamic, PEP 643)
    pub dynamic: Vec<String>,
}

/// The Metadata-Version header as a comparable version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MetadataVersion(pub Version);

impl MetadataVersion {
    /// Whether this metadata format knows about the `Dynamic` header (PEP 643, introduced
    /// with Metadata-Version 2.2). Older sdist metadata cannot promise that its dependency
    /// fields are static, so it counts as unreliable.
    pub fn implements_pep643(&self) -> bool {
        static VERSION_2_2: Lazy<MetadataVersion> =
            Lazy::new(|| MetadataVersion(Version::parse("2.2").unwrap()));

        self >= &VERSION_2_2
    }
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum PackageMetadataError {
    #[error(transparent)]
    FailedToParseMetadata(#[from] ParseRFC822ishError),

    #[error(transparent)]
    FieldError(#[from] FieldError),

    #[error("invalid Metadata-Version: {0}")]
    InvalidMetadataVersion(String),

    #[error("invalid Version: {0}")]
    InvalidVersion(String),

    #[error("invalid Requires-Python: {0}")]
    InvalidRequiresPython(String),

    #[error("unsupported METADATA version {0}")]
    UnsupportedVersion(Version),

    #[error(transparent)]
    InvalidPackageName(#[from] ParsePackageNameError),
}

impl TryFrom<&[u8]> for PackageMetadata {
    type Error = PackageMetadataError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        // Quoth https://packaging.python.org/specifications/core-metadata:
        // "Automated tools consuming metadata SHOULD warn if metadata_version is greater
        // than the highest version they support, and MUST fail if metadata_version has a
        // greater major version than the highest version they support."
        static NEXT_MAJOR_METADATA_VERSION: Lazy<Version> =
            Lazy::new(|| Version::parse("3").unwrap());

        let input = String::from_utf8_lossy(value);
        let mut parsed = RFC822ish::from_str(&input)?;

        let metadata_version: Version = {
            let raw = parsed.take("Metadata-Version")?;
            Version::parse(raw.trim())
                .ok_or(PackageMetadataError::InvalidMetadataVersion(raw))?
        };
        if metadata_version >= *NEXT_MAJOR_METADATA_VERSION {
            return Err(PackageMetadataError::UnsupportedVersion(metadata_version));
        }

        let name: PackageName = parsed.take("Name")?.trim().parse()?;

        let version = {
            let raw = parsed.take("Version")?;
            Version::parse(raw.trim()).ok_or(PackageMetadataError::InvalidVersion(raw))?
        };

        let mut requires_dist = Vec::new();
        for req_str in parsed.take_all("Requires-Dist") {
            match PackageRequirement::from_str(&req_str) {
                Err(e) => {
                    tracing::warn!("ignoring Requires-Dist: {req_str}, failed to parse: {e}")
                }
                Ok(req) => requires_dist.push(req.into_inner()),
            }
        }

        let requires_python = parsed
            .maybe_take("Requires-Python")?
            .as_deref()
            .map(Specifiers::from_str)
            .transpose()
            .map_err(|e| PackageMetadataError::InvalidRequiresPython(e.to_string()))?
            .unwrap_or_default();

        let mut extras: HashSet<Extra> = HashSet::new();
        for extra in parsed.take_all("Provides-Extra") {
            match extra.trim().parse() {
                Ok(extra) => {
                    extras.insert(extra);
                }
                Err(e) => tracing::warn!("ignoring Provides-Extra: {extra}: {e}"),
            }
        }

        let dynamic = parsed
            .take_all("Dynamic")
            .into_iter()
            .map(|field| field.trim().to_ascii_lowercase())
            .collect();

        Ok(PackageMetadata {
            name,
            version,
            metadata_version: MetadataVersion(metadata_version),
            requires_dist,
            requires_python,
            extras,
            dynamic,
        })
    }
}

impl PackageMetadata {
    /// Whether the dependency information in this metadata can be trusted without running
    /// build code. True for all wheel metadata consumers; for sdists only when the format
    /// is recent enough to say so (PEP 643) and no dependency field is declared dynamic.
    pub fn has_static_dependencies(&self) -> bool {
        self.metadata_version.implements_pep643()
            && !self
                .dynamic
                .iter()
                .any(|field| field == "requires-dist" || field == "requires-python")
    }
}
