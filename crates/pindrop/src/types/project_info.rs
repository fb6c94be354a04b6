//! Structs that model a project page of a package index: the PEP 691 JSON form of the
//! simple API, and the in-memory form the resolver works with.

use crate::types::{ArtifactName, NormalizedPackageName, Specifiers};
use rattler_digest::{serde::SerializableHash, Sha256};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none};
use std::str::FromStr;

/// Everything a repository knows about one package: the artifacts of all its versions.
#[derive(Debug, Clone, Default)]
pub struct ProjectInfo {
    /// All the available files for this project.
    pub files: Vec<ArtifactInfo>,
}

/// Describes a single artifact that is available for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    /// The parsed artifact filename
    pub filename: ArtifactName,
    /// Url to download the artifact
    pub url: url::Url,
    /// Hashes of the artifact
    pub hashes: Option<ArtifactHashes>,
    /// Python version constraint published by the index, when it knows one
    pub requires_python: Option<Specifiers>,
    /// Whether the metadata of this file is available as a separate download
    /// ([PEP 658](https://www.python.org/dev/peps/pep-0658/))
    pub dist_info_metadata: DistInfoMetadata,
    /// Yanked status of the file
    pub yanked: Yanked,
}

/// Describes a set of hashes for an artifact. In theory every algorithm of Python's
/// `hashlib` can appear; only sha256 is of interest to us.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ArtifactHashes {
    /// The sha256 hash of the artifact, if published
    #[serde_as(as = "Option<SerializableHash<Sha256>>")]
    pub sha256: Option<rattler_digest::Sha256Hash>,
}

impl ArtifactHashes {
    /// Returns true if this instance does not contain a single hash.
    pub fn is_empty(&self) -> bool {
        self.sha256.is_none()
    }
}

/// Whether the metadata file of an artifact can be fetched on its own, as specified in
/// PEP 658 (`{file_url}.metadata`), and the hashes to verify it with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistInfoMetadata {
    /// True if the metadata is available
    pub available: bool,
    /// Hashes to verify the metadata file
    pub hashes: ArtifactHashes,
}

/// Yanked status of a file: a boolean, or a string carrying the reason for the yank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Yanked {
    /// This is true if the file is yanked.
    pub yanked: bool,
    /// Optional reason why the file was yanked.
    pub reason: Option<String>,
}

/// The raw PEP 691 JSON payload of a project page, before filenames are parsed. Separate
/// from [`ProjectInfo`] because parsing a filename requires knowing the package name.
#[derive(Debug, Clone, Deserialize)]
pub struct RawProjectInfo {
    /// All files published for the project
    #[serde(default)]
    pub files: Vec<RawFile>,
}

/// A single file entry of the raw PEP 691 payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawFile {
    /// The filename, unparsed
    pub filename: String,
    /// Download URL, possibly relative to the project page
    pub url: String,
    /// Hash digests by algorithm name, hex encoded
    #[serde(default)]
    pub hashes: std::collections::HashMap<String, String>,
    /// The requires-python constraint, when published
    #[serde(default)]
    pub requires_python: Option<String>,
    /// PEP 658 metadata availability: bool or hash map
    #[serde(default)]
    pub dist_info_metadata: Option<RawBoolOrHashes>,
    /// PEP 714 spelling of the same key; takes precedence when both appear
    #[serde(default, rename = "core-metadata")]
    pub core_metadata: Option<RawBoolOrHashes>,
    /// Yanked status: bool or reason string
    #[serde(default)]
    pub yanked: Option<RawYanked>,
}

/// A PEP 691 value that is either a boolean or a map of hash digests.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum RawBoolOrHashes {
    Bool(bool),
    Hashes(std::collections::HashMap<String, String>),
}

/// A yanked marker that is either a boolean or a reason string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum RawYanked {
    NoReason(bool),
    WithReason(String),
}

fn parse_hashes(hashes: &std::collections::HashMap<String, String>) -> ArtifactHashes {
    ArtifactHashes {
        sha256: hashes
            .get("sha256")
            .and_then(|hex| rattler_digest::parse_digest_from_hex::<Sha256>(hex)),
    }
}

impl From<Option<RawBoolOrHashes>> for DistInfoMetadata {
    fn from(raw: Option<RawBoolOrHashes>) -> Self {
        match raw {
            None => Default::default(),
            Some(RawBoolOrHashes::Bool(available)) => Self {
                available,
                hashes: Default::default(),
            },
            Some(RawBoolOrHashes::Hashes(hashes)) => Self {
                available: true,
                hashes: parse_hashes(&hashes),
            },
        }
    }
}

impl From<Option<RawYanked>> for Yanked {
    fn from(raw: Option<RawYanked>) -> Self {
        match raw {
            None | Some(RawYanked::NoReason(false)) => Self::default(),
            Some(RawYanked::NoReason(true)) => Self {
                yanked: true,
                reason: None,
            },
            Some(RawYanked::WithReason(reason)) => Self {
                yanked: true,
                reason: Some(reason),
            },
        }
    }
}

impl ProjectInfo {
    /// Converts the raw index payload into the typed form, resolving relative file URLs
    /// against `base` and skipping entries whose filename does not parse (the index may
    /// carry artifact kinds we do not know about, e.g. eggs).
    pub fn from_raw(
        name: &NormalizedPackageName,
        base: &url::Url,
        raw: RawProjectInfo,
    ) -> ProjectInfo {
        let mut files = Vec::with_capacity(raw.files.len());
        for file in raw.files {
            let filename = match ArtifactName::from_filename(&file.filename, name) {
                Ok(filename) => filename,
                Err(err) => {
                    tracing::debug!("skipping file {}: {}", file.filename, err);
                    continue;
                }
            };
            let Ok(url) = base.join(&file.url) else {
                tracing::warn!("skipping file {} with unparseable url", file.filename);
                continue;
            };
            let requires_python = match &file.requires_python {
                None => None,
                Some(spec) => match Specifiers::from_str(spec) {
                    Ok(specifiers) => Some(specifiers),
                    Err(err) => {
                        // Treat an unparseable constraint as absent rather than losing
                        // the artifact; the metadata-level constraint still applies.
                        tracing::warn!(
                            "ignoring unparseable requires-python of {}: {}",
                            file.filename,
                            err
                        );
                        None
                    }
                },
            };
            let hashes = if file.hashes.is_empty() {
                None
            } else {
                Some(parse_hashes(&file.hashes))
            };
            files.push(ArtifactInfo {
                filename,
                url,
                hashes,
                requires_python,
                dist_info_metadata: file.core_metadata.or(file.dist_info_metadata).into(),
                yanked: file.yanked.into(),
            });
        }
        ProjectInfo { files }
    }
}
