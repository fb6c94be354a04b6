//! The vocabulary of the Python packaging ecosystem: names, versions, specifiers,
//! requirements, artifact filenames and core metadata.

mod artifact_name;
mod core_metadata;
mod extra;
mod package_name;
mod project_info;
mod reqparse;
mod requirement;
mod rfc822ish;
mod specifier;

/// A PEP 440 version. Re-exported from the `pep440` crate, which implements the segment
/// ordering rules (equality ignores trailing zero release segments; local versions only
/// order otherwise-equal releases).
pub use pep440::Version;

pub use artifact_name::{
    ArtifactName, BuildTag, ParseArtifactNameError, SDistFilename, SDistFormat, WheelFilename,
};
pub use core_metadata::{MetadataVersion, PackageMetadata, PackageMetadataError};
pub use extra::{Extra, ParseExtraError};
pub use package_name::{NormalizedPackageName, PackageName, ParsePackageNameError};
pub use project_info::{
    ArtifactHashes, ArtifactInfo, DistInfoMetadata, ProjectInfo, RawProjectInfo, Yanked,
};
pub use requirement::{
    marker, PackageRequirement, ParseExtraInEnv, Requirement, UserRequirement,
};
pub use rfc822ish::{FieldError, ParseRFC822ishError, RFC822ish};
pub use specifier::{CompareOp, Specifier, Specifiers, VERSION_INFINITY, VERSION_ZERO};
