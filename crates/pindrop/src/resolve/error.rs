use crate::resolve::shaper::Origin;
use crate::types::{NormalizedPackageName, Requirement, Specifiers, Version};
use miette::Diagnostic;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// One member of a conflict set: an active requirement and where it came from.
#[derive(Debug, Clone)]
pub struct Conflict {
    /// The requirement that takes part in the conflict.
    pub requirement: Requirement,
    /// The pin (or root) that introduced the requirement.
    pub origin: Origin,
}

impl Display for Conflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (from {})", self.requirement, self.origin)
    }
}

/// The ways a resolution can fail. Candidate-local problems (a single bad version) are
/// handled inside the search and never surface here.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    /// A root requirement did not parse.
    #[error("invalid requirement '{input}': {reason}")]
    InvalidRequirement {
        /// The offending input string
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// A name has no candidate version usable under the target environment at all.
    #[error("no versions found for package '{name}'")]
    NoVersionsFound {
        /// The package without candidates
        name: NormalizedPackageName,
    },

    /// Every candidate of a name was rejected because its `requires_python` excludes the
    /// target interpreter.
    #[error("every version of '{name}' requires a python incompatible with {python_version} (e.g. {name} {version} requires {requires_python})")]
    UnsupportedPython {
        /// The package that cannot run on the target python
        name: NormalizedPackageName,
        /// The python version of the target environment
        python_version: Version,
        /// A sample rejected version
        version: Version,
        /// That version's python constraint
        requires_python: Specifiers,
    },

    /// The active requirements cannot be satisfied together.
    #[error("{}", format_conflicts(name, conflicts))]
    ResolutionImpossible {
        /// The name on which the conflict materialized
        name: NormalizedPackageName,
        /// A minimal set of requirements that jointly empty the candidate set
        conflicts: Vec<Conflict>,
    },

    /// The metadata of a candidate could not be obtained and no alternative artifact
    /// exists.
    #[error("unable to obtain metadata of {name} {version}")]
    MetadataUnavailable {
        /// The package whose metadata is missing
        name: NormalizedPackageName,
        /// The affected version
        version: Version,
        /// What went wrong while fetching
        #[source]
        source: MetadataUnavailableCause,
    },

    /// A repository could not be reached; retrying the whole resolution may succeed.
    #[error("transient failure while querying repositories")]
    Transient(#[source] MetadataUnavailableCause),

    /// The configured `max_rounds` budget ran out before the search finished.
    #[error("resolution abandoned after {rounds} rounds")]
    RoundsExhausted {
        /// The number of pin attempts performed
        rounds: usize,
    },
}

/// An opaque carrier for the underlying fetch/parse error chain.
#[derive(Debug)]
pub struct MetadataUnavailableCause(#[allow(missing_docs)] pub miette::Report);

impl Display for MetadataUnavailableCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MetadataUnavailableCause {}

fn format_conflicts(name: &NormalizedPackageName, conflicts: &[Conflict]) -> String {
    use std::fmt::Write;
    let mut out = format!("no version of '{name}' satisfies all active requirements:");
    for conflict in conflicts {
        write!(out, "\n  {conflict}").expect("writing to a string never fails");
    }
    out
}
