//! The resolver: a deterministic backtracking search over a criterion per package name,
//! producing a pinned assignment and the dependency tree it induces.

mod error;
mod provider;
mod shaper;
mod solve_options;
mod solver;
mod target;

pub use error::{Conflict, MetadataUnavailableCause, ResolveError};
pub use shaper::{
    GraphEntry, Headers, Origin, PackageEntry, PinnedPackage, Resolution, ResolutionDocument,
    ResolvedEdge, TreeNode,
};
pub use solve_options::{
    PreReleaseResolution, ResolveOptions, SDistResolution, VersionStrategy,
};
pub use target::TargetEnv;

use crate::index::PackageDb;
use crate::types::UserRequirement;
use solver::Solver;

/// Resolves the transitive dependency closure of the given requirements against the
/// repositories behind `db`, for the described target environment. Returns the pinned
/// assignment together with the origin edges from which the flat, tree and graph result
/// forms derive.
///
/// The search itself is single-threaded and deterministic; all network traffic happens
/// behind the metadata provider at well-defined points.
pub async fn resolve<'r>(
    db: &PackageDb,
    requirements: impl IntoIterator<Item = &'r UserRequirement>,
    env: &TargetEnv,
    options: &ResolveOptions,
) -> Result<Resolution, ResolveError> {
    let roots: Vec<UserRequirement> = requirements.into_iter().cloned().collect();
    Solver::new(db, env, options).solve(&roots).await
}
