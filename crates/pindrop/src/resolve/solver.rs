//! The backtracking search that turns root requirements into a pinned assignment.
//!
//! The state is a criterion per package name: the requirements currently active on the
//! name and the candidate versions that satisfy all of them. Each step picks the
//! criterion with the smallest candidate set, pins its best candidate, and folds that
//! version's requirements into the affected criteria. A criterion running out of
//! candidates unwinds pins newest-first until the failing name has candidates again;
//! every failed `(name, version)` pair is permanently removed from consideration, which
//! bounds the search by the total number of candidate versions.

use crate::index::PackageDb;
use crate::resolve::error::{Conflict, MetadataUnavailableCause, ResolveError};
use crate::resolve::provider::{Candidate, MetadataProvider, ProviderError};
use crate::resolve::shaper::{Origin, PinnedPackage, Resolution, ResolvedEdge};
use crate::resolve::solve_options::{ResolveOptions, VersionStrategy};
use crate::resolve::target::TargetEnv;
use crate::types::{
    Extra, NormalizedPackageName, PackageMetadata, Requirement, Specifiers, UserRequirement,
    Version,
};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;

trait IsPrerelease {
    fn is_prerelease(&self) -> bool;
}

impl IsPrerelease for Version {
    fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }
}

/// A requirement active on some name, together with who introduced it.
#[derive(Debug, Clone)]
struct ActiveRequirement {
    requirement: Requirement,
    origin: Origin,
}

/// The per-name search state. `candidates` is always exactly the subset of the
/// provider's versions that satisfies every active requirement, passes pre-release and
/// yanked admission, and is not marked bad.
#[derive(Debug, Default)]
struct Criterion {
    requirements: Vec<ActiveRequirement>,
    candidates: Vec<Version>,
    extras: IndexSet<Extra>,
}

/// Why a `(name, version)` pair was removed from consideration.
#[derive(Debug, Clone)]
enum BadReason {
    /// Its `requires_python` excludes the target interpreter.
    RequiresPython(Specifiers),
    /// Pinning it emptied another criterion; the snapshot names the conflict.
    Conflict {
        on: NormalizedPackageName,
        conflicts: Vec<Conflict>,
    },
    /// Its metadata could not be obtained (`ignore_errors` mode).
    Metadata,
}

/// A single reversible step of the search log.
enum UndoOp {
    /// A requirement was appended to the criterion of `name`.
    PushedRequirement { name: NormalizedPackageName },
    /// Extras were newly activated on the already-pinned `name`.
    ActivatedExtras {
        name: NormalizedPackageName,
        extras: Vec<Extra>,
    },
    /// An edge was appended to the edge log.
    RecordedEdge,
}

/// A pinned `{name, version}` with everything needed to take it back.
struct PinRecord {
    name: NormalizedPackageName,
    version: Version,
    /// The name that introduced the first requirement on this pin, for cycle detection.
    parent: Option<NormalizedPackageName>,
    /// Extras whose child requirements have been expanded for this pin.
    expanded_extras: IndexSet<Extra>,
    /// The operations performed while committing this pin, newest last.
    undo: Vec<UndoOp>,
}

enum AddOutcome {
    Added,
    /// The criterion of the returned name has no candidates left under the addition.
    Failed(NormalizedPackageName),
    /// The requirement activated new extras on an already-pinned name; its children must
    /// be re-expanded with these extras.
    Reexpand(NormalizedPackageName, Vec<Extra>),
}

fn convert_provider_error(err: ProviderError) -> ResolveError {
    match err {
        ProviderError::Transient(report) => {
            ResolveError::Transient(MetadataUnavailableCause(report))
        }
        ProviderError::MetadataUnavailable {
            name,
            version,
            source,
        } => ResolveError::MetadataUnavailable {
            name,
            version,
            source: MetadataUnavailableCause(source),
        },
    }
}

/// The direct requirements a pinned `{name, version}` contributes under the given
/// extras: every requirement whose marker holds with no active extra, plus, per
/// requested extra, those whose marker holds with that extra active.
fn requirements_under(
    metadata: &PackageMetadata,
    extras: &[Extra],
    env: &TargetEnv,
) -> Vec<Requirement> {
    for extra in extras {
        if !metadata.extras.contains(extra) {
            tracing::warn!(
                "{} {} does not declare the extra [{}]",
                metadata.name.as_str(),
                metadata.version,
                extra.as_str()
            );
        }
    }

    let mut out: Vec<Requirement> = Vec::new();
    for req in &metadata.requires_dist {
        let keep = match &req.env_marker_expr {
            None => true,
            Some(marker) => {
                let base = marker.eval(env, None).unwrap_or_else(|err| {
                    tracing::warn!("failed to evaluate marker of '{req}': {err}");
                    false
                });
                base || extras
                    .iter()
                    .any(|extra| marker.eval(env, Some(extra)).unwrap_or(false))
            }
        };
        if keep && !out.contains(req) {
            out.push(req.clone());
        }
    }
    out
}

/// Computes the admissible candidates for a set of active requirements, ordered by the
/// configured version strategy. This is the single source of truth for the criterion
/// invariant; conflict minimization reuses it.
fn filter_candidates(
    versions: &[Candidate],
    requirements: &[ActiveRequirement],
    bad: Option<&HashMap<Version, BadReason>>,
    options: &ResolveOptions,
) -> Vec<Version> {
    let has_stable = versions.iter().any(|c| !c.version.is_prerelease());
    let admit_pre = options.admits_prerelease(
        requirements.iter().map(|ar| &ar.requirement),
        has_stable,
    );

    let mut kept: Vec<&Candidate> = Vec::new();
    'next: for candidate in versions {
        if bad.is_some_and(|b| b.contains_key(&candidate.version)) {
            continue;
        }
        if candidate.version.is_prerelease() && !admit_pre {
            continue;
        }
        // yanked versions only through an exact pin
        if candidate.yanked
            && !requirements
                .iter()
                .any(|ar| ar.requirement.specifiers.pins_exactly(&candidate.version))
        {
            continue;
        }
        for ar in requirements {
            match ar.requirement.specifiers.satisfied_by(&candidate.version) {
                Ok(true) => {}
                Ok(false) => continue 'next,
                Err(err) => {
                    tracing::warn!(
                        "cannot evaluate '{}' against {}: {err}",
                        ar.requirement.specifiers,
                        candidate.version
                    );
                    continue 'next;
                }
            }
        }
        kept.push(candidate);
    }

    match options.version_strategy {
        VersionStrategy::Highest => {
            let (stable, pre): (Vec<_>, Vec<_>) =
                kept.into_iter().partition(|c| !c.version.is_prerelease());
            stable
                .into_iter()
                .chain(pre)
                .map(|c| c.version.clone())
                .collect()
        }
        VersionStrategy::Lowest => {
            // same stable-before-pre grouping as `Highest`, each group inverted in
            // magnitude: lowest stable first, then lowest pre-release
            let (stable, pre): (Vec<_>, Vec<_>) =
                kept.into_iter().partition(|c| !c.version.is_prerelease());
            stable
                .into_iter()
                .rev()
                .chain(pre.into_iter().rev())
                .map(|c| c.version.clone())
                .collect()
        }
        VersionStrategy::LatestIncludingPrereleases => {
            kept.into_iter().map(|c| c.version.clone()).collect()
        }
    }
}

pub(crate) struct Solver<'db> {
    provider: MetadataProvider<'db>,
    env: &'db TargetEnv,
    options: &'db ResolveOptions,
    criteria: IndexMap<NormalizedPackageName, Criterion>,
    /// Permanently consumed `(name, version)` pairs; never undone by backtracking.
    bad: HashMap<NormalizedPackageName, HashMap<Version, BadReason>>,
    pins: Vec<PinRecord>,
    pinned: HashMap<NormalizedPackageName, usize>,
    edges: Vec<ResolvedEdge>,
    warnings: Vec<String>,
    rounds: usize,
}

impl<'db> Solver<'db> {
    pub fn new(db: &'db PackageDb, env: &'db TargetEnv, options: &'db ResolveOptions) -> Self {
        Self {
            provider: MetadataProvider::new(db, env, options),
            env,
            options,
            criteria: IndexMap::new(),
            bad: HashMap::new(),
            pins: Vec::new(),
            pinned: HashMap::new(),
            edges: Vec::new(),
            warnings: Vec::new(),
            rounds: 0,
        }
    }

    pub async fn solve(mut self, roots: &[UserRequirement]) -> Result<Resolution, ResolveError> {
        let mut root_undo = Vec::new();
        for root in roots {
            let req = root.as_inner();
            if let Some(marker) = &req.env_marker_expr {
                match marker.eval(self.env, None) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::info!("skipping '{req}': environment marker is false");
                        continue;
                    }
                    Err(err) => {
                        return Err(ResolveError::InvalidRequirement {
                            input: req.to_string(),
                            reason: err.to_string(),
                        })
                    }
                }
            }
            match self
                .add_requirement(Origin::Root, req.clone(), &mut root_undo)
                .await?
            {
                AddOutcome::Added => {}
                AddOutcome::Failed(name) => return Err(self.build_failure(&name)),
                AddOutcome::Reexpand(..) => {
                    unreachable!("nothing is pinned while roots are added")
                }
            }
        }

        loop {
            if let Some(failing) = self.first_empty_criterion() {
                self.backtrack(failing)?;
                continue;
            }
            let Some(name) = self.select_next() else {
                break;
            };
            self.rounds += 1;
            if self.rounds > self.options.max_rounds {
                return Err(ResolveError::RoundsExhausted {
                    rounds: self.rounds,
                });
            }
            let version = self.criteria[&name].candidates[0].clone();
            self.try_pin(name, version).await?;
        }

        Ok(Resolution {
            pins: self
                .pins
                .iter()
                .map(|pin| PinnedPackage {
                    name: pin.name.clone(),
                    version: pin.version.clone(),
                    extras: pin.expanded_extras.iter().cloned().collect(),
                })
                .collect(),
            edges: self.edges,
            warnings: self.warnings,
        })
    }

    /// The first (insertion order) unpinned criterion whose candidate set is empty.
    fn first_empty_criterion(&self) -> Option<NormalizedPackageName> {
        self.criteria
            .iter()
            .find(|(name, crit)| {
                !self.pinned.contains_key(*name)
                    && !crit.requirements.is_empty()
                    && crit.candidates.is_empty()
            })
            .map(|(name, _)| name.clone())
    }

    /// The unpinned criterion with the smallest candidate set; ties go to the earliest
    /// inserted.
    fn select_next(&self) -> Option<NormalizedPackageName> {
        let mut best: Option<(usize, &NormalizedPackageName)> = None;
        for (name, crit) in &self.criteria {
            if self.pinned.contains_key(name) || crit.requirements.is_empty() {
                continue;
            }
            let len = crit.candidates.len();
            match best {
                None => best = Some((len, name)),
                Some((best_len, _)) if len < best_len => best = Some((len, name)),
                _ => {}
            }
        }
        best.map(|(_, name)| name.clone())
    }

    fn mark_bad(&mut self, name: &NormalizedPackageName, version: Version, reason: BadReason) {
        self.bad
            .entry(name.clone())
            .or_default()
            .insert(version, reason);
    }

    /// Re-establishes the criterion invariant for `name` from the memoized provider
    /// listing.
    fn recompute(&mut self, name: &NormalizedPackageName) {
        let Some(versions) = self.provider.cached_versions(name) else {
            return;
        };
        let bad = self.bad.get(name);
        let options = self.options;
        if let Some(crit) = self.criteria.get_mut(name) {
            crit.candidates = filter_candidates(versions, &crit.requirements, bad, options);
        }
    }

    /// Folds a requirement into the state: records the edge, appends it to the target
    /// criterion, and reports how the criterion took it.
    async fn add_requirement(
        &mut self,
        origin: Origin,
        requirement: Requirement,
        undo: &mut Vec<UndoOp>,
    ) -> Result<AddOutcome, ResolveError> {
        let child: NormalizedPackageName = requirement.name.clone().into();

        // An identical edge means this exact requirement was already folded in for this
        // origin (base requirements encountered again during extras re-expansion).
        if self
            .edges
            .iter()
            .any(|e| e.child == child && e.origin == origin && e.requirement == requirement)
        {
            return Ok(AddOutcome::Added);
        }

        // Make sure the candidate listing exists before touching the criterion.
        let no_versions = match self.provider.versions(&child).await {
            Ok(versions) => versions.is_empty(),
            Err(err) => return Err(convert_provider_error(err)),
        };
        if no_versions {
            return Err(ResolveError::NoVersionsFound { name: child });
        }

        self.edges.push(ResolvedEdge {
            origin: origin.clone(),
            requirement: requirement.clone(),
            child: child.clone(),
        });
        undo.push(UndoOp::RecordedEdge);

        let crit = self.criteria.entry(child.clone()).or_default();
        crit.requirements.push(ActiveRequirement {
            requirement: requirement.clone(),
            origin,
        });
        crit.extras.extend(requirement.extras.iter().cloned());
        undo.push(UndoOp::PushedRequirement {
            name: child.clone(),
        });

        if let Some(&pin_idx) = self.pinned.get(&child) {
            // The name is already bound; the new requirement must agree with the pin.
            let pinned_version = self.pins[pin_idx].version.clone();
            if !requirement
                .specifiers
                .satisfied_by(&pinned_version)
                .unwrap_or(false)
            {
                return Ok(AddOutcome::Failed(child));
            }
            let new_extras: Vec<Extra> = requirement
                .extras
                .iter()
                .filter(|extra| !self.pins[pin_idx].expanded_extras.contains(*extra))
                .cloned()
                .collect();
            if !new_extras.is_empty() {
                self.pins[pin_idx]
                    .expanded_extras
                    .extend(new_extras.iter().cloned());
                undo.push(UndoOp::ActivatedExtras {
                    name: child.clone(),
                    extras: new_extras.clone(),
                });
                return Ok(AddOutcome::Reexpand(child, new_extras));
            }
            return Ok(AddOutcome::Added);
        }

        self.recompute(&child);
        if self.criteria[&child].candidates.is_empty() {
            return Ok(AddOutcome::Failed(child));
        }
        Ok(AddOutcome::Added)
    }

    /// Whether `child` is `start` itself or an ancestor of it along first-origin edges.
    /// Such a requirement is a dependency cycle and is satisfied by the existing pin.
    fn in_origin_chain(
        &self,
        start: &NormalizedPackageName,
        child: &NormalizedPackageName,
    ) -> bool {
        if start == child {
            return true;
        }
        let mut current = self
            .pinned
            .get(start)
            .and_then(|idx| self.pins.get(*idx))
            .and_then(|pin| pin.parent.clone());
        while let Some(name) = current {
            if &name == child {
                return true;
            }
            current = self
                .pinned
                .get(&name)
                .and_then(|idx| self.pins.get(*idx))
                .and_then(|pin| pin.parent.clone());
        }
        false
    }

    /// Attempts to pin `name` at `version`: checks the interpreter constraint, expands
    /// the version's requirements (extras included) into the criteria, and either commits
    /// the pin or takes everything back and marks the version bad.
    async fn try_pin(
        &mut self,
        name: NormalizedPackageName,
        version: Version,
    ) -> Result<(), ResolveError> {
        tracing::debug!("trying {name} {version}");

        let requires_python = match self.provider.metadata(&name, &version).await {
            Ok(metadata) => metadata.requires_python.clone(),
            Err(err @ ProviderError::MetadataUnavailable { .. }) if self.options.ignore_errors => {
                tracing::warn!("skipping {name} {version}: {}", convert_provider_error(err));
                self.mark_bad(&name, version, BadReason::Metadata);
                self.recompute(&name);
                return Ok(());
            }
            Err(err) => return Err(convert_provider_error(err)),
        };

        if !requires_python
            .satisfied_by(self.env.python_full_version())
            .unwrap_or(false)
        {
            tracing::debug!(
                "{name} {version} requires python '{requires_python}', incompatible with the target"
            );
            self.mark_bad(
                &name,
                version,
                BadReason::RequiresPython(requires_python),
            );
            self.recompute(&name);
            return Ok(());
        }

        let extras = self.criteria[&name].extras.clone();
        let parent = self.criteria[&name]
            .requirements
            .first()
            .and_then(|ar| match &ar.origin {
                Origin::Root => None,
                Origin::Package(parent, _) => Some(parent.clone()),
            });

        self.pins.push(PinRecord {
            name: name.clone(),
            version: version.clone(),
            parent,
            expanded_extras: extras.clone(),
            undo: Vec::new(),
        });
        self.pinned.insert(name.clone(), self.pins.len() - 1);

        let mut undo = Vec::new();
        let mut queue: Vec<(NormalizedPackageName, Version, Vec<Extra>)> = vec![(
            name.clone(),
            version.clone(),
            extras.iter().cloned().collect(),
        )];
        let mut failed = None;

        'expansion: while let Some((parent_name, parent_version, parent_extras)) = queue.pop() {
            let children = {
                let metadata = match self.provider.metadata(&parent_name, &parent_version).await {
                    Ok(metadata) => metadata,
                    Err(err) => return Err(convert_provider_error(err)),
                };
                requirements_under(metadata, &parent_extras, self.env)
            };
            for child_req in children {
                let child_name: NormalizedPackageName = child_req.name.clone().into();
                if self.in_origin_chain(&parent_name, &child_name) {
                    tracing::debug!(
                        "dropping cyclic requirement '{child_req}' of {parent_name} {parent_version}"
                    );
                    continue;
                }
                let origin = Origin::Package(parent_name.clone(), parent_version.clone());
                match self.add_requirement(origin, child_req, &mut undo).await? {
                    AddOutcome::Added => {}
                    AddOutcome::Failed(failing) => {
                        failed = Some(failing);
                        break 'expansion;
                    }
                    AddOutcome::Reexpand(other, new_extras) => {
                        let other_version = self.pins[self.pinned[&other]].version.clone();
                        queue.push((other, other_version, new_extras));
                    }
                }
            }
        }

        if let Some(failing) = failed {
            // Capture the conflict while the offending requirements are still in place.
            let conflicts = self.minimize_conflicts(&failing);
            self.undo_ops(undo);
            let record = self.pins.pop().expect("the pin was just pushed");
            self.pinned.remove(&record.name);
            self.mark_bad(
                &record.name,
                record.version,
                BadReason::Conflict {
                    on: failing,
                    conflicts,
                },
            );
            self.recompute(&record.name);
            return Ok(());
        }

        self.pins.last_mut().expect("the pin was just pushed").undo = undo;

        if let Some(candidate) = self
            .provider
            .cached_versions(&name)
            .and_then(|versions| versions.iter().find(|c| c.version == version))
        {
            if candidate.yanked {
                self.warnings.push(format!(
                    "{name} {version} is yanked but was selected by an exact version pin"
                ));
            }
        }

        tracing::info!("pinned {name} {version}");
        Ok(())
    }

    /// Reverses a batch of operations, newest first, and restores the invariant of every
    /// touched criterion.
    fn undo_ops(&mut self, ops: Vec<UndoOp>) {
        let mut touched: IndexSet<NormalizedPackageName> = IndexSet::new();
        for op in ops.into_iter().rev() {
            match op {
                UndoOp::RecordedEdge => {
                    self.edges.pop();
                }
                UndoOp::PushedRequirement { name } => {
                    if let Some(crit) = self.criteria.get_mut(&name) {
                        crit.requirements.pop();
                        if crit.requirements.is_empty() {
                            self.criteria.shift_remove(&name);
                            touched.shift_remove(&name);
                        } else {
                            touched.insert(name);
                        }
                    }
                }
                UndoOp::ActivatedExtras { name, extras } => {
                    if let Some(&idx) = self.pinned.get(&name) {
                        for extra in &extras {
                            self.pins[idx].expanded_extras.shift_remove(extra);
                        }
                    }
                }
            }
        }
        for name in touched {
            if let Some(crit) = self.criteria.get_mut(&name) {
                crit.extras = crit
                    .requirements
                    .iter()
                    .flat_map(|ar| ar.requirement.extras.iter().cloned())
                    .collect();
            }
            self.recompute(&name);
        }
    }

    /// Unwinds pins newest-first until the failing name has candidates again (or its
    /// criterion dissolved). The pin whose removal restored the name is marked bad; if
    /// the trail runs out, the failure is final.
    fn backtrack(&mut self, failing: NormalizedPackageName) -> Result<(), ResolveError> {
        tracing::debug!("backtracking: no candidates left for {failing}");
        let inherited = self.minimize_conflicts(&failing);
        loop {
            let Some(record) = self.pins.pop() else {
                return Err(self.build_failure(&failing));
            };
            self.pinned.remove(&record.name);
            self.undo_ops(record.undo);
            self.recompute(&failing);

            let restored = match self.criteria.get(&failing) {
                None => true,
                Some(crit) => crit.requirements.is_empty() || !crit.candidates.is_empty(),
            };
            if restored {
                self.mark_bad(
                    &record.name,
                    record.version,
                    BadReason::Conflict {
                        on: failing.clone(),
                        conflicts: inherited.clone(),
                    },
                );
                self.recompute(&record.name);
                return Ok(());
            }
        }
    }

    /// A minimal subset of the requirements active on `name` that still empties its
    /// candidate set: drop each requirement that is not needed for the emptiness.
    fn minimize_conflicts(&self, name: &NormalizedPackageName) -> Vec<Conflict> {
        let Some(crit) = self.criteria.get(name) else {
            return Vec::new();
        };
        let versions = self.provider.cached_versions(name).unwrap_or(&[]);
        let bad = self.bad.get(name);

        let mut kept: Vec<usize> = (0..crit.requirements.len()).collect();
        let mut i = 0;
        while i < kept.len() {
            let subset: Vec<ActiveRequirement> = kept
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, idx)| crit.requirements[*idx].clone())
                .collect();
            if filter_candidates(versions, &subset, bad, self.options).is_empty() {
                kept.remove(i);
            } else {
                i += 1;
            }
        }

        kept.into_iter()
            .map(|idx| {
                let ar = &crit.requirements[idx];
                Conflict {
                    requirement: ar.requirement.clone(),
                    origin: ar.origin.clone(),
                }
            })
            .collect()
    }

    /// Builds the terminal error for a name whose candidates are exhausted.
    fn build_failure(&self, name: &NormalizedPackageName) -> ResolveError {
        if let Some(versions) = self.provider.cached_versions(name) {
            if versions.is_empty() {
                return ResolveError::NoVersionsFound { name: name.clone() };
            }

            let bad = self.bad.get(name);

            // Every candidate rejected for its python constraint?
            let mut sample = None;
            let all_python = versions.iter().all(|candidate| {
                match bad.and_then(|b| b.get(&candidate.version)) {
                    Some(BadReason::RequiresPython(spec)) => {
                        if sample.is_none() {
                            sample = Some((candidate.version.clone(), spec.clone()));
                        }
                        true
                    }
                    _ => false,
                }
            });
            if all_python {
                let (version, requires_python) =
                    sample.expect("a nonempty all-matching listing yields a sample");
                return ResolveError::UnsupportedPython {
                    name: name.clone(),
                    python_version: self.env.python_full_version().clone(),
                    version,
                    requires_python,
                };
            }

            // Prefer the conflict snapshot captured when a pin attempt consumed the
            // candidates of this name.
            if let Some(bad) = bad {
                for candidate in versions {
                    if let Some(BadReason::Conflict { on, conflicts }) =
                        bad.get(&candidate.version)
                    {
                        if !conflicts.is_empty() {
                            return ResolveError::ResolutionImpossible {
                                name: on.clone(),
                                conflicts: conflicts.clone(),
                            };
                        }
                    }
                }
            }
        }

        ResolveError::ResolutionImpossible {
            name: name.clone(),
            conflicts: self.minimize_conflicts(name),
        }
    }
}
