use miette::{Context, IntoDiagnostic};
use once_cell::sync::Lazy;
use pep440::Version;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use smallvec::{smallvec, SmallVec};
use std::{cmp::Ordering, fmt::Display, ops::Range, str::FromStr};

/// A single version constraint: a comparison operator and the version string it compares
/// against. See [PEP 440](https://peps.python.org/pep-0440/#version-specifiers).
///
/// The right hand side stays a string because `==` and `!=` accept wildcards (`== 1.2.*`)
/// and `===` compares arbitrary strings, neither of which is a parseable version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Specifier {
    /// Comparison operator
    pub op: CompareOp,
    /// Version (or wildcard / arbitrary string) to compare against
    pub value: String,
}

impl Specifier {
    /// Returns true if the given version satisfies this constraint.
    pub fn satisfied_by(&self, version: &Version) -> miette::Result<bool> {
        if self.op == CompareOp::ArbitraryEqual {
            // "===" is a lexical comparison against the exact right-hand string.
            return Ok(self.value.trim() == version.to_string());
        }
        Ok(self.to_ranges()?.into_iter().any(|r| r.contains(version)))
    }

    /// Converts the constraint to a union of half-open version ranges.
    pub fn to_ranges(&self) -> miette::Result<SmallVec<[Range<Version>; 1]>> {
        self.op.ranges(&self.value)
    }

    /// Returns true if the right hand side names a pre-release or dev version.
    pub fn mentions_prerelease(&self) -> bool {
        let value = self.value.trim().strip_suffix(".*").unwrap_or(&self.value);
        Version::parse(value.trim())
            .map(|v| v.pre.is_some() || v.dev.is_some())
            .unwrap_or(false)
    }
}

impl Display for Specifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.op, self.value)
    }
}

/// A conjunction of [`Specifier`]s, the comma-separated form of PEP 440. An empty set
/// matches every version.
#[derive(Debug, Clone, PartialEq, Eq, SerializeDisplay, DeserializeFromStr, Default, Hash)]
pub struct Specifiers(#[allow(missing_docs)] pub Vec<Specifier>);

impl Specifiers {
    /// Returns true if every constraint in the set is satisfied by the given version.
    pub fn satisfied_by(&self, version: &Version) -> miette::Result<bool> {
        for specifier in &self.0 {
            if !specifier.satisfied_by(version)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns true if there are no constraints.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if any constraint in the set names a pre-release. Such a set admits
    /// pre-release candidates without further opt-in.
    pub fn mentions_prerelease(&self) -> bool {
        self.0.iter().any(Specifier::mentions_prerelease)
    }

    /// Returns true if the set pins the given version exactly (`==` or `===` with a
    /// non-wildcard right hand side that compares equal to `version`). Yanked releases
    /// are only eligible through such a pin.
    pub fn pins_exactly(&self, version: &Version) -> bool {
        self.0.iter().any(|spec| {
            if spec.value.trim().ends_with(".*") {
                return false;
            }
            match spec.op {
                CompareOp::Equal => Version::parse(spec.value.trim())
                    .map(|pin| pin.cmp(version) == Ordering::Equal)
                    .unwrap_or(false),
                CompareOp::ArbitraryEqual => spec.value.trim() == version.to_string(),
                _ => false,
            }
        })
    }
}

impl Display for Specifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for spec in &self.0 {
            if !first {
                write!(f, ", ")?
            }
            first = false;
            write!(f, "{}", spec)?
        }
        Ok(())
    }
}

impl FromStr for Specifiers {
    type Err = miette::Report;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let specifiers_or_err = super::reqparse::versionspec(input);
        specifiers_or_err
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to parse version specifiers from {:?}", input))
    }
}

/// A comparison operator in a version specifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CompareOp {
    LessThanEqual,
    StrictlyLessThan,
    NotEqual,
    Equal,
    GreaterThanEqual,
    StrictlyGreaterThan,
    Compatible,
    ArbitraryEqual,
}

impl Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use CompareOp::*;
        write!(
            f,
            "{}",
            match self {
                LessThanEqual => "<=",
                StrictlyLessThan => "<",
                NotEqual => "!=",
                Equal => "==",
                GreaterThanEqual => ">=",
                StrictlyGreaterThan => ">",
                Compatible => "~=",
                ArbitraryEqual => "===",
            }
        )
    }
}

impl FromStr for CompareOp {
    type Err = miette::Report;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        use CompareOp::*;
        Ok(match value {
            "==" => Equal,
            "!=" => NotEqual,
            "<=" => LessThanEqual,
            "<" => StrictlyLessThan,
            ">=" => GreaterThanEqual,
            ">" => StrictlyGreaterThan,
            "~=" => Compatible,
            "===" => ArbitraryEqual,
            _ => miette::bail!("unrecognized operator: {:?}", value),
        })
    }
}

fn parse_version_wildcard(input: &str) -> miette::Result<(Version, bool)> {
    let (vstr, wildcard) = if let Some(vstr) = input.strip_suffix(".*") {
        (vstr, true)
    } else {
        (input, false)
    };
    let version: Version =
        Version::parse(vstr).ok_or_else(|| miette::miette!("failed to parse version '{vstr}'"))?;
    Ok((version, wildcard))
}

impl CompareOp {
    /// Converts a comparison like ">= 1.2" into a union of [low, high) ranges.
    ///
    /// Takes a string rather than a `Version` because `==` and `!=` accept wildcards,
    /// which are not valid versions.
    pub fn ranges(&self, rhs: &str) -> miette::Result<SmallVec<[Range<Version>; 1]>> {
        use CompareOp::*;
        let rhs = rhs.trim();
        if self == &ArbitraryEqual {
            miette::bail!("'===' compares strings and has no version range form");
        }
        let (version, wildcard) = parse_version_wildcard(rhs)?;
        Ok(if wildcard {
            if version.dev.is_some() || !version.local.is_empty() {
                miette::bail!("version wildcards can't have dev or local suffixes");
            }
            // == X.* corresponds to the half-open range
            //
            // [X.dev0, (X+1).dev0)
            let mut low = version.clone();
            low.dev = Some(0);
            let mut high = version;
            // .* can also appear after .postX or .aX, so increment the last numeric
            // entry of the version, whatever kind it is.
            if let Some(post) = high.post {
                high.post = Some(post + 1)
            } else if let Some(pre) = high.pre {
                use pep440::PreRelease::*;
                high.pre = Some(match pre {
                    RC(n) => RC(n + 1),
                    A(n) => A(n + 1),
                    B(n) => B(n + 1),
                })
            } else {
                *high.release.last_mut().unwrap() += 1;
            }
            high.dev = Some(0);
            match self {
                Equal => smallvec![low..high],
                NotEqual => {
                    smallvec![VERSION_ZERO.clone()..low, high..VERSION_INFINITY.clone()]
                }
                _ => miette::bail!("can't use wildcard with {:?}", self),
            }
        } else {
            // no wildcards here
            if self != &Equal && self != &NotEqual && !version.local.is_empty() {
                miette::bail!(
                    "operator {:?} cannot be used on a version with a +local suffix",
                    self
                );
            }
            match self {
                // These two are simple
                LessThanEqual => smallvec![VERSION_ZERO.clone()..version.next()],
                GreaterThanEqual => smallvec![version..VERSION_INFINITY.clone()],
                // These are also pretty simple, because the wildcard cases were handled
                // up above.
                Equal => smallvec![version.clone()..version.next()],
                NotEqual => smallvec![
                    VERSION_ZERO.clone()..version.clone(),
                    version.next()..VERSION_INFINITY.clone(),
                ],
                // "The exclusive ordered comparison >V MUST NOT allow a post-release of
                // the given version unless V itself is a post release."
                StrictlyGreaterThan => {
                    let mut low = version.clone();
                    if let Some(dev) = &version.dev {
                        low.dev = Some(dev + 1);
                    } else if let Some(post) = &version.post {
                        low.post = Some(post + 1);
                    } else {
                        // There is no "last" release segment to increment -- X.Y.Z is
                        // shorthand for X.Y.Z.0.0.0... -- so tack on .post(MAX) and rely
                        // on no real version ever carrying it.
                        low.post = Some(u32::MAX);
                    }
                    smallvec![low..VERSION_INFINITY.clone()]
                }
                // "The exclusive ordered comparison <V MUST NOT allow a pre-release of
                // the specified version unless the specified version is itself a
                // pre-release."
                StrictlyLessThan => {
                    if (&version.pre, &version.dev) == (&None, &None) {
                        let mut new_max = version;
                        new_max.dev = Some(0);
                        new_max.post = None;
                        new_max.local = vec![];
                        smallvec![VERSION_ZERO.clone()..new_max]
                    } else {
                        // Otherwise, some kind of pre-release
                        smallvec![VERSION_ZERO.clone()..version]
                    }
                }
                // ~= X.Y.suffixes is the same as >= X.Y.suffixes && == X.*
                // So it's a half-open range:
                //   [X.Y.suffixes, (X+1).dev0)
                Compatible => {
                    if version.release.len() < 2 {
                        miette::bail!("~= operator requires a version with two segments (X.Y)");
                    }
                    let mut new_max = pep440::Version {
                        epoch: version.epoch,
                        release: version.release.clone(),
                        pre: None,
                        post: None,
                        dev: Some(0),
                        local: vec![],
                    };
                    // Unwraps are fine, the release vector was checked to have at least
                    // two elements above.
                    new_max.release.pop().unwrap();
                    *new_max.release.last_mut().unwrap() += 1;
                    smallvec![version..new_max]
                }
                ArbitraryEqual => unreachable!("handled above"),
            }
        })
    }
}

/// The smallest expressible PEP 440 version.
pub static VERSION_ZERO: Lazy<Version> = Lazy::new(|| Version::parse("0a0.dev0").unwrap());

/// An upper sentinel for open-ended ranges. There is no largest PEP 440 version, but this
/// should be large enough that nobody notices the difference.
pub static VERSION_INFINITY: Lazy<Version> = Lazy::new(|| pep440::Version {
    epoch: u32::MAX,
    release: vec![u32::MAX, u32::MAX, u32::MAX],
    pre: None,
    post: Some(u32::MAX),
    dev: None,
    local: vec![],
});

pub(crate) trait VersionExt {
    fn next(&self) -> Self;
}

impl VersionExt for Version {
    /// Returns the smallest PEP 440 version that is larger than self.
    fn next(&self) -> Version {
        let mut new = self.clone();
        // Per the suffix ordering rules of PEP 440:
        //
        // - a .postN cannot follow a .devN, so with a .devN present the next possible
        //   version is .dev(N+1)
        // - a .postN cannot follow a .postN, so with one present the next possible value
        //   is .post(N+1)
        // - anything else can be followed by .post0.dev0
        if let Some(dev) = &mut new.dev {
            *dev += 1;
        } else if let Some(post) = &mut new.post {
            *post += 1;
        } else {
            new.post = Some(0);
            new.dev = Some(0);
        }
        new
    }
}
