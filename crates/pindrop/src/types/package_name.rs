use miette::Diagnostic;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// The name of a Python distribution. Keeps the spelling the name was created from next to its
/// normalized form; all comparisons, hashing and ordering go through the normalized form so that
/// `Foo_Bar` and `foo-bar` refer to the same package.
#[derive(Debug, Clone, Eq, DeserializeFromStr)]
pub struct PackageName {
    /// The original string this instance was created from
    source: Box<str>,

    /// The normalized version of `source`.
    normalized: Box<str>,
}

impl PackageName {
    /// Returns the string this instance was created from, with its original casing and separators.
    pub fn as_source_str(&self) -> &str {
        self.source.as_ref()
    }

    /// Returns the normalized form of the name as described in
    /// [PEP 503](https://www.python.org/dev/peps/pep-0503/#normalized-names).
    pub fn as_str(&self) -> &str {
        self.normalized.as_ref()
    }
}

/// Error when parsing a package name
#[derive(Debug, Clone, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ParsePackageNameError {
    #[error("invalid package name '{0}'")]
    InvalidPackageName(String),
}

/// Lowercases and collapses every run of `-`, `_` and `.` into a single dash.
fn normalize(name: &str) -> Box<str> {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    let separators = SEPARATORS.get_or_init(|| Regex::new(r"[-_.]+").unwrap());
    separators
        .replace_all(name, "-")
        .to_ascii_lowercase()
        .into_boxed_str()
}

impl FromStr for PackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static NAME_VALIDATE: OnceLock<Regex> = OnceLock::new();
        let name_validate = NAME_VALIDATE.get_or_init(|| {
            // https://packaging.python.org/specifications/core-metadata/#name
            Regex::new(r"(?i-u)^([A-Z0-9]|[A-Z0-9][A-Z0-9._-]*[A-Z0-9])$").unwrap()
        });

        if !name_validate.is_match(s) {
            return Err(ParsePackageNameError::InvalidPackageName(s.into()));
        }

        Ok(PackageName {
            source: s.to_owned().into_boxed_str(),
            normalized: normalize(s),
        })
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state)
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized.eq(&other.normalized)
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl Serialize for PackageName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.source.as_ref().serialize(serializer)
    }
}

/// A package name that only retains the normalized form. Used wherever names act as keys: cache
/// paths, criteria maps, pins.
#[repr(transparent)]
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct NormalizedPackageName(Box<str>);

impl From<PackageName> for NormalizedPackageName {
    fn from(value: PackageName) -> Self {
        Self(value.normalized)
    }
}

impl From<NormalizedPackageName> for PackageName {
    fn from(value: NormalizedPackageName) -> Self {
        Self {
            source: value.0.clone(),
            normalized: value.0,
        }
    }
}

impl Display for NormalizedPackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NormalizedPackageName {
    /// Returns a string reference
    pub fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl FromStr for NormalizedPackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PackageName::from_str(s)?.into())
    }
}

impl Borrow<str> for NormalizedPackageName {
    fn borrow(&self) -> &str {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalization() {
        let name1: PackageName = "Foo-Bar-Baz".parse().unwrap();
        assert_eq!(name1.as_source_str(), "Foo-Bar-Baz");
        assert_eq!(name1.as_str(), "foo-bar-baz");

        let name2: PackageName = "foo_bar.baz".parse().unwrap();
        assert_eq!(name2.as_source_str(), "foo_bar.baz");
        assert_eq!(name2.as_str(), "foo-bar-baz");

        assert_eq!(name1, name2);

        let name3: PackageName = "foo-barbaz".parse().unwrap();
        assert_ne!(name1, name3);
    }

    #[test]
    fn test_separator_runs_collapse() {
        let name: PackageName = "zope.event-hooks".parse().unwrap();
        assert_eq!(name.as_str(), "zope-event-hooks");

        let name: PackageName = "a_-_.b".parse().unwrap();
        assert_eq!(name.as_str(), "a-b");
    }

    #[test]
    fn test_invalid_names() {
        assert!(PackageName::from_str("-leading-dash").is_err());
        assert!(PackageName::from_str("trailing-dot.").is_err());
        assert!(PackageName::from_str("").is_err());
    }
}
