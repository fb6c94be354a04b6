// The format of an extra name is underspecified. PEP 508's grammar wants an "identifier"
// (first char [A-Za-z0-9], then also '-', '_' and '.'), but indexes carry extras in the
// wild that violate that freely. PEP 685 settled the matter by normalizing extras exactly
// like package names, which is what we do here: keep the source spelling, compare through
// the normalized form.

use miette::Diagnostic;
use serde::{Serialize, Serializer};
use serde_with::DeserializeFromStr;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// The name of an optional dependency group declared by a package, e.g. `requests[socks]`.
#[derive(Debug, Clone, Eq, DeserializeFromStr)]
pub struct Extra {
    /// The original string this instance was created from
    source: Box<str>,

    /// The normalized version of `source`.
    normalized: Box<str>,
}

impl Extra {
    /// Returns the string this instance was created from.
    pub fn as_source_str(&self) -> &str {
        self.source.as_ref()
    }

    /// Returns the normalized form of the extra name (PEP 685).
    pub fn as_str(&self) -> &str {
        self.normalized.as_ref()
    }
}

/// Error when parsing an extra name. Currently infallible; the type exists so the signature can
/// become stricter without breaking callers.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ParseExtraError {}

impl FromStr for Extra {
    type Err = ParseExtraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static SEPARATORS: OnceLock<regex::Regex> = OnceLock::new();
        let separators = SEPARATORS.get_or_init(|| regex::Regex::new(r"[-_.]+").unwrap());
        let normalized = separators.replace_all(s, "-").to_ascii_lowercase();

        Ok(Self {
            source: s.to_owned().into_boxed_str(),
            normalized: normalized.into_boxed_str(),
        })
    }
}

impl Display for Extra {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Hash for Extra {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state)
    }
}

impl PartialEq for Extra {
    fn eq(&self, other: &Self) -> bool {
        self.normalized.eq(&other.normalized)
    }
}

impl PartialOrd for Extra {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Extra {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl Serialize for Extra {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.source.as_ref().serialize(serializer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_extra_normalization() {
        let a: Extra = "Brotli_Support".parse().unwrap();
        let b: Extra = "brotli-support".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_source_str(), "Brotli_Support");
        assert_eq!(a.as_str(), "brotli-support");
    }
}
