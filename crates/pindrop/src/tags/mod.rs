//! Wheels encode the Python interpreter, ABI, and platform that they support in their
//! filenames using platform compatibility tags. This module models those tags and derives
//! the ordered set of tags a target environment supports, which is what decides whether a
//! wheel is usable and which of several usable wheels is preferred.

mod from_target;

use indexmap::IndexSet;
use itertools::Itertools;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

pub use from_target::{Os, ParseOsError};

/// A representation of a tag triple for a wheel.
#[derive(Debug, Clone, Hash, Eq, PartialEq, SerializeDisplay, DeserializeFromStr)]
pub struct WheelTag {
    /// The interpreter tag, e.g. "py3" or "cp310"
    pub interpreter: String,

    /// The ABI tag, e.g. "cp37m", "abi3", "none"
    pub abi: String,

    /// The platform tag, e.g. "manylinux_2_17_x86_64", "any"
    pub platform: String,
}

impl FromStr for WheelTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((interpreter, abi, platform)) =
            s.split('-').map(ToOwned::to_owned).collect_tuple()
        else {
            return Err(String::from("not enough '-' separators"));
        };
        Ok(Self {
            interpreter,
            abi,
            platform,
        })
    }
}

impl Display for WheelTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", &self.interpreter, &self.abi, &self.platform)
    }
}

/// An ordered set of the tags a target environment supports, most specific first.
#[derive(Debug, Clone)]
pub struct WheelTags {
    tags: IndexSet<WheelTag>,
}

impl WheelTags {
    /// Returns an iterator over the supported tags.
    pub fn tags(&self) -> impl Iterator<Item = &'_ WheelTag> + '_ {
        self.tags.iter()
    }

    /// Determines the compatibility of the specified tag with this set. Returns `None` for
    /// an incompatible tag, and otherwise a score that is higher the more specific the tag
    /// is to the platform; a wheel's best score decides artifact preference.
    pub fn compatibility(&self, tag: &WheelTag) -> Option<i32> {
        self.tags.get_index_of(tag).map(|score| -(score as i32))
    }

    /// Returns true if the specified tag is compatible with this set.
    pub fn is_compatible(&self, tag: &WheelTag) -> bool {
        self.tags.contains(tag)
    }
}

impl FromIterator<WheelTag> for WheelTags {
    fn from_iter<T: IntoIterator<Item = WheelTag>>(iter: T) -> Self {
        Self {
            tags: FromIterator::from_iter(iter),
        }
    }
}
