//! Derives the supported-tag set of a *described* environment instead of interrogating a
//! live interpreter: the resolver targets interpreters and operating systems that need not
//! match the host. One platform tag family per target (x86-64).

use super::{WheelTag, WheelTags};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// The operating system a resolution targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Os {
    Linux,
    Macos,
    Windows,
}

/// Error returned when an operating system name is not recognized.
#[derive(Debug, Clone, Error)]
#[error("unknown operating system '{0}', expected linux, macos or windows")]
pub struct ParseOsError(String);

impl FromStr for Os {
    type Err = ParseOsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Os::Linux),
            "macos" | "darwin" => Ok(Os::Macos),
            "windows" | "win" => Ok(Os::Windows),
            _ => Err(ParseOsError(s.to_string())),
        }
    }
}

impl Display for Os {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Os::Linux => write!(f, "linux"),
            Os::Macos => write!(f, "macos"),
            Os::Windows => write!(f, "windows"),
        }
    }
}

/// The platform tags an x86-64 machine running `os` supports, best first. Every machine
/// that supports a given manylinux/macosx level also supports all older levels, hence the
/// descending cascades.
fn platform_tags(os: Os) -> Vec<String> {
    match os {
        Os::Linux => {
            let mut tags = Vec::new();
            for minor in (0..=17u32).rev() {
                tags.push(format!("manylinux_2_{minor}_x86_64"));
                // the legacy aliases of specific glibc levels
                match minor {
                    17 => tags.push("manylinux2014_x86_64".to_string()),
                    12 => tags.push("manylinux2010_x86_64".to_string()),
                    5 => tags.push("manylinux1_x86_64".to_string()),
                    _ => (),
                }
            }
            tags.push("linux_x86_64".to_string());
            tags
        }
        Os::Macos => {
            let mut tags = Vec::new();
            for major in (11..=14u32).rev() {
                for arch in ["x86_64", "universal2"] {
                    tags.push(format!("macosx_{major}_0_{arch}"));
                }
            }
            for minor in (0..=15u32).rev() {
                for arch in ["x86_64", "universal2", "intel"] {
                    tags.push(format!("macosx_10_{minor}_{arch}"));
                }
            }
            tags
        }
        Os::Windows => vec!["win_amd64".to_string()],
    }
}

impl WheelTags {
    /// Builds the supported-tag set for a CPython of the given major/minor version running
    /// on `os`. The order mirrors what `packaging.tags` emits for such an interpreter:
    /// per platform the interpreter-specific tags, then abi3 wheels of older CPythons,
    /// then the generic python tags; the platform-independent `any` block comes last.
    pub fn for_target(major: u32, minor: u32, os: Os) -> WheelTags {
        let platforms = platform_tags(os);
        let mut tags = Vec::new();

        let tag = |interpreter: &str, abi: &str, platform: &str| WheelTag {
            interpreter: interpreter.to_string(),
            abi: abi.to_string(),
            platform: platform.to_string(),
        };

        for platform in &platforms {
            let cp = format!("cp{major}{minor}");
            tags.push(tag(&cp, &cp, platform));
            tags.push(tag(&cp, "abi3", platform));
            tags.push(tag(&cp, "none", platform));
            for older in (2..minor).rev() {
                tags.push(tag(&format!("cp{major}{older}"), "abi3", platform));
            }
            tags.push(tag(&format!("py{major}{minor}"), "none", platform));
            tags.push(tag(&format!("py{major}"), "none", platform));
            for older in (0..minor).rev() {
                tags.push(tag(&format!("py{major}{older}"), "none", platform));
            }
        }

        tags.push(tag(&format!("cp{major}{minor}"), "none", "any"));
        tags.push(tag(&format!("py{major}{minor}"), "none", "any"));
        tags.push(tag(&format!("py{major}"), "none", "any"));
        for older in (0..minor).rev() {
            tags.push(tag(&format!("py{major}{older}"), "none", "any"));
        }

        tags.into_iter().collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_windows_cascade() {
        let tags = WheelTags::for_target(3, 10, Os::Windows);
        let rendered: Vec<String> = tags.tags().map(ToString::to_string).collect();

        let head = [
            "cp310-cp310-win_amd64",
            "cp310-abi3-win_amd64",
            "cp310-none-win_amd64",
            "cp39-abi3-win_amd64",
        ];
        assert_eq!(&rendered[..head.len()], &head);
        assert!(rendered.contains(&"py3-none-any".to_string()));
        assert!(rendered.contains(&"py38-none-win_amd64".to_string()));
        // most specific beats the universal fallback
        let pos = |t: &str| rendered.iter().position(|x| x == t).unwrap();
        assert!(pos("cp310-cp310-win_amd64") < pos("py3-none-any"));
    }

    #[test]
    fn test_linux_platform_expansion() {
        let tags = WheelTags::for_target(3, 8, Os::Linux);
        let rendered: Vec<String> = tags.tags().map(ToString::to_string).collect();
        assert!(rendered.contains(&"cp38-cp38-manylinux_2_17_x86_64".to_string()));
        assert!(rendered.contains(&"cp38-cp38-manylinux2014_x86_64".to_string()));
        assert!(rendered.contains(&"cp38-cp38-manylinux1_x86_64".to_string()));
        assert!(rendered.contains(&"cp38-cp38-linux_x86_64".to_string()));
        // newer glibc levels are preferred over older ones
        let pos = |t: &str| rendered.iter().position(|x| x == t).unwrap();
        assert!(
            pos("cp38-cp38-manylinux_2_17_x86_64") < pos("cp38-cp38-manylinux_2_5_x86_64")
        );
    }

    #[test]
    fn test_os_parsing() {
        assert_eq!("linux".parse::<Os>().unwrap(), Os::Linux);
        assert_eq!("Darwin".parse::<Os>().unwrap(), Os::Macos);
        assert_eq!("windows".parse::<Os>().unwrap(), Os::Windows);
        assert!("beos".parse::<Os>().is_err());
    }
}
