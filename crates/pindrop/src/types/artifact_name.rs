use super::{NormalizedPackageName, PackageName, ParsePackageNameError};
use crate::tags::WheelTag;
use crate::types::Version;
use itertools::Itertools;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// The name of a downloadable file for a `{name, version}` and the properties that can be
/// derived from it alone.
///
/// A wheel is a pre-built binary distribution: its filename encodes which interpreters,
/// ABIs and platforms it supports, and its metadata can be read without running anything.
/// A source distribution (sdist) is an archive of the project source; it is
/// platform-independent but its metadata is only as reliable as what its PKG-INFO records.
#[derive(Debug, Clone, PartialOrd, Ord, Eq, PartialEq, Hash)]
pub enum ArtifactName {
    /// A binary wheel
    Wheel(WheelFilename),
    /// A source distribution
    SDist(SDistFilename),
}

impl ArtifactName {
    /// Returns the version encoded in the artifact name.
    pub fn version(&self) -> &Version {
        match self {
            ArtifactName::Wheel(name) => &name.version,
            ArtifactName::SDist(name) => &name.version,
        }
    }

    /// Returns the distribution name encoded in the artifact name.
    pub fn distribution(&self) -> &PackageName {
        match self {
            ArtifactName::Wheel(name) => &name.distribution,
            ArtifactName::SDist(name) => &name.distribution,
        }
    }

    /// Returns this name as a wheel name, if it is one.
    pub fn as_wheel(&self) -> Option<&WheelFilename> {
        match self {
            ArtifactName::Wheel(wheel) => Some(wheel),
            ArtifactName::SDist(_) => None,
        }
    }

    /// Returns this name as an sdist name, if it is one.
    pub fn as_sdist(&self) -> Option<&SDistFilename> {
        match self {
            ArtifactName::Wheel(_) => None,
            ArtifactName::SDist(sdist) => Some(sdist),
        }
    }

    /// The relative path under which this artifact is stored in the artifact cache:
    /// `{normalized-name}/{version}/{filename}`.
    pub fn cache_key(&self) -> PathBuf {
        let mut path = PathBuf::new();
        path.push(self.distribution().as_str());
        path.push(self.version().to_string());
        path.push(self.to_string());
        path
    }
}

impl Display for ArtifactName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactName::Wheel(name) => write!(f, "{}", name),
            ArtifactName::SDist(name) => write!(f, "{}", name),
        }
    }
}

/// The parsed form of a wheel filename.
/// See [File Name Convention](https://www.python.org/dev/peps/pep-0427/#file-name-convention).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, SerializeDisplay)]
pub struct WheelFilename {
    /// Distribution name, e.g. 'django', 'pyramid'.
    pub distribution: PackageName,

    /// Distribution version, e.g. 1.0.
    pub version: Version,

    /// Optional build number, a tie-breaker between otherwise identical wheels.
    pub build_tag: Option<BuildTag>,

    /// Language implementation tags, e.g. 'py3', 'cp310'.
    pub py_tags: Vec<String>,

    /// ABI tags, e.g. 'cp33m', 'abi3', 'none'.
    pub abi_tags: Vec<String>,

    /// Platform tags, e.g. 'linux_x86_64', 'any', 'manylinux_2_17_x86_64'.
    pub arch_tags: Vec<String>,
}

impl WheelFilename {
    /// Returns an iterator over every tag triple this wheel name covers. A compressed
    /// filename like `py2.py3-none-any` expands to the cartesian product of its parts.
    pub fn all_tags_iter(&self) -> impl Iterator<Item = WheelTag> + '_ {
        self.py_tags
            .iter()
            .cartesian_product(self.abi_tags.iter())
            .cartesian_product(self.arch_tags.iter())
            .map(|((py, abi), arch)| WheelTag {
                interpreter: py.clone(),
                abi: abi.clone(),
                platform: arch.clone(),
            })
    }
}

impl Display for WheelFilename {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{dist}-{ver}{build}-{py_tags}-{abi_tags}-{arch_tags}.whl",
            dist = self.distribution.as_source_str(),
            ver = self.version,
            build = self
                .build_tag
                .as_ref()
                .map_or_else(|| String::from(""), |tag| format!("-{tag}")),
            py_tags = self.py_tags.join("."),
            abi_tags = self.abi_tags.join("."),
            arch_tags = self.arch_tags.join("."),
        )
    }
}

/// A build number. Must start with a digit. Sorts as a two-item tuple of the leading
/// digits (as an int) and the remainder (as a str).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct BuildTag {
    number: u32,
    name: String,
}

impl Display for BuildTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.number, &self.name)
    }
}

/// The parsed form of a source distribution filename, e.g. `trio-0.18.0.tar.gz`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, SerializeDisplay)]
pub struct SDistFilename {
    /// Distribution name.
    pub distribution: PackageName,

    /// Distribution version.
    pub version: Version,

    /// The archive format of the file.
    pub format: SDistFormat,
}

impl Display for SDistFilename {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{dist}-{ver}{format}",
            dist = self.distribution.as_source_str(),
            ver = self.version,
            format = self.format,
        )
    }
}

/// The archive format of a source distribution.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
#[allow(missing_docs)]
pub enum SDistFormat {
    Zip,
    TarGz,
    TarBz2,
    TarXz,
    TarZ,
    Tar,
}

impl SDistFormat {
    /// Formats whose metadata we can read. Exotic compression schemes are listed so their
    /// filenames parse, but they are never selected.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::TarGz | Self::Tar | Self::Zip)
    }
}

impl Display for SDistFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{format}",
            format = match self {
                SDistFormat::Zip => ".zip",
                SDistFormat::TarGz => ".tar.gz",
                SDistFormat::TarBz2 => ".tar.bz2",
                SDistFormat::TarXz => ".tar.xz",
                SDistFormat::TarZ => ".tar.Z",
                SDistFormat::Tar => ".tar",
            }
        )
    }
}

/// An error that can occur when parsing an artifact name
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum ParseArtifactNameError {
    #[error("invalid artifact name")]
    InvalidName,

    #[error("package name '{0}' not found in filename: '{1}'")]
    PackageNameNotFound(NormalizedPackageName, String),

    #[error("invalid artifact extension. Must be either .whl, .tar.gz, or .zip (filename='{0}')")]
    InvalidExtension(String),

    #[error(transparent)]
    InvalidPackageName(#[from] ParsePackageNameError),

    #[error("invalid version: '{0}'")]
    InvalidVersion(String),

    #[error("build tag '{0}' must start with a digit")]
    BuildTagMustStartWithDigit(String),
}

impl FromStr for BuildTag {
    type Err = ParseArtifactNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let first_alpha_idx = s.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(s.len());
        let (digits, name) = s.split_at(first_alpha_idx);
        Ok(Self {
            number: digits
                .parse()
                .map_err(|_| ParseArtifactNameError::BuildTagMustStartWithDigit(s.to_owned()))?,
            name: name.to_owned(),
        })
    }
}

/// Splits a filename into the distribution part and the rest by locating the `-` at which
/// the prefix normalizes to the expected package name.
///
/// E.g. `trio-three-0.18.0-py3-none-any.whl` with normalized package name `trio-three`
/// splits into (`trio-three`, `0.18.0-py3-none-any.whl`).
fn split_into_filename_rest<'a>(
    s: &'a str,
    normalized_package_name: &NormalizedPackageName,
) -> Option<(&'a str, &'a str)> {
    for (idx, char) in s.char_indices() {
        if char == '-' {
            let (name, rest) = (&s[..idx], &s[idx + 1..]);
            if let Ok(parsed) = name.parse::<NormalizedPackageName>() {
                if parsed == *normalized_package_name {
                    return Some((name, rest));
                }
            }
        }
    }
    None
}

impl SDistFilename {
    /// Parses an sdist name from a filename string, e.g. `trio-0.18.0.tar.gz`. The caller
    /// supplies the package name because the version may itself contain dashes.
    pub fn from_filename(
        s: &str,
        normalized_package_name: &NormalizedPackageName,
    ) -> Result<Self, ParseArtifactNameError> {
        let (package_name, rest) = split_into_filename_rest(s, normalized_package_name).ok_or(
            ParseArtifactNameError::PackageNameNotFound(
                normalized_package_name.clone(),
                s.to_string(),
            ),
        )?;

        let (version, format) = if let Some(rest) = rest.strip_suffix(".zip") {
            (rest, SDistFormat::Zip)
        } else if let Some(rest) = rest.strip_suffix(".tar.gz") {
            (rest, SDistFormat::TarGz)
        } else if let Some(rest) = rest.strip_suffix(".tar.bz2") {
            (rest, SDistFormat::TarBz2)
        } else if let Some(rest) = rest.strip_suffix(".tar.xz") {
            (rest, SDistFormat::TarXz)
        } else if let Some(rest) = rest.strip_suffix(".tar.Z") {
            (rest, SDistFormat::TarZ)
        } else if let Some(rest) = rest.strip_suffix(".tar") {
            (rest, SDistFormat::Tar)
        } else {
            return Err(ParseArtifactNameError::InvalidExtension(rest.to_string()));
        };

        let distribution = PackageName::from_str(package_name)
            .map_err(ParseArtifactNameError::InvalidPackageName)?;

        let version = Version::parse(version)
            .ok_or_else(|| ParseArtifactNameError::InvalidVersion(version.to_string()))?;

        Ok(SDistFilename {
            distribution,
            version,
            format,
        })
    }
}

impl WheelFilename {
    /// Parses a wheel name from a filename string, e.g. `trio-0.18.0-py3-none-any.whl`.
    pub fn from_filename(
        s: &str,
        normalized_package_name: &NormalizedPackageName,
    ) -> Result<Self, ParseArtifactNameError> {
        let Some(file_stem) = s.strip_suffix(".whl") else {
            return Err(ParseArtifactNameError::InvalidExtension(s.to_string()));
        };

        // Parse the distribution
        let Some((distribution, rest)) =
            split_into_filename_rest(file_stem, normalized_package_name)
        else {
            return Err(ParseArtifactNameError::PackageNameNotFound(
                normalized_package_name.clone(),
                s.to_string(),
            ));
        };
        let distribution = PackageName::from_str(distribution)
            .map_err(ParseArtifactNameError::InvalidPackageName)?;

        // Parse the version
        let Some((version, rest)) = rest.split_once('-') else {
            return Err(ParseArtifactNameError::InvalidName);
        };
        let version = Version::parse(version)
            .ok_or_else(|| ParseArtifactNameError::InvalidVersion(version.to_string()))?;

        // Parse the platform tag
        let Some((rest, platform_tags)) = rest.rsplit_once('-') else {
            return Err(ParseArtifactNameError::InvalidName);
        };
        let arch_tags = platform_tags.split('.').map(ToOwned::to_owned).collect();

        // Parse the abi tag
        let Some((rest, abi_tag)) = rest.rsplit_once('-') else {
            return Err(ParseArtifactNameError::InvalidName);
        };
        let abi_tags = abi_tag.split('.').map(ToOwned::to_owned).collect();

        // Parse the python tag, with the optional build tag before it
        let (build_tag, python_tag) = match rest.rsplit_once('-') {
            Some((build_tag, python_tag)) => (Some(build_tag), python_tag),
            None => (None, rest),
        };
        let py_tags = python_tag.split('.').map(ToOwned::to_owned).collect();
        let build_tag = build_tag
            .map(BuildTag::from_str)
            .map_or_else(|| Ok(None), |result| result.map(Some))?;

        Ok(Self {
            distribution,
            version,
            build_tag,
            py_tags,
            abi_tags,
            arch_tags,
        })
    }
}

impl ArtifactName {
    /// Parses an artifact name from a filename string, using the package name to decide
    /// where the distribution part ends.
    pub fn from_filename(
        input: &str,
        normalized_package_name: &NormalizedPackageName,
    ) -> Result<Self, ParseArtifactNameError> {
        if input.ends_with(".whl") {
            Ok(ArtifactName::Wheel(WheelFilename::from_filename(
                input,
                normalized_package_name,
            )?))
        } else if input.ends_with(".zip")
            || input.ends_with(".tar.gz")
            || input.ends_with(".tar.bz2")
            || input.ends_with(".tar.xz")
            || input.ends_with(".tar.Z")
            || input.ends_with(".tar")
        {
            Ok(ArtifactName::SDist(SDistFilename::from_filename(
                input,
                normalized_package_name,
            )?))
        } else {
            Err(ParseArtifactNameError::InvalidExtension(input.to_string()))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_filename_splitting() {
        let normalized_package_name = NormalizedPackageName::from_str("trio").unwrap();
        let filename = "trio-0.18.0-py3-none-any.whl";
        let (name, rest) = split_into_filename_rest(filename, &normalized_package_name).unwrap();
        assert_eq!(name, "trio");
        assert_eq!(rest, "0.18.0-py3-none-any.whl");

        let normalized_package_name = NormalizedPackageName::from_str("trio-three").unwrap();
        let filename = "trio-three-0.18.0-py3-none-any.whl";
        let (name, rest) = split_into_filename_rest(filename, &normalized_package_name).unwrap();
        assert_eq!(name, "trio-three");
        assert_eq!(rest, "0.18.0-py3-none-any.whl");
    }

    #[test]
    fn test_sdist_name_from_str() {
        let sn =
            SDistFilename::from_filename("trio-0.19a0.tar.gz", &"trio".parse().unwrap()).unwrap();
        assert_eq!(sn.distribution, "trio".parse().unwrap());
        assert_eq!(sn.version, Version::parse("0.19a0").unwrap());

        let sn = SDistFilename::from_filename(
            "create_ap-gui-1.3.1.tar.gz",
            &"create_ap-gui".parse().unwrap(),
        )
        .unwrap();

        assert_eq!(sn.distribution, "create_ap-gui".parse().unwrap());
        assert_eq!(sn.version, Version::parse("1.3.1").unwrap());
    }

    #[test]
    fn test_many_linux() {
        let n = WheelFilename::from_filename(
            "numpy-1.26.0-pp39-pypy39_pp73-manylinux_2_17_x86_64.manylinux2014_x86_64.whl",
            &"numpy".parse().unwrap(),
        )
        .unwrap();

        assert_eq!(
            n.arch_tags,
            vec!["manylinux_2_17_x86_64", "manylinux2014_x86_64"]
        );
    }

    #[test]
    fn test_wheel_name_from_str() {
        let n =
            WheelFilename::from_filename("trio-0.18.0-py3-none-any.whl", &"trio".parse().unwrap())
                .unwrap();
        assert_eq!(n.distribution, "trio".parse().unwrap());
        assert_eq!(n.version, Version::parse("0.18.0").unwrap());
        assert_eq!(n.build_tag, None);
        assert_eq!(n.py_tags, vec!["py3"]);
        assert_eq!(n.abi_tags, vec!["none"]);
        assert_eq!(n.arch_tags, vec!["any"]);

        assert_eq!(n.to_string(), "trio-0.18.0-py3-none-any.whl");
    }

    #[test]
    fn test_wheel_name_with_build_tag() {
        let n = WheelFilename::from_filename(
            "foo.bar-0.1b3-1local-py2.py3-none-any.whl",
            &"foo.bar".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(n.distribution, "foo.bar".parse().unwrap());
        assert_eq!(n.version, Version::parse("0.1b3").unwrap());
        assert_eq!(
            n.build_tag,
            Some(BuildTag {
                number: 1,
                name: String::from("local"),
            })
        );
        assert_eq!(n.py_tags, vec!["py2", "py3"],);
        assert_eq!(n.abi_tags, vec!["none"]);
        assert_eq!(n.arch_tags, vec!["any"]);

        assert_eq!(n.to_string(), "foo.bar-0.1b3-1local-py2.py3-none-any.whl");
    }

    #[test]
    fn test_cache_key() {
        let name =
            ArtifactName::from_filename("trio-0.18.0-py3-none-any.whl", &"trio".parse().unwrap())
                .unwrap();
        assert_eq!(
            name.cache_key(),
            PathBuf::from("trio/0.18.0/trio-0.18.0-py3-none-any.whl")
        );
    }
}
