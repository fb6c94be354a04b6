use crate::tags::{Os, WheelTags};
use crate::types::{marker, Version};

/// The environment a resolution targets, fixed at construction: a Python interpreter
/// version, an operating system, the marker variable values both imply, and the induced
/// set of compatible wheel tags. None of it needs to match the machine the resolver runs
/// on.
#[derive(Debug, Clone)]
pub struct TargetEnv {
    python_version: Version,
    python_full_version: Version,
    os: Os,
    markers: MarkerValues,
    tags: WheelTags,
}

/// The values of the PEP 508 marker variables for a target. Assumes CPython on x86-64,
/// one platform family per run.
#[derive(Debug, Clone)]
struct MarkerValues {
    os_name: String,
    sys_platform: String,
    platform_machine: String,
    platform_python_implementation: String,
    platform_release: String,
    platform_system: String,
    platform_version: String,
    python_version: String,
    python_full_version: String,
    implementation_name: String,
    implementation_version: String,
}

impl TargetEnv {
    /// Builds the environment for a Python version (`3.10` or `3.10.4`) on an operating
    /// system.
    pub fn new(python_version: &str, os: Os) -> miette::Result<TargetEnv> {
        let parsed = Version::parse(python_version)
            .ok_or_else(|| miette::miette!("invalid python version '{python_version}'"))?;
        if parsed.release.len() < 2
            || parsed.release.len() > 3
            || parsed.pre.is_some()
            || parsed.dev.is_some()
            || !parsed.local.is_empty()
        {
            miette::bail!(
                "python version must be of the form major.minor or major.minor.micro, got '{python_version}'"
            );
        }

        let major = parsed.release[0];
        let minor = parsed.release[1];
        let micro = parsed.release.get(2).copied().unwrap_or(0);

        let python_version =
            Version::parse(&format!("{major}.{minor}")).expect("always a valid version");
        let python_full_version = Version::parse(&format!("{major}.{minor}.{micro}"))
            .expect("always a valid version");

        let (os_name, sys_platform, platform_system, platform_machine) = match os {
            Os::Linux => ("posix", "linux", "Linux", "x86_64"),
            Os::Macos => ("posix", "darwin", "Darwin", "x86_64"),
            Os::Windows => ("nt", "win32", "Windows", "AMD64"),
        };

        let markers = MarkerValues {
            os_name: os_name.to_string(),
            sys_platform: sys_platform.to_string(),
            platform_machine: platform_machine.to_string(),
            platform_python_implementation: "CPython".to_string(),
            platform_release: String::new(),
            platform_system: platform_system.to_string(),
            platform_version: String::new(),
            python_version: python_version.to_string(),
            python_full_version: python_full_version.to_string(),
            implementation_name: "cpython".to_string(),
            implementation_version: python_full_version.to_string(),
        };

        Ok(TargetEnv {
            python_version,
            python_full_version,
            os,
            markers,
            tags: WheelTags::for_target(major, minor, os),
        })
    }

    /// The target `major.minor` Python version.
    pub fn python_version(&self) -> &Version {
        &self.python_version
    }

    /// The target `major.minor.micro` Python version, the one `requires_python`
    /// constraints are checked against.
    pub fn python_full_version(&self) -> &Version {
        &self.python_full_version
    }

    /// The target operating system.
    pub fn os(&self) -> Os {
        self.os
    }

    /// The wheel tags the target supports, most specific first.
    pub fn tags(&self) -> &WheelTags {
        &self.tags
    }
}

impl marker::Env for TargetEnv {
    fn get_marker_var(&self, var: &str) -> Option<&str> {
        let m = &self.markers;
        match var {
            "os_name" => Some(&m.os_name),
            "sys_platform" => Some(&m.sys_platform),
            "platform_machine" => Some(&m.platform_machine),
            "platform_python_implementation" => Some(&m.platform_python_implementation),
            "platform_release" => Some(&m.platform_release),
            "platform_system" => Some(&m.platform_system),
            "platform_version" => Some(&m.platform_version),
            "python_version" => Some(&m.python_version),
            "python_full_version" => Some(&m.python_full_version),
            "implementation_name" => Some(&m.implementation_name),
            "implementation_version" => Some(&m.implementation_version),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::marker::Env;

    #[test]
    fn test_marker_values_linux() {
        let env = TargetEnv::new("3.10", Os::Linux).unwrap();
        assert_eq!(env.get_marker_var("python_version"), Some("3.10"));
        assert_eq!(env.get_marker_var("python_full_version"), Some("3.10.0"));
        assert_eq!(env.get_marker_var("os_name"), Some("posix"));
        assert_eq!(env.get_marker_var("sys_platform"), Some("linux"));
        assert_eq!(env.get_marker_var("platform_system"), Some("Linux"));
        assert_eq!(env.get_marker_var("extra"), None);
    }

    #[test]
    fn test_marker_values_windows_with_micro() {
        let env = TargetEnv::new("3.8.2", Os::Windows).unwrap();
        assert_eq!(env.get_marker_var("python_version"), Some("3.8"));
        assert_eq!(env.get_marker_var("python_full_version"), Some("3.8.2"));
        assert_eq!(env.get_marker_var("os_name"), Some("nt"));
        assert_eq!(env.get_marker_var("sys_platform"), Some("win32"));
    }

    #[test]
    fn test_invalid_python_versions() {
        assert!(TargetEnv::new("3", Os::Linux).is_err());
        assert!(TargetEnv::new("3.10.1.2", Os::Linux).is_err());
        assert!(TargetEnv::new("3.10rc1", Os::Linux).is_err());
        assert!(TargetEnv::new("not-a-version", Os::Linux).is_err());
    }

    #[test]
    fn test_tags_follow_the_target() {
        let env = TargetEnv::new("3.11", Os::Macos).unwrap();
        let rendered: Vec<String> = env.tags().tags().map(ToString::to_string).collect();
        assert!(rendered.contains(&"cp311-cp311-macosx_11_0_x86_64".to_string()));
        assert!(rendered.contains(&"py3-none-any".to_string()));
    }
}
