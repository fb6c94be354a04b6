use crate::types::{NormalizedPackageName, PackageName, Version, WheelFilename};
use crate::utils::ReadAndSeek;
use miette::{Context, IntoDiagnostic};
use std::ffi::OsStr;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use zip::ZipArchive;

/// A wheel file (PEP 427). Only the `*.dist-info/METADATA` entry is ever read out of the
/// archive; the packaged code itself stays untouched.
pub struct Wheel {
    name: WheelFilename,
    archive: ZipArchive<Box<dyn ReadAndSeek + Send>>,
}

impl Wheel {
    /// Opens a wheel from anything readable and seekable.
    pub fn new(
        name: WheelFilename,
        bytes: Box<dyn ReadAndSeek + Send>,
    ) -> miette::Result<Self> {
        Ok(Self {
            name,
            archive: ZipArchive::new(bytes).into_diagnostic()?,
        })
    }

    /// Opens a wheel file on disk.
    pub fn from_path(
        path: &Path,
        normalized_package_name: &NormalizedPackageName,
    ) -> miette::Result<Self> {
        let file_name = path
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or_else(|| miette::miette!("path does not contain a filename"))?;
        let wheel_name =
            WheelFilename::from_filename(file_name, normalized_package_name).into_diagnostic()?;
        let file = File::open(path).into_diagnostic()?;
        Self::new(wheel_name, Box::new(file))
    }

    /// Locates the single `*.dist-info` directory that belongs to this package.
    ///
    /// The wheel spec promises exactly one; a wheel that ships several, or one for a
    /// different package, is malformed.
    fn find_dist_info(&self, name: &PackageName, version: &Version) -> miette::Result<String> {
        let mut candidates = self
            .archive
            .file_names()
            .filter_map(|path| {
                let (dir, _) = path.split_once('/')?;
                let dist_info = dir.strip_suffix(".dist-info")?;
                let (dir_name, dir_version) = dist_info.split_once('-')?;
                let dir_name = PackageName::from_str(dir_name).ok()?;
                let dir_version = Version::parse(dir_version)?;
                (dir_name == *name && dir_version.cmp(version) == std::cmp::Ordering::Equal)
                    .then(|| dir.to_string())
            })
            .collect::<Vec<_>>();
        candidates.dedup();
        match candidates.len() {
            0 => miette::bail!(".dist-info/ missing from {}", self.name),
            1 => Ok(candidates.into_iter().next().unwrap()),
            _ => miette::bail!("found multiple .dist-info/ directories in {}", self.name),
        }
    }

    /// Reads the raw bytes of the METADATA file.
    pub fn metadata_bytes(&mut self) -> miette::Result<Vec<u8>> {
        let dist_info = self.find_dist_info(
            &self.name.distribution.clone(),
            &self.name.version.clone(),
        )?;
        let metadata_path = format!("{dist_info}/METADATA");
        let mut entry = self
            .archive
            .by_name(&metadata_path)
            .into_diagnostic()
            .wrap_err_with(|| format!("{metadata_path} missing from {}", self.name))?;
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).into_diagnostic()?;
        Ok(bytes)
    }
}
