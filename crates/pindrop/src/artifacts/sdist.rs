use crate::types::{NormalizedPackageName, SDistFilename, SDistFormat};
use crate::utils::ReadAndSeek;
use flate2::read::GzDecoder;
use miette::{miette, IntoDiagnostic};
use std::ffi::OsStr;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path};
use tar::Archive;

/// A source distribution. The only thing we ever read out of one is its PKG-INFO file;
/// build scripts are never executed, so the metadata is only as good as what the sdist
/// statically declares.
pub struct SDist {
    name: SDistFilename,
    file: Box<dyn ReadAndSeek + Send>,
}

impl SDist {
    /// Wraps an opened sdist archive.
    pub fn new(name: SDistFilename, file: Box<dyn ReadAndSeek + Send>) -> Self {
        Self { name, file }
    }

    /// Opens an sdist file on disk.
    pub fn from_path(
        path: &Path,
        normalized_package_name: &NormalizedPackageName,
    ) -> miette::Result<Self> {
        let file_name = path
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or_else(|| miette::miette!("path does not contain a filename"))?;
        let name = SDistFilename::from_filename(file_name, normalized_package_name)
            .into_diagnostic()?;
        let file = std::fs::File::open(path).into_diagnostic()?;
        Ok(Self::new(name, Box::new(file)))
    }

    /// Whether `path` is the PKG-INFO at the root of the unpacked source tree
    /// (`{name}-{version}/PKG-INFO`).
    fn is_root_pkg_info(path: &Path) -> bool {
        let mut components = path.components();
        let Some(Component::Normal(_top_level)) = components.next() else {
            return false;
        };
        matches!(components.next(), Some(Component::Normal(f)) if f == "PKG-INFO")
            && components.next().is_none()
    }

    /// Reads the raw bytes of the PKG-INFO file without unpacking the archive.
    pub fn pkg_info_bytes(&mut self) -> miette::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(0)).into_diagnostic()?;
        match self.name.format {
            SDistFormat::TarGz => {
                let decoder = GzDecoder::new(&mut self.file);
                Self::pkg_info_from_tar(Archive::new(decoder))
            }
            SDistFormat::Tar => Self::pkg_info_from_tar(Archive::new(&mut self.file)),
            SDistFormat::Zip => {
                let mut archive =
                    zip::ZipArchive::new(&mut self.file).into_diagnostic()?;
                let entry_name = archive
                    .file_names()
                    .find(|path| Self::is_root_pkg_info(Path::new(path)))
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| miette!("no PKG-INFO found in archive"))?;
                let mut entry = archive.by_name(&entry_name).into_diagnostic()?;
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes).into_diagnostic()?;
                Ok(bytes)
            }
            format => Err(miette!(
                "reading metadata from {format} source distributions is not supported"
            )),
        }
    }

    fn pkg_info_from_tar<R: Read>(mut archive: Archive<R>) -> miette::Result<Vec<u8>> {
        for entry in archive.entries().into_diagnostic()? {
            let mut entry = entry.into_diagnostic()?;
            let path = entry.path().into_diagnostic()?.into_owned();
            if Self::is_root_pkg_info(&path) {
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes).into_diagnostic()?;
                return Ok(bytes);
            }
        }
        Err(miette!("no PKG-INFO found in archive"))
    }
}
