//! Payload description and packaging.

use crate::error::{Error, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A script plus the support files it needs on the remote side.
///
/// The script lands at the root of the remote work dir. Each support file
/// keeps its own name; each support directory is copied with its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub script: PathBuf,
    pub support: Vec<PathBuf>,
}

/// A local file and where it goes relative to the remote work dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEntry {
    pub local: PathBuf,
    pub relative: String,
}

impl Payload {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            support: Vec::new(),
        }
    }

    pub fn with_support(mut self, path: impl Into<PathBuf>) -> Self {
        self.support.push(path.into());
        self
    }

    /// File name of the script on the remote side.
    pub fn script_name(&self) -> Result<String> {
        self.script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::ScriptNotFound(self.script.clone()))
    }

    /// Check that every local file exists.
    pub fn validate(&self) -> Result<()> {
        if !self.script.is_file() {
            return Err(Error::ScriptNotFound(self.script.clone()));
        }
        for path in &self.support {
            if !path.exists() {
                return Err(Error::SupportFileNotFound(path.clone()));
            }
        }
        Ok(())
    }

    /// Every file to transfer, script last.
    pub fn entries(&self) -> Result<Vec<PayloadEntry>> {
        let mut entries = Vec::new();

        for path in &self.support {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| Error::SupportFileNotFound(path.clone()))?;

            if path.is_dir() {
                for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
                    let entry = entry.map_err(|e| Error::Packaging(e.to_string()))?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = entry
                        .path()
                        .strip_prefix(path)
                        .map_err(|e| Error::Packaging(e.to_string()))?;
                    entries.push(PayloadEntry {
                        local: entry.path().to_path_buf(),
                        relative: format!("{name}/{}", to_unix(rel)),
                    });
                }
            } else {
                entries.push(PayloadEntry {
                    local: path.clone(),
                    relative: name,
                });
            }
        }

        entries.push(PayloadEntry {
            local: self.script.clone(),
            relative: self.script_name()?,
        });
        Ok(entries)
    }
}

/// Directories (relative) that must exist before uploading `entries` one by one.
pub fn parent_dirs(entries: &[PayloadEntry]) -> Vec<String> {
    let mut dirs = BTreeSet::new();
    for entry in entries {
        let mut current = entry.relative.as_str();
        while let Some((parent, _)) = current.rsplit_once('/') {
            dirs.insert(parent.to_string());
            current = parent;
        }
    }
    dirs.into_iter().collect()
}

/// A gzipped tar of the payload, deleted when dropped.
#[derive(Debug)]
pub struct PackagedArchive {
    path: PathBuf,
}

impl PackagedArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PackagedArchive {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed staging archive {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Could not remove staging archive {}: {e}",
                self.path.display()
            ),
        }
    }
}

/// Pack every payload entry into `archive_path`.
pub fn package(payload: &Payload, archive_path: &Path) -> Result<PackagedArchive> {
    let entries = payload.entries()?;

    if let Some(dir) = archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| Error::Io {
            action: "Failed to create staging directory",
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let file = File::create(archive_path).map_err(|source| Error::Io {
        action: "Failed to create archive",
        path: archive_path.to_path_buf(),
        source,
    })?;
    // from here on the guard cleans up a half-written archive
    let archive = PackagedArchive {
        path: archive_path.to_path_buf(),
    };

    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for entry in &entries {
        builder
            .append_path_with_name(&entry.local, &entry.relative)
            .map_err(|e| {
                Error::Packaging(format!("cannot add {}: {e}", entry.local.display()))
            })?;
    }
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(|e| Error::Packaging(e.to_string()))?;

    log::debug!(
        "Packaged {} files into {}",
        entries.len(),
        archive_path.display()
    );
    Ok(archive)
}

fn to_unix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn fixture(dir: &Path) -> Payload {
        fs::write(dir.join("run.sh"), "#!/bin/bash\necho hi\n").unwrap();
        fs::write(dir.join("common.sh"), "log() { :; }\n").unwrap();
        fs::create_dir_all(dir.join("utils").join("net")).unwrap();
        fs::write(dir.join("utils").join("a.sh"), "a\n").unwrap();
        fs::write(dir.join("utils").join("net").join("b.sh"), "b\n").unwrap();

        Payload::new(dir.join("run.sh"))
            .with_support(dir.join("common.sh"))
            .with_support(dir.join("utils"))
    }

    #[test]
    fn test_entries_layout() {
        let dir = tempfile::tempdir().unwrap();
        let payload = fixture(dir.path());

        let relative: Vec<_> = payload
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.relative)
            .collect();
        assert_eq!(
            relative,
            vec!["common.sh", "utils/a.sh", "utils/net/b.sh", "run.sh"]
        );
    }

    #[test]
    fn test_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let entries = fixture(dir.path()).entries().unwrap();
        assert_eq!(parent_dirs(&entries), vec!["utils", "utils/net"]);
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let payload = fixture(dir.path());
        assert!(payload.validate().is_ok());

        let missing = Payload::new(dir.path().join("nope.sh"));
        assert!(matches!(missing.validate(), Err(Error::ScriptNotFound(_))));

        let missing_support = payload.with_support(dir.path().join("gone"));
        assert!(matches!(
            missing_support.validate(),
            Err(Error::SupportFileNotFound(_))
        ));
    }

    #[test]
    fn test_package_contains_all_entries() {
        let dir = tempfile::tempdir().unwrap();
        let payload = fixture(dir.path());
        let archive_path = dir.path().join("stage").join("payload.tar.gz");

        let archive = package(&payload, &archive_path).unwrap();
        assert!(archive.path().exists());

        let file = File::open(archive.path()).unwrap();
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        let mut names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["common.sh", "run.sh", "utils/a.sh", "utils/net/b.sh"]
        );
    }

    #[test]
    fn test_archive_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let payload = fixture(dir.path());
        let archive_path = dir.path().join("payload.tar.gz");

        let archive = package(&payload, &archive_path).unwrap();
        drop(archive);
        assert!(!archive_path.exists());
    }
}
