use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use tracing::info;
use zip::{result::ZipError, ZipArchive};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("{} is not a readable zip archive: {source}", archive.display())]
    Corrupt {
        archive: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("archive entry `{entry}` resolves outside the extraction root")]
    PathTraversal { entry: String },
    #[error("archive entry `{entry}` clashes with another entry: {source}")]
    Conflict {
        entry: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to extract to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExtractionError {
    /// True when the payload itself is at fault rather than the local disk.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. } | Self::PathTraversal { .. } | Self::Conflict { .. }
        )
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Corrupt { .. } => "corrupt_archive",
            Self::PathTraversal { .. } => "path_traversal",
            Self::Conflict { .. } => "conflicting_entries",
            Self::Io { .. } => "io",
        }
    }
}

/// Extract every entry of the zip at `archive` into `dest`.
///
/// All entry names are validated before anything is written, so an archive
/// carrying a single escaping entry leaves the disk untouched. Nothing is
/// removed on failure; the caller owns `dest`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ExtractionError> {
    let file = File::open(archive).map_err(|source| ExtractionError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let corrupt = |source| ExtractionError::Corrupt {
        archive: archive.to_path_buf(),
        source,
    };
    let mut zip = ZipArchive::new(file).map_err(corrupt)?;
    let targets = plan_targets(&mut zip, dest).map_err(|err| match err {
        PlanError::Zip(source) => corrupt(source),
        PlanError::Escapes(entry) => ExtractionError::PathTraversal { entry },
    })?;

    fs::create_dir_all(dest).map_err(|source| ExtractionError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    for (index, target) in targets.into_iter().enumerate() {
        let mut entry = zip.by_index(index).map_err(corrupt)?;
        let io_err = |source: io::Error| {
            // The job directory starts empty, so a file/directory clash can only
            // come from the archive's own entries.
            if matches!(
                source.kind(),
                io::ErrorKind::AlreadyExists
                    | io::ErrorKind::NotADirectory
                    | io::ErrorKind::IsADirectory
            ) {
                ExtractionError::Conflict {
                    entry: target.name.clone(),
                    source,
                }
            } else {
                ExtractionError::Io {
                    path: target.path.clone(),
                    source,
                }
            }
        };
        if target.is_dir {
            fs::create_dir_all(&target.path).map_err(io_err)?;
            continue;
        }
        if let Some(parent) = target.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut outfile = File::create(&target.path).map_err(io_err)?;
        io::copy(&mut entry, &mut outfile).map_err(|source| {
            // A short read from the archive is a payload problem, not a disk one.
            if source.kind() == io::ErrorKind::UnexpectedEof
                || source.kind() == io::ErrorKind::InvalidData
            {
                corrupt(ZipError::Io(source))
            } else {
                io_err(source)
            }
        })?;
        #[cfg(unix)]
        {
            if let Some(mode) = entry.unix_mode() {
                // Owner keeps read/write so cleanup never trips over the tree.
                let mode = (mode & 0o777) | 0o600;
                fs::set_permissions(&target.path, fs::Permissions::from_mode(mode))
                    .map_err(io_err)?;
            }
        }
    }
    info!(
        archive = %archive.display(),
        dest = %dest.display(),
        entries = zip.len(),
        "archive extracted"
    );
    Ok(())
}

struct Target {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

enum PlanError {
    Zip(ZipError),
    Escapes(String),
}

fn plan_targets(zip: &mut ZipArchive<File>, dest: &Path) -> Result<Vec<Target>, PlanError> {
    let mut targets = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip.by_index(index).map_err(PlanError::Zip)?;
        let name = entry.name().to_string();
        // Backslashes are separators for archives built on Windows.
        if name.contains('\\') && name.split('\\').any(|part| part == "..") {
            return Err(PlanError::Escapes(name));
        }
        let Some(relative) = entry.enclosed_name() else {
            return Err(PlanError::Escapes(name));
        };
        targets.push(Target {
            path: dest.join(relative),
            name,
            is_dir: entry.is_dir(),
        });
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_zip;

    #[test]
    fn extracts_nested_entries() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("proj.zip");
        write_zip(
            &archive,
            &[
                ("gamemodes/", b""),
                ("gamemodes/bare.pwn", b"main() {}\n"),
                ("server.cfg", b"gamemode0 bare 1\n"),
                ("pawno/include/a_samp.inc", b"native print(const s[]);\n"),
            ],
        );
        let dest = temp.path().join("out");
        extract_archive(&archive, &dest).unwrap();
        assert_eq!(
            fs::read_to_string(dest.join("gamemodes/bare.pwn")).unwrap(),
            "main() {}\n"
        );
        assert!(dest.join("server.cfg").is_file());
        assert!(dest.join("pawno/include/a_samp.inc").is_file());
    }

    #[test]
    fn parent_traversal_fails_and_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("evil.zip");
        write_zip(
            &archive,
            &[
                ("gamemodes/bare.pwn", b"main() {}\n"),
                ("../escaped.txt", b"pwned"),
            ],
        );
        let dest = temp.path().join("jail").join("out");
        let err = extract_archive(&archive, &dest).unwrap_err();
        assert!(matches!(err, ExtractionError::PathTraversal { ref entry } if entry == "../escaped.txt"));
        assert!(err.is_input_error());
        assert!(!temp.path().join("jail/escaped.txt").exists());
        assert!(!dest.exists(), "validation must precede any write");
    }

    #[test]
    fn absolute_entry_fails() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("abs.zip");
        write_zip(&archive, &[("/tmp/amxc-abs-escape.txt", b"pwned")]);
        let dest = temp.path().join("out");
        let err = extract_archive(&archive, &dest).unwrap_err();
        assert_eq!(err.reason(), "path_traversal");
    }

    #[test]
    fn backslash_traversal_fails() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("win.zip");
        write_zip(&archive, &[("gamemodes\\..\\..\\escaped.txt", b"pwned")]);
        let err = extract_archive(&archive, &temp.path().join("out")).unwrap_err();
        assert_eq!(err.reason(), "path_traversal");
    }

    #[test]
    fn inner_parent_components_that_stay_inside_are_allowed() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("ok.zip");
        write_zip(&archive, &[("gamemodes/../server.cfg", b"gamemode0 x\n")]);
        let dest = temp.path().join("out");
        extract_archive(&archive, &dest).unwrap();
        assert!(dest.join("server.cfg").is_file());
    }

    #[test]
    fn file_then_directory_of_same_name_is_input_error() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("clash.zip");
        write_zip(&archive, &[("gamemodes", b"flat"), ("gamemodes/bare.pwn", b"main() {}\n")]);
        let err = extract_archive(&archive, &temp.path().join("out")).unwrap_err();
        assert_eq!(err.reason(), "conflicting_entries");
        assert!(err.is_input_error());
    }

    #[test]
    fn directory_then_file_of_same_name_is_input_error() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("clash.zip");
        write_zip(&archive, &[("gamemodes/", b""), ("gamemodes", b"flat")]);
        let err = extract_archive(&archive, &temp.path().join("out")).unwrap_err();
        assert_eq!(err.reason(), "conflicting_entries");
        assert!(err.is_input_error());
    }

    #[test]
    fn garbage_payload_is_corrupt() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("junk.zip");
        fs::write(&archive, b"definitely not a zip file").unwrap();
        let err = extract_archive(&archive, &temp.path().join("out")).unwrap_err();
        assert_eq!(err.reason(), "corrupt_archive");
        assert!(err.is_input_error());
    }

    #[test]
    fn missing_payload_is_io() {
        let temp = tempfile::tempdir().unwrap();
        let err = extract_archive(&temp.path().join("nope.zip"), &temp.path().join("out"))
            .unwrap_err();
        assert_eq!(err.reason(), "io");
        assert!(!err.is_input_error());
    }
}
