use std::{
    collections::VecDeque,
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::debug;

use crate::server_cfg::read_entry_point;

/// Directory holding the gamemode sources, matched case-insensitively.
pub const SOURCES_DIR_NAME: &str = "gamemodes";
/// Server configuration declaring the entry point, matched case-insensitively.
pub const CONFIG_FILE_NAME: &str = "server.cfg";
/// Extension of Pawn source modules.
pub const SOURCE_EXTENSION: &str = "pwn";

/// Facts discovered about one extracted project tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectLayout {
    pub sources_dir: PathBuf,
    pub config_path: PathBuf,
    pub entry_point: String,
}

impl ProjectLayout {
    /// File name of the entry source, relative to [`Self::sources_dir`].
    pub fn entry_source_name(&self) -> String {
        format!("{}.{SOURCE_EXTENSION}", self.entry_point)
    }

    pub fn entry_source(&self) -> PathBuf {
        self.sources_dir.join(self.entry_source_name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("no `{expected}` {kind} found in the uploaded project")]
    ProjectNotFound {
        expected: &'static str,
        kind: &'static str,
        root: PathBuf,
    },
    #[error("{} does not declare a `gamemode0 <name>` entry point", config.display())]
    EntryPointNotFound { config: PathBuf },
    #[error("entry point `{entry_point}` has no {entry_point}.pwn in {}", sources_dir.display())]
    EntrySourceMissing {
        entry_point: String,
        sources_dir: PathBuf,
    },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LocateError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ProjectNotFound { kind, .. } if *kind == "directory" => "missing_sources_dir",
            Self::ProjectNotFound { .. } => "missing_server_cfg",
            Self::EntryPointNotFound { .. } => "missing_entry_point",
            Self::EntrySourceMissing { .. } => "missing_entry_source",
            Self::Io { .. } => "io",
        }
    }
}

/// Inspect an extracted tree and work out what to compile.
///
/// Both the sources directory and the configuration file are found with a
/// breadth-first walk, so the shallowest match wins regardless of how many
/// wrapper folders the archive carries. Siblings are visited in name order to
/// keep the choice stable across filesystems.
pub fn locate_project(root: &Path) -> Result<ProjectLayout, LocateError> {
    let sources_dir = find_shallowest(root, SOURCES_DIR_NAME, EntryKind::Dir)?.ok_or_else(|| {
        LocateError::ProjectNotFound {
            expected: SOURCES_DIR_NAME,
            kind: "directory",
            root: root.to_path_buf(),
        }
    })?;
    let config_path = find_shallowest(root, CONFIG_FILE_NAME, EntryKind::File)?.ok_or_else(|| {
        LocateError::ProjectNotFound {
            expected: CONFIG_FILE_NAME,
            kind: "file",
            root: root.to_path_buf(),
        }
    })?;
    debug!(
        sources = %sources_dir.display(),
        config = %config_path.display(),
        "project layout discovered"
    );

    let entry_point = read_entry_point(&config_path)
        .map_err(|source| LocateError::Io {
            path: config_path.clone(),
            source,
        })?
        .ok_or_else(|| LocateError::EntryPointNotFound {
            config: config_path.clone(),
        })?;

    let layout = ProjectLayout {
        sources_dir,
        config_path,
        entry_point,
    };
    if !layout.entry_source().is_file() {
        return Err(LocateError::EntrySourceMissing {
            entry_point: layout.entry_point,
            sources_dir: layout.sources_dir,
        });
    }
    Ok(layout)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    File,
}

fn find_shallowest(
    root: &Path,
    name: &str,
    kind: EntryKind,
) -> Result<Option<PathBuf>, LocateError> {
    let mut queue = VecDeque::from([root.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let mut children = read_sorted(&dir)?;
        let mut subdirs = Vec::new();
        for (path, is_dir) in children.drain(..) {
            let matches_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.eq_ignore_ascii_case(name));
            let matches_kind = match kind {
                EntryKind::Dir => is_dir,
                EntryKind::File => !is_dir,
            };
            if matches_name && matches_kind {
                return Ok(Some(path));
            }
            if is_dir {
                subdirs.push(path);
            }
        }
        queue.extend(subdirs);
    }
    Ok(None)
}

fn read_sorted(dir: &Path) -> Result<Vec<(PathBuf, bool)>, LocateError> {
    let io_err = |source| LocateError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        // Symlinks are never followed; extraction does not create them.
        let file_type = entry.file_type().map_err(io_err)?;
        if file_type.is_symlink() {
            continue;
        }
        entries.push((entry.path(), file_type.is_dir()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn bare_project() -> TempDir {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "gamemodes/bare.pwn", "main() {}\n");
        write(temp.path(), "server.cfg", "gamemode0 bare 1\n");
        temp
    }

    #[test]
    fn locates_flat_project() {
        let temp = bare_project();
        let layout = locate_project(temp.path()).unwrap();
        assert_eq!(layout.sources_dir, temp.path().join("gamemodes"));
        assert_eq!(layout.config_path, temp.path().join("server.cfg"));
        assert_eq!(layout.entry_point, "bare");
        assert_eq!(layout.entry_source_name(), "bare.pwn");
    }

    #[test]
    fn descends_into_wrapper_folder_case_insensitively() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "MyServer/GameModes/rp.pwn", "main() {}\n");
        write(temp.path(), "MyServer/Server.CFG", "gamemode0 rp 1\n");
        let layout = locate_project(temp.path()).unwrap();
        assert_eq!(layout.sources_dir, temp.path().join("MyServer/GameModes"));
        assert_eq!(layout.entry_point, "rp");
    }

    #[test]
    fn prefers_shallowest_sources_dir() {
        let temp = bare_project();
        write(temp.path(), "a/b/gamemodes/deep.pwn", "main() {}\n");
        let layout = locate_project(temp.path()).unwrap();
        assert_eq!(layout.sources_dir, temp.path().join("gamemodes"));
    }

    #[test]
    fn file_named_like_sources_dir_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "gamemodes", "not a directory");
        write(temp.path(), "server.cfg", "gamemode0 bare 1\n");
        let err = locate_project(temp.path()).unwrap_err();
        assert_eq!(err.reason(), "missing_sources_dir");
    }

    #[test]
    fn missing_sources_dir_is_project_not_found() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "server.cfg", "gamemode0 bare 1\n");
        write(temp.path(), "filterscripts/admin.pwn", "main() {}\n");
        let err = locate_project(temp.path()).unwrap_err();
        assert!(matches!(err, LocateError::ProjectNotFound { expected, .. } if expected == "gamemodes"));
    }

    #[test]
    fn missing_config_is_project_not_found() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "gamemodes/bare.pwn", "main() {}\n");
        let err = locate_project(temp.path()).unwrap_err();
        assert_eq!(err.reason(), "missing_server_cfg");
    }

    #[test]
    fn config_without_declaration_is_entry_point_not_found() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "gamemodes/bare.pwn", "main() {}\n");
        write(temp.path(), "server.cfg", "hostname test\nmaxplayers 50\n");
        let err = locate_project(temp.path()).unwrap_err();
        assert!(matches!(err, LocateError::EntryPointNotFound { .. }));
    }

    #[test]
    fn conflicting_declarations_pick_the_first() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "gamemodes/alpha.pwn", "main() {}\n");
        write(temp.path(), "gamemodes/beta.pwn", "main() {}\n");
        write(temp.path(), "server.cfg", "gamemode0 alpha 1\ngamemode0 beta 1\n");
        let layout = locate_project(temp.path()).unwrap();
        assert_eq!(layout.entry_point, "alpha");
    }

    #[test]
    fn declared_module_without_source_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "gamemodes/other.pwn", "main() {}\n");
        write(temp.path(), "server.cfg", "gamemode0 bare 1\n");
        let err = locate_project(temp.path()).unwrap_err();
        assert_eq!(err.reason(), "missing_entry_source");
    }
}
