use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("artifact `{name}` not found")]
    NotFound { name: String },
    #[error("artifact store write to {} failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Flat, name-addressed directory of compiled artifacts.
///
/// Writes go through a temporary sibling and an atomic rename, so concurrent
/// readers see either the previous artifact or the new one, never a prefix.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `source` into the store under `name`, replacing any previous entry.
    pub fn put(&self, name: &str, source: &Path) -> Result<PathBuf, StoreError> {
        let dest = self.slot(name).ok_or_else(|| StoreError::NotFound {
            name: name.to_string(),
        })?;
        fs::create_dir_all(&self.root).map_err(write_error(&self.root))?;
        let staged = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".partial")
            .tempfile_in(&self.root)
            .map_err(write_error(&self.root))?;
        fs::copy(source, staged.path()).map_err(write_error(source))?;
        staged
            .persist(&dest)
            .map_err(|err| StoreError::Write {
                path: dest.clone(),
                source: err.error,
            })?;
        debug!(artifact = %dest.display(), "artifact stored");
        Ok(dest)
    }

    /// Resolve `name` to an existing artifact path.
    pub fn get(&self, name: &str) -> Result<PathBuf, StoreError> {
        self.slot(name)
            .filter(|path| path.is_file())
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })
    }

    /// Path for `name` if it is a plain file name inside the store.
    fn slot(&self, name: &str) -> Option<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\', '\0'])
            && name != "..";
        valid.then(|| self.root.join(name))
    }
}

fn write_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Write { path, source }
}
