use std::{io, path::PathBuf};

use amxc_domain::LocateError;
use serde::Serialize;

use crate::{
    extract::ExtractionError,
    store::StoreError,
    toolchain::ToolchainError,
};

/// Stable diagnostic codes. `AMX1xx` are caller mistakes, `AMX5xx` are ours.
pub mod codes {
    pub const INVALID_UPLOAD: &str = "AMX100";
    pub const BAD_ARCHIVE: &str = "AMX110";
    pub const PROJECT_NOT_FOUND: &str = "AMX120";
    pub const ENTRY_POINT_NOT_FOUND: &str = "AMX121";
    pub const COMPILATION_FAILED: &str = "AMX130";
    pub const ARTIFACT_NOT_FOUND: &str = "AMX140";
    pub const EXTRACTION_IO: &str = "AMX510";
    pub const TOOLCHAIN_UNAVAILABLE: &str = "AMX520";
    pub const COMPILATION_TIMEOUT: &str = "AMX521";
    pub const ARTIFACT_MISSING: &str = "AMX530";
    pub const INTERNAL: &str = "AMX599";
}

/// Who is at fault, in transport-neutral terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Client,
    Server,
}

/// Everything that can end a job early. Component errors pass through
/// unchanged; the orchestrator only wraps them.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid upload: {message}")]
    InvalidUpload {
        reason: &'static str,
        message: String,
    },
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{context} ({}): {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl JobError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUpload { .. } => codes::INVALID_UPLOAD,
            Self::Extraction(err) if err.is_input_error() => codes::BAD_ARCHIVE,
            Self::Extraction(_) => codes::EXTRACTION_IO,
            Self::Locate(LocateError::ProjectNotFound { .. }) => codes::PROJECT_NOT_FOUND,
            Self::Locate(
                LocateError::EntryPointNotFound { .. } | LocateError::EntrySourceMissing { .. },
            ) => codes::ENTRY_POINT_NOT_FOUND,
            Self::Locate(LocateError::Io { .. }) | Self::Io { .. } => codes::INTERNAL,
            Self::Toolchain(err) => match err {
                ToolchainError::Unavailable { .. } | ToolchainError::Process(_) => {
                    codes::TOOLCHAIN_UNAVAILABLE
                }
                ToolchainError::Compilation { .. } => codes::COMPILATION_FAILED,
                ToolchainError::Timeout { .. } => codes::COMPILATION_TIMEOUT,
                ToolchainError::ArtifactMissing { .. } => codes::ARTIFACT_MISSING,
                ToolchainError::StaleOutput { .. } | ToolchainError::Store(_) => codes::INTERNAL,
            },
            Self::Store(StoreError::NotFound { .. }) => codes::ARTIFACT_NOT_FOUND,
            Self::Store(StoreError::Write { .. }) => codes::INTERNAL,
        }
    }

    #[must_use]
    pub fn status_class(&self) -> StatusClass {
        if self.code().starts_with("AMX1") {
            StatusClass::Client
        } else {
            StatusClass::Server
        }
    }

    /// Short machine-readable reason, stable across message rewording.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidUpload { reason, .. } => *reason,
            Self::Extraction(err) => err.reason(),
            Self::Locate(err) => err.reason(),
            Self::Toolchain(err) => match err {
                ToolchainError::Unavailable { .. } => "toolchain_unavailable",
                ToolchainError::Process(_) => "toolchain_process",
                ToolchainError::Compilation { .. } => "compilation_failed",
                ToolchainError::Timeout { .. } => "compilation_timeout",
                ToolchainError::ArtifactMissing { .. } => "artifact_missing",
                ToolchainError::StaleOutput { .. } => "stale_output",
                ToolchainError::Store(_) => "store_write",
            },
            Self::Store(StoreError::NotFound { .. }) => "not_found",
            Self::Store(StoreError::Write { .. }) => "store_write",
            Self::Io { .. } => "io",
        }
    }

    /// Captured compiler streams, for errors that carry them.
    #[must_use]
    pub fn toolchain_output(&self) -> Option<(&str, &str)> {
        match self {
            Self::Toolchain(
                ToolchainError::Compilation { stdout, stderr, .. }
                | ToolchainError::Timeout { stdout, stderr, .. },
            ) => Some((stdout.as_str(), stderr.as_str())),
            _ => None,
        }
    }

    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        let hint = match self {
            Self::InvalidUpload { .. } => "Upload a single .zip archive of the server folder.",
            Self::Locate(LocateError::ProjectNotFound { .. }) => {
                "The archive needs a `gamemodes` folder and a `server.cfg` file."
            }
            Self::Locate(LocateError::EntryPointNotFound { .. }) => {
                "Add a `gamemode0 <name> 1` line to server.cfg."
            }
            Self::Locate(LocateError::EntrySourceMissing { .. }) => {
                "The name after `gamemode0` must match a .pwn file in gamemodes/."
            }
            Self::Toolchain(ToolchainError::Compilation { .. }) => {
                "Fix the errors reported by the compiler and upload again."
            }
            Self::Toolchain(ToolchainError::Unavailable { .. }) => {
                "Check AMXC_COMPILER_DIR points at a directory containing pawno/pawncc."
            }
            Self::Toolchain(ToolchainError::Timeout { .. }) => {
                "Raise AMXC_COMPILE_TIMEOUT_SECS if the gamemode is very large."
            }
            _ => return None,
        };
        Some(hint)
    }
}
