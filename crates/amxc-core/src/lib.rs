#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod config;
pub mod error;
pub mod extract;
pub mod job;
pub mod outcome;
pub mod process;
pub mod store;
pub mod toolchain;

#[cfg(test)]
mod test_support;

pub use crate::config::{Config, GlobalOptions, LimitsConfig, PathsConfig, StderrPolicy};
pub use crate::error::{codes, JobError, StatusClass};
pub use crate::extract::{extract_archive, ExtractionError};
pub use crate::job::{ArtifactRef, CompilerService, JobRequest, UploadedArchive};
pub use crate::outcome::{to_json_response, CommandStatus, ExecutionOutcome};
pub use crate::process::{run_command, CaptureLimits, ProcessError, RunOutput};
pub use crate::store::{ArtifactStore, StoreError};
pub use crate::toolchain::{compile, CompiledArtifact, ToolchainError, FIXED_FLAGS};

pub use amxc_domain::{locate_project, LocateError, ProjectLayout};

pub const AMXC_VERSION: &str = env!("CARGO_PKG_VERSION");
