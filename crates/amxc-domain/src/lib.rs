#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod layout;
pub mod naming;
pub mod server_cfg;

pub use layout::{
    locate_project, LocateError, ProjectLayout, CONFIG_FILE_NAME, SOURCES_DIR_NAME,
    SOURCE_EXTENSION,
};
pub use naming::{artifact_stem, ARTIFACT_EXTENSION};
pub use server_cfg::{parse_entry_point, read_entry_point};
