#![allow(dead_code)]

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use assert_cmd::{assert::Assert, cargo::cargo_bin_cmd, Command};
use serde_json::Value;
use tempfile::TempDir;
use zip::write::FileOptions;

const FAKE_PAWNCC: &str = r#"#!/bin/sh
entry="$1"
out="${2#-o}"
if grep -q '#error' "$entry"; then
    echo "$entry(1) : error 001: expected token"
    echo "1 Error." >&2
    exit 1
fi
if grep -q '#warn' "$entry"; then
    echo "$entry(1) : warning 203: symbol is never used" >&2
fi
printf 'AMX:%s\n' "$entry" > "$out"
"#;

/// A service root with a fake `pawncc` under `compiler/pawno`.
pub struct Sandbox {
    pub temp: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = tempfile::Builder::new()
            .prefix("amxc-cli")
            .tempdir()
            .expect("tempdir");
        let pawno = temp.path().join("compiler").join("pawno");
        fs::create_dir_all(pawno.join("include")).expect("pawno dir");
        let compiler = pawno.join("pawncc");
        fs::write(&compiler, FAKE_PAWNCC).expect("fake compiler");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&compiler, fs::Permissions::from_mode(0o755)).expect("chmod");
        }
        Self { temp }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn uploads(&self) -> PathBuf {
        self.root().join("uploads")
    }

    pub fn output(&self) -> PathBuf {
        self.root().join("output")
    }

    /// `amxc` with every root pointed into the sandbox.
    pub fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("amxc");
        cmd.current_dir(self.root())
            .env_remove("AMXC_INCLUDE_DIR")
            .env_remove("AMXC_LOG_FILE")
            .env("AMXC_COMPILER_DIR", self.root().join("compiler"))
            .env("AMXC_UPLOADS_DIR", self.uploads())
            .env("AMXC_OUTPUT_DIR", self.output())
            .env("AMXC_COMPILE_TIMEOUT_SECS", "20")
            .env("NO_COLOR", "1");
        cmd
    }

    /// Zip a project whose `server.cfg` names `entry`, nested under `prefix`.
    pub fn project_zip(&self, file_name: &str, prefix: &str, entry: &str, source: &str) -> PathBuf {
        let path = self.root().join(file_name);
        let pwn = format!("{prefix}gamemodes/{entry}.pwn");
        let cfg_path = format!("{prefix}server.cfg");
        let cfg = format!("echo Executing Server Config...\ngamemode0 {entry} 1\n");
        write_zip(
            &path,
            &[(pwn.as_str(), source.as_bytes()), (cfg_path.as_str(), cfg.as_bytes())],
        );
        path
    }
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    for (name, contents) in entries {
        writer
            .start_file(*name, FileOptions::default())
            .expect("zip entry");
        writer.write_all(contents).expect("zip write");
    }
    writer.finish().expect("finish zip");
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}

pub fn dir_is_empty(path: &Path) -> bool {
    fs::read_dir(path).map_or(true, |mut entries| entries.next().is_none())
}
