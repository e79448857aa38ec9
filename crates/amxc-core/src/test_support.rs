use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

use tempfile::TempDir;
use zip::write::FileOptions;

use crate::Config;

/// Stand-in for `pawncc`. Source markers steer its behavior:
/// `#error` fails, `#warn` writes to stderr, `#hang` sleeps, `#noout` exits
/// cleanly without producing the artifact.
const FAKE_PAWNCC: &str = r#"#!/bin/sh
entry="$1"
out="${2#-o}"
if [ ! -f "$entry" ]; then
    echo "cannot read from file: \"$entry\"" >&2
    exit 2
fi
if grep -q '#hang' "$entry"; then
    sleep 30
fi
if grep -q '#error' "$entry"; then
    echo "$entry(1) : error 001: expected token"
    echo "1 Error." >&2
    exit 1
fi
if grep -q '#warn' "$entry"; then
    echo "$entry(1) : warning 203: symbol is never used" >&2
fi
echo "cwd=$(pwd -P)"
echo "args=$*"
echo "path=$PATH"
if grep -q '#noout' "$entry"; then
    exit 0
fi
printf 'AMX:%s\n' "$entry" > "$out"
"#;

pub(crate) fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, FileOptions::default()).unwrap();
        } else {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(contents).unwrap();
        }
    }
    writer.finish().unwrap();
}

/// Zip a minimal project whose `server.cfg` names `entry`.
pub(crate) fn write_project_zip(path: &Path, entry: &str, source: &str) {
    let pwn = format!("gamemodes/{entry}.pwn");
    let cfg = format!("echo Executing Server Config...\ngamemode0 {entry} 1\n");
    write_zip(
        path,
        &[
            (pwn.as_str(), source.as_bytes()),
            ("server.cfg", cfg.as_bytes()),
        ],
    );
}

pub(crate) fn write_project(root: &Path, entry: &str, source: &str) {
    fs::create_dir_all(root.join("gamemodes")).unwrap();
    fs::write(root.join("gamemodes").join(format!("{entry}.pwn")), source).unwrap();
    fs::write(root.join("server.cfg"), format!("gamemode0 {entry} 1\n")).unwrap();
}

/// A service root with the fake compiler installed and both roots created.
pub(crate) fn fake_toolchain() -> (TempDir, Config) {
    let temp = tempfile::tempdir().unwrap();
    let config = Config::rooted(temp.path());
    let compiler = config.paths().compiler_binary();
    fs::create_dir_all(compiler.parent().unwrap()).unwrap();
    fs::create_dir_all(&config.paths().include_dir).unwrap();
    fs::write(&compiler, FAKE_PAWNCC).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&compiler, fs::Permissions::from_mode(0o755)).unwrap();
    }
    config.ensure_dirs().unwrap();
    (temp, config)
}
