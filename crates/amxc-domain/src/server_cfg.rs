//! Entry-point discovery for `server.cfg`.
//!
//! Only the `gamemode0 <name>` declaration is understood; every other
//! directive is ignored. The keyword may appear anywhere on a line and when
//! several lines match the first one wins. Identifiers are ASCII word
//! characters only.

use std::{fs, io, path::Path};

use once_cell::sync::Lazy;
use regex::Regex;

static GAMEMODE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i-u)gamemode0?\s+(\w+)").expect("gamemode pattern compiles")
});

/// Return the module named by the first matching declaration line.
pub fn parse_entry_point(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        GAMEMODE_LINE
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|module| module.as_str().to_string())
    })
}

/// Read `path` and return its declared entry point, if any.
///
/// The file is decoded lossily: configs saved by Windows editors are not
/// always valid UTF-8, and only ASCII identifiers matter here.
pub fn read_entry_point(path: &Path) -> io::Result<Option<String>> {
    let bytes = fs::read(path)?;
    Ok(parse_entry_point(&String::from_utf8_lossy(&bytes)))
}
