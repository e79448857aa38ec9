/// Extension of compiled Pawn bytecode.
pub const ARTIFACT_EXTENSION: &str = "amx";

const FALLBACK_STEM: &str = "gamemode";
const MAX_STEM_LEN: usize = 64;

/// Derive the artifact stem for an uploaded file name.
///
/// Directory components are dropped (both separators are honored since the
/// name comes from a client), the final extension is stripped, and anything
/// outside `[A-Za-z0-9_-]` collapses into a single `_`. The result is always a
/// non-empty, path-safe file stem.
pub fn artifact_stem(original_name: &str) -> String {
    let file_name = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let stem = match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    };

    let mut result = String::with_capacity(stem.len());
    let mut last_was_sep = false;
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            result.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            result.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = result.trim_matches('_');
    if trimmed.is_empty() {
        return FALLBACK_STEM.to_string();
    }
    trimmed.chars().take(MAX_STEM_LEN).collect()
}
