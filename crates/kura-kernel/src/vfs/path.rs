//! POSIX-style virtual path utilities.
//!
//! Every path entering the VFS goes through [`normalize`] exactly once,
//! before routing and before any backend touches it. Paths are always
//! absolute, `/`-separated strings; `..` never climbs above root.

/// Normalize a path: collapse repeated slashes, resolve `.` and `..`
/// (capped at root), strip trailing slashes. The empty path is `/`.
pub fn normalize(p: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            seg => out.push(seg),
        }
    }
    if out.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", out.join("/"))
    }
}

/// Join two path fragments and normalize the result.
pub fn join(a: &str, b: &str) -> String {
    normalize(&format!("{a}/{b}"))
}

/// Resolve a sequence of fragments against a base path.
pub fn resolve(base: &str, parts: &[&str]) -> String {
    parts.iter().fold(normalize(base), |acc, p| join(&acc, p))
}

/// Parent directory of a normalized path. `dirname("/") == "/"`.
pub fn dirname(p: &str) -> String {
    let p = normalize(p);
    match p.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => p[..i].to_string(),
        None => "/".to_string(),
    }
}

/// Final segment of a normalized path. Empty at root.
pub fn basename(p: &str) -> String {
    let p = normalize(p);
    match p.rfind('/') {
        Some(i) => p[i + 1..].to_string(),
        None => String::new(),
    }
}

/// Extension of the basename, including the dot. Dotfiles (a leading `.`
/// with no further dot) have no extension.
pub fn extname(p: &str) -> String {
    let name = basename(p);
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(i) => name[i..].to_string(),
    }
}

/// Whether the raw path stays within root: no `..` segment may pop past
/// the top even transiently. `normalize` silently caps such segments; this
/// predicate is for callers that must reject them instead.
pub fn is_under_root(p: &str) -> bool {
    let mut depth: i64 = 0;
    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => depth += 1,
        }
    }
    true
}

/// Split a normalized path into its segments. Root yields no segments.
pub fn segments(p: &str) -> Vec<&str> {
    p.split('/').filter(|s| !s.is_empty()).collect()
}
