//! Lexical path helpers.
//!
//! Paths inside vsh are always `/`-separated strings, independent of the host
//! platform. None of these functions touch a filesystem.

/// Lexically clean a path.
///
/// Repeated separators collapse, `.` segments disappear and `..` removes the
/// previous segment. A rooted path never climbs above `/`. The empty path
/// cleans to `.`.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Normalize a path for tree lookups: clean it, then drop any leading `./`
/// or `/`. The root (and `.`) normalize to the empty string.
pub fn normalize(path: &str) -> String {
    let cleaned = clean(path);
    let trimmed = cleaned.strip_prefix("./").unwrap_or(&cleaned);
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
    if trimmed == "." {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Whether the path is rooted.
pub fn is_abs(path: &str) -> bool {
    path.starts_with('/')
}

/// Join two path fragments and clean the result.
pub fn join(base: &str, rel: &str) -> String {
    if base.is_empty() {
        return clean(rel);
    }
    if rel.is_empty() {
        return clean(base);
    }
    clean(&format!("{base}/{rel}"))
}

/// Resolve `path` against the directory `dir` unless it is already absolute.
pub fn abs(dir: &str, path: &str) -> String {
    if is_abs(path) {
        clean(path)
    } else {
        join(dir, path)
    }
}

/// Split a normalized path into its parent and final segment.
///
/// `"a/b/c"` splits into `("a/b", "c")` and `"a"` into `("", "a")`.
pub(crate) fn split_parent(normalized: &str) -> (&str, &str) {
    match normalized.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", normalized),
    }
}
