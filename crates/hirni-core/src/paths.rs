//! Lexical handling of `location` paths.
//!
//! Locations are stored with `/` separators relative to the directory holding
//! the specification file. Nothing here touches the filesystem.

use std::path::{Component, Path};

/// Normalise a relative location, resolving `.` and `..` lexically.
///
/// Returns `None` for absolute locations and for locations whose `..`
/// components climb above the base directory. The base directory itself
/// normalises to `"."`.
pub fn normalize_location(location: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(location).components() {
        match component {
            Component::Normal(p) => parts.push(p.to_str()?),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        Some(".".to_string())
    } else {
        Some(parts.join("/"))
    }
}

/// Whether `location` resolves inside the base directory's subtree.
pub fn is_within_tree(location: &str) -> bool {
    !location.is_empty() && normalize_location(location).is_some()
}

/// Express `path` relative to `base`. Both must be relative to the same root.
///
/// Returns `None` when `path` lies outside `base`.
pub fn relative_location(path: &str, base: &str) -> Option<String> {
    let path = normalize_location(path)?;
    let base = normalize_location(base)?;
    if base == "." {
        return Some(path);
    }
    if path == base {
        return Some(".".to_string());
    }
    path.strip_prefix(&base)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
}

/// Join a base directory and a location below it.
pub fn join_location(base: &str, location: &str) -> Option<String> {
    let location = normalize_location(location)?;
    match (base, location.as_str()) {
        ("" | ".", _) => Some(location),
        (b, ".") => Some(b.trim_end_matches('/').to_string()),
        (b, l) => Some(format!("{}/{}", b.trim_end_matches('/'), l)),
    }
}
