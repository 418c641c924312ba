use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::LeaseError;

/// Resolve an archive entry name beneath `root`.
///
/// The path is built component by component. Parent references, absolute
/// paths, drive prefixes and NUL bytes are rejected outright rather than
/// normalized, so no entry can land outside `root`.
pub(crate) fn resolve_entry_path(root: &Path, name: &str) -> Result<PathBuf, LeaseError> {
    if name.contains('\0') {
        warn!(entry = ?name, "archive entry contains a null byte");
        return Err(unsafe_entry(name));
    }
    if name.starts_with('/') || name.starts_with('\\') {
        warn!(entry = ?name, "absolute path in archive entry");
        return Err(unsafe_entry(name));
    }

    let mut result = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                if part.to_string_lossy().contains('\\') {
                    warn!(entry = ?name, "backslash separator in archive entry");
                    return Err(unsafe_entry(name));
                }
                result.push(part);
                depth += 1;
            }
            Component::CurDir => continue,
            Component::ParentDir => {
                warn!(entry = ?name, "path traversal attempt in archive entry");
                return Err(unsafe_entry(name));
            }
            Component::RootDir | Component::Prefix(_) => {
                warn!(entry = ?name, "absolute path in archive entry");
                return Err(unsafe_entry(name));
            }
        }
    }

    if depth == 0 || !result.starts_with(root) {
        return Err(unsafe_entry(name));
    }
    Ok(result)
}

/// Relative path of `full_path` under `root`, always `/`-separated.
pub(crate) fn relative_entry_name(root: &Path, full_path: &Path) -> Option<String> {
    let relative = full_path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn unsafe_entry(name: &str) -> LeaseError {
    LeaseError::InvalidArchive(format!("entry escapes target directory: {name:?}"))
}
