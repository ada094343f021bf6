//! Confinement of token paths to the exposure root

use std::path::{Component, Path, PathBuf};

use crate::error::MediaError;

/// Join `rel` onto `root`, refusing anything that could leave it
///
/// Only plain path segments are accepted; absolute paths, `..`, and drive
/// prefixes are rejected before touching the filesystem.
pub fn resolve_under(root: &Path, rel: &str) -> Result<PathBuf, MediaError> {
    let rel_path = Path::new(rel);
    let mut resolved = root.to_path_buf();
    let mut segments = 0;

    for component in rel_path.components() {
        match component {
            Component::Normal(segment) => {
                resolved.push(segment);
                segments += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(MediaError::PathTraversal(rel.to_string()));
            }
        }
    }

    if segments == 0 {
        return Err(MediaError::PathTraversal(rel.to_string()));
    }

    Ok(resolved)
}

/// Resolve `rel` and require an existing regular file that, after following
/// symlinks, still lives under `root`
pub fn resolve_existing(root: &Path, rel: &str) -> Result<PathBuf, MediaError> {
    let candidate = resolve_under(root, rel)?;

    if !candidate.is_file() {
        return Err(MediaError::NotFound(rel.to_string()));
    }

    let canonical_root = root.canonicalize()?;
    let canonical = candidate.canonicalize()?;
    if !canonical.starts_with(&canonical_root) {
        return Err(MediaError::PathTraversal(rel.to_string()));
    }

    Ok(canonical)
}
