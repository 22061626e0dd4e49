use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Resolves `rel` against `root` without leaving it. `.` and `..`
/// segments are folded lexically; a path that would climb above the root
/// is rejected, as is anything rooted or drive-prefixed.
pub fn join_under(root: &Path, rel: &Path) -> Result<PathBuf> {
    if rel.has_root() || matches!(rel.components().next(), Some(Component::Prefix(_))) {
        return Err(Error::InvalidRequest(format!(
            "'{}' is not vault-relative",
            rel.display()
        )));
    }

    let mut kept: Vec<&OsStr> = Vec::new();
    for component in rel.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(segment) => kept.push(segment),
            Component::ParentDir => {
                if kept.pop().is_none() {
                    return Err(Error::InvalidRequest(format!(
                        "'{}' escapes the vault root",
                        rel.display()
                    )));
                }
            }
            // Rooted and prefixed forms were rejected up front.
            _ => {}
        }
    }

    let mut out = root.to_path_buf();
    for segment in kept {
        out.push(segment);
    }
    Ok(out)
}
