use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::error::{Error, Result};
use crate::utils::is_markdown_path;

// Per-process sequence; together with the pid it makes every scratch
// file name unique, so `create_new` can refuse collisions outright.
static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

fn scratch_sibling(dest: &Path) -> io::Result<PathBuf> {
    let name = dest
        .file_name()
        .ok_or_else(|| invalid("destination has no file name"))?;
    let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut scratch = name.to_os_string();
    scratch.push(format!(".{}-{}.tmp", std::process::id(), seq));
    Ok(dest.with_file_name(scratch))
}

/// Writes to a same-directory scratch file, fsyncs it, then renames over
/// `dest` and syncs the directory. The destination either keeps its old
/// bytes or holds exactly `bytes`; a partial write is never visible.
pub fn write_atomic(dest: &Path, bytes: &[u8], create_dirs: bool) -> io::Result<()> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| invalid("destination has no parent directory"))?;
    if create_dirs {
        std::fs::create_dir_all(parent)?;
    }

    let scratch = scratch_sibling(dest)?;
    let written = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&scratch)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| std::fs::rename(&scratch, dest));

    if written.is_err() {
        let _ = std::fs::remove_file(&scratch);
        return written;
    }

    // The rename itself must survive a crash too.
    File::open(parent)?.sync_all()
}

/// Reads `path` to a string, surfacing a missing file as `NotFound`.
pub fn safe_read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::from_io(path, e))
}

/// Idempotent recursive directory creation.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub recursive: bool,
    /// Glob matched against the slash-separated path relative to the root.
    pub pattern: Option<String>,
}

impl ListOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            pattern: None,
        }
    }
}

fn should_skip_name(name: &str) -> bool {
    name.starts_with('.') || name == "node_modules" || name.ends_with(".tmp")
}

/// Enumerates markdown files under `root`, skipping dotfiles and guarding
/// against symlink cycles with a canonicalized-directory visited set.
/// Results are sorted by relative path for stable output.
pub fn list_markdown(root: &Path, opts: &ListOptions) -> Result<Vec<PathBuf>> {
    let pattern = match &opts.pattern {
        Some(p) => Some(
            glob::Pattern::new(p)
                .map_err(|e| Error::InvalidRequest(format!("bad list pattern: {e}")))?,
        ),
        None => None,
    };

    let mut out: Vec<PathBuf> = Vec::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        if let Ok(canonical) = dir.canonicalize() {
            if !visited.insert(canonical) {
                continue;
            }
        }
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if should_skip_name(&name) {
                continue;
            }
            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.is_dir() {
                if opts.recursive {
                    stack.push(path);
                }
                continue;
            }
            if !meta.is_file() || !is_markdown_path(&path) {
                continue;
            }
            if let Some(pat) = &pattern {
                let rel = path.strip_prefix(root).unwrap_or(&path);
                if !pat.matches(&crate::utils::to_slash(rel)) {
                    continue;
                }
            }
            out.push(path);
        }
    }

    out.sort();
    Ok(out)
}

/// Renames `path` to `path.bak.<timestamp>` ahead of a destructive
/// operation and returns the backup path.
pub fn create_backup(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| invalid("nothing to back up"))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let mut backup_name = name.to_os_string();
    backup_name.push(format!(".bak.{stamp}"));
    let backup = path.with_file_name(backup_name);
    std::fs::rename(path, &backup)?;
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("deep/nested/note.md");
        write_atomic(&dest, b"hello", true).unwrap();
        assert_eq!(safe_read(&dest).unwrap(), "hello");

        write_atomic(&dest, b"replaced", false).unwrap();
        assert_eq!(safe_read(&dest).unwrap(), "replaced");
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("note.md");
        write_atomic(&dest, b"x", false).unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["note.md".to_string()]);
    }

    #[test]
    fn safe_read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = safe_read(&dir.path().join("absent.md")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn list_skips_dotfiles_and_temps() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join(".b.md"), "b").unwrap();
        std::fs::write(dir.path().join("c.md.tmp"), "c").unwrap();
        std::fs::write(dir.path().join("sub/d.md"), "d").unwrap();
        std::fs::write(dir.path().join(".hidden/e.md"), "e").unwrap();
        std::fs::write(dir.path().join("plain.txt"), "f").unwrap();

        let flat = list_markdown(dir.path(), &ListOptions::default()).unwrap();
        assert_eq!(flat.len(), 1);
        assert!(flat[0].ends_with("a.md"));

        let deep = list_markdown(dir.path(), &ListOptions::recursive()).unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn list_applies_pattern() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("1-Projects/alpha")).unwrap();
        std::fs::create_dir_all(dir.path().join("3-Resources")).unwrap();
        std::fs::write(dir.path().join("1-Projects/alpha/a.md"), "a").unwrap();
        std::fs::write(dir.path().join("3-Resources/b.md"), "b").unwrap();

        let opts = ListOptions {
            recursive: true,
            pattern: Some("1-Projects/**".to_string()),
        };
        let hits = list_markdown(dir.path(), &opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].ends_with("a.md"));
    }

    #[test]
    fn backup_renames_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "body").unwrap();
        let backup = create_backup(&path).unwrap();
        assert!(!path.exists());
        assert!(backup.exists());
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("note.md.bak."));
    }
}
