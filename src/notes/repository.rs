use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::io_atomic::{self, ListOptions};
use crate::utils::sha256_hex;

use super::header::{parse_note, serialize_note, Category, NoteHeader, ParseMode};
use super::links::extract_link_candidates;
use super::types::{LinkAnalysis, Note};

#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub atomic: bool,
    pub backup: bool,
    /// Optimistic concurrency: when set, the on-disk content hash must
    /// still match or the save fails.
    pub base_hash: Option<String>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            atomic: true,
            backup: false,
            base_hash: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub category: Option<Category>,
    pub tags: Vec<String>,
    pub project: Option<String>,
}

/// The only writer of note files. Everything else (organizer, backlink
/// synchronizer, tools) goes through here. Writes are serialized by a
/// single gate so no two tasks race on one file.
#[derive(Debug)]
pub struct NoteRepository {
    root: PathBuf,
    write_gate: std::sync::Mutex<()>,
}

impl NoteRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_gate: std::sync::Mutex::new(()),
        }
    }

    pub fn vault_root(&self) -> &Path {
        &self.root
    }

    pub fn load(&self, path: &Path) -> Result<Note> {
        self.load_with(path, ParseMode::Lenient)
    }

    pub fn load_with(&self, path: &Path, mode: ParseMode) -> Result<Note> {
        let text = io_atomic::safe_read(path)?;
        let (header, body) = parse_note(&text, mode)?;
        Ok(Note {
            header,
            body,
            path: path.to_path_buf(),
        })
    }

    /// Writes the note back. `updated` is bumped only when the body
    /// differs from what is on disk; header-only rewrites (backlink sync,
    /// recategorization) keep the existing timestamp. Returns whether
    /// anything was written.
    pub fn save(&self, note: &mut Note, opts: &SaveOptions) -> Result<bool> {
        let _gate = self.write_gate.lock().unwrap_or_else(|p| p.into_inner());
        let existing = match io_atomic::safe_read(&note.path) {
            Ok(text) => Some(text),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        if let (Some(base), Some(disk)) = (&opts.base_hash, &existing) {
            if &sha256_hex(disk.as_bytes()) != base {
                return Err(Error::InvalidRequest(
                    "note changed on disk since it was read".to_string(),
                ));
            }
        }

        if let Some(disk) = &existing {
            let (_, disk_body) = parse_note(disk, ParseMode::Lenient)?;
            if disk_body != note.body {
                note.header.touch();
            }
        }

        let text = serialize_note(&note.header, &note.body);
        if existing.as_deref() == Some(text.as_str()) {
            return Ok(false);
        }

        if opts.backup && existing.is_some() {
            io_atomic::create_backup(&note.path).map_err(Error::Write)?;
        }

        if opts.atomic {
            io_atomic::write_atomic(&note.path, text.as_bytes(), true).map_err(Error::Write)?;
        } else {
            if let Some(parent) = note.path.parent() {
                io_atomic::ensure_dir(parent).map_err(Error::Write)?;
            }
            std::fs::write(&note.path, text.as_bytes()).map_err(Error::Write)?;
        }
        Ok(true)
    }

    pub fn create(
        &self,
        path: &Path,
        title: &str,
        body: &str,
        opts: &CreateOptions,
    ) -> Result<Note> {
        let _gate = self.write_gate.lock().unwrap_or_else(|p| p.into_inner());
        if path.exists() {
            return Err(Error::AlreadyExists(path.display().to_string()));
        }
        if title.trim().is_empty() {
            return Err(Error::InvalidRequest("title must not be empty".to_string()));
        }

        let mut header = NoteHeader::new(
            title.trim(),
            opts.category.unwrap_or_default(),
        );
        for tag in &opts.tags {
            let tag = tag.trim();
            if !tag.is_empty() && !header.tags.iter().any(|t| t == tag) {
                header.tags.push(tag.to_string());
            }
        }
        header.project = opts
            .project
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        header.validate()?;

        let text = serialize_note(&header, body);
        io_atomic::write_atomic(path, text.as_bytes(), true).map_err(Error::Write)?;

        Ok(Note {
            header,
            body: body.to_string(),
            path: path.to_path_buf(),
        })
    }

    pub fn delete(&self, path: &Path, backup: bool) -> Result<()> {
        let _gate = self.write_gate.lock().unwrap_or_else(|p| p.into_inner());
        if !path.exists() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        if backup {
            io_atomic::create_backup(path).map_err(Error::Write)?;
        } else {
            std::fs::remove_file(path).map_err(|e| Error::from_io(path, e))?;
        }
        Ok(())
    }

    /// Moves a note file, creating the destination directory. The header
    /// is not touched; callers rewrite it through `save` when needed.
    pub fn relocate(&self, note: &mut Note, new_path: &Path) -> Result<()> {
        let _gate = self.write_gate.lock().unwrap_or_else(|p| p.into_inner());
        if note.path == new_path {
            return Ok(());
        }
        if new_path.exists() {
            return Err(Error::AlreadyExists(new_path.display().to_string()));
        }
        if let Some(parent) = new_path.parent() {
            io_atomic::ensure_dir(parent).map_err(Error::Write)?;
        }
        std::fs::rename(&note.path, new_path).map_err(|e| Error::from_io(&note.path, e))?;
        note.path = new_path.to_path_buf();
        Ok(())
    }

    pub fn list_paths(&self) -> Result<Vec<PathBuf>> {
        io_atomic::list_markdown(&self.root, &ListOptions::recursive())
    }

    /// Scans the vault reading only header prefixes until the UID matches.
    pub fn find_by_uid(&self, uid: &str) -> Result<Option<Note>> {
        for path in self.list_paths()? {
            let Ok(text) = io_atomic::safe_read(&path) else {
                continue;
            };
            if !text.contains(uid) {
                continue;
            }
            let (header, body) = parse_note(&text, ParseMode::Lenient)?;
            if header.id == uid {
                return Ok(Some(Note {
                    header,
                    body,
                    path,
                }));
            }
        }
        Ok(None)
    }

    /// Resolves the note's body links against the vault: exact UID match,
    /// else exact title match, else broken. Inbound links come from a scan
    /// for bodies mentioning this note's UID or title.
    pub fn analyze_links(&self, note: &Note) -> Result<LinkAnalysis> {
        let candidates = extract_link_candidates(&note.body);

        // One pass over the vault for uid/title resolution and inbound
        // detection.
        let mut uids: Vec<String> = Vec::new();
        let mut titles: Vec<(String, String)> = Vec::new();
        let mut inbound: Vec<String> = Vec::new();

        let title_lc = note.header.title.to_lowercase();
        for path in self.list_paths()? {
            let Ok(text) = io_atomic::safe_read(&path) else {
                continue;
            };
            let Ok((header, body)) = parse_note(&text, ParseMode::Lenient) else {
                continue;
            };
            if header.id == note.header.id {
                continue;
            }
            if body.contains(&note.header.id)
                || (!title_lc.is_empty() && body.to_lowercase().contains(&title_lc))
            {
                inbound.push(header.id.clone());
            }
            titles.push((header.title.to_lowercase(), header.id.clone()));
            uids.push(header.id);
        }

        let mut analysis = LinkAnalysis {
            inbound,
            ..Default::default()
        };
        for candidate in candidates {
            let resolved = if uids.iter().any(|u| u == &candidate) {
                Some(candidate.clone())
            } else {
                let lc = candidate.to_lowercase();
                titles
                    .iter()
                    .find(|(title, _)| title == &lc)
                    .map(|(_, uid)| uid.clone())
            };
            match resolved {
                Some(uid) if uid != note.header.id => {
                    if !analysis.outbound.contains(&uid) {
                        analysis.outbound.push(uid);
                    }
                }
                Some(_) => {}
                None => {
                    if !analysis.broken.contains(&candidate) {
                        analysis.broken.push(candidate);
                    }
                }
            }
        }

        Ok(analysis)
    }
}
