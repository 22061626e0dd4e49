use std::path::PathBuf;
use std::sync::Arc;

use time::Duration;

use crate::error::{Error, Result};
use crate::notes::{Category, Note, NoteHeader, NoteRepository, SaveOptions};
use crate::utils::now_utc;

use super::events::{MoveReason, NoteMoved};

const MAX_FILENAME_CHARS: usize = 50;

/// PARA directory names; the numbered defaults match the on-disk layout.
#[derive(Debug, Clone)]
pub struct VaultLayout {
    pub projects_dir: String,
    pub areas_dir: String,
    pub resources_dir: String,
    pub archives_dir: String,
}

impl Default for VaultLayout {
    fn default() -> Self {
        Self {
            projects_dir: "1-Projects".to_string(),
            areas_dir: "2-Areas".to_string(),
            resources_dir: "3-Resources".to_string(),
            archives_dir: "4-Archives".to_string(),
        }
    }
}

impl VaultLayout {
    pub fn dir_for(&self, category: Category) -> &str {
        match category {
            Category::Projects => &self.projects_dir,
            Category::Areas => &self.areas_dir,
            Category::Resources => &self.resources_dir,
            Category::Archives => &self.archives_dir,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrganizerOptions {
    /// When off, only headers are rewritten and files stay in place.
    pub auto_move: bool,
    pub archive_threshold_days: i64,
    pub project_subfolders: bool,
    pub layout: VaultLayout,
}

impl Default for OrganizerOptions {
    fn default() -> Self {
        Self {
            auto_move: true,
            archive_threshold_days: 90,
            project_subfolders: true,
            layout: VaultLayout::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CategoryCause {
    Project,
    Stale,
    Preserved,
}

/// Routes notes into the PARA tree and runs the age-based archival
/// sweeps. All file writes go through the repository.
#[derive(Clone)]
pub struct ParaOrganizer {
    repo: Arc<NoteRepository>,
    opts: OrganizerOptions,
}

impl ParaOrganizer {
    pub fn new(repo: Arc<NoteRepository>, opts: OrganizerOptions) -> Self {
        Self { repo, opts }
    }

    pub fn options(&self) -> &OrganizerOptions {
        &self.opts
    }

    fn resolve(&self, header: &NoteHeader) -> (Category, CategoryCause) {
        if header.project.is_some() {
            return (Category::Projects, CategoryCause::Project);
        }
        let age = now_utc() - header.updated;
        if age > Duration::days(self.opts.archive_threshold_days) {
            return (Category::Archives, CategoryCause::Stale);
        }
        (header.category, CategoryCause::Preserved)
    }

    pub fn resolve_category(&self, header: &NoteHeader) -> Category {
        self.resolve(header).0
    }

    /// Filesystem-safe slug: reserved characters and whitespace runs
    /// become single dashes, trimmed and truncated.
    pub fn sanitize_title(title: &str) -> String {
        let mut out = String::with_capacity(title.len());
        let mut dash_pending = false;
        for c in title.chars() {
            let replace = c.is_whitespace() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*');
            if replace {
                dash_pending = !out.is_empty();
            } else {
                if dash_pending {
                    out.push('-');
                    dash_pending = false;
                }
                out.push(c);
            }
        }
        let trimmed: String = out.trim_matches('-').chars().take(MAX_FILENAME_CHARS).collect();
        let trimmed = trimmed.trim_matches('-').to_string();
        if trimmed.is_empty() {
            "untitled".to_string()
        } else {
            trimmed
        }
    }

    /// `root/<category_dir>/[<project>/]<sanitized_title>.md`
    pub fn target_path(&self, header: &NoteHeader) -> PathBuf {
        let category = self.resolve_category(header);
        let mut path = self
            .repo
            .vault_root()
            .join(self.opts.layout.dir_for(category));
        if category == Category::Projects && self.opts.project_subfolders {
            if let Some(project) = &header.project {
                path = path.join(Self::sanitize_title(project));
            }
        }
        path.join(format!("{}.md", Self::sanitize_title(&header.title)))
    }

    /// Re-routes one note. The header category is always brought up to
    /// date; the file only moves when auto-move is on. Returns the move
    /// event when the note changed category or location.
    pub fn organize(&self, note: &mut Note) -> Result<Option<NoteMoved>> {
        let (category, cause) = self.resolve(&note.header);
        let category_changed = note.header.category != category;
        if category_changed {
            note.header.category = category;
            self.repo.save(note, &SaveOptions::default())?;
        }

        let from = note.path.clone();
        let target = self.target_path(&note.header);
        let moved_file = self.opts.auto_move && target != note.path;
        if moved_file {
            self.repo.relocate(note, &target)?;
        }

        if !category_changed && !moved_file {
            return Ok(None);
        }

        let reason = match cause {
            CategoryCause::Stale => MoveReason::AutoArchive,
            CategoryCause::Project if category_changed => MoveReason::ProjectChange,
            _ if category_changed => MoveReason::CategoryChange,
            _ => MoveReason::Manual,
        };

        Ok(Some(NoteMoved {
            uid: note.header.id.clone(),
            from,
            to: note.path.clone(),
            category: category.to_string(),
            reason,
        }))
    }

    /// Archives stale notes. Only Areas and Resources are traversed;
    /// project notes never age out.
    pub fn archive_old(&self) -> Result<Vec<NoteMoved>> {
        let threshold = Duration::days(self.opts.archive_threshold_days);
        let now = now_utc();
        let mut moved = Vec::new();

        for dir in [&self.opts.layout.areas_dir, &self.opts.layout.resources_dir] {
            let root = self.repo.vault_root().join(dir);
            if !root.exists() {
                continue;
            }
            for path in crate::io_atomic::list_markdown(&root, &crate::io_atomic::ListOptions::recursive())? {
                let mut note = match self.repo.load(&path) {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "archive sweep: skipping unreadable note");
                        continue;
                    }
                };
                if note.header.project.is_some() {
                    continue;
                }
                if now - note.header.updated <= threshold {
                    continue;
                }
                if let Some(event) = self.organize(&mut note)? {
                    moved.push(event);
                }
            }
        }
        Ok(moved)
    }

    /// Archives every note belonging to `project`, clearing the project
    /// field so routing sends them to Archives.
    pub fn archive_project(&self, project: &str) -> Result<Vec<NoteMoved>> {
        let project = project.trim();
        if project.is_empty() {
            return Err(Error::InvalidRequest("project name must not be empty".to_string()));
        }

        let root = self.repo.vault_root().join(&self.opts.layout.projects_dir);
        let mut moved = Vec::new();
        if !root.exists() {
            return Ok(moved);
        }

        for path in crate::io_atomic::list_markdown(&root, &crate::io_atomic::ListOptions::recursive())? {
            let mut note = match self.repo.load(&path) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "project archive: skipping unreadable note");
                    continue;
                }
            };
            if note.header.project.as_deref() != Some(project) {
                continue;
            }

            let from = note.path.clone();
            note.header.project = None;
            note.header.category = Category::Archives;
            self.repo.save(&mut note, &SaveOptions::default())?;

            if self.opts.auto_move {
                let target = self.target_path(&note.header);
                if target != note.path {
                    self.repo.relocate(&mut note, &target)?;
                }
            }

            moved.push(NoteMoved {
                uid: note.header.id.clone(),
                from,
                to: note.path.clone(),
                category: Category::Archives.to_string(),
                reason: MoveReason::Manual,
            });
        }
        Ok(moved)
    }
}
