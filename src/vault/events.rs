use std::path::PathBuf;

use serde::Serialize;

use crate::notes::Note;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchKind {
    Add,
    Change,
    Unlink,
}

/// A coalesced filesystem event. `note` is the lenient-parsed document
/// for add/change; unlink events carry only the path.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchKind,
    pub path: PathBuf,
    pub note: Option<Note>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MoveReason {
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "auto-archive")]
    AutoArchive,
    #[serde(rename = "category-change")]
    CategoryChange,
    #[serde(rename = "project-change")]
    ProjectChange,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteMoved {
    pub uid: String,
    pub from: PathBuf,
    pub to: PathBuf,
    pub category: String,
    pub reason: MoveReason,
}

/// Emitted once per deletion cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct BacklinkRemoval {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub target: String,
    pub affected: Vec<String>,
}

impl BacklinkRemoval {
    pub fn new(target: String, affected: Vec<String>) -> Self {
        Self {
            kind: "remove",
            target,
            affected,
        }
    }
}
