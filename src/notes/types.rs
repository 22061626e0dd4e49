use std::path::PathBuf;

use serde::Serialize;

use super::header::NoteHeader;

/// A note as held in memory: the authoritative copy lives in the vault
/// filesystem and the repository is its only writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub header: NoteHeader,
    pub body: String,
    pub path: PathBuf,
}

impl Note {
    pub fn uid(&self) -> &str {
        &self.header.id
    }
}

/// Result of probing a note's body against the vault.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkAnalysis {
    /// Resolved target UIDs, in body order.
    pub outbound: Vec<String>,
    /// Candidates that resolved to no UID and no title.
    pub broken: Vec<String>,
    /// UIDs of notes whose bodies mention this note.
    pub inbound: Vec<String>,
}
