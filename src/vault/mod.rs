pub mod backlinks;
pub mod events;
pub mod organizer;
pub mod snapshot;
pub mod watcher;

pub use backlinks::{BacklinkOptions, BacklinkSync, RebuildReport};
pub use events::{BacklinkRemoval, MoveReason, NoteMoved, WatchEvent, WatchKind};
pub use organizer::{OrganizerOptions, ParaOrganizer, VaultLayout};
pub use snapshot::{GitSnapshot, SnapshotOptions};
pub use watcher::{VaultWatcher, WatcherOptions};
