pub mod header;
pub mod links;
pub mod repository;
pub mod types;

pub use header::{parse_note, serialize_note, Category, NoteHeader, ParseMode};
pub use repository::{CreateOptions, NoteRepository, SaveOptions};
pub use types::{LinkAnalysis, Note};
