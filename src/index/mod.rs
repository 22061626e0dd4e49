pub mod db;
pub mod engine;
pub mod fts;
pub mod graph;
pub mod schema;
pub mod types;

pub use db::{Database, DatabaseOptions, DbStats};
pub use engine::SearchEngine;
pub use graph::{ConnectedOptions, Direction};
pub use types::{BatchReport, SearchOptions, SearchResponse};
