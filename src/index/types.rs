use serde::Serialize;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub snippet_length: usize,
    pub highlight_tag: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            category: None,
            tags: Vec::new(),
            project: None,
            limit: 50,
            offset: 0,
            snippet_length: 150,
            highlight_tag: "mark".to_string(),
        }
    }
}

/// A raw full-text candidate before hybrid rescoring.
#[derive(Debug, Clone)]
pub struct FtsRow {
    pub uid: String,
    pub title: String,
    pub category: String,
    pub project: Option<String>,
    pub file_path: String,
    pub tags: Vec<String>,
    pub snippet: String,
    /// Engine-native relevance, higher is better, not yet normalized.
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMetrics {
    pub query_ms: u64,
    pub processing_ms: u64,
    pub total_ms: u64,
    pub total_results: usize,
    pub returned_results: usize,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub uid: String,
    pub title: String,
    pub category: String,
    pub project: Option<String>,
    pub file_path: String,
    pub snippet: String,
    pub fts_score: f64,
    pub link_score: f64,
    pub combined_score: f64,
    pub outbound_links: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub metrics: SearchMetrics,
    pub total_count: usize,
}

/// One end of a stored edge, joined against `notes` so vanished sources
/// never surface.
#[derive(Debug, Clone, Serialize)]
pub struct LinkRow {
    pub uid: String,
    pub title: String,
    pub kind: String,
    pub strength: u32,
    pub last_seen_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectedNote {
    pub uid: String,
    pub title: String,
    pub depth: u32,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanRow {
    pub uid: String,
    pub title: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopTarget {
    pub uid: String,
    pub inbound: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub link_count: u64,
    pub top_targets: Vec<TopTarget>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub uid: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub successful: usize,
    pub failed: usize,
    pub total_ms: u64,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub database: super::db::DbStats,
    pub graph: GraphStats,
}
