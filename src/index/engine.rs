use std::sync::Arc;
use std::time::Instant;

use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::notes::Note;
use crate::utils::{format_rfc3339, now_rfc3339, sha256_hex};

use super::db::Database;
use super::fts;
use super::graph::{self, ConnectedOptions};
use super::types::{
    BatchFailure, BatchReport, ConnectedNote, EngineStats, LinkRow, OrphanRow, SearchHit,
    SearchMetrics, SearchOptions, SearchResponse,
};

const BATCH_CHUNK: usize = 100;
const LINKS_PER_CANDIDATE: usize = 10;
const FTS_WEIGHT: f64 = 0.7;
const LINK_WEIGHT: f64 = 0.3;
const LINK_RAW_CEILING: f64 = 20.0;

/// Composes the database, the full-text index, and the link graph. The
/// header-declared `links` of a note are what the graph indexes; the
/// backlink synchronizer keeps them aligned with the body.
#[derive(Clone)]
pub struct SearchEngine {
    db: Arc<Database>,
}

impl SearchEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Upserts the note's index record, FTS row, and outgoing edges in one
    /// transaction. The FTS rewrite is skipped when the body hash is
    /// unchanged; the notes row and edge set always refresh.
    pub fn index_note(&self, note: &Note) -> Result<()> {
        self.db.transaction(|tx| index_note_tx(tx, note))
    }

    /// Idempotent: removing an unknown UID is a no-op success.
    pub fn remove_note(&self, uid: &str) -> Result<()> {
        self.db.transaction(|tx| {
            tx.execute("DELETE FROM notes WHERE uid = ?", [uid])?;
            fts::remove(tx, uid)?;
            graph::remove_links(tx, uid)?;
            Ok(())
        })
    }

    pub fn uid_for_path(&self, file_path: &str) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT uid FROM notes WHERE file_path = ?",
                [file_path],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(Error::Database(other)),
            })
        })
    }

    /// Chunks of ~100 notes, one transaction per chunk; a failing note
    /// rolls back only its own savepoint and lands in `failures`.
    pub fn batch_index(&self, notes: &[Note]) -> Result<BatchReport> {
        let started = Instant::now();
        let mut successful = 0usize;
        let mut failures: Vec<BatchFailure> = Vec::new();

        for chunk in notes.chunks(BATCH_CHUNK) {
            self.db.transaction(|tx| {
                for note in chunk {
                    let sp = tx.savepoint()?;
                    match index_note_tx(&sp, note) {
                        Ok(()) => {
                            sp.commit()?;
                            successful += 1;
                        }
                        Err(e) => {
                            drop(sp);
                            tracing::warn!(uid = %note.uid(), error = %e, "batch index: note skipped");
                            failures.push(BatchFailure {
                                uid: note.uid().to_string(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
                Ok(())
            })?;
        }

        Ok(BatchReport {
            successful,
            failed: failures.len(),
            total_ms: started.elapsed().as_millis() as u64,
            failures,
        })
    }

    /// Hybrid ranking: candidates from FTS, rescored with link-graph
    /// centrality, paged after the sort.
    pub fn search(&self, query: &str, opts: &SearchOptions) -> Result<SearchResponse> {
        let started = Instant::now();

        let (candidates, query_ms) = self.db.with_conn(|conn| {
            let t0 = Instant::now();
            let rows = fts::search(conn, query, opts)?;
            Ok((rows, t0.elapsed().as_millis() as u64))
        })?;

        let processing_started = Instant::now();
        let total_results = candidates.len();
        let max_relevance = candidates
            .iter()
            .map(|row| row.relevance)
            .fold(0.0_f64, f64::max);

        let mut hits: Vec<(SearchHit, usize)> = self.db.with_conn(|conn| {
            let mut out = Vec::with_capacity(candidates.len());
            for row in candidates {
                let fts_score = if max_relevance > 0.0 {
                    row.relevance / max_relevance
                } else {
                    1.0
                };

                let inbound = graph::backlinks(conn, &row.uid, LINKS_PER_CANDIDATE)?;
                let outgoing = graph::outbound(conn, &row.uid, LINKS_PER_CANDIDATE)?;
                let link_raw = 2.0
                    * inbound.iter().map(|l| f64::from(l.strength)).sum::<f64>()
                    + outgoing.iter().map(|l| f64::from(l.strength)).sum::<f64>();
                let link_score = (link_raw / LINK_RAW_CEILING).min(1.0);

                let combined_score = FTS_WEIGHT * fts_score + LINK_WEIGHT * link_score;
                let outbound_count = outgoing.len();
                out.push((
                    SearchHit {
                        uid: row.uid,
                        title: row.title,
                        category: row.category,
                        project: row.project,
                        file_path: row.file_path,
                        snippet: row.snippet,
                        fts_score,
                        link_score,
                        combined_score,
                        outbound_links: outgoing.into_iter().map(|l| l.uid).collect(),
                    },
                    outbound_count,
                ));
            }
            Ok(out)
        })?;

        hits.sort_by(|(a, a_out), (b, b_out)| {
            b.combined_score
                .total_cmp(&a.combined_score)
                .then(b_out.cmp(a_out))
        });

        let results: Vec<SearchHit> = hits
            .into_iter()
            .map(|(hit, _)| hit)
            .skip(opts.offset)
            .take(opts.limit)
            .collect();

        let processing_ms = processing_started.elapsed().as_millis() as u64;
        let metrics = SearchMetrics {
            query_ms,
            processing_ms,
            total_ms: started.elapsed().as_millis() as u64,
            total_results,
            returned_results: results.len(),
            cache_hit: false,
        };

        Ok(SearchResponse {
            results,
            metrics,
            total_count: total_results,
        })
    }

    pub fn title_of(&self, uid: &str) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT title FROM notes WHERE uid = ?", [uid], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(Error::Database(other)),
            })
        })
    }

    pub fn backlinks(&self, target: &str, limit: usize) -> Result<Vec<LinkRow>> {
        self.db.with_conn(|conn| graph::backlinks(conn, target, limit))
    }

    pub fn outbound(&self, source: &str, limit: usize) -> Result<Vec<LinkRow>> {
        self.db.with_conn(|conn| graph::outbound(conn, source, limit))
    }

    pub fn connected(&self, start: &str, opts: &ConnectedOptions) -> Result<Vec<ConnectedNote>> {
        self.db.with_conn(|conn| graph::connected(conn, start, opts))
    }

    pub fn orphans(&self, limit: usize) -> Result<Vec<OrphanRow>> {
        self.db.with_conn(|conn| graph::orphans(conn, limit))
    }

    pub fn stats(&self) -> Result<EngineStats> {
        let database = self.db.stats()?;
        let graph = self.db.with_conn(|conn| graph::stats(conn, 10))?;
        Ok(EngineStats { database, graph })
    }

    pub fn optimize(&self) -> Result<()> {
        self.db.with_conn(fts::optimize)?;
        self.db.optimize()
    }

    pub fn check_integrity(&self) -> Result<bool> {
        self.db.check_integrity()
    }
}

fn index_note_tx(conn: &Connection, note: &Note) -> Result<()> {
    let header = &note.header;
    header
        .validate()
        .map_err(|e| Error::Indexing(e.to_string()))?;

    let content_hash = sha256_hex(note.body.as_bytes());
    let file_path = note.path.display().to_string();

    // The skip applies only when every FTS-visible field is unchanged.
    let prior: Option<(String, String, String, String, Option<String>)> = conn
        .query_row(
            "SELECT content_hash, title, tags_json, category, project FROM notes WHERE uid = ?",
            [header.id.as_str()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(Error::Database(other)),
        })?;

    // A note that moved onto a path another uid held must displace it;
    // the file is the authority.
    conn.execute(
        "DELETE FROM notes WHERE file_path = ? AND uid <> ?",
        rusqlite::params![file_path, header.id],
    )?;

    let tags_json = serde_json::to_string(&header.tags)
        .map_err(|e| Error::Indexing(e.to_string()))?;
    conn.execute(
        "INSERT OR REPLACE INTO notes(uid, title, category, file_path, project, tags_json, content_hash, created_at, updated_at, indexed_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            header.id,
            header.title,
            header.category.as_str(),
            file_path,
            header.project,
            tags_json,
            content_hash,
            format_rfc3339(header.created),
            format_rfc3339(header.updated),
            now_rfc3339(),
        ],
    )?;

    let fts_current = prior.is_some_and(|(hash, title, tags, category, project)| {
        hash == content_hash
            && title == header.title
            && tags == tags_json
            && category == header.category.as_str()
            && project == header.project
    });
    if !fts_current {
        let content = fts::strip_markdown(&note.body);
        fts::update(
            conn,
            &header.id,
            &header.title,
            &content,
            &header.tags,
            header.category.as_str(),
            header.project.as_deref(),
        )?;
    }

    graph::update_links(conn, &header.id, &note.body, &header.links)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::{Category, NoteHeader};
    use std::path::PathBuf;

    fn engine() -> (tempfile::TempDir, SearchEngine) {
        let (dir, db) = Database::open_temp();
        (dir, SearchEngine::new(Arc::new(db)))
    }

    fn note(title: &str, body: &str, links: &[&str]) -> Note {
        let mut header = NoteHeader::new(title, Category::Resources);
        header.links = links.iter().map(|l| l.to_string()).collect();
        let path = PathBuf::from(format!("/vault/3-Resources/{}.md", header.id));
        Note {
            header,
            body: body.to_string(),
            path,
        }
    }

    #[test]
    fn index_then_search_end_to_end() {
        let (_dir, engine) = engine();
        let mut n = note("Index optimization", "FTS5 tuning tips", &[]);
        n.header.tags = vec!["index".to_string(), "fts5".to_string()];
        engine.index_note(&n).unwrap();

        let response = engine.search("FTS5", &SearchOptions::default()).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].uid, *n.uid());
        assert!(response.results[0].snippet.contains("<mark>FTS5</mark>"));
        assert_eq!(response.metrics.returned_results, 1);
        assert_eq!(response.total_count, 1);
    }

    #[test]
    fn backlinks_follow_header_links() {
        let (_dir, engine) = engine();
        let target = note("Target", "", &[]);
        engine.index_note(&target).unwrap();

        let source = note("Source", &format!("mentions {}", target.uid()), &[target.uid()]);
        engine.index_note(&source).unwrap();

        let inbound = engine.backlinks(target.uid(), 50).unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].uid, *source.uid());
        assert_eq!(inbound[0].strength, 1);
    }

    #[test]
    fn double_index_is_idempotent() {
        let (_dir, engine) = engine();
        let target = note("Target", "", &[]);
        engine.index_note(&target).unwrap();
        let n = note("Twice", "same body", &[target.uid()]);
        engine.index_note(&n).unwrap();
        engine.index_note(&n).unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.database.note_count, 2);
        assert_eq!(stats.database.link_count, 1);

        let response = engine.search("body", &SearchOptions::default()).unwrap();
        assert_eq!(response.results.len(), 1);
    }

    #[test]
    fn remove_note_clears_every_table_and_is_idempotent() {
        let (_dir, engine) = engine();
        let a = note("A", "alpha body", &[]);
        engine.index_note(&a).unwrap();
        let b = note("B", "beta body", &[a.uid()]);
        engine.index_note(&b).unwrap();

        engine.remove_note(a.uid()).unwrap();
        engine.remove_note(a.uid()).unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.database.note_count, 1);
        assert_eq!(stats.database.link_count, 0);
        assert!(engine.search("alpha", &SearchOptions::default()).unwrap().results.is_empty());
        assert!(engine.backlinks(a.uid(), 10).unwrap().is_empty());
    }

    #[test]
    fn hybrid_tie_breaks_on_outbound_count() {
        let (_dir, engine) = engine();

        let t1 = note("T1", "", &[]);
        let t2 = note("T2", "", &[]);
        let t3 = note("T3", "", &[]);
        for t in [&t1, &t2, &t3] {
            engine.index_note(t).unwrap();
        }

        // X: 3 outbound, 1 backlink. Y: none. Same body text for equal
        // FTS relevance.
        let x = note("X note", "ranking corpus text", &[t1.uid(), t2.uid(), t3.uid()]);
        engine.index_note(&x).unwrap();
        let fan = note("Fan", "", &[x.uid()]);
        engine.index_note(&fan).unwrap();
        let y = note("Y note", "ranking corpus text", &[]);
        engine.index_note(&y).unwrap();

        let response = engine.search("ranking corpus", &SearchOptions::default()).unwrap();
        assert_eq!(response.metrics.returned_results, 2);
        assert_eq!(response.results[0].uid, *x.uid());
        assert_eq!(response.results[1].uid, *y.uid());
        assert!(response.results[0].combined_score > response.results[1].combined_score);
        assert_eq!(response.results[0].outbound_links.len(), 3);
    }

    #[test]
    fn empty_query_returns_no_rows_with_metrics() {
        let (_dir, engine) = engine();
        engine.index_note(&note("A", "body", &[])).unwrap();
        let response = engine.search("", &SearchOptions::default()).unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.metrics.total_results, 0);
        assert_eq!(response.metrics.returned_results, 0);
        assert!(!response.metrics.cache_hit);
    }

    #[test]
    fn batch_index_reports_partial_failures() {
        let (_dir, engine) = engine();
        let good = note("Good", "fine", &[]);
        let mut bad = note("Bad", "broken", &[]);
        bad.header.id = "not-a-uid".to_string();
        let also_good = note("Also good", "fine too", &[]);

        let report = engine
            .batch_index(&[good.clone(), bad, also_good.clone()])
            .unwrap();
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].uid, "not-a-uid");

        let stats = engine.stats().unwrap();
        assert_eq!(stats.database.note_count, 2);
    }

    #[test]
    fn moved_note_displaces_stale_path_row() {
        let (_dir, engine) = engine();
        let n = note("Mover", "body", &[]);
        engine.index_note(&n).unwrap();

        // A different note lands on the same path.
        let mut other = note("Other", "body two", &[]);
        other.path = n.path.clone();
        engine.index_note(&other).unwrap();

        assert_eq!(
            engine.uid_for_path(&n.path.display().to_string()).unwrap(),
            Some(other.uid().to_string())
        );
        let stats = engine.stats().unwrap();
        assert_eq!(stats.database.note_count, 1);
    }
}
