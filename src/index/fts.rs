use std::sync::OnceLock;

use regex::Regex;
use rusqlite::Connection;

use crate::error::Result;

use super::types::{FtsRow, SearchOptions};

const CANDIDATE_LIMIT: i64 = 300;

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// Reduces markdown to the prose that should be tokenized: fence markers
/// and heading/emphasis syntax dropped, image and link syntax collapsed to
/// the link text, wiki links to their target or alias.
pub fn strip_markdown(body: &str) -> String {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    static HEADING: OnceLock<Regex> = OnceLock::new();
    static IMAGE: OnceLock<Regex> = OnceLock::new();
    static LINK: OnceLock<Regex> = OnceLock::new();
    static WIKI: OnceLock<Regex> = OnceLock::new();
    static EMPHASIS: OnceLock<Regex> = OnceLock::new();

    let text = re(&FENCE, r"(?m)^```[^\n]*$").replace_all(body, "");
    let text = re(&HEADING, r"(?m)^#{1,6}[ \t]+").replace_all(&text, "");
    let text = re(&IMAGE, r"!\[([^\]]*)\]\([^)]*\)").replace_all(&text, "$1");
    let text = re(&LINK, r"\[([^\]]+)\]\([^)]*\)").replace_all(&text, "$1");
    let text = re(&WIKI, r"\[\[([^\]|#]+)(?:#[^\]|]*)?(?:\|([^\]]+))?\]\]")
        .replace_all(&text, |caps: &regex::Captures<'_>| {
            caps.get(2)
                .or_else(|| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default()
        });
    let text = re(&EMPHASIS, r"[*_`~]").replace_all(&text, "");
    text.trim().to_string()
}

/// Query terms: alphanumeric runs of at least two characters, lowercased.
pub fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(str::trim)
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

fn match_expression(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replaces the note's FTS row. Idempotent: re-inserting a UID swaps the
/// prior row out.
pub fn update(
    conn: &Connection,
    uid: &str,
    title: &str,
    content: &str,
    tags: &[String],
    category: &str,
    project: Option<&str>,
) -> Result<()> {
    conn.execute("DELETE FROM notes_fts WHERE uid = ?", [uid])?;
    conn.execute(
        "INSERT INTO notes_fts(uid, title, content, tags, category, project) VALUES(?, ?, ?, ?, ?, ?)",
        rusqlite::params![uid, title, content, tags.join(" "), category, project],
    )?;
    Ok(())
}

pub fn remove(conn: &Connection, uid: &str) -> Result<()> {
    conn.execute("DELETE FROM notes_fts WHERE uid = ?", [uid])?;
    Ok(())
}

/// Engine-side segment merge.
pub fn optimize(conn: &Connection) -> Result<()> {
    conn.execute("INSERT INTO notes_fts(notes_fts) VALUES('optimize')", [])?;
    Ok(())
}

/// Runs the match and applies the metadata filters as conjunctive
/// post-predicates. Returns every surviving candidate (bounded by an
/// overscan cap), ordered by engine-native relevance.
pub fn search(conn: &Connection, query: &str, opts: &SearchOptions) -> Result<Vec<FtsRow>> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT notes_fts.uid, n.title, n.category, n.project, n.file_path, n.tags_json,
                notes_fts.content, bm25(notes_fts) AS score
         FROM notes_fts
         JOIN notes n ON n.uid = notes_fts.uid
         WHERE notes_fts MATCH ?
         ORDER BY score
         LIMIT ?",
    )?;

    let expression = match_expression(&tokens);
    let mut rows = stmt.query(rusqlite::params![expression, CANDIDATE_LIMIT])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let uid: String = row.get(0)?;
        let title: String = row.get(1)?;
        let category: String = row.get(2)?;
        let project: Option<String> = row.get(3)?;
        let file_path: String = row.get(4)?;
        let tags_json: String = row.get(5)?;
        let content: String = row.get(6)?;
        let rank: f64 = row.get(7)?;

        let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

        if let Some(want) = &opts.category {
            if &category != want {
                continue;
            }
        }
        if let Some(want) = &opts.project {
            if project.as_deref() != Some(want.as_str()) {
                continue;
            }
        }
        if !opts.tags.iter().all(|want| tags.iter().any(|t| t == want)) {
            continue;
        }

        let snippet = build_snippet(&content, &tokens, opts.snippet_length, &opts.highlight_tag);
        out.push(FtsRow {
            uid,
            title,
            category,
            project,
            file_path,
            tags,
            snippet,
            // bm25() is lower-is-better and negative for matches.
            relevance: (-rank).max(0.0),
        });
    }

    Ok(out)
}

fn clamp_to_char_boundary(s: &str, mut idx: usize, forward: bool) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && idx < s.len() && !s.is_char_boundary(idx) {
        if forward {
            idx += 1;
        } else {
            idx -= 1;
        }
    }
    idx.min(s.len())
}

/// Window of `max_len` chars anchored at the first term hit, every term
/// occurrence inside it wrapped in the highlight tag with original casing
/// kept. Terms match case-insensitively at any offset.
pub fn build_snippet(content: &str, tokens: &[String], max_len: usize, tag: &str) -> String {
    let content_lc = content.to_lowercase();
    let anchor = tokens.iter().filter_map(|t| content_lc.find(t)).min();

    let (start, end, leading, trailing) = match anchor {
        Some(pos) => {
            let pos = pos.min(content.len());
            let start = clamp_to_char_boundary(content, pos.saturating_sub(max_len / 3), false);
            let end = clamp_to_char_boundary(content, start + max_len, true);
            (start, end, start > 0, end < content.len())
        }
        None => {
            let end = clamp_to_char_boundary(content, max_len, true);
            (0, end, false, end < content.len())
        }
    };

    let window = content.get(start..end).unwrap_or("");
    let window = window.replace('\n', " ");
    let mut highlighted = highlight(&window, tokens, tag);
    if leading {
        highlighted.insert(0, '…');
    }
    if trailing {
        highlighted.push('…');
    }
    highlighted.trim().to_string()
}

fn highlight(window: &str, tokens: &[String], tag: &str) -> String {
    let window_lc = window.to_lowercase();
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        for (idx, _) in window_lc.match_indices(token.as_str()) {
            let end = idx + token.len();
            // Skip when the byte range does not land on boundaries of the
            // original window (case folding changed lengths).
            if !window.is_char_boundary(idx) || end > window.len() || !window.is_char_boundary(end)
            {
                continue;
            }
            ranges.push((idx, end));
        }
    }
    if ranges.is_empty() {
        return window.to_string();
    }

    ranges.sort();
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (s, e) in ranges {
        match merged.last_mut() {
            Some((_, last_end)) if s < *last_end => *last_end = (*last_end).max(e),
            _ => merged.push((s, e)),
        }
    }

    let mut out = String::with_capacity(window.len() + merged.len() * (tag.len() * 2 + 5));
    let mut cursor = 0;
    for (s, e) in merged {
        out.push_str(&window[cursor..s]);
        out.push('<');
        out.push_str(tag);
        out.push('>');
        out.push_str(&window[s..e]);
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
        cursor = e;
    }
    out.push_str(&window[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::db::Database;

    fn insert_note(db: &Database, uid: &str, title: &str, content: &str, tags: &[&str]) {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO notes(uid, title, category, file_path, project, tags_json, content_hash, created_at, updated_at, indexed_at)
                 VALUES(?, ?, 'Resources', ?, NULL, ?, 'h', 'now', 'now', 'now')",
                rusqlite::params![
                    uid,
                    title,
                    format!("{uid}.md"),
                    serde_json::to_string(&tags).unwrap()
                ],
            )?;
            let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
            update(conn, uid, title, content, &tags, "Resources", None)
        })
        .unwrap();
    }

    #[test]
    fn strips_markdown_syntax() {
        let body = "# Heading\n\nSome **bold** and _italic_ text with `code`.\n\n```rust\nlet x = 1;\n```\n\nA [link](https://example.com) and [[Target|alias]] and ![img](pic.png).";
        let cleaned = strip_markdown(body);
        assert!(!cleaned.contains('#'));
        assert!(!cleaned.contains("**"));
        assert!(!cleaned.contains("```"));
        assert!(cleaned.contains("Heading"));
        assert!(cleaned.contains("bold"));
        assert!(cleaned.contains("let x = 1;"));
        assert!(cleaned.contains("link"));
        assert!(!cleaned.contains("https://example.com"));
        assert!(cleaned.contains("alias"));
        assert!(cleaned.contains("img"));
    }

    #[test]
    fn tokenize_drops_short_and_symbols() {
        assert_eq!(tokenize("FTS5 tuning, a +!"), vec!["fts5", "tuning"]);
        assert!(tokenize("! ? .").is_empty());
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn search_finds_and_highlights() {
        let (_dir, db) = Database::open_temp();
        insert_note(&db, "u1", "Index optimization", "FTS5 tuning tips", &["index"]);
        insert_note(&db, "u2", "Gardening", "tomato seedlings", &[]);

        let rows = db
            .with_conn(|conn| search(conn, "FTS5", &SearchOptions::default()))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].uid, "u1");
        assert!(rows[0].snippet.contains("<mark>FTS5</mark>"), "{}", rows[0].snippet);
        assert!(rows[0].relevance >= 0.0);
    }

    #[test]
    fn empty_and_tokenless_queries_return_nothing() {
        let (_dir, db) = Database::open_temp();
        insert_note(&db, "u1", "T", "content words", &[]);
        for q in ["", "   ", "?!"] {
            let rows = db
                .with_conn(|conn| search(conn, q, &SearchOptions::default()))
                .unwrap();
            assert!(rows.is_empty(), "query {q:?} should match nothing");
        }
    }

    #[test]
    fn filters_are_conjunctive() {
        let (_dir, db) = Database::open_temp();
        insert_note(&db, "u1", "One", "shared term", &["keep"]);
        insert_note(&db, "u2", "Two", "shared term", &["other"]);

        let opts = SearchOptions {
            tags: vec!["keep".to_string()],
            ..Default::default()
        };
        let rows = db.with_conn(|conn| search(conn, "shared", &opts)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].uid, "u1");

        let opts = SearchOptions {
            category: Some("Projects".to_string()),
            ..Default::default()
        };
        let rows = db.with_conn(|conn| search(conn, "shared", &opts)).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn reinsert_replaces_prior_row() {
        let (_dir, db) = Database::open_temp();
        insert_note(&db, "u1", "T", "first version", &[]);
        insert_note(&db, "u1", "T", "second version", &[]);

        let rows = db
            .with_conn(|conn| search(conn, "version", &SearchOptions::default()))
            .unwrap();
        assert_eq!(rows.len(), 1);

        let first = db
            .with_conn(|conn| search(conn, "first", &SearchOptions::default()))
            .unwrap();
        assert!(first.is_empty());
    }

    #[test]
    fn snippet_trims_and_marks_multiple_terms() {
        let long_head = "x ".repeat(200);
        let content = format!("{long_head}alpha beta and later alpha again");
        let snippet = build_snippet(
            &content,
            &["alpha".to_string(), "beta".to_string()],
            80,
            "mark",
        );
        assert!(snippet.starts_with('…'));
        assert!(snippet.contains("<mark>alpha</mark>"));
        assert!(snippet.contains("<mark>beta</mark>"));
    }
}
