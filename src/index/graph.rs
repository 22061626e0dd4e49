use std::collections::{HashMap, HashSet, VecDeque};

use rusqlite::Connection;

use crate::error::Result;
use crate::notes::links::count_mentions;
use crate::utils::now_rfc3339;

use super::types::{ConnectedNote, GraphStats, LinkRow, OrphanRow, TopTarget};

pub const STRENGTH_CAP: usize = 10;
const SCORE_DECAY: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Internal,
    External,
    Tag,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Internal => "internal",
            LinkKind::External => "external",
            LinkKind::Tag => "tag",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "outgoing" => Some(Direction::Outgoing),
            "incoming" => Some(Direction::Incoming),
            "both" => Some(Direction::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectedOptions {
    pub depth: u32,
    pub limit: usize,
    pub direction: Direction,
}

impl Default for ConnectedOptions {
    fn default() -> Self {
        Self {
            depth: 2,
            limit: 100,
            direction: Direction::Both,
        }
    }
}

/// Rewrites the outgoing edge set of `uid` in one unit: delete, then
/// insert each distinct target with a strength derived from how often the
/// target is mentioned in the body (floor 1, cap 10). `created_at` is
/// preserved for edges that already existed.
pub fn update_links(conn: &Connection, uid: &str, body: &str, targets: &[String]) -> Result<()> {
    let mut existing: HashMap<(String, String), String> = HashMap::new();
    {
        let mut stmt =
            conn.prepare("SELECT target_uid, kind, created_at FROM links WHERE source_uid = ?")?;
        let mut rows = stmt.query([uid])?;
        while let Some(row) = rows.next()? {
            existing.insert((row.get(0)?, row.get(1)?), row.get(2)?);
        }
    }

    conn.execute("DELETE FROM links WHERE source_uid = ?", [uid])?;

    let now = now_rfc3339();
    let mut seen: HashSet<&str> = HashSet::new();
    for target in targets {
        if target == uid || !seen.insert(target.as_str()) {
            continue;
        }
        let strength = count_mentions(body, target).clamp(1, STRENGTH_CAP) as i64;
        let kind = LinkKind::Internal.as_str();
        let created_at = existing
            .get(&(target.clone(), kind.to_string()))
            .cloned()
            .unwrap_or_else(|| now.clone());
        conn.execute(
            "INSERT OR REPLACE INTO links(source_uid, target_uid, kind, strength, created_at, last_seen_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            rusqlite::params![uid, target, kind, strength, created_at, now],
        )?;
    }

    Ok(())
}

pub fn backlinks(conn: &Connection, target: &str, limit: usize) -> Result<Vec<LinkRow>> {
    let mut stmt = conn.prepare(
        "SELECT l.source_uid, n.title, l.kind, l.strength, l.last_seen_at
         FROM links l
         JOIN notes n ON n.uid = l.source_uid
         WHERE l.target_uid = ?
         ORDER BY l.strength DESC, l.last_seen_at DESC
         LIMIT ?",
    )?;
    let result = collect_link_rows(stmt.query(rusqlite::params![target, limit as i64])?);
    result
}

pub fn outbound(conn: &Connection, source: &str, limit: usize) -> Result<Vec<LinkRow>> {
    let mut stmt = conn.prepare(
        "SELECT l.target_uid, n.title, l.kind, l.strength, l.last_seen_at
         FROM links l
         JOIN notes n ON n.uid = l.target_uid
         WHERE l.source_uid = ?
         ORDER BY l.strength DESC, l.last_seen_at DESC
         LIMIT ?",
    )?;
    let result = collect_link_rows(stmt.query(rusqlite::params![source, limit as i64])?);
    result
}

fn collect_link_rows(mut rows: rusqlite::Rows<'_>) -> Result<Vec<LinkRow>> {
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(LinkRow {
            uid: row.get(0)?,
            title: row.get(1)?,
            kind: row.get(2)?,
            strength: row.get::<_, i64>(3)? as u32,
            last_seen_at: row.get(4)?,
        });
    }
    Ok(out)
}

fn neighbors(conn: &Connection, uid: &str, direction: Direction) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    let mut push_query = |sql: &str| -> Result<()> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([uid])?;
        while let Some(row) = rows.next()? {
            let next: String = row.get(0)?;
            if !out.iter().any(|u| u == &next) {
                out.push(next);
            }
        }
        Ok(())
    };

    if matches!(direction, Direction::Outgoing | Direction::Both) {
        push_query(
            "SELECT target_uid FROM links WHERE source_uid = ?
             ORDER BY strength DESC, last_seen_at DESC",
        )?;
    }
    if matches!(direction, Direction::Incoming | Direction::Both) {
        push_query(
            "SELECT source_uid FROM links WHERE target_uid = ?
             ORDER BY strength DESC, last_seen_at DESC",
        )?;
    }
    Ok(out)
}

fn title_of(conn: &Connection, uid: &str) -> Result<Option<String>> {
    let title = conn
        .query_row("SELECT title FROM notes WHERE uid = ?", [uid], |row| {
            row.get(0)
        })
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(title)
}

/// Bounded breadth-first walk. Every enqueued node at depth d scores
/// `parent_score * 0.7^d`; ties keep BFS insertion order (stable sort).
pub fn connected(
    conn: &Connection,
    start: &str,
    opts: &ConnectedOptions,
) -> Result<Vec<ConnectedNote>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, u32, f64)> = VecDeque::new();
    let mut out: Vec<ConnectedNote> = Vec::new();

    visited.insert(start.to_string());
    queue.push_back((start.to_string(), 0, 1.0));

    while let Some((uid, depth, score)) = queue.pop_front() {
        let title = title_of(conn, &uid)?.unwrap_or_default();
        out.push(ConnectedNote {
            uid: uid.clone(),
            title,
            depth,
            score,
        });

        if depth >= opts.depth {
            continue;
        }
        let next_depth = depth + 1;
        for neighbor in neighbors(conn, &uid, opts.direction)? {
            if visited.insert(neighbor.clone()) {
                let next_score = score * SCORE_DECAY.powi(next_depth as i32);
                queue.push_back((neighbor, next_depth, next_score));
            }
        }
    }

    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out.truncate(opts.limit);
    Ok(out)
}

/// Notes no surviving source links to, most recently updated first.
pub fn orphans(conn: &Connection, limit: usize) -> Result<Vec<OrphanRow>> {
    let mut stmt = conn.prepare(
        "SELECT n.uid, n.title, n.updated_at
         FROM notes n
         WHERE NOT EXISTS (
             SELECT 1 FROM links l
             JOIN notes s ON s.uid = l.source_uid
             WHERE l.target_uid = n.uid
         )
         ORDER BY n.updated_at DESC
         LIMIT ?",
    )?;
    let mut rows = stmt.query([limit as i64])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(OrphanRow {
            uid: row.get(0)?,
            title: row.get(1)?,
            updated_at: row.get(2)?,
        });
    }
    Ok(out)
}

/// Drops every edge touching `uid`, in either direction.
pub fn remove_links(conn: &Connection, uid: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM links WHERE source_uid = ? OR target_uid = ?",
        rusqlite::params![uid, uid],
    )?;
    Ok(())
}

pub fn stats(conn: &Connection, top: usize) -> Result<GraphStats> {
    let link_count: i64 = conn.query_row("SELECT count(*) FROM links", [], |r| r.get(0))?;
    let mut stmt = conn.prepare(
        "SELECT target_uid, count(*) AS inbound
         FROM links GROUP BY target_uid
         ORDER BY inbound DESC, target_uid
         LIMIT ?",
    )?;
    let mut rows = stmt.query([top as i64])?;
    let mut top_targets = Vec::new();
    while let Some(row) = rows.next()? {
        top_targets.push(TopTarget {
            uid: row.get(0)?,
            inbound: row.get::<_, i64>(1)? as u64,
        });
    }
    Ok(GraphStats {
        link_count: link_count as u64,
        top_targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::db::Database;

    fn seed_note(conn: &Connection, uid: &str, title: &str) {
        conn.execute(
            "INSERT OR REPLACE INTO notes(uid, title, category, file_path, content_hash, created_at, updated_at, indexed_at)
             VALUES(?, ?, 'Resources', ?, 'h', '2024-01-01T00:00:00Z', ?, 'now')",
            rusqlite::params![uid, title, format!("{uid}.md"), format!("2024-01-0{}T00:00:00Z", (uid.len() % 9) + 1)],
        )
        .unwrap();
    }

    fn link(conn: &Connection, source: &str, targets: &[&str], body: &str) {
        let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        update_links(conn, source, body, &targets).unwrap();
    }

    #[test]
    fn strength_follows_mentions_with_cap() {
        let (_dir, db) = Database::open_temp();
        db.with_conn(|conn| {
            seed_note(conn, "a", "A");
            seed_note(conn, "b", "B");
            seed_note(conn, "c", "C");

            link(conn, "a", &["b", "c"], &format!("{} {} {}", "b", "b", "c"));
            let rows = outbound(conn, "a", 50)?;
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].uid, "b");
            assert_eq!(rows[0].strength, 2);
            assert_eq!(rows[1].strength, 1);

            // Mentions beyond the cap clamp to 10.
            let noisy = "b ".repeat(40);
            link(conn, "a", &["b"], &noisy);
            let rows = outbound(conn, "a", 50)?;
            assert_eq!(rows[0].strength, 10);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn self_and_duplicate_targets_are_skipped() {
        let (_dir, db) = Database::open_temp();
        db.with_conn(|conn| {
            seed_note(conn, "a", "A");
            seed_note(conn, "b", "B");
            link(conn, "a", &["a", "b", "b"], "");
            let rows = outbound(conn, "a", 50)?;
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].uid, "b");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn backlinks_require_surviving_source() {
        let (_dir, db) = Database::open_temp();
        db.with_conn(|conn| {
            seed_note(conn, "a", "A");
            seed_note(conn, "b", "B");
            link(conn, "a", &["b"], "b");
            assert_eq!(backlinks(conn, "b", 50)?.len(), 1);

            // Source note row vanishes; edge no longer surfaces.
            conn.execute("DELETE FROM notes WHERE uid = 'a'", [])?;
            assert!(backlinks(conn, "b", 50)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn connected_depth_zero_is_start_only() {
        let (_dir, db) = Database::open_temp();
        db.with_conn(|conn| {
            seed_note(conn, "a", "A");
            seed_note(conn, "b", "B");
            link(conn, "a", &["b"], "b");

            let opts = ConnectedOptions {
                depth: 0,
                ..Default::default()
            };
            let nodes = connected(conn, "a", &opts)?;
            assert_eq!(nodes.len(), 1);
            assert_eq!(nodes[0].uid, "a");
            assert_eq!(nodes[0].depth, 0);
            assert!((nodes[0].score - 1.0).abs() < f64::EPSILON);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn connected_grows_with_depth_and_decays() {
        let (_dir, db) = Database::open_temp();
        db.with_conn(|conn| {
            seed_note(conn, "a", "A");
            seed_note(conn, "b", "B");
            seed_note(conn, "c", "C");
            link(conn, "a", &["b"], "b");
            link(conn, "b", &["c"], "c");

            let depth1 = connected(
                conn,
                "a",
                &ConnectedOptions {
                    depth: 1,
                    direction: Direction::Outgoing,
                    ..Default::default()
                },
            )?;
            let depth2 = connected(
                conn,
                "a",
                &ConnectedOptions {
                    depth: 2,
                    direction: Direction::Outgoing,
                    ..Default::default()
                },
            )?;

            let uids1: Vec<&str> = depth1.iter().map(|n| n.uid.as_str()).collect();
            let uids2: Vec<&str> = depth2.iter().map(|n| n.uid.as_str()).collect();
            for uid in &uids1 {
                assert!(uids2.contains(uid), "depth 2 must contain depth 1 results");
            }
            assert!(uids2.contains(&"c"));

            let b = depth2.iter().find(|n| n.uid == "b").unwrap();
            let c = depth2.iter().find(|n| n.uid == "c").unwrap();
            assert!((b.score - 0.7).abs() < 1e-9);
            assert!(c.score < b.score);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn connected_handles_cycles() {
        let (_dir, db) = Database::open_temp();
        db.with_conn(|conn| {
            seed_note(conn, "a", "A");
            seed_note(conn, "b", "B");
            link(conn, "a", &["b"], "b");
            link(conn, "b", &["a"], "a");

            let nodes = connected(conn, "a", &ConnectedOptions::default())?;
            assert_eq!(nodes.len(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn orphan_detection() {
        let (_dir, db) = Database::open_temp();
        db.with_conn(|conn| {
            seed_note(conn, "a", "A");
            seed_note(conn, "b", "B");
            seed_note(conn, "loner", "Loner");
            link(conn, "a", &["b"], "b");

            let rows = orphans(conn, 50)?;
            let uids: Vec<&str> = rows.iter().map(|r| r.uid.as_str()).collect();
            assert!(uids.contains(&"a"));
            assert!(uids.contains(&"loner"));
            assert!(!uids.contains(&"b"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn remove_links_clears_both_directions() {
        let (_dir, db) = Database::open_temp();
        db.with_conn(|conn| {
            seed_note(conn, "a", "A");
            seed_note(conn, "b", "B");
            seed_note(conn, "c", "C");
            link(conn, "a", &["b"], "b");
            link(conn, "b", &["c"], "c");

            remove_links(conn, "b")?;
            assert!(outbound(conn, "b", 50)?.is_empty());
            assert!(backlinks(conn, "b", 50)?.is_empty());
            assert!(outbound(conn, "a", 50)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn created_at_survives_reindex() {
        let (_dir, db) = Database::open_temp();
        db.with_conn(|conn| {
            seed_note(conn, "a", "A");
            seed_note(conn, "b", "B");
            link(conn, "a", &["b"], "b");
            let before: String = conn.query_row(
                "SELECT created_at FROM links WHERE source_uid='a' AND target_uid='b'",
                [],
                |r| r.get(0),
            )?;
            link(conn, "a", &["b"], "b b b");
            let after: String = conn.query_row(
                "SELECT created_at FROM links WHERE source_uid='a' AND target_uid='b'",
                [],
                |r| r.get(0),
            )?;
            assert_eq!(before, after);
            Ok(())
        })
        .unwrap();
    }
}
