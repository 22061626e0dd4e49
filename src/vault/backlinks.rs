use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::index::SearchEngine;
use crate::notes::{Note, NoteRepository, SaveOptions};

use super::events::{BacklinkRemoval, WatchEvent, WatchKind};

#[derive(Debug, Clone)]
pub struct BacklinkOptions {
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub debounce_ms: u64,
}

impl Default for BacklinkOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_in_flight: 5,
            debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub synced: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Keeps each note's header `links` equal to the UID set resolved from
/// its body. Owns a pending set fed by watcher events and flushed on a
/// debounce; every individual flush is atomic per note.
pub struct BacklinkSync {
    repo: Arc<NoteRepository>,
    engine: SearchEngine,
    pending: Mutex<HashSet<String>>,
    wakeup: Notify,
    opts: BacklinkOptions,
}

impl BacklinkSync {
    pub fn new(
        repo: Arc<NoteRepository>,
        engine: SearchEngine,
        opts: BacklinkOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo,
            engine,
            pending: Mutex::new(HashSet::new()),
            wakeup: Notify::new(),
            opts,
        })
    }

    fn sync_note(&self, note: &mut Note) -> Result<bool> {
        let analysis = self.repo.analyze_links(note)?;
        let current: HashSet<&str> = note.header.links.iter().map(String::as_str).collect();
        let resolved: HashSet<&str> = analysis.outbound.iter().map(String::as_str).collect();
        if current == resolved {
            return Ok(false);
        }
        note.header.links = analysis.outbound;
        self.repo.save(note, &SaveOptions::default())?;
        self.engine.index_note(note)?;
        Ok(true)
    }

    /// Load, analyze, diff, write back only when the set differs. Unknown
    /// UIDs are a no-op.
    pub fn sync(&self, uid: &str) -> Result<bool> {
        match self.repo.find_by_uid(uid)? {
            Some(mut note) => self.sync_note(&mut note),
            None => Ok(false),
        }
    }

    /// Removes `deleted_uid` from every header that still carries it and
    /// reports the affected notes in one event.
    pub fn cleanup(&self, deleted_uid: &str) -> Result<BacklinkRemoval> {
        let mut affected = Vec::new();
        for path in self.repo.list_paths()? {
            let mut note = match self.repo.load(&path) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "backlink cleanup: unreadable note skipped");
                    continue;
                }
            };
            if !note.header.links.iter().any(|l| l == deleted_uid) {
                continue;
            }
            note.header.links.retain(|l| l != deleted_uid);
            self.repo.save(&mut note, &SaveOptions::default())?;
            self.engine.index_note(&note)?;
            affected.push(note.header.id.clone());
        }

        let event = BacklinkRemoval::new(deleted_uid.to_string(), affected);
        tracing::info!(
            target = %event.target,
            affected = event.affected.len(),
            "backlink sync: removed deleted target"
        );
        Ok(event)
    }

    /// Walks the whole vault in fixed-size batches with bounded in-flight
    /// concurrency; per-file failures are logged and skipped.
    pub async fn rebuild_all(self: &Arc<Self>) -> Result<RebuildReport> {
        let paths = {
            let repo = Arc::clone(&self.repo);
            tokio::task::spawn_blocking(move || repo.list_paths())
                .await
                .map_err(|e| crate::error::Error::Internal(e.to_string()))??
        };

        let mut report = RebuildReport::default();
        for chunk in paths.chunks(self.opts.batch_size) {
            let outcomes: Vec<Option<bool>> = stream::iter(chunk.to_vec())
                .map(|path| {
                    let this = Arc::clone(self);
                    async move {
                        tokio::task::spawn_blocking(move || {
                            let mut note = this.repo.load(&path)?;
                            this.sync_note(&mut note)
                        })
                        .await
                        .map_err(|e| crate::error::Error::Internal(e.to_string()))
                        .and_then(|inner| inner)
                        .map_err(|e| {
                            tracing::warn!(error = %e, "backlink rebuild: note skipped");
                            e
                        })
                        .ok()
                    }
                })
                .buffer_unordered(self.opts.max_in_flight)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome {
                    Some(true) => report.synced += 1,
                    Some(false) => report.unchanged += 1,
                    None => report.failed += 1,
                }
            }
        }
        Ok(report)
    }

    /// Queues a UID for the next debounced flush.
    pub fn enqueue(&self, uid: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        pending.insert(uid.to_string());
        self.wakeup.notify_one();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Drains the pending set and syncs each UID; flush order across UIDs
    /// is unspecified.
    pub async fn flush_pending(self: &Arc<Self>) -> usize {
        let uids: Vec<String> = {
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            pending.drain().collect()
        };
        if uids.is_empty() {
            return 0;
        }

        let mut flushed = 0usize;
        for chunk in uids.chunks(self.opts.batch_size) {
            let results: Vec<bool> = stream::iter(chunk.to_vec())
                .map(|uid| {
                    let this = Arc::clone(self);
                    async move {
                        tokio::task::spawn_blocking(move || this.sync(&uid))
                            .await
                            .map_err(|e| crate::error::Error::Internal(e.to_string()))
                            .and_then(|inner| inner)
                            .map_err(|e| {
                                tracing::warn!(error = %e, "backlink flush: sync failed");
                                e
                            })
                            .is_ok()
                    }
                })
                .buffer_unordered(self.opts.max_in_flight)
                .collect()
                .await;
            flushed += results.into_iter().filter(|ok| *ok).count();
        }
        flushed
    }

    /// Debounced flush loop; drains the pending set before exiting on
    /// cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush_pending().await;
                    return;
                }
                _ = self.wakeup.notified() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush_pending().await;
                    return;
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(self.opts.debounce_ms)) => {}
            }

            self.flush_pending().await;
        }
    }

    /// Bridges watcher events into the index and the pending set. Events
    /// are handled serially in arrival order.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<WatchEvent>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return,
                    received = events.recv() => match received {
                        Some(ev) => ev,
                        None => return,
                    },
                };

                match event.kind {
                    WatchKind::Add | WatchKind::Change => {
                        let Some(note) = event.note else { continue };
                        let uid = note.header.id.clone();
                        let engine = this.engine.clone();
                        let result = tokio::task::spawn_blocking(move || engine.index_note(&note))
                            .await;
                        match result {
                            Ok(Ok(())) => this.enqueue(&uid),
                            Ok(Err(e)) => {
                                tracing::warn!(uid = %uid, error = %e, "watcher reindex failed")
                            }
                            Err(e) => tracing::warn!(error = %e, "watcher reindex panicked"),
                        }
                    }
                    WatchKind::Unlink => {
                        let this2 = Arc::clone(&this);
                        let path = event.path.display().to_string();
                        let result = tokio::task::spawn_blocking(move || {
                            let Some(uid) = this2.engine.uid_for_path(&path)? else {
                                return Ok(None);
                            };
                            this2.engine.remove_note(&uid)?;
                            let removal = this2.cleanup(&uid)?;
                            Ok(Some(removal))
                        })
                        .await;
                        match result {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => {
                                let e: crate::error::Error = e;
                                tracing::warn!(error = %e, "watcher unlink cleanup failed");
                            }
                            Err(e) => tracing::warn!(error = %e, "watcher unlink panicked"),
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Database, SearchOptions};
    use crate::notes::CreateOptions;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<NoteRepository>, SearchEngine, Arc<BacklinkSync>) {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(NoteRepository::new(dir.path()));
        let db = Database::open(
            &dir.path().join(".memory-index.db"),
            &crate::index::DatabaseOptions::default(),
        )
        .unwrap();
        let engine = SearchEngine::new(Arc::new(db));
        let sync = BacklinkSync::new(Arc::clone(&repo), engine.clone(), BacklinkOptions::default());
        (dir, repo, engine, sync)
    }

    #[test]
    fn sync_propagates_body_links_to_header() {
        let (dir, repo, engine, sync) = setup();
        let b = repo
            .create(&dir.path().join("b.md"), "B", "", &CreateOptions::default())
            .unwrap();
        engine.index_note(&b).unwrap();

        let a = repo
            .create(
                &dir.path().join("a.md"),
                "A",
                &format!("see [[{}]]", b.uid()),
                &CreateOptions::default(),
            )
            .unwrap();
        engine.index_note(&a).unwrap();
        assert!(a.header.links.is_empty());

        assert!(sync.sync(a.uid()).unwrap());
        let reloaded = repo.load(&a.path).unwrap();
        assert_eq!(reloaded.header.links, vec![b.uid().to_string()]);

        let inbound = engine.backlinks(b.uid(), 10).unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].uid, *a.uid());
        assert_eq!(inbound[0].strength, 1);

        // Second pass observes no difference.
        assert!(!sync.sync(a.uid()).unwrap());
    }

    #[test]
    fn sync_unknown_uid_is_noop() {
        let (_dir, _repo, _engine, sync) = setup();
        assert!(!sync.sync("20000101T000000000000Z").unwrap());
    }

    #[test]
    fn cleanup_removes_deleted_target_everywhere() {
        let (dir, repo, engine, sync) = setup();
        let c = repo
            .create(&dir.path().join("c.md"), "C", "", &CreateOptions::default())
            .unwrap();
        let b = repo
            .create(
                &dir.path().join("b.md"),
                "B",
                &format!("[[{}]]", c.uid()),
                &CreateOptions::default(),
            )
            .unwrap();
        let a = repo
            .create(
                &dir.path().join("a.md"),
                "A",
                &format!("[[{}]]", b.uid()),
                &CreateOptions::default(),
            )
            .unwrap();
        for note in [&a, &b, &c] {
            engine.index_note(note).unwrap();
        }
        sync.sync(a.uid()).unwrap();
        sync.sync(b.uid()).unwrap();

        // Delete B and reconcile.
        repo.delete(&b.path, false).unwrap();
        engine.remove_note(b.uid()).unwrap();
        let removal = sync.cleanup(b.uid()).unwrap();
        assert_eq!(removal.kind, "remove");
        assert_eq!(removal.target, *b.uid());
        assert_eq!(removal.affected, vec![a.uid().to_string()]);

        let a_reloaded = repo.load(&a.path).unwrap();
        assert!(a_reloaded.header.links.is_empty());

        let orphans = engine.orphans(10).unwrap();
        let uids: Vec<&str> = orphans.iter().map(|o| o.uid.as_str()).collect();
        assert!(uids.contains(&a.uid()));
        assert!(uids.contains(&c.uid()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rebuild_all_reconciles_every_note() {
        let (dir, repo, engine, sync) = setup();
        let target = repo
            .create(&dir.path().join("target.md"), "Target", "", &CreateOptions::default())
            .unwrap();
        engine.index_note(&target).unwrap();

        for i in 0..12 {
            let note = repo
                .create(
                    &dir.path().join(format!("n{i}.md")),
                    &format!("Note {i}"),
                    &format!("link to [[{}]]", target.uid()),
                    &CreateOptions::default(),
                )
                .unwrap();
            engine.index_note(&note).unwrap();
        }

        let report = sync.rebuild_all().await.unwrap();
        assert_eq!(report.synced, 12);
        assert_eq!(report.failed, 0);

        let inbound = engine.backlinks(target.uid(), 50).unwrap();
        assert_eq!(inbound.len(), 12);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_set_coalesces_and_flushes() {
        let (dir, repo, engine, sync) = setup();
        let b = repo
            .create(&dir.path().join("b.md"), "B", "", &CreateOptions::default())
            .unwrap();
        engine.index_note(&b).unwrap();
        let a = repo
            .create(
                &dir.path().join("a.md"),
                "A",
                &format!("[[{}]]", b.uid()),
                &CreateOptions::default(),
            )
            .unwrap();
        engine.index_note(&a).unwrap();

        sync.enqueue(a.uid());
        sync.enqueue(a.uid());
        assert_eq!(sync.pending_len(), 1);

        let flushed = sync.flush_pending().await;
        assert_eq!(flushed, 1);
        assert_eq!(sync.pending_len(), 0);

        let reloaded = repo.load(&a.path).unwrap();
        assert_eq!(reloaded.header.links, vec![b.uid().to_string()]);
        let _ = engine.search("link", &SearchOptions::default());
    }
}
