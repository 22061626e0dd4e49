use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::Watcher;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::notes::{parse_note, Note, ParseMode};
use crate::utils::is_markdown_path;

use super::events::{WatchEvent, WatchKind};
use super::snapshot::{GitSnapshot, SnapshotOptions};

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub debounce_ms: u64,
    /// When set, each flushed batch is committed to version control.
    pub snapshot: Option<SnapshotOptions>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            snapshot: None,
        }
    }
}

/// Only vault-relative markdown paths pass: dotted components,
/// `node_modules`, and editor temp files are noise.
fn accepts(root: &Path, path: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    if rel.as_os_str().is_empty() {
        return false;
    }
    for component in rel.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.starts_with('.') || name == "node_modules" || name.ends_with(".tmp") {
            return false;
        }
    }
    is_markdown_path(path)
}

fn classify(kind: &notify::EventKind) -> Option<WatchKind> {
    match kind {
        notify::EventKind::Create(_) => Some(WatchKind::Add),
        notify::EventKind::Modify(_) => Some(WatchKind::Change),
        notify::EventKind::Remove(_) => Some(WatchKind::Unlink),
        _ => None,
    }
}

/// Recursive filesystem watcher with a debouncing stage: repeated changes
/// to one path inside the window collapse to the last observation.
pub struct VaultWatcher {
    cancel: CancellationToken,
    _watcher: notify::RecommendedWatcher,
}

impl VaultWatcher {
    pub fn start(root: &Path, opts: WatcherOptions) -> Result<(Self, mpsc::Receiver<WatchEvent>)> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<(PathBuf, WatchKind)>();
        let (out_tx, out_rx) = mpsc::channel::<WatchEvent>(256);
        let cancel = CancellationToken::new();

        let root_cb = root.to_path_buf();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let Ok(event) = res else { return };
                let Some(kind) = classify(&event.kind) else {
                    return;
                };
                for path in event.paths {
                    if accepts(&root_cb, &path) {
                        let _ = raw_tx.send((path, kind));
                    }
                }
            })
            .map_err(|e| Error::Internal(format!("watcher setup failed: {e}")))?;
        watcher
            .watch(root, notify::RecursiveMode::Recursive)
            .map_err(|e| Error::Internal(format!("watch failed: {e}")))?;

        let snapshot = opts
            .snapshot
            .as_ref()
            .map(|snap_opts| GitSnapshot::new(root, snap_opts.clone()));
        tokio::spawn(debounce_loop(
            raw_rx,
            out_tx,
            Duration::from_millis(opts.debounce_ms.max(1)),
            snapshot,
            cancel.clone(),
        ));

        Ok((
            Self {
                cancel,
                _watcher: watcher,
            },
            out_rx,
        ))
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for VaultWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<(PathBuf, WatchKind)>,
    out_tx: mpsc::Sender<WatchEvent>,
    debounce: Duration,
    snapshot: Option<GitSnapshot>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => return,
            received = raw_rx.recv() => match received {
                Some(ev) => ev,
                None => return,
            },
        };

        let mut pending: HashMap<PathBuf, WatchKind> = HashMap::new();
        pending.insert(first.0, first.1);

        // Keep absorbing until the window goes quiet.
        let deadline = Instant::now() + debounce;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                received = tokio::time::timeout(remaining, raw_rx.recv()) => match received {
                    Ok(Some((path, kind))) => {
                        pending.insert(path, kind);
                    }
                    Ok(None) => break,
                    Err(_) => break,
                },
            }
        }

        let batch: Vec<(PathBuf, WatchKind)> = pending.into_iter().collect();
        let batch_len = batch.len();
        let events = tokio::task::spawn_blocking(move || load_batch(batch))
            .await
            .unwrap_or_default();

        for event in events {
            if out_tx.send(event).await.is_err() {
                return;
            }
        }

        if let Some(snapshot) = snapshot.clone() {
            tokio::spawn(async move {
                if let Err(e) = snapshot.commit_batch(batch_len).await {
                    tracing::warn!(error = %e, "vault snapshot failed");
                }
            });
        }
    }
}

fn load_batch(batch: Vec<(PathBuf, WatchKind)>) -> Vec<WatchEvent> {
    let mut out = Vec::with_capacity(batch.len());
    for (path, kind) in batch {
        match kind {
            WatchKind::Unlink => out.push(WatchEvent {
                kind: WatchKind::Unlink,
                path,
                note: None,
            }),
            WatchKind::Add | WatchKind::Change => match std::fs::read_to_string(&path) {
                Ok(text) => match parse_note(&text, ParseMode::Lenient) {
                    Ok((header, body)) => out.push(WatchEvent {
                        kind,
                        note: Some(Note {
                            header,
                            body,
                            path: path.clone(),
                        }),
                        path,
                    }),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "watcher: unparseable note skipped");
                    }
                },
                // The file vanished inside the window.
                Err(_) => out.push(WatchEvent {
                    kind: WatchKind::Unlink,
                    path,
                    note: None,
                }),
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn filter_rules() {
        let root = Path::new("/vault");
        assert!(accepts(root, Path::new("/vault/3-Resources/a.md")));
        assert!(!accepts(root, Path::new("/vault/.hidden/a.md")));
        assert!(!accepts(root, Path::new("/vault/.git/a.md")));
        assert!(!accepts(root, Path::new("/vault/node_modules/a.md")));
        assert!(!accepts(root, Path::new("/vault/a.md.tmp")));
        assert!(!accepts(root, Path::new("/vault/.a.md.tmp.1.2")));
        assert!(!accepts(root, Path::new("/vault/notes.txt")));
        assert!(!accepts(root, Path::new("/elsewhere/a.md")));
    }

    #[test]
    fn unlink_batch_carries_no_note() {
        let events = load_batch(vec![(PathBuf::from("/vault/gone.md"), WatchKind::Unlink)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchKind::Unlink);
        assert!(events[0].note.is_none());
    }

    #[test]
    fn missing_add_becomes_unlink() {
        let events = load_batch(vec![(PathBuf::from("/nonexistent/x.md"), WatchKind::Add)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchKind::Unlink);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn emits_debounced_events_for_real_changes() {
        let dir = TempDir::new().unwrap();
        let (watcher, mut rx) = VaultWatcher::start(
            dir.path(),
            WatcherOptions {
                debounce_ms: 100,
                snapshot: None,
            },
        )
        .unwrap();

        let path = dir.path().join("note.md");
        std::fs::write(&path, "---\ntitle: Watched\n---\nfirst").unwrap();
        std::fs::write(&path, "---\ntitle: Watched\n---\nsecond").unwrap();

        // Events for the same path are serialized; the final observation
        // must reflect the last write.
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("watcher should emit within 5s")
                .expect("channel open");
            assert_eq!(event.path, path);
            let note = event.note.expect("add/change carries the note");
            assert_eq!(note.header.title, "Watched");
            if note.body == "second" {
                break;
            }
        }

        std::fs::remove_file(&path).unwrap();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("watcher should emit unlink")
                .expect("channel open");
            if event.kind == WatchKind::Unlink {
                assert_eq!(event.path, path);
                break;
            }
        }

        watcher.stop();
    }
}
