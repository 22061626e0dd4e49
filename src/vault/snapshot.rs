use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// `{count}` expands to the number of changed files.
    pub message_template: String,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            message_template: "vault snapshot: {count} change(s)".to_string(),
            max_retries: 3,
            backoff_ms: 500,
        }
    }
}

/// Stages and commits a batch of changed files with the system `git`.
/// Failures are for the caller to log; event delivery never waits on this.
#[derive(Debug, Clone)]
pub struct GitSnapshot {
    root: PathBuf,
    opts: SnapshotOptions,
}

impl GitSnapshot {
    pub fn new(root: &Path, opts: SnapshotOptions) -> Self {
        Self {
            root: root.to_path_buf(),
            opts,
        }
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        tokio::process::Command::new("git")
            .current_dir(&self.root)
            .args(args)
            .output()
            .await
            .map_err(Error::Write)
    }

    async fn attempt(&self, count: usize) -> Result<()> {
        let add = self.git(&["add", "-A"]).await?;
        if !add.status.success() {
            return Err(Error::Internal(format!(
                "git add failed: {}",
                String::from_utf8_lossy(&add.stderr).trim()
            )));
        }

        let message = self
            .opts
            .message_template
            .replace("{count}", &count.to_string());
        let commit = self.git(&["commit", "-m", &message]).await?;
        if commit.status.success() {
            return Ok(());
        }
        let stdout = String::from_utf8_lossy(&commit.stdout);
        if stdout.contains("nothing to commit") {
            return Ok(());
        }
        Err(Error::Internal(format!(
            "git commit failed: {}",
            String::from_utf8_lossy(&commit.stderr).trim()
        )))
    }

    /// Linear backoff between attempts.
    pub async fn commit_batch(&self, changed_count: usize) -> Result<()> {
        let mut last = None;
        for attempt in 0..=self.opts.max_retries {
            match self.attempt(changed_count).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "vault snapshot attempt failed");
                    last = Some(e);
                }
            }
            if attempt < self.opts.max_retries {
                let delay = self.opts.backoff_ms * u64::from(attempt + 1);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
        Err(last.unwrap_or_else(|| Error::Internal("snapshot failed".to_string())))
    }
}
