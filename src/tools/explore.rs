use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::index::{ConnectedOptions, Direction};

use super::registry::{parse_input, run_blocking, schema_of, ToolContext, ToolHandler};

const MAX_DEPTH: u32 = 5;
const MAX_LIMIT: usize = 500;

/// Parameters for walking the link graph around a note.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExploreLinksParams {
    pub uid: String,
    /// Traversal depth, 0 returns only the start node.
    pub depth: Option<u32>,
    /// outgoing | incoming | both
    pub direction: Option<String>,
    pub limit: Option<u32>,
}

pub struct ExploreLinksTool;

#[async_trait]
impl ToolHandler for ExploreLinksTool {
    fn name(&self) -> &'static str {
        "explore_links"
    }
    fn description(&self) -> &'static str {
        "Walk the link graph around a note: connected notes, backlinks, outbound links."
    }
    fn input_schema(&self) -> Value {
        schema_of::<ExploreLinksParams>()
    }
    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<ExploreLinksParams>(self.name(), input).map(|_| ())
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let params: ExploreLinksParams = parse_input(self.name(), &input)?;
        let direction = match params.direction.as_deref() {
            None => Direction::Both,
            Some(raw) => Direction::parse(raw).ok_or_else(|| {
                Error::SchemaValidation(format!("{}: unknown direction '{raw}'", self.name()))
            })?,
        };
        let opts = ConnectedOptions {
            depth: params.depth.unwrap_or(2).min(MAX_DEPTH),
            limit: params.limit.map(|l| l as usize).unwrap_or(100).clamp(1, MAX_LIMIT),
            direction,
        };

        let engine = ctx.engine.clone();
        let uid = params.uid;
        run_blocking(self.name(), move || {
            let connected = engine.connected(&uid, &opts)?;
            let backlinks = engine.backlinks(&uid, 50)?;
            let outbound = engine.outbound(&uid, 50)?;
            Ok(json!({
                "start": uid,
                "connected": connected,
                "backlinks": backlinks,
                "outbound": outbound,
            }))
        })
        .await
    }
}

/// Parameters for vault maintenance operations.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MaintainVaultParams {
    /// rebuild_index | rebuild_backlinks | optimize | check_integrity |
    /// archive_old | archive_project | stats
    pub action: String,
    /// Required by archive_project.
    pub project: Option<String>,
}

pub struct MaintainVaultTool;

#[async_trait]
impl ToolHandler for MaintainVaultTool {
    fn name(&self) -> &'static str {
        "maintain_vault"
    }
    fn description(&self) -> &'static str {
        "Maintenance: rebuild the index or backlinks, optimize, verify integrity, run archival sweeps, report stats."
    }
    fn input_schema(&self) -> Value {
        schema_of::<MaintainVaultParams>()
    }
    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<MaintainVaultParams>(self.name(), input).map(|_| ())
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let params: MaintainVaultParams = parse_input(self.name(), &input)?;

        match params.action.as_str() {
            "rebuild_index" => {
                let repo = std::sync::Arc::clone(&ctx.repo);
                let engine = ctx.engine.clone();
                run_blocking(self.name(), move || {
                    let mut notes = Vec::new();
                    for path in repo.list_paths()? {
                        match repo.load(&path) {
                            Ok(note) => notes.push(note),
                            Err(e) => {
                                tracing::warn!(path = %path.display(), error = %e, "rebuild: unreadable note skipped")
                            }
                        }
                    }
                    let report = engine.batch_index(&notes)?;
                    serde_json::to_value(report).map_err(|e| Error::Internal(e.to_string()))
                })
                .await
            }
            "rebuild_backlinks" => {
                let report = ctx.backlinks.rebuild_all().await?;
                serde_json::to_value(report).map_err(|e| Error::Internal(e.to_string()))
            }
            "optimize" => {
                let engine = ctx.engine.clone();
                run_blocking(self.name(), move || {
                    engine.optimize()?;
                    let stats = engine.stats()?;
                    serde_json::to_value(stats).map_err(|e| Error::Internal(e.to_string()))
                })
                .await
            }
            "check_integrity" => {
                let engine = ctx.engine.clone();
                run_blocking(self.name(), move || {
                    let ok = engine.check_integrity()?;
                    Ok(json!({"ok": ok}))
                })
                .await
            }
            "archive_old" => {
                let organizer = ctx.organizer.clone();
                let repo = std::sync::Arc::clone(&ctx.repo);
                let engine = ctx.engine.clone();
                run_blocking(self.name(), move || {
                    let moved = organizer.archive_old()?;
                    for event in &moved {
                        let note = repo.load(&event.to)?;
                        engine.index_note(&note)?;
                    }
                    serde_json::to_value(moved).map_err(|e| Error::Internal(e.to_string()))
                })
                .await
            }
            "archive_project" => {
                let project = params.project.clone().ok_or_else(|| {
                    Error::SchemaValidation(format!(
                        "{}: archive_project requires 'project'",
                        self.name()
                    ))
                })?;
                let organizer = ctx.organizer.clone();
                let repo = std::sync::Arc::clone(&ctx.repo);
                let engine = ctx.engine.clone();
                run_blocking(self.name(), move || {
                    let moved = organizer.archive_project(&project)?;
                    for event in &moved {
                        let note = repo.load(&event.to)?;
                        engine.index_note(&note)?;
                    }
                    serde_json::to_value(moved).map_err(|e| Error::Internal(e.to_string()))
                })
                .await
            }
            "stats" => {
                let engine = ctx.engine.clone();
                run_blocking(self.name(), move || {
                    let stats = engine.stats()?;
                    serde_json::to_value(stats).map_err(|e| Error::Internal(e.to_string()))
                })
                .await
            }
            other => Err(Error::SchemaValidation(format!(
                "{}: unknown action '{other}'",
                self.name()
            ))),
        }
    }
}
