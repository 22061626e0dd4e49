use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::index::SearchEngine;
use crate::notes::NoteRepository;
use crate::session::SessionStore;
use crate::vault::{BacklinkSync, ParaOrganizer};

use super::mask;
use super::policy::{with_execution_policy, PolicyOverride};

/// Everything a handler may touch, wired once at startup.
#[derive(Clone)]
pub struct ToolContext {
    pub repo: Arc<NoteRepository>,
    pub engine: SearchEngine,
    pub organizer: ParaOrganizer,
    pub backlinks: Arc<BacklinkSync>,
    pub sessions: Arc<SessionStore>,
    pub config: Arc<RuntimeConfig>,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    /// Typed validation of the raw input, ahead of the timeout/retry
    /// wrapper.
    fn validate(&self, input: &Value) -> Result<()>;
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Deserializes tool input, mapping failures onto the validation kind
/// with the serde diagnostic attached.
pub fn parse_input<P: DeserializeOwned>(tool: &str, input: &Value) -> Result<P> {
    serde_json::from_value(input.clone())
        .map_err(|e| Error::SchemaValidation(format!("{tool}: {e}")))
}

/// Advertised input schema, derived from the params struct.
pub fn schema_of<P: schemars::JsonSchema>() -> Value {
    let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<P>();
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// Handler work that touches files or the database runs off the runtime
/// thread. A panic inside the closure surfaces as a generic tool error.
pub(crate) async fn run_blocking<T, F>(tool: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Tool(format!("{tool}: {e}")))?
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Name-keyed dispatch with schema validation, policy enforcement, and
/// masked logging around every call.
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn ToolHandler>>,
    ctx: ToolContext,
}

impl ToolRegistry {
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            tools: BTreeMap::new(),
            ctx,
        }
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(handler.name(), handler);
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        raw_input: Value,
        overrides: Option<PolicyOverride>,
    ) -> Result<Value> {
        let handler = self
            .tools
            .get(name)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown tool '{name}'")))?;

        handler.validate(&raw_input)?;

        let policy = self
            .ctx
            .config
            .policy
            .merge(&overrides.unwrap_or_default());

        let preview = mask::input_preview(&raw_input, 200);
        tracing::info!(tool = name, input = %preview, "tool.start");
        let started = Instant::now();

        let result = with_execution_policy(name, policy, || {
            handler.call(raw_input.clone(), &self.ctx)
        })
        .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(tool = name, elapsed_ms, "tool.success"),
            Err(e) => tracing::warn!(
                tool = name,
                elapsed_ms,
                input = %preview,
                error = %mask::mask_sensitive(&e.to_string()),
                "tool.failure"
            ),
        }
        result
    }
}
