use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::session::AssociateOptions;

use super::registry::{parse_input, run_blocking, schema_of, ToolContext, ToolHandler};

const DEFAULT_SESSION: &str = "default";

/// Parameters for session-aware associative search.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AssociativeSearchParams {
    pub query: String,
    /// Session whose recent notes steer the ranking; created on first use.
    pub session_id: Option<String>,
    pub limit: Option<u32>,
    /// Blend weight of the session affinity, 0.0..=1.0.
    pub strength: Option<f64>,
}

pub struct AssociativeSearchTool;

#[async_trait]
impl ToolHandler for AssociativeSearchTool {
    fn name(&self) -> &'static str {
        "associative_search"
    }
    fn description(&self) -> &'static str {
        "Hybrid search reranked toward the session's recently touched notes."
    }
    fn input_schema(&self) -> Value {
        schema_of::<AssociativeSearchParams>()
    }
    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<AssociativeSearchParams>(self.name(), input).map(|_| ())
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let params: AssociativeSearchParams = parse_input(self.name(), &input)?;
        let opts = AssociateOptions {
            limit: params.limit.map(|l| l as usize).unwrap_or(5).clamp(1, 50),
            strength: params.strength.unwrap_or(0.7),
        };
        let session_id = params
            .session_id
            .unwrap_or_else(|| DEFAULT_SESSION.to_string());

        let engine = ctx.engine.clone();
        let sessions = std::sync::Arc::clone(&ctx.sessions);
        let query = params.query;
        run_blocking(self.name(), move || {
            let hits = sessions.associate(&engine, &session_id, &query, &opts)?;
            Ok(json!({"session_id": session_id, "results": hits}))
        })
        .await
    }
}

/// Parameters for reading or mutating a session's recency context.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionContextParams {
    pub session_id: String,
    /// get | record | reset (default get)
    pub action: Option<String>,
    /// UID to record; required by the record action.
    pub uid: Option<String>,
}

pub struct SessionContextTool;

#[async_trait]
impl ToolHandler for SessionContextTool {
    fn name(&self) -> &'static str {
        "session_context"
    }
    fn description(&self) -> &'static str {
        "Read, record into, or reset a session's recent-note context."
    }
    fn input_schema(&self) -> Value {
        schema_of::<SessionContextParams>()
    }
    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<SessionContextParams>(self.name(), input).map(|_| ())
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let params: SessionContextParams = parse_input(self.name(), &input)?;
        let action = params.action.as_deref().unwrap_or("get");
        match action {
            "get" => {
                let recent = ctx.sessions.ensure(&params.session_id);
                Ok(json!({"session_id": params.session_id, "recent": recent}))
            }
            "record" => {
                let uid = params.uid.ok_or_else(|| {
                    Error::SchemaValidation(format!("{}: record requires 'uid'", self.name()))
                })?;
                ctx.sessions.record(&params.session_id, &uid);
                let recent = ctx.sessions.ensure(&params.session_id);
                Ok(json!({"session_id": params.session_id, "recent": recent}))
            }
            "reset" => {
                ctx.sessions.reset(&params.session_id);
                Ok(json!({"session_id": params.session_id, "recent": []}))
            }
            other => Err(Error::SchemaValidation(format!(
                "{}: unknown action '{other}'",
                self.name()
            ))),
        }
    }
}

/// Parameters for summarizing a session.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReflectSessionParams {
    pub session_id: String,
}

pub struct ReflectSessionTool;

#[async_trait]
impl ToolHandler for ReflectSessionTool {
    fn name(&self) -> &'static str {
        "reflect_session"
    }
    fn description(&self) -> &'static str {
        "Summarize what a session has touched; fails for unknown sessions."
    }
    fn input_schema(&self) -> Value {
        schema_of::<ReflectSessionParams>()
    }
    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<ReflectSessionParams>(self.name(), input).map(|_| ())
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let params: ReflectSessionParams = parse_input(self.name(), &input)?;
        let engine = ctx.engine.clone();
        let sessions = std::sync::Arc::clone(&ctx.sessions);
        run_blocking(self.name(), move || {
            let reflection = sessions.reflect(&engine, &params.session_id)?;
            serde_json::to_value(reflection).map_err(|e| Error::Internal(e.to_string()))
        })
        .await
    }
}
