use std::sync::Arc;

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, ErrorData, Implementation,
        ListToolsResult, PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
        Tool,
    },
    service::{RequestContext, RoleServer},
    transport::stdio,
    ServerHandler, ServiceExt,
};

use crate::error::Error;
use crate::tools::{mask, ToolRegistry};

fn to_error_data(err: Error) -> ErrorData {
    let kind = err.kind();
    let message = mask::mask_sensitive(&err.to_string());
    let data = Some(serde_json::json!({"kind": kind}));
    match err {
        Error::SchemaValidation(_) | Error::Parse(_) => ErrorData::invalid_params(message, data),
        Error::InvalidRequest(_) | Error::NotFound(_) | Error::AlreadyExists(_) => {
            ErrorData::invalid_request(message, data)
        }
        _ => ErrorData::internal_error(message, data),
    }
}

/// Thin translation layer: the registry owns tool metadata, validation,
/// and dispatch; this adapter only maps the wire shapes.
#[derive(Clone)]
pub struct ProtocolAdapter {
    registry: Arc<ToolRegistry>,
}

impl ProtocolAdapter {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

impl ServerHandler for ProtocolAdapter {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "memvault".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "memvault - persistent markdown knowledge vault with hybrid search, \
                 link exploration, and session-aware association tools."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let tools = self
            .registry
            .specs()
            .into_iter()
            .map(|spec| {
                let schema = spec
                    .input_schema
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                Tool::new(spec.name, spec.description, Arc::new(schema))
            })
            .collect();
        Ok(ListToolsResult {
            tools,
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let arguments = serde_json::Value::Object(request.arguments.unwrap_or_default());
        let outcome = self
            .registry
            .execute(&request.name, arguments, None)
            .await
            .map_err(to_error_data)?;

        let text = serde_json::to_string_pretty(&outcome)
            .unwrap_or_else(|_| outcome.to_string());
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

/// Serves the registry over stdio until the peer disconnects or a
/// termination signal arrives. Returning cleanly is the caller's cue to
/// run the shutdown sequence and exit 0.
pub async fn serve_stdio(registry: Arc<ToolRegistry>) -> anyhow::Result<()> {
    let adapter = ProtocolAdapter::new(registry);
    let service = adapter.serve(stdio()).await?;
    tracing::info!("memvault server started");

    tokio::select! {
        result = service.waiting() => {
            result?;
            tracing::info!("client disconnected");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("termination signal received");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_protocol_codes() {
        let invalid = to_error_data(Error::SchemaValidation("bad".into()));
        let unknown = to_error_data(Error::InvalidRequest("nope".into()));
        let broken = to_error_data(Error::Internal("boom".into()));
        assert_ne!(invalid.code, broken.code);
        assert_ne!(unknown.code, broken.code);
        assert_eq!(
            invalid.data.as_ref().unwrap()["kind"],
            serde_json::json!("schema_validation_error")
        );
    }

    #[test]
    fn error_messages_are_masked() {
        let err = Error::Tool("handler leaked alice@example.com".into());
        let data = to_error_data(err);
        assert!(!data.message.contains("alice@example.com"));
        assert!(data.message.contains("[email]"));
    }
}
