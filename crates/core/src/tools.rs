//! Tool executor boundary.
//!
//! The adapter only surfaces `ToolCall` events and accepts `ToolResult`s; the
//! code in between is supplied by the application. This module provides the
//! `(name, args) -> result` seam plus two implementations: an in-process
//! [`ToolRegistry`] and an [`McpToolExecutor`] backed by an MCP client session.

use crate::generic_types::{ToolCall, ToolDeclaration, ToolResult};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use rmcp::{
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Executes one named tool.
///
/// Failures never cross this boundary: they come back as a structured
/// `{"error": ...}` object that is forwarded to the vendor like any result.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, args: Value) -> Value;
}

type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// In-process tools keyed by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, (ToolDeclaration, ToolHandler)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `declaration.name`, replacing any previous
    /// tool with the same name.
    pub fn register<F, Fut>(&mut self, declaration: ToolDeclaration, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args| handler(args).boxed());
        self.tools
            .insert(declaration.name.clone(), (declaration, handler));
    }

    /// Declarations to advertise in `SessionConfig::tools`.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.values().map(|(decl, _)| decl.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, args: Value) -> Value {
        let Some((_, handler)) = self.tools.get(name) else {
            warn!(tool = %name, "Unknown tool requested");
            return json!({ "error": format!("unknown tool: {name}") });
        };
        info!(tool = %name, "Executing tool");
        match handler(args).await {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                json!({ "error": e.to_string() })
            }
        }
    }
}

/// Executes tools hosted by an MCP server.
pub struct McpToolExecutor {
    client: RunningService<RoleClient, ()>,
}

impl McpToolExecutor {
    pub fn new(client: RunningService<RoleClient, ()>) -> Self {
        Self { client }
    }

    /// Lists the server's tools in the shape the vendors expect.
    pub async fn declarations(&self) -> anyhow::Result<Vec<ToolDeclaration>> {
        self.client
            .list_all_tools()
            .await?
            .into_iter()
            .map(|t| {
                Ok(ToolDeclaration {
                    name: t.name.to_string(),
                    description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                    parameters: serde_json::to_value(&*t.input_schema)?,
                })
            })
            .collect()
    }

    /// Closes the MCP session.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.client.cancel().await?;
        Ok(())
    }

    async fn call(&self, name: &str, args: Value) -> anyhow::Result<Value> {
        let arguments = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => anyhow::bail!("arguments must be an object, got {other}"),
        };
        let result = self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await?;

        let text = result
            .content
            .and_then(|mut content| content.pop())
            .map(|annotated| match annotated.raw {
                RawContent::Text(text_content) => text_content.text,
                _ => String::new(),
            })
            .unwrap_or_default();

        if result.is_error == Some(true) {
            anyhow::bail!(text);
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "result": text })))
    }
}

#[async_trait]
impl ToolExecutor for McpToolExecutor {
    async fn execute(&self, name: &str, args: Value) -> Value {
        info!(tool = %name, "Calling MCP tool");
        match self.call(name, args).await {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = %name, error = %e, "MCP tool call failed");
                json!({ "error": e.to_string() })
            }
        }
    }
}

/// Runs every call in `call` in order and pairs each output with its call id.
pub async fn execute_tool_call<E>(executor: &E, call: &ToolCall) -> Vec<ToolResult>
where
    E: ToolExecutor + ?Sized,
{
    let mut results = Vec::with_capacity(call.function_calls.len());
    for function in &call.function_calls {
        let response = executor.execute(&function.name, function.args.clone()).await;
        results.push(ToolResult {
            id: function.id.clone(),
            name: Some(function.name.clone()),
            response,
        });
    }
    results
}
