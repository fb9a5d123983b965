//! Tool registry: named, JSON-schema-parameterized remote actions the LLM
//! may invoke.
//!
//! Each tool binds to an HTTP request template executed through the
//! same-origin proxy (see [`http`]). `{name}` placeholders in the template
//! are substituted from invocation arguments and system variables at call
//! time.

pub mod http;

use crate::error::{Result, VoiceError};
use crate::vars::{self, SystemVariables};
use http::HttpInvoker;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// HTTP request template a tool is bound to.
///
/// URL, header values, and body may contain `{name}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBinding {
    /// Target URL template.
    pub url: String,
    /// HTTP method (GET, POST, ...).
    pub method: String,
    /// Header name → value template.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Body template. Empty means no body.
    #[serde(default)]
    pub body: String,
}

/// One invocable action: metadata shown to the LLM plus its binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique name within the session.
    pub name: String,
    /// Natural-language description shown to the LLM.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
    /// How the tool is executed.
    pub binding: HttpBinding,
}

/// Registry of the session's tools, in registration order.
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
    invoker: HttpInvoker,
}

impl ToolRegistry {
    /// Create an empty registry backed by the given invocation transport.
    #[must_use]
    pub fn new(invoker: HttpInvoker) -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            invoker,
        }
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if a tool with the same name is already
    /// registered.
    pub fn register(&mut self, tool: ToolDefinition) -> Result<()> {
        if self.index.contains_key(&tool.name) {
            return Err(VoiceError::DuplicateName(tool.name));
        }
        info!("registered tool '{}'", tool.name);
        self.index.insert(tool.name.clone(), self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// All tool definitions, in registration order.
    #[must_use]
    pub fn list(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Export `{name, description, parameters}` entries for LLM requests.
    #[must_use]
    pub fn schemas_for_api(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect()
    }

    /// Execute a tool: substitute placeholders in its binding and run the
    /// HTTP request through the proxy.
    ///
    /// Arguments take precedence over system variables during substitution;
    /// unresolved placeholders are left literal.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown name, `Timeout` when the proxy call
    /// exceeds its deadline, or `ToolInvocation` for a non-success
    /// downstream status.
    pub async fn invoke(
        &self,
        name: &str,
        args: &serde_json::Map<String, Value>,
        system_vars: &SystemVariables,
    ) -> Result<Value> {
        let Some(&slot) = self.index.get(name) else {
            return Err(VoiceError::NotFound(name.to_owned()));
        };
        let tool = &self.tools[slot];

        let url = vars::substitute(&tool.binding.url, args, system_vars);
        let headers: HashMap<String, String> = tool
            .binding
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), vars::substitute(v, args, system_vars)))
            .collect();
        let body = vars::substitute(&tool.binding.body, args, system_vars);

        let invocation = Uuid::new_v4();
        info!(
            "invoking tool '{name}' [{invocation}] via {} {url}",
            tool.binding.method
        );
        let response = self
            .invoker
            .execute(&url, &tool.binding.method, &headers, &body)
            .await?;

        if !response.ok {
            warn!(
                "tool '{name}' [{invocation}] returned status {} {}",
                response.status, response.status_text
            );
            return Err(VoiceError::ToolInvocation {
                status: response.status,
                body: response.data.to_string(),
            });
        }
        Ok(response.data)
    }
}
