//! Tool registry for MCP tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::handlers::{ListProvidersHandler, ProviderStatusHandler, SearchHandler};
use crate::models::SearchType;
use crate::search::SearchOrchestrator;

/// Why a tool call failed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    /// The arguments are unusable; maps to an MCP invalid-params error
    #[error("{0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}

/// An MCP tool that can be called by the client
#[derive(Clone)]
pub struct Tool {
    /// Tool name (e.g., "search")
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for input parameters
    pub input_schema: Value,

    /// Handler function to execute the tool
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Handler for executing a tool
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + std::fmt::Debug {
    /// Execute the tool with the given arguments
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// Registry for all MCP tools
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    /// The hub's tools, all backed by `orchestrator`
    pub fn from_orchestrator(orchestrator: &SearchOrchestrator) -> Self {
        let mut registry = Self::default();
        let types: Vec<&str> = SearchType::CONCRETE
            .iter()
            .chain(std::iter::once(&SearchType::All))
            .map(SearchType::as_str)
            .collect();

        registry.register(Tool {
            name: "search".to_string(),
            description: "Search the web, GitHub, local files and documentation through the \
                          connected MCP providers. Results are de-duplicated and ranked by relevance."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    },
                    "type": {
                        "type": "string",
                        "enum": types,
                        "description": "Which providers to search",
                        "default": "all"
                    },
                    "max_results": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Maximum number of ranked results"
                    },
                    "timeout_ms": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Overall deadline for the search"
                    },
                    "enrich": {
                        "type": "boolean",
                        "description": "Annotate results with an LLM when configured",
                        "default": false
                    },
                    "filters": {
                        "type": "object",
                        "description": "Extra tool arguments per provider, e.g. {\"github\": {\"sort\": \"stars\"}}",
                        "additionalProperties": {"type": "object"}
                    }
                },
                "required": ["query"]
            }),
            handler: Arc::new(SearchHandler {
                orchestrator: orchestrator.clone(),
            }),
        });

        registry.register(Tool {
            name: "provider_status".to_string(),
            description: "Connection health of every configured provider".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
            handler: Arc::new(ProviderStatusHandler {
                registry: orchestrator.registry().clone(),
            }),
        });

        registry.register(Tool {
            name: "list_providers".to_string(),
            description: "Providers with their transport and advertised tools, resources and prompts"
                .to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
            handler: Arc::new(ListProvidersHandler {
                registry: orchestrator.registry().clone(),
            }),
        });

        registry
    }

    /// Register a tool
    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// All tools, sorted by name
    pub fn all(&self) -> Vec<&Tool> {
        self.tools.values().collect()
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::InvalidParams(format!("Tool '{}' not found", name)))?;

        tool.handler.execute(args).await
    }
}
