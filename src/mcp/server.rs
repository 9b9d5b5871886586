//! MCP server over pmcp, serving the hub's tools on stdio or streamable HTTP.

use crate::mcp::tools::{ToolError, ToolRegistry};
use crate::search::SearchOrchestrator;
use async_trait::async_trait;
use pmcp::{
    server::streamable_http_server::StreamableHttpServer, Error, RequestHandlerExtra, Server,
    ServerCapabilities, ToolHandler, ToolInfo,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// The hub's MCP server
#[derive(Debug, Clone)]
pub struct McpServer {
    server: Arc<Mutex<Server>>,
}

impl McpServer {
    /// Create a server whose tools run against `orchestrator`
    pub fn new(orchestrator: &SearchOrchestrator) -> Result<Self, Error> {
        let tools = ToolRegistry::from_orchestrator(orchestrator);
        let server = Self::build_server(&tools)?;
        Ok(Self {
            server: Arc::new(Mutex::new(server)),
        })
    }

    fn build_server(tools: &ToolRegistry) -> Result<Server, Error> {
        let mut builder = Server::builder()
            .name(env!("CARGO_PKG_NAME"))
            .version(env!("CARGO_PKG_VERSION"))
            .capabilities(ServerCapabilities::default());

        for tool in tools.all() {
            let wrapper = ToolWrapper {
                name: tool.name.clone(),
                description: Some(tool.description.clone()),
                input_schema: tool.input_schema.clone(),
                handler: Arc::clone(&tool.handler),
            };
            builder = builder.tool(tool.name.clone(), wrapper);
        }

        builder.build()
    }

    /// Serve on stdin/stdout until the client disconnects
    pub async fn run(self) -> Result<(), Error> {
        tracing::info!("Starting MCP server in stdio mode");

        // run_stdio consumes the server
        let server = Arc::try_unwrap(self.server)
            .map_err(|_| Error::internal("MCP server is shared and cannot run on stdio"))?
            .into_inner();

        server.run_stdio().await
    }

    /// Serve streamable HTTP on `addr`, returning the bound address and the
    /// server task
    pub async fn run_http(&self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>), Error> {
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::invalid_params(format!("Invalid address '{}': {}", addr, e)))?;
        tracing::info!(%socket_addr, "Starting MCP server in HTTP mode");

        StreamableHttpServer::new(socket_addr, Arc::clone(&self.server))
            .start()
            .await
    }
}

/// Adapts a registry tool to pmcp's ToolHandler
#[derive(Clone)]
struct ToolWrapper {
    name: String,
    description: Option<String>,
    input_schema: Value,
    handler: Arc<dyn crate::mcp::tools::ToolHandler>,
}

#[async_trait]
impl ToolHandler for ToolWrapper {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> Result<Value, Error> {
        self.handler.execute(args).await.map_err(|e| match e {
            ToolError::InvalidParams(message) => Error::invalid_params(message),
            ToolError::Failed(message) => Error::internal(message),
        })
    }

    fn metadata(&self) -> Option<ToolInfo> {
        Some(ToolInfo::new(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        ))
    }
}
