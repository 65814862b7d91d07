//! An in-process MCP server for tests.

use std::sync::Arc;

use rmcp::model::{
  CallToolRequestParam, CallToolResult, Content, ErrorData, ListToolsResult,
  PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler, ServiceExt};

use crate::tool_server::ToolServer;

/// Serves one `read_file` tool that answers with a fixed string per path.
#[derive(Debug, Clone, Default)]
pub struct FilesServer;

impl ServerHandler for FilesServer {
  fn get_info(&self) -> ServerInfo {
    ServerInfo {
      capabilities: ServerCapabilities::builder().enable_tools().build(),
      ..Default::default()
    }
  }

  async fn list_tools(
    &self,
    _request: Option<PaginatedRequestParam>,
    _context: RequestContext<RoleServer>,
  ) -> Result<ListToolsResult, ErrorData> {
    let schema = serde_json::json!({
      "type": "object",
      "properties": { "path": { "type": "string" } },
      "required": ["path"],
    });
    let schema = schema.as_object().cloned().unwrap_or_default();
    Ok(ListToolsResult::with_all_items(vec![Tool::new(
      "read_file",
      "Read a file under the root",
      Arc::new(schema),
    )]))
  }

  async fn call_tool(
    &self,
    request: CallToolRequestParam,
    _context: RequestContext<RoleServer>,
  ) -> Result<CallToolResult, ErrorData> {
    let path = request
      .arguments
      .as_ref()
      .and_then(|arguments| arguments.get("path"))
      .and_then(|path| path.as_str())
      .unwrap_or_default();
    Ok(CallToolResult::success(vec![Content::text(format!(
      "contents of {path}"
    ))]))
  }
}

/// Start a [`FilesServer`] and connect a [`ToolServer`] to it.
pub async fn files_server() -> ToolServer {
  let (client_io, server_io) = tokio::io::duplex(4096);
  tokio::spawn(async move {
    if let Ok(service) = FilesServer.serve(server_io).await {
      let _ = service.waiting().await;
    }
  });
  ToolServer::connect("files", client_io).await.unwrap()
}
