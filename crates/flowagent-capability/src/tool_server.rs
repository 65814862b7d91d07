use std::path::Path;

use flowagent_config::ToolServerSettings;
use flowagent_model::{ToolCall, ToolDescriptor};
use minijinja::{Environment, context};
use rmcp::model::{CallToolRequestParam, JsonObject, Tool};
use rmcp::service::RunningService;
use rmcp::{RoleClient, ServiceExt};
use rmcp::transport::{ConfigureCommandExt, IntoTransport, TokioChildProcess};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::CapabilityError;

/// An MCP tool server owned by one capability.
///
/// Connecting performs the MCP handshake and lists the server's tools; the
/// agent offers exactly those tools to the model and routes its calls here.
/// A spawned process is killed on drop, so it never outlives its owner even
/// when [`ToolServer::shutdown`] is skipped.
pub struct ToolServer {
  command: String,
  client: RunningService<RoleClient, ()>,
  tools: Vec<ToolDescriptor>,
}

impl ToolServer {
  /// Spawn the configured command and connect to it over stdio. `{{ root }}`
  /// in the arguments expands to `root`.
  pub async fn spawn(settings: &ToolServerSettings, root: &Path) -> Result<Self, CapabilityError> {
    let args = render_args(settings, root)?;
    let transport = TokioChildProcess::new(Command::new(&settings.command).configure(|cmd| {
      cmd.args(&args).kill_on_drop(true);
    }))
    .map_err(|source| CapabilityError::ToolServerSpawn {
      command: settings.command.clone(),
      source,
    })?;

    info!(command = %settings.command, args = ?args, "tool_server_spawned");
    Self::connect(&settings.command, transport).await
  }

  /// Connect to a server over an already open transport.
  pub async fn connect<T, E, A>(
    command: impl Into<String>,
    transport: T,
  ) -> Result<Self, CapabilityError>
  where
    T: IntoTransport<RoleClient, E, A>,
    E: std::error::Error + Send + Sync + 'static,
  {
    let command = command.into();
    let client = ()
      .serve(transport)
      .await
      .map_err(|e| CapabilityError::tool_server(&command, e.to_string()))?;

    let listed = client
      .list_tools(Default::default())
      .await
      .map_err(|e| CapabilityError::tool_server(&command, e.to_string()))?;
    let tools: Vec<ToolDescriptor> = listed.tools.iter().map(descriptor).collect();

    info!(
      command = %command,
      tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
      "tool_server_connected"
    );
    Ok(Self {
      command,
      client,
      tools,
    })
  }

  pub fn command(&self) -> &str {
    &self.command
  }

  /// Tools advertised by the server.
  pub fn tools(&self) -> &[ToolDescriptor] {
    &self.tools
  }

  /// Run one tool call and return its text output.
  ///
  /// Arguments the server cannot use and errors reported by the tool itself
  /// are returned as output, so the model can correct the call. Only a broken
  /// connection fails.
  pub async fn call(&self, call: &ToolCall) -> Result<String, CapabilityError> {
    let arguments = match parse_arguments(&call.arguments) {
      Ok(arguments) => arguments,
      Err(message) => {
        warn!(tool = %call.name, %message, "tool call has invalid arguments");
        return Ok(message);
      }
    };

    let result = self
      .client
      .call_tool(CallToolRequestParam {
        name: call.name.clone().into(),
        arguments,
      })
      .await
      .map_err(|e| CapabilityError::tool_server(&self.command, e.to_string()))?;

    let output = result
      .content
      .iter()
      .filter_map(|content| content.as_text())
      .map(|text| text.text.as_str())
      .collect::<Vec<_>>()
      .join("\n");

    if result.is_error.unwrap_or(false) {
      warn!(tool = %call.name, "tool reported an error");
    } else {
      debug!(tool = %call.name, bytes = output.len(), "tool_called");
    }
    Ok(output)
  }

  /// Close the connection and stop the server.
  pub async fn shutdown(self) -> Result<(), CapabilityError> {
    let reason = self
      .client
      .cancel()
      .await
      .map_err(|e| CapabilityError::tool_server(&self.command, e.to_string()))?;
    info!(command = %self.command, reason = ?reason, "tool_server_stopped");
    Ok(())
  }
}

impl std::fmt::Debug for ToolServer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ToolServer")
      .field("command", &self.command)
      .field("tools", &self.tools)
      .finish_non_exhaustive()
  }
}

fn render_args(settings: &ToolServerSettings, root: &Path) -> Result<Vec<String>, CapabilityError> {
  let env = Environment::new();
  let root = root.display().to_string();
  settings
    .args
    .iter()
    .map(|arg| env.render_str(arg, context! { root => root.as_str() }))
    .collect::<Result<Vec<_>, _>>()
    .map_err(|e| CapabilityError::tool_server(&settings.command, e.to_string()))
}

fn descriptor(tool: &Tool) -> ToolDescriptor {
  ToolDescriptor::new(
    tool.name.to_string(),
    tool.description.as_deref().unwrap_or_default(),
  )
  .with_parameters(serde_json::Value::Object((*tool.input_schema).clone()))
}

/// Models send `""` for calls without arguments.
fn parse_arguments(raw: &str) -> Result<Option<JsonObject>, String> {
  if raw.trim().is_empty() {
    return Ok(None);
  }
  match serde_json::from_str::<serde_json::Value>(raw) {
    Ok(serde_json::Value::Object(arguments)) => Ok(Some(arguments)),
    Ok(other) => Err(format!("tool arguments must be a JSON object, got {}", other)),
    Err(e) => Err(format!("tool arguments are not valid JSON: {}", e)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::files_server;

  fn call(name: &str, arguments: &str) -> ToolCall {
    ToolCall {
      id: "call_1".to_string(),
      name: name.to_string(),
      arguments: arguments.to_string(),
    }
  }

  #[tokio::test]
  async fn test_connect_lists_server_tools() {
    let server = files_server().await;
    let tools = server.tools();

    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "read_file");
    assert_eq!(tools[0].description, "Read a file under the root");
    assert_eq!(tools[0].parameters["properties"]["path"]["type"], "string");
    server.shutdown().await.unwrap();
  }

  #[tokio::test]
  async fn test_call_returns_tool_output() {
    let server = files_server().await;

    let output = server.call(&call("read_file", r#"{"path":"policies.txt"}"#)).await.unwrap();
    assert_eq!(output, "contents of policies.txt");

    // Bad arguments go back to the model instead of failing the step.
    let output = server.call(&call("read_file", "[1, 2]")).await.unwrap();
    assert!(output.starts_with("tool arguments must be a JSON object"));
    server.shutdown().await.unwrap();
  }

  #[test]
  fn test_root_is_rendered_into_args() {
    let settings = ToolServerSettings {
      command: "npx".to_string(),
      args: vec![
        "-y".to_string(),
        "@modelcontextprotocol/server-filesystem".to_string(),
        "{{ root }}".to_string(),
      ],
    };

    let args = render_args(&settings, Path::new("/srv/expenses")).unwrap();
    assert_eq!(args[2], "/srv/expenses");
  }

  #[test]
  fn test_empty_arguments_mean_none() {
    assert_eq!(parse_arguments("  "), Ok(None));
    assert!(parse_arguments("{\"a\":1}").unwrap().is_some());
    assert!(parse_arguments("{").is_err());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_server_without_handshake_fails() {
    let settings = ToolServerSettings {
      command: "true".to_string(),
      args: vec![],
    };

    assert!(matches!(
      ToolServer::spawn(&settings, Path::new("/tmp")).await,
      Err(CapabilityError::ToolServer { .. })
    ));
  }

  #[tokio::test]
  async fn test_missing_command_fails_to_spawn() {
    let settings = ToolServerSettings {
      command: "flowagent-no-such-tool-server".to_string(),
      args: vec![],
    };

    assert!(matches!(
      ToolServer::spawn(&settings, Path::new("/tmp")).await,
      Err(CapabilityError::ToolServerSpawn { .. })
    ));
  }
}
