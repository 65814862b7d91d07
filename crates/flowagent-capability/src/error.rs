use flowagent_model::BackendError;
use thiserror::Error;

/// Errors raised by a capability. None of them are retried.
#[derive(Debug, Error)]
pub enum CapabilityError {
  /// The model backend failed.
  #[error("capability '{capability}' backend failure: {source}")]
  Backend {
    capability: String,
    #[source]
    source: BackendError,
  },

  /// The tool server could not be started.
  #[error("failed to start tool server '{command}': {source}")]
  ToolServerSpawn {
    command: String,
    #[source]
    source: std::io::Error,
  },

  /// The tool server died or could not be stopped.
  #[error("tool server '{command}' failed: {message}")]
  ToolServer { command: String, message: String },

  /// The model kept calling tools past the round limit.
  #[error("capability '{capability}' made more than {limit} rounds of tool calls")]
  ToolRoundLimit { capability: String, limit: usize },

  /// The instructions template failed to render.
  #[error("invalid instructions for '{capability}': {message}")]
  Template { capability: String, message: String },

  /// The stream ended without a final message.
  #[error("capability '{capability}' ended without a final message")]
  MissingCompletion { capability: String },
}

impl CapabilityError {
  pub fn backend(capability: impl Into<String>, source: BackendError) -> Self {
    Self::Backend {
      capability: capability.into(),
      source,
    }
  }

  pub fn tool_server(command: impl Into<String>, message: impl Into<String>) -> Self {
    Self::ToolServer {
      command: command.into(),
      message: message.into(),
    }
  }
}
