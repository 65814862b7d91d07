use std::sync::Arc;

use async_trait::async_trait;
use flowagent_config::Message;
use flowagent_model::{ModelBackend, ModelRequest, ModelTurn, ToolExchange, ToolResult};
use tracing::{debug, info, instrument};

use crate::capability::{Capability, CapabilityOutput, CapabilityStream};
use crate::error::CapabilityError;
use crate::kind::CapabilityKind;
use crate::profile::AgentProfile;
use crate::stream::completion_stream;
use crate::tool_server::ToolServer;

/// Rounds of tool calls allowed before a step gives up.
pub const MAX_TOOL_ROUNDS: usize = 16;

/// A capability backed by a model agent.
///
/// All four variants are agents that differ in instructions and in whether
/// they own a tool server. With a server attached the agent runs a tool loop:
/// the model is offered the server's tools, each call it makes is executed on
/// the server, and the results go back until the model replies with text.
pub struct AgentCapability {
  name: String,
  profile: AgentProfile,
  model: Option<String>,
  backend: Arc<dyn ModelBackend>,
  tool_server: Option<ToolServer>,
}

impl AgentCapability {
  pub fn new(
    name: impl Into<String>,
    profile: AgentProfile,
    backend: Arc<dyn ModelBackend>,
  ) -> Self {
    Self {
      name: name.into(),
      profile,
      model: None,
      backend,
      tool_server: None,
    }
  }

  /// Use `model` instead of the backend's default.
  pub fn with_model(mut self, model: Option<String>) -> Self {
    self.model = model;
    self
  }

  /// Attach a tool server owned by this capability until release.
  pub fn with_tool_server(mut self, tool_server: ToolServer) -> Self {
    self.tool_server = Some(tool_server);
    self
  }

  pub fn profile(&self) -> &AgentProfile {
    &self.profile
  }

  pub fn tool_server(&self) -> Option<&ToolServer> {
    self.tool_server.as_ref()
  }

  fn request(&self, input: Vec<Message>) -> ModelRequest {
    let tools = self
      .tool_server
      .as_ref()
      .map(|server| server.tools().to_vec())
      .unwrap_or_default();
    ModelRequest::new(self.profile.instructions.clone(), input)
      .with_model(self.model.clone())
      .with_tools(tools)
  }

  async fn run_tools(
    &self,
    server: &ToolServer,
    input: Vec<Message>,
  ) -> Result<Message, CapabilityError> {
    let mut request = self.request(input);
    for round in 0..MAX_TOOL_ROUNDS {
      let turn = self
        .backend
        .respond(request.clone())
        .await
        .map_err(|e| CapabilityError::backend(&self.name, e))?;

      let calls = match turn {
        ModelTurn::Reply(message) => return Ok(message),
        ModelTurn::ToolCalls(calls) => calls,
      };

      let mut results = Vec::with_capacity(calls.len());
      for call in &calls {
        results.push(ToolResult {
          call_id: call.id.clone(),
          content: server.call(call).await?,
        });
      }
      info!(capability = %self.name, round, calls = calls.len(), "tool_round_completed");
      request = request.with_exchange(ToolExchange { calls, results });
    }

    Err(CapabilityError::ToolRoundLimit {
      capability: self.name.clone(),
      limit: MAX_TOOL_ROUNDS,
    })
  }
}

#[async_trait]
impl Capability for AgentCapability {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> CapabilityKind {
    self.profile.kind
  }

  #[instrument(skip(self, input), fields(capability = %self.name, kind = %self.profile.kind))]
  async fn execute(&mut self, input: Vec<Message>) -> Result<Message, CapabilityError> {
    if let Some(server) = &self.tool_server {
      return self.run_tools(server, input).await;
    }

    let request = self.request(input);
    self
      .backend
      .complete(request)
      .await
      .map_err(|e| CapabilityError::backend(&self.name, e))
  }

  /// With a tool server attached, the tool rounds run first and the reply is
  /// relayed as a single fragment.
  #[instrument(skip(self, input), fields(capability = %self.name, kind = %self.profile.kind))]
  async fn execute_stream(
    &mut self,
    input: Vec<Message>,
  ) -> Result<CapabilityStream, CapabilityError> {
    if let Some(server) = &self.tool_server {
      let message = self.run_tools(server, input).await?;
      let mut outputs: Vec<Result<CapabilityOutput, CapabilityError>> = Vec::with_capacity(2);
      if !message.content.is_empty() {
        outputs.push(Ok(CapabilityOutput::Fragment(message.content.clone())));
      }
      outputs.push(Ok(CapabilityOutput::Completed(message)));
      return Ok(Box::pin(futures::stream::iter(outputs)));
    }

    let request = self.request(input);
    let deltas = self
      .backend
      .stream(request)
      .await
      .map_err(|e| CapabilityError::backend(&self.name, e))?;
    Ok(completion_stream(self.name.clone(), deltas))
  }

  async fn release(&mut self) -> Result<(), CapabilityError> {
    match self.tool_server.take() {
      Some(server) => server.shutdown().await,
      None => {
        debug!(capability = %self.name, "nothing to release");
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flowagent_config::CapabilitySettings;
  use flowagent_model::{BackendError, DeltaStream, EchoBackend, ToolCall};
  use futures::StreamExt;

  use crate::testing::files_server;

  struct DownBackend;

  #[async_trait]
  impl ModelBackend for DownBackend {
    async fn stream(&self, _request: ModelRequest) -> Result<DeltaStream, BackendError> {
      Err(BackendError::Status {
        status: 503,
        body: "unavailable".to_string(),
      })
    }
  }

  fn assistant(backend: Arc<dyn ModelBackend>) -> AgentCapability {
    let profile =
      AgentProfile::for_kind(CapabilityKind::Assistant, &CapabilitySettings::default()).unwrap();
    AgentCapability::new("s2", profile, backend)
  }

  #[tokio::test]
  async fn test_execute_stream_relays_fragments_and_final_message() {
    let mut capability = assistant(Arc::new(EchoBackend::with_prefix("")));
    let input = vec![Message::user("summarize it")];

    let items: Vec<_> = capability
      .execute_stream(input)
      .await
      .unwrap()
      .map(|item| item.unwrap())
      .collect()
      .await;

    assert_eq!(
      items,
      vec![
        CapabilityOutput::Fragment("summarize ".to_string()),
        CapabilityOutput::Fragment("it".to_string()),
        CapabilityOutput::Completed(Message::assistant("summarize it")),
      ]
    );
    capability.release().await.unwrap();
  }

  #[tokio::test]
  async fn test_execute_returns_assistant_message() {
    let mut capability = assistant(Arc::new(EchoBackend::new()));
    let reply = capability.execute(vec![Message::user("hi")]).await.unwrap();
    assert_eq!(reply, Message::assistant("echo: hi"));
  }

  #[tokio::test]
  async fn test_backend_failure_is_capability_error() {
    let mut capability = assistant(Arc::new(DownBackend));
    let err = capability
      .execute_stream(vec![Message::user("hi")])
      .await
      .err()
      .unwrap();

    assert!(matches!(err, CapabilityError::Backend { ref capability, .. } if capability == "s2"));
    assert!(err.to_string().contains("503"));
  }

  /// Reads `policies.txt` through the tool, then answers with what it got.
  struct ToolUsingBackend {
    requests: std::sync::Mutex<Vec<ModelRequest>>,
  }

  #[async_trait]
  impl ModelBackend for ToolUsingBackend {
    async fn stream(&self, _request: ModelRequest) -> Result<DeltaStream, BackendError> {
      Err(BackendError::rejected("tool steps do not stream"))
    }

    async fn respond(&self, request: ModelRequest) -> Result<ModelTurn, BackendError> {
      self.requests.lock().unwrap().push(request.clone());
      match request.exchanges.last() {
        None => Ok(ModelTurn::ToolCalls(vec![ToolCall {
          id: "call_1".to_string(),
          name: "read_file".to_string(),
          arguments: r#"{"path":"policies.txt"}"#.to_string(),
        }])),
        Some(exchange) => Ok(ModelTurn::Reply(Message::assistant(format!(
          "policy says: {}",
          exchange.results[0].content
        )))),
      }
    }
  }

  /// Never stops calling tools.
  struct LoopingBackend;

  #[async_trait]
  impl ModelBackend for LoopingBackend {
    async fn stream(&self, _request: ModelRequest) -> Result<DeltaStream, BackendError> {
      Err(BackendError::rejected("tool steps do not stream"))
    }

    async fn respond(&self, request: ModelRequest) -> Result<ModelTurn, BackendError> {
      Ok(ModelTurn::ToolCalls(vec![ToolCall {
        id: format!("call_{}", request.exchanges.len()),
        name: "read_file".to_string(),
        arguments: r#"{"path":"a.txt"}"#.to_string(),
      }]))
    }
  }

  fn filesystem(backend: Arc<dyn ModelBackend>) -> AgentCapability {
    let profile =
      AgentProfile::for_kind(CapabilityKind::Filesystem, &CapabilitySettings::default()).unwrap();
    AgentCapability::new("s1", profile, backend)
  }

  #[tokio::test]
  async fn test_tool_calls_run_on_the_server() {
    let backend = Arc::new(ToolUsingBackend {
      requests: std::sync::Mutex::new(Vec::new()),
    });
    let mut capability = filesystem(backend.clone()).with_tool_server(files_server().await);

    let items: Vec<_> = capability
      .execute_stream(vec![Message::user("what do I need to file an expense?")])
      .await
      .unwrap()
      .map(|item| item.unwrap())
      .collect()
      .await;

    assert_eq!(
      items,
      vec![
        CapabilityOutput::Fragment("policy says: contents of policies.txt".to_string()),
        CapabilityOutput::Completed(Message::assistant("policy says: contents of policies.txt")),
      ]
    );

    let requests = backend.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "read_file");
    assert_eq!(requests[1].exchanges[0].results[0].call_id, "call_1");
    capability.release().await.unwrap();
  }

  #[tokio::test]
  async fn test_tool_loop_is_bounded() {
    let mut capability =
      filesystem(Arc::new(LoopingBackend)).with_tool_server(files_server().await);

    let err = capability.execute(vec![Message::user("loop")]).await.unwrap_err();
    assert!(matches!(
      err,
      CapabilityError::ToolRoundLimit { limit: MAX_TOOL_ROUNDS, .. }
    ));
    capability.release().await.unwrap();
  }

  #[test]
  fn test_without_server_no_tools_are_offered() {
    let capability = filesystem(Arc::new(EchoBackend::new()));
    assert!(capability.request(vec![Message::user("hi")]).tools.is_empty());
  }

  #[tokio::test]
  async fn test_release_stops_tool_server() {
    let mut capability =
      assistant(Arc::new(EchoBackend::new())).with_tool_server(files_server().await);
    assert!(capability.tool_server().is_some());

    capability.release().await.unwrap();
    assert!(capability.tool_server().is_none());
    // A second release is a no-op.
    capability.release().await.unwrap();
  }
}
