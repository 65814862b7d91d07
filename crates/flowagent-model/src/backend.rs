use std::pin::Pin;

use async_trait::async_trait;
use flowagent_config::Message;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::BackendError;

/// A boxed stream of text deltas produced by a backend.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// A tool the model may call during a [`ModelBackend::respond`] round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
  pub name: String,
  pub description: String,
  /// JSON schema of the call arguments.
  pub parameters: Value,
}

impl ToolDescriptor {
  /// A tool taking no arguments.
  pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      parameters: json!({ "type": "object", "properties": {} }),
    }
  }

  pub fn with_parameters(mut self, parameters: Value) -> Self {
    self.parameters = parameters;
    self
  }
}

/// A call the model asked for. `arguments` is the raw JSON text it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
  pub id: String,
  pub name: String,
  pub arguments: String,
}

/// Output of one tool call, fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
  pub call_id: String,
  pub content: String,
}

/// One round of tool use: the calls the model made and their results.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolExchange {
  pub calls: Vec<ToolCall>,
  pub results: Vec<ToolResult>,
}

/// What the model produced in one [`ModelBackend::respond`] round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelTurn {
  Reply(Message),
  ToolCalls(Vec<ToolCall>),
}

/// A single generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
  /// Model override; `None` uses the backend's default.
  pub model: Option<String>,
  /// System instructions for the agent answering this request.
  pub instructions: String,
  pub input: Vec<Message>,
  pub tools: Vec<ToolDescriptor>,
  /// Tool rounds already played, in order. Sent after `input`.
  pub exchanges: Vec<ToolExchange>,
}

impl ModelRequest {
  pub fn new(instructions: impl Into<String>, input: Vec<Message>) -> Self {
    Self {
      model: None,
      instructions: instructions.into(),
      input,
      tools: Vec::new(),
      exchanges: Vec::new(),
    }
  }

  pub fn with_model(mut self, model: Option<String>) -> Self {
    self.model = model;
    self
  }

  pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
    self.tools = tools;
    self
  }

  pub fn with_exchange(mut self, exchange: ToolExchange) -> Self {
    self.exchanges.push(exchange);
    self
  }

  /// The full message list sent to the backend: instructions first.
  pub fn messages(&self) -> Vec<Message> {
    let mut messages = Vec::with_capacity(self.input.len() + 1);
    if !self.instructions.is_empty() {
      messages.push(Message::system(self.instructions.clone()));
    }
    messages.extend(self.input.iter().cloned());
    messages
  }
}

/// The text-generation backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
  /// Start a streaming generation.
  async fn stream(&self, request: ModelRequest) -> Result<DeltaStream, BackendError>;

  /// Run a generation to completion and return the assistant message.
  async fn complete(&self, request: ModelRequest) -> Result<Message, BackendError> {
    let mut stream = self.stream(request).await?;
    let mut content = String::new();
    while let Some(delta) = stream.next().await {
      content.push_str(&delta?);
    }
    Ok(Message::assistant(content))
  }

  /// Run one round that may end in tool calls instead of a reply.
  ///
  /// Backends without tool support never ask for a call.
  async fn respond(&self, request: ModelRequest) -> Result<ModelTurn, BackendError> {
    self.complete(request).await.map(ModelTurn::Reply)
  }
}
