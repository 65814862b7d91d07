//! OpenAI-compatible chat completions backend.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flowagent_config::{BackendSettings, Message, Role};
use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{
  DeltaStream, ModelBackend, ModelRequest, ModelTurn, ToolCall, ToolDescriptor, ToolExchange,
};
use crate::error::BackendError;
use crate::sse::{SseDecoder, SseEvent};

/// HTTP backend speaking the OpenAI `chat/completions` protocol.
///
/// Streaming requests carry text only. Tools are forwarded on
/// [`ModelBackend::respond`] rounds, where the reply may be a set of tool
/// calls instead of content.
pub struct OpenAiBackend {
  client: reqwest::Client,
  endpoint: String,
  api_key: String,
  default_model: String,
}

impl OpenAiBackend {
  pub fn new(
    base_url: &str,
    api_key: impl Into<String>,
    default_model: impl Into<String>,
    timeout: Option<Duration>,
  ) -> Result<Self, BackendError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    Ok(Self {
      client: builder.build()?,
      endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
      api_key: api_key.into(),
      default_model: default_model.into(),
    })
  }

  /// Build a backend from settings, reading the API key from the configured
  /// environment variable.
  pub fn from_settings(settings: &BackendSettings) -> Result<Self, BackendError> {
    let api_key =
      std::env::var(&settings.api_key_env).map_err(|_| BackendError::MissingApiKey {
        var: settings.api_key_env.clone(),
      })?;
    Self::new(
      &settings.base_url,
      api_key,
      settings.model.clone(),
      settings.timeout_secs.map(Duration::from_secs),
    )
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  fn headers(&self) -> Result<HeaderMap, BackendError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let value = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
      .map_err(|e| BackendError::rejected(format!("invalid api key header: {}", e)))?;
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
  }

  fn body<'a>(&'a self, request: &'a ModelRequest, mode: Mode) -> ChatRequest<'a> {
    let mut messages: Vec<WireMessage> =
      request.messages().iter().map(WireMessage::from).collect();
    for exchange in &request.exchanges {
      messages.extend(exchange_messages(exchange));
    }

    let tools = match mode {
      Mode::Respond => request.tools.iter().map(WireTool::from).collect(),
      Mode::Stream | Mode::Complete => Vec::new(),
    };

    ChatRequest {
      model: request.model.as_deref().unwrap_or(&self.default_model),
      messages,
      stream: mode == Mode::Stream,
      tools,
    }
  }

  async fn send(
    &self,
    request: &ModelRequest,
    mode: Mode,
  ) -> Result<reqwest::Response, BackendError> {
    if mode != Mode::Respond && !request.tools.is_empty() {
      debug!(
        tools = ?request.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        "tools are only offered on respond rounds"
      );
    }

    let body = self.body(request, mode);
    info!(
      endpoint = %self.endpoint,
      model = %body.model,
      messages = body.messages.len(),
      tools = body.tools.len(),
      stream = body.stream,
      "sending chat completion request"
    );

    let response = self
      .client
      .post(&self.endpoint)
      .headers(self.headers()?)
      .json(&body)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      return Err(status_error(status.as_u16(), response.text().await));
    }
    Ok(response)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
  Stream,
  Complete,
  Respond,
}

/// A non-success reply. A body that cannot be read is reported in its place.
fn status_error(status: u16, body: Result<String, reqwest::Error>) -> BackendError {
  let body = body.unwrap_or_else(|e| format!("<failed to read response body: {}>", e));
  BackendError::Status { status, body }
}

fn exchange_messages(exchange: &ToolExchange) -> Vec<WireMessage> {
  let mut messages = Vec::with_capacity(exchange.results.len() + 1);
  messages.push(WireMessage {
    role: Role::Assistant.as_str(),
    content: None,
    tool_calls: exchange.calls.iter().map(WireToolCall::from).collect(),
    tool_call_id: None,
  });
  messages.extend(exchange.results.iter().map(|result| WireMessage {
    role: "tool",
    content: Some(result.content.clone()),
    tool_calls: Vec::new(),
    tool_call_id: Some(result.call_id.clone()),
  }));
  messages
}

fn turn_from_response(completion: ChatResponse) -> Result<ModelTurn, BackendError> {
  let message = completion
    .choices
    .into_iter()
    .next()
    .map(|choice| choice.message)
    .ok_or_else(|| BackendError::decode("completion carried no choices"))?;

  if !message.tool_calls.is_empty() {
    let calls = message
      .tool_calls
      .into_iter()
      .map(|call| ToolCall {
        id: call.id,
        name: call.function.name,
        arguments: call.function.arguments,
      })
      .collect();
    return Ok(ModelTurn::ToolCalls(calls));
  }

  let content = message
    .content
    .ok_or_else(|| BackendError::decode("completion carried no message content"))?;
  Ok(ModelTurn::Reply(Message::assistant(content)))
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
  async fn stream(&self, request: ModelRequest) -> Result<DeltaStream, BackendError> {
    let response = self.send(&request, Mode::Stream).await?;
    Ok(decode_delta_stream(Box::pin(response.bytes_stream())))
  }

  async fn complete(&self, request: ModelRequest) -> Result<Message, BackendError> {
    let response = self.send(&request, Mode::Complete).await?;
    match turn_from_response(response.json().await?)? {
      ModelTurn::Reply(message) => Ok(message),
      ModelTurn::ToolCalls(_) => Err(BackendError::decode("unexpected tool calls in completion")),
    }
  }

  async fn respond(&self, request: ModelRequest) -> Result<ModelTurn, BackendError> {
    let response = self.send(&request, Mode::Respond).await?;
    let turn = turn_from_response(response.json().await?)?;
    if let ModelTurn::ToolCalls(calls) = &turn {
      debug!(
        calls = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "model requested tool calls"
      );
    }
    Ok(turn)
  }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct DeltaState {
  body: ByteStream,
  decoder: SseDecoder,
  pending: VecDeque<String>,
  done: bool,
}

/// Turn a raw SSE body into a stream of non-empty content deltas.
pub(crate) fn decode_delta_stream(body: ByteStream) -> DeltaStream {
  let state = DeltaState {
    body,
    decoder: SseDecoder::new(),
    pending: VecDeque::new(),
    done: false,
  };

  Box::pin(futures::stream::try_unfold(state, next_delta))
}

async fn next_delta(mut state: DeltaState) -> Result<Option<(String, DeltaState)>, BackendError> {
  loop {
    if let Some(delta) = state.pending.pop_front() {
      return Ok(Some((delta, state)));
    }
    if state.done {
      return Ok(None);
    }

    let events = match state.body.next().await {
      Some(chunk) => state.decoder.push(&chunk?),
      None => {
        state.done = true;
        state.decoder.finish().into_iter().collect()
      }
    };

    for event in events {
      match event {
        SseEvent::Done => {
          state.done = true;
          break;
        }
        SseEvent::Data(data) => {
          if let Some(delta) = parse_chunk(&data)? {
            state.pending.push_back(delta);
          }
        }
      }
    }
  }
}

fn parse_chunk(data: &str) -> Result<Option<String>, BackendError> {
  let chunk: ChatChunk = serde_json::from_str(data)
    .map_err(|e| BackendError::decode(format!("invalid stream chunk: {}", e)))?;

  if let Some(error) = chunk.error {
    return Err(BackendError::rejected(error.message));
  }

  Ok(
    chunk
      .choices
      .into_iter()
      .next()
      .and_then(|choice| choice.delta.content)
      .filter(|content| !content.is_empty()),
  )
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: Vec<WireMessage>,
  stream: bool,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  tools: Vec<WireTool<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
  role: &'static str,
  content: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  tool_calls: Vec<WireToolCall>,
  #[serde(skip_serializing_if = "Option::is_none")]
  tool_call_id: Option<String>,
}

impl From<&Message> for WireMessage {
  fn from(message: &Message) -> Self {
    Self {
      role: message.role.as_str(),
      content: Some(message.content.clone()),
      tool_calls: Vec::new(),
      tool_call_id: None,
    }
  }
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
  #[serde(rename = "type")]
  kind: &'static str,
  function: WireToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireToolFunction<'a> {
  name: &'a str,
  description: &'a str,
  parameters: &'a serde_json::Value,
}

impl<'a> From<&'a ToolDescriptor> for WireTool<'a> {
  fn from(tool: &'a ToolDescriptor) -> Self {
    Self {
      kind: "function",
      function: WireToolFunction {
        name: &tool.name,
        description: &tool.description,
        parameters: &tool.parameters,
      },
    }
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
  id: String,
  #[serde(rename = "type", default = "function_kind")]
  kind: String,
  function: WireCallFunction,
}

fn function_kind() -> String {
  "function".to_string()
}

impl From<&ToolCall> for WireToolCall {
  fn from(call: &ToolCall) -> Self {
    Self {
      id: call.id.clone(),
      kind: function_kind(),
      function: WireCallFunction {
        name: call.name.clone(),
        arguments: call.arguments.clone(),
      },
    }
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCallFunction {
  name: String,
  #[serde(default)]
  arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
  message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
  content: Option<String>,
  #[serde(default)]
  tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
  #[serde(default)]
  choices: Vec<ChunkChoice>,
  error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
  #[serde(default)]
  delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
  content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
  message: String,
}
