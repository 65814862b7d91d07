//! Chat turns against the planner, with session history.

use std::sync::Arc;

use flowagent_config::{Message, Role, RunEvent};
use flowagent_model::{DeltaStream, ModelBackend, ModelRequest};
use flowagent_session::{SessionLocks, SessionStore};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ChatError;

/// Default system instructions for the planner.
pub const PLANNER_INSTRUCTIONS: &str = "\
You assemble a team of agents to carry out the user's task. Plan how the task \
should be executed and which team members should do each part.

Available team members, by type:
1. 'assistant': a generalist that reasons over text and images.
2. 'filesystem': reads and writes files on the local computer.
3. 'computeruse': operates a computer for generic tasks, such as browsing the \
web or using an application.
4. 'websearch': searches the web.

A plan may use several members of the same type, each with instructions \
focused on one topic or sub task. Step instructions use markdown syntax.

Reply with a single JSON object of the form \
{\"flow\": {\"agents\": [{\"name\": \"...\", \"type\": \"...\", \"instructions\": \"...\", \"result\": \"\"}]}, \"message\": \"...\"}. \
Leave every result empty. Step names must be unique. The message is a \
friendly explanation of the plan for the user.";

/// Runs chat turns and keeps their session history.
///
/// A turn reads the session's history, sends it with the new message to the
/// backend, and on success stores `history ++ [message, reply]`. Failed or
/// cancelled turns store nothing.
#[derive(Clone)]
pub struct ChatService {
  backend: Arc<dyn ModelBackend>,
  sessions: Arc<dyn SessionStore>,
  locks: Option<Arc<SessionLocks>>,
  model: Option<String>,
  instructions: String,
}

impl ChatService {
  /// A service with the built-in planner instructions and serialized turns.
  pub fn new(backend: Arc<dyn ModelBackend>, sessions: Arc<dyn SessionStore>) -> Self {
    Self {
      backend,
      sessions,
      locks: Some(Arc::new(SessionLocks::new())),
      model: None,
      instructions: PLANNER_INSTRUCTIONS.to_string(),
    }
  }

  pub fn with_model(mut self, model: Option<String>) -> Self {
    self.model = model;
    self
  }

  pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
    self.instructions = instructions.into();
    self
  }

  /// When enabled (the default), turns on the same session run one at a
  /// time. When disabled, overlapping turns race and the last write wins.
  pub fn with_serialized_turns(mut self, serialize: bool) -> Self {
    self.locks = serialize.then(|| Arc::new(SessionLocks::new()));
    self
  }

  pub fn sessions(&self) -> &Arc<dyn SessionStore> {
    &self.sessions
  }

  /// Run a turn to completion and return the assistant reply.
  #[instrument(skip_all, fields(session_id = %session_id))]
  pub async fn turn(&self, session_id: &str, message: Message) -> Result<Message, ChatError> {
    let session_id = validate(session_id, &message)?;
    let _guard = match &self.locks {
      Some(locks) => Some(locks.acquire(&session_id).await),
      None => None,
    };

    let history = self.sessions.get(&session_id);
    debug!(session_id = %session_id, history = history.len(), "session_loaded");

    let reply = self
      .backend
      .complete(self.request(&history, &message))
      .await
      .inspect_err(|e| error!(session_id = %session_id, error = %e, "chat_turn_failed"))?;

    self.persist(&session_id, history, message, reply.clone());
    Ok(reply)
  }

  /// Start a streaming turn.
  ///
  /// The returned [`ChatTurn`] yields `TextDelta` events, or a `Failure`
  /// with no step, and resolves to the reply. Validation errors are returned
  /// here, before anything is sent.
  pub fn turn_stream(
    &self,
    session_id: &str,
    message: Message,
    cancel: CancellationToken,
  ) -> Result<ChatTurn, ChatError> {
    let session_id = validate(session_id, &message)?;
    let (sender, events) = mpsc::channel(1);
    let service = self.clone();
    let handle = tokio::spawn(async move {
      service
        .stream_turn(session_id, message, sender, cancel)
        .await
    });
    Ok(ChatTurn { events, handle })
  }

  #[instrument(name = "chat_turn", skip_all, fields(session_id = %session_id))]
  async fn stream_turn(
    self,
    session_id: String,
    message: Message,
    events: mpsc::Sender<RunEvent>,
    cancel: CancellationToken,
  ) -> Result<Message, ChatError> {
    let _guard = match &self.locks {
      Some(locks) => tokio::select! {
        _ = cancel.cancelled() => return Err(cancelled(&session_id)),
        guard = locks.acquire(&session_id) => Some(guard),
      },
      None => None,
    };

    let history = self.sessions.get(&session_id);
    info!(session_id = %session_id, history = history.len(), "chat_turn_started");

    let request = self.request(&history, &message);
    let deltas = tokio::select! {
      _ = cancel.cancelled() => return Err(cancelled(&session_id)),
      deltas = self.backend.stream(request) => deltas,
    };
    let reply = match deltas {
      Ok(deltas) => relay(deltas, &events, &cancel).await,
      Err(e) => Err(ChatError::Backend(e)),
    };

    match reply {
      Ok(reply) => {
        self.persist(&session_id, history, message, reply.clone());
        Ok(reply)
      }
      Err(ChatError::Cancelled) => Err(cancelled(&session_id)),
      Err(e) => {
        error!(session_id = %session_id, error = %e, "chat_turn_failed");
        let failure = RunEvent::failure(None, e.to_string());
        tokio::select! {
          _ = cancel.cancelled() => {}
          _ = events.send(failure) => {}
        }
        Err(e)
      }
    }
  }

  fn request(&self, history: &[Message], message: &Message) -> ModelRequest {
    let mut input = history.to_vec();
    input.push(message.clone());
    ModelRequest::new(self.instructions.clone(), input).with_model(self.model.clone())
  }

  fn persist(&self, session_id: &str, mut history: Vec<Message>, message: Message, reply: Message) {
    history.push(message);
    history.push(reply);
    let stored = history.len();
    self.sessions.put(session_id, history);
    info!(session_id = %session_id, messages = stored, "chat_turn_completed");
  }
}

/// Forward deltas as events and accumulate the reply.
async fn relay(
  mut deltas: DeltaStream,
  events: &mpsc::Sender<RunEvent>,
  cancel: &CancellationToken,
) -> Result<Message, ChatError> {
  let mut content = String::new();
  loop {
    let delta = tokio::select! {
      _ = cancel.cancelled() => return Err(ChatError::Cancelled),
      _ = events.closed() => return Err(ChatError::Cancelled),
      delta = deltas.next() => delta,
    };

    match delta {
      Some(Ok(text)) => {
        content.push_str(&text);
        let sent = tokio::select! {
          _ = cancel.cancelled() => return Err(ChatError::Cancelled),
          sent = events.send(RunEvent::text_delta(text)) => sent,
        };
        if sent.is_err() {
          return Err(ChatError::Cancelled);
        }
      }
      Some(Err(e)) => return Err(ChatError::Backend(e)),
      None => return Ok(Message::assistant(content)),
    }
  }
}

fn cancelled(session_id: &str) -> ChatError {
  warn!(session_id = %session_id, "chat_turn_cancelled");
  ChatError::Cancelled
}

/// Check a chat request and return the normalized session id.
fn validate(session_id: &str, message: &Message) -> Result<String, ChatError> {
  let session_id = session_id.trim();
  if session_id.is_empty() {
    return Err(ChatError::invalid("session_id cannot be empty"));
  }
  if message.content.is_empty() {
    return Err(ChatError::invalid("message cannot be empty"));
  }
  if !matches!(message.role, Role::User | Role::Assistant) {
    return Err(ChatError::invalid("invalid role"));
  }
  Ok(session_id.to_string())
}

/// A streaming chat turn in progress. Dropping it cancels the turn.
pub struct ChatTurn {
  events: mpsc::Receiver<RunEvent>,
  handle: JoinHandle<Result<Message, ChatError>>,
}

impl ChatTurn {
  pub async fn next_event(&mut self) -> Option<RunEvent> {
    self.events.recv().await
  }

  /// Wait for the reply. Events not yet read are discarded.
  pub async fn finish(mut self) -> Result<Message, ChatError> {
    while self.events.recv().await.is_some() {}
    self.handle.await.map_err(|e| ChatError::Join {
      message: e.to_string(),
    })?
  }
}
