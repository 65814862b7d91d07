use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use flowagent_config::Message;
use tracing::debug;

/// Storage for session histories.
///
/// Implementations must be safe to share between concurrent turns.
pub trait SessionStore: Send + Sync {
  /// History for `session_id`; empty when the session has never been written.
  fn get(&self, session_id: &str) -> Vec<Message>;

  /// Replace the history for `session_id`.
  fn put(&self, session_id: &str, messages: Vec<Message>);
}

/// In-memory session store. Histories live for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
  sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemorySessionStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self
      .sessions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl SessionStore for InMemorySessionStore {
  fn get(&self, session_id: &str) -> Vec<Message> {
    self
      .sessions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(session_id)
      .cloned()
      .unwrap_or_default()
  }

  fn put(&self, session_id: &str, messages: Vec<Message>) {
    debug!(session_id = %session_id, messages = messages.len(), "session_written");
    self
      .sessions
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(session_id.to_string(), messages);
  }
}
