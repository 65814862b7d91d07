use async_trait::async_trait;
use flowagent_config::Role;

use crate::backend::{DeltaStream, ModelBackend, ModelRequest};
use crate::error::BackendError;

/// A deterministic offline backend.
///
/// Replies with the last user message prefixed by `prefix`, streamed one word
/// (with its trailing whitespace) per delta. Useful for running plans without
/// network access and as a test double.
#[derive(Debug, Clone)]
pub struct EchoBackend {
  prefix: String,
}

impl EchoBackend {
  pub fn new() -> Self {
    Self::with_prefix("echo: ")
  }

  pub fn with_prefix(prefix: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
    }
  }

  /// The complete reply this backend produces for `request`.
  pub fn reply_for(&self, request: &ModelRequest) -> String {
    let last_user = request
      .input
      .iter()
      .rev()
      .find(|m| m.role == Role::User)
      .map(|m| m.content.as_str())
      .unwrap_or_default();
    format!("{}{}", self.prefix, last_user)
  }
}

impl Default for EchoBackend {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl ModelBackend for EchoBackend {
  async fn stream(&self, request: ModelRequest) -> Result<DeltaStream, BackendError> {
    let reply = self.reply_for(&request);
    let deltas: Vec<Result<String, BackendError>> =
      split_words(&reply).into_iter().map(Ok).collect();
    Ok(Box::pin(futures::stream::iter(deltas)))
  }
}

/// Split text into words, each keeping the whitespace that follows it.
fn split_words(text: &str) -> Vec<String> {
  let mut words = Vec::new();
  let mut current = String::new();
  let mut in_space = false;

  for ch in text.chars() {
    if in_space && !ch.is_whitespace() {
      words.push(std::mem::take(&mut current));
      in_space = false;
    }
    if ch.is_whitespace() {
      in_space = true;
    }
    current.push(ch);
  }
  if !current.is_empty() {
    words.push(current);
  }
  words
}
