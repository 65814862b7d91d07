//! Orchestrator errors.

use flowagent_capability::CapabilityError;
use flowagent_model::BackendError;

/// A plan was rejected before any step ran.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
  #[error("plan has no steps")]
  EmptyPlan,

  #[error("step {index} has an empty name")]
  EmptyStepName { index: usize },

  /// The name holds a sequence reserved by the wire framing.
  #[error("step {index} has a name that cannot be framed: '{name}'")]
  InvalidStepName { index: usize, name: String },

  #[error("duplicate step name '{name}'")]
  DuplicateStepName { name: String },

  #[error("step '{step}' has unknown capability type '{tag}'")]
  UnknownCapabilityType { step: String, tag: String },
}

/// Errors that end a workflow run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
  #[error("invalid plan: {0}")]
  Validation(#[from] ValidationError),

  /// A step's capability failed. The run stopped at this step.
  #[error("step '{step}' failed")]
  Capability {
    step: String,
    #[source]
    source: CapabilityError,
  },

  /// The run was cancelled, or its event receiver was dropped.
  #[error("run cancelled")]
  Cancelled,

  #[error("run task failed: {message}")]
  Join { message: String },
}

/// Errors from a chat turn.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
  #[error("invalid chat request: {message}")]
  InvalidRequest { message: String },

  #[error("chat backend failed: {0}")]
  Backend(#[from] BackendError),

  #[error("chat turn cancelled")]
  Cancelled,

  #[error("chat task failed: {message}")]
  Join { message: String },
}

impl ChatError {
  pub fn invalid(message: impl Into<String>) -> Self {
    Self::InvalidRequest {
      message: message.into(),
    }
  }
}
