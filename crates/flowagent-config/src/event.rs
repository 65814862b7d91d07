use serde::{Deserialize, Serialize};

/// One observable event of a workflow run or chat turn.
///
/// For every step that starts, exactly one `StepStart` is emitted, followed by
/// its `TextDelta`s in generation order and then either `StepEnd` or
/// `Failure`. Chat turns emit `TextDelta`s and, on error, a `Failure` with no
/// step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
  StepStart {
    step: String,
  },
  TextDelta {
    text: String,
  },
  StepEnd {
    step: String,
  },
  Failure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    step: Option<String>,
    error: String,
  },
}

impl RunEvent {
  pub fn step_start(step: impl Into<String>) -> Self {
    Self::StepStart { step: step.into() }
  }

  pub fn text_delta(text: impl Into<String>) -> Self {
    Self::TextDelta { text: text.into() }
  }

  pub fn step_end(step: impl Into<String>) -> Self {
    Self::StepEnd { step: step.into() }
  }

  pub fn failure(step: Option<String>, error: impl Into<String>) -> Self {
    Self::Failure {
      step,
      error: error.into(),
    }
  }
}
