use serde::{Deserialize, Serialize};

/// One step of a workflow plan.
///
/// `step_type` is kept as the raw tag so that an unknown type surfaces as a
/// validation error from the orchestrator rather than a parse failure here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStep {
  /// Correlation key for streamed events. Unique within a plan.
  pub name: String,
  #[serde(rename = "type")]
  pub step_type: String,
  #[serde(default)]
  pub instructions: String,
}

impl TaskStep {
  pub fn new(
    name: impl Into<String>,
    step_type: impl Into<String>,
    instructions: impl Into<String>,
  ) -> Self {
    Self {
      name: name.into(),
      step_type: step_type.into(),
      instructions: instructions.into(),
    }
  }
}

/// An ordered plan of task steps. Order is execution order.
///
/// The planner emits plans under an `agents` key, which is accepted as an
/// alias for `steps`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPlan {
  #[serde(alias = "agents")]
  pub steps: Vec<TaskStep>,
}

impl WorkflowPlan {
  pub fn new(steps: Vec<TaskStep>) -> Self {
    Self { steps }
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }
}

/// The planner's structured reply: a proposed plan plus a friendly message
/// explaining it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProposal {
  pub flow: WorkflowPlan,
  #[serde(default)]
  pub message: String,
}

impl PlanProposal {
  /// Extract a proposal from an assistant reply.
  ///
  /// Accepts the bare JSON object or an object wrapped in surrounding prose or
  /// a code fence. Returns `None` when the reply carries no proposal.
  pub fn from_reply(reply: &str) -> Option<Self> {
    if let Ok(proposal) = serde_json::from_str(reply.trim()) {
      return Some(proposal);
    }

    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
      return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
  }
}
