//! Per-step execution records and run progress.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lifecycle of one step. Transitions only move forward:
/// `planned → running → done | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Planned,
  Running,
  Done,
  Failed,
}

impl StepStatus {
  fn can_become(self, next: StepStatus) -> bool {
    matches!(
      (self, next),
      (StepStatus::Planned, StepStatus::Running)
        | (StepStatus::Running, StepStatus::Done)
        | (StepStatus::Running, StepStatus::Failed)
    )
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, StepStatus::Done | StepStatus::Failed)
  }
}

/// What happened to one step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionRecord {
  pub step_name: String,
  pub status: StepStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub final_output: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
}

impl StepExecutionRecord {
  pub fn planned(step_name: impl Into<String>) -> Self {
    Self {
      step_name: step_name.into(),
      status: StepStatus::Planned,
      final_output: None,
      error: None,
      started_at: None,
      finished_at: None,
    }
  }

  /// Move to `next`. Returns false, leaving the record unchanged, when the
  /// transition would go backwards or skip a state.
  fn transition(&mut self, next: StepStatus) -> bool {
    if !self.status.can_become(next) {
      warn!(
        step = %self.step_name,
        from = ?self.status,
        to = ?next,
        "invalid step transition"
      );
      return false;
    }
    self.status = next;
    true
  }

  pub fn start(&mut self) -> bool {
    let moved = self.transition(StepStatus::Running);
    if moved {
      self.started_at = Some(Utc::now());
    }
    moved
  }

  pub fn finish(&mut self, output: impl Into<String>) -> bool {
    let moved = self.transition(StepStatus::Done);
    if moved {
      self.final_output = Some(output.into());
      self.finished_at = Some(Utc::now());
    }
    moved
  }

  pub fn fail(&mut self, error: impl Into<String>) -> bool {
    let moved = self.transition(StepStatus::Failed);
    if moved {
      self.error = Some(error.into());
      self.finished_at = Some(Utc::now());
    }
    moved
  }
}

/// State of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
  Idle,
  Running { step_index: usize },
  Completed,
  Failed { step_index: usize, error: String },
  Cancelled,
}

impl RunState {
  pub fn is_finished(&self) -> bool {
    matches!(
      self,
      RunState::Completed | RunState::Failed { .. } | RunState::Cancelled
    )
  }
}

#[derive(Debug)]
struct Progress {
  state: RunState,
  records: Vec<StepExecutionRecord>,
}

/// A shared, pollable view of a run's progress.
///
/// The run task writes; any number of clones may read.
#[derive(Debug, Clone)]
pub struct ExecutionProgress {
  inner: Arc<RwLock<Progress>>,
}

impl ExecutionProgress {
  pub(crate) fn new(step_names: Vec<String>) -> Self {
    Self {
      inner: Arc::new(RwLock::new(Progress {
        state: RunState::Idle,
        records: step_names
          .into_iter()
          .map(StepExecutionRecord::planned)
          .collect(),
      })),
    }
  }

  pub fn state(&self) -> RunState {
    self.read(|progress| progress.state.clone())
  }

  pub fn records(&self) -> Vec<StepExecutionRecord> {
    self.read(|progress| progress.records.clone())
  }

  pub fn record(&self, step_index: usize) -> Option<StepExecutionRecord> {
    self.read(|progress| progress.records.get(step_index).cloned())
  }

  pub(crate) fn step_started(&self, step_index: usize) {
    self.write(|progress| {
      if let Some(record) = progress.records.get_mut(step_index) {
        record.start();
      }
      progress.state = RunState::Running { step_index };
    });
  }

  pub(crate) fn step_done(&self, step_index: usize, output: &str) {
    self.write(|progress| {
      if let Some(record) = progress.records.get_mut(step_index) {
        record.finish(output);
      }
    });
  }

  pub(crate) fn step_failed(&self, step_index: usize, error: &str) {
    self.write(|progress| {
      if let Some(record) = progress.records.get_mut(step_index) {
        record.fail(error);
      }
      progress.state = RunState::Failed {
        step_index,
        error: error.to_string(),
      };
    });
  }

  pub(crate) fn completed(&self) {
    self.write(|progress| progress.state = RunState::Completed);
  }

  /// Mark the run cancelled. A step still running is recorded as failed.
  pub(crate) fn cancelled(&self) {
    self.write(|progress| {
      for record in &mut progress.records {
        if record.status == StepStatus::Running {
          record.fail("cancelled");
        }
      }
      progress.state = RunState::Cancelled;
    });
  }

  fn read<T>(&self, f: impl FnOnce(&Progress) -> T) -> T {
    f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
  }

  fn write(&self, f: impl FnOnce(&mut Progress)) {
    f(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner))
  }
}
