//! A single workflow run.

use std::sync::Arc;

use flowagent_capability::{Capability, CapabilityError, CapabilityOutput};
use flowagent_capability_registry::CapabilityFactory;
use flowagent_config::{Message, RunEvent};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::context::ExecutionContext;
use crate::error::OrchestratorError;
use crate::plan::{ResolvedPlan, ResolvedStep};
use crate::record::{ExecutionProgress, StepExecutionRecord};

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
  pub run_id: String,
  /// The transcript after the last step.
  pub context: ExecutionContext,
  pub records: Vec<StepExecutionRecord>,
}

impl WorkflowOutcome {
  /// Output of the last step.
  pub fn final_output(&self) -> Option<&str> {
    self
      .context
      .final_output()
      .map(|message| message.content.as_str())
  }
}

/// A handle to a running workflow.
///
/// Read events with [`next_event`](Self::next_event) until it returns `None`,
/// then call [`finish`](Self::finish) for the outcome. Dropping the handle
/// cancels the run.
pub struct WorkflowRun {
  run_id: String,
  events: mpsc::Receiver<RunEvent>,
  progress: ExecutionProgress,
  handle: JoinHandle<Result<WorkflowOutcome, OrchestratorError>>,
}

impl WorkflowRun {
  pub(crate) fn spawn(
    plan: ResolvedPlan,
    factory: Arc<dyn CapabilityFactory>,
    cancel: CancellationToken,
  ) -> Self {
    let run_id = uuid::Uuid::new_v4().to_string();
    let progress = ExecutionProgress::new(plan.step_names());
    // Capacity 1: a fragment is handed over before the next one is read.
    let (sender, events) = mpsc::channel(1);

    let execution = Execution {
      run_id: run_id.clone(),
      factory,
      progress: progress.clone(),
      events: sender,
      cancel,
    };
    let handle = tokio::spawn(execution.run(plan));

    Self {
      run_id,
      events,
      progress,
      handle,
    }
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  pub fn progress(&self) -> &ExecutionProgress {
    &self.progress
  }

  /// The next event, or `None` once the run has stopped emitting.
  pub async fn next_event(&mut self) -> Option<RunEvent> {
    self.events.recv().await
  }

  /// Wait for the run to end. Events not yet read are discarded.
  pub async fn finish(mut self) -> Result<WorkflowOutcome, OrchestratorError> {
    while self.events.recv().await.is_some() {}
    self.handle.await.map_err(|e| OrchestratorError::Join {
      message: e.to_string(),
    })?
  }

  /// Read every event, then wait for the outcome.
  pub async fn collect_events(
    mut self,
  ) -> (Vec<RunEvent>, Result<WorkflowOutcome, OrchestratorError>) {
    let mut events = Vec::new();
    while let Some(event) = self.events.recv().await {
      events.push(event);
    }
    (events, self.finish().await)
  }
}

enum StepError {
  Capability(CapabilityError),
  Cancelled,
}

impl From<CapabilityError> for StepError {
  fn from(error: CapabilityError) -> Self {
    StepError::Capability(error)
  }
}

struct Execution {
  run_id: String,
  factory: Arc<dyn CapabilityFactory>,
  progress: ExecutionProgress,
  events: mpsc::Sender<RunEvent>,
  cancel: CancellationToken,
}

impl Execution {
  #[instrument(name = "workflow_run", skip_all, fields(run_id = %self.run_id))]
  async fn run(self, plan: ResolvedPlan) -> Result<WorkflowOutcome, OrchestratorError> {
    info!(run_id = %self.run_id, steps = plan.len(), "workflow_started");

    let mut context = ExecutionContext::new();
    for step in plan.steps() {
      if self.cancel.is_cancelled() {
        return Err(self.cancelled());
      }
      context = self.run_step(step, context).await?;
    }

    self.progress.completed();
    info!(run_id = %self.run_id, "workflow_completed");
    Ok(WorkflowOutcome {
      run_id: self.run_id.clone(),
      context,
      records: self.progress.records(),
    })
  }

  async fn run_step(
    &self,
    step: &ResolvedStep,
    context: ExecutionContext,
  ) -> Result<ExecutionContext, OrchestratorError> {
    self.progress.step_started(step.index);
    info!(
      run_id = %self.run_id,
      step = %step.name,
      kind = %step.constructor.kind(),
      "step_started"
    );
    if !self.emit(RunEvent::step_start(&step.name)).await {
      return Err(self.cancelled());
    }

    let mut capability = match step.constructor.construct(self.factory.as_ref(), &step.name).await {
      Ok(capability) => capability,
      Err(e) => return Err(self.fail(step, e).await),
    };

    let result = self.drive(step, capability.as_mut(), &context).await;
    if let Err(e) = capability.release().await {
      warn!(run_id = %self.run_id, step = %step.name, error = %e, "capability_release_failed");
    }

    match result {
      Ok(output) => {
        self.progress.step_done(step.index, &output.content);
        info!(
          run_id = %self.run_id,
          step = %step.name,
          output_len = output.content.len(),
          "step_completed"
        );
        let context = context.with_step(&step.instructions, output);
        if !self.emit(RunEvent::step_end(&step.name)).await {
          return Err(self.cancelled());
        }
        Ok(context)
      }
      Err(StepError::Capability(e)) => Err(self.fail(step, e).await),
      Err(StepError::Cancelled) => Err(self.cancelled()),
    }
  }

  /// Stream one step, relaying each fragment before reading the next.
  async fn drive(
    &self,
    step: &ResolvedStep,
    capability: &mut dyn Capability,
    context: &ExecutionContext,
  ) -> Result<Message, StepError> {
    let input = context.input_for(&step.instructions);
    let mut stream = tokio::select! {
      _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
      _ = self.events.closed() => return Err(StepError::Cancelled),
      stream = capability.execute_stream(input) => stream?,
    };

    loop {
      let item = tokio::select! {
        _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
        _ = self.events.closed() => return Err(StepError::Cancelled),
        item = stream.next() => item,
      };

      match item {
        Some(Ok(CapabilityOutput::Fragment(text))) => {
          if !self.emit(RunEvent::text_delta(text)).await {
            return Err(StepError::Cancelled);
          }
        }
        Some(Ok(CapabilityOutput::Completed(message))) => return Ok(message),
        Some(Err(e)) => return Err(e.into()),
        None => {
          return Err(
            CapabilityError::MissingCompletion {
              capability: step.name.clone(),
            }
            .into(),
          );
        }
      }
    }
  }

  /// Deliver an event. False when the run was cancelled or nobody is
  /// listening any more.
  async fn emit(&self, event: RunEvent) -> bool {
    tokio::select! {
      _ = self.cancel.cancelled() => false,
      sent = self.events.send(event) => {
        if sent.is_err() {
          warn!(run_id = %self.run_id, "event receiver dropped");
        }
        sent.is_ok()
      }
    }
  }

  async fn fail(&self, step: &ResolvedStep, source: CapabilityError) -> OrchestratorError {
    let message = source.to_string();
    self.progress.step_failed(step.index, &message);
    error!(run_id = %self.run_id, step = %step.name, error = %message, "step_failed");
    error!(run_id = %self.run_id, "workflow_failed");

    // The run is over either way; a dropped receiver just misses the frame.
    let _ = self
      .emit(RunEvent::failure(Some(step.name.clone()), message))
      .await;

    OrchestratorError::Capability {
      step: step.name.clone(),
      source,
    }
  }

  fn cancelled(&self) -> OrchestratorError {
    self.progress.cancelled();
    warn!(run_id = %self.run_id, "workflow_cancelled");
    OrchestratorError::Cancelled
  }
}
