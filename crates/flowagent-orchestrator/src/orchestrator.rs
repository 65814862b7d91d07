use std::sync::Arc;

use flowagent_capability_registry::CapabilityFactory;
use flowagent_config::{Message, TaskStep, WorkflowPlan};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, ValidationError};
use crate::plan::{resolve_step, validate_plan};
use crate::run::WorkflowRun;

/// Runs workflow plans.
///
/// Cheap to clone; every run gets its own task, context, and capabilities.
#[derive(Clone)]
pub struct Orchestrator {
  factory: Arc<dyn CapabilityFactory>,
}

impl Orchestrator {
  pub fn new(factory: Arc<dyn CapabilityFactory>) -> Self {
    Self { factory }
  }

  /// Validate `plan` and start running it.
  ///
  /// A plan that fails validation is rejected here, before any capability is
  /// constructed or any event is emitted. Must be called from within a tokio
  /// runtime.
  #[instrument(skip_all, fields(steps = plan.len()))]
  pub fn submit(
    &self,
    plan: &WorkflowPlan,
    cancel: CancellationToken,
  ) -> Result<WorkflowRun, ValidationError> {
    let resolved = validate_plan(plan).inspect_err(|e| {
      warn!(error = %e, "plan_rejected");
    })?;

    let run = WorkflowRun::spawn(resolved, self.factory.clone(), cancel);
    info!(run_id = %run.run_id(), "workflow_submitted");
    Ok(run)
  }

  /// Run a single step to completion against `context`, without streaming.
  ///
  /// Returns the step's output; the caller decides whether to append it.
  #[instrument(skip_all, fields(step = %step.name))]
  pub async fn execute_step(
    &self,
    step: &TaskStep,
    context: &ExecutionContext,
  ) -> Result<Message, OrchestratorError> {
    let resolved = resolve_step(0, step)?;
    let mut capability = resolved
      .constructor
      .construct(self.factory.as_ref(), &resolved.name)
      .await
      .map_err(|source| OrchestratorError::Capability {
        step: resolved.name.clone(),
        source,
      })?;

    let result = capability.execute(context.input_for(&resolved.instructions)).await;
    if let Err(e) = capability.release().await {
      warn!(step = %resolved.name, error = %e, "capability_release_failed");
    }

    result.map_err(|source| OrchestratorError::Capability {
      step: resolved.name,
      source,
    })
  }
}
