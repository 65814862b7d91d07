use std::collections::HashSet;

use flowagent_capability_registry::{CapabilityConstructor, RegistryError, resolve};
use flowagent_config::{TaskStep, WorkflowPlan};
use flowagent_framing::is_frameable_name;

use crate::error::ValidationError;

/// A step whose type tag has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
  pub index: usize,
  pub name: String,
  pub instructions: String,
  pub constructor: CapabilityConstructor,
}

/// A plan that passed validation. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlan {
  steps: Vec<ResolvedStep>,
}

impl ResolvedPlan {
  pub fn steps(&self) -> &[ResolvedStep] {
    &self.steps
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn step_names(&self) -> Vec<String> {
    self.steps.iter().map(|step| step.name.clone()).collect()
  }
}

/// Validate a plan and resolve every step's capability type.
///
/// Checks run in step order; the first problem found is returned.
pub fn validate_plan(plan: &WorkflowPlan) -> Result<ResolvedPlan, ValidationError> {
  if plan.is_empty() {
    return Err(ValidationError::EmptyPlan);
  }

  let mut seen = HashSet::new();
  let mut steps = Vec::with_capacity(plan.len());
  for (index, step) in plan.steps.iter().enumerate() {
    if !seen.insert(step.name.as_str()) {
      return Err(ValidationError::DuplicateStepName {
        name: step.name.clone(),
      });
    }
    steps.push(resolve_step(index, step)?);
  }

  Ok(ResolvedPlan { steps })
}

pub(crate) fn resolve_step(index: usize, step: &TaskStep) -> Result<ResolvedStep, ValidationError> {
  if step.name.trim().is_empty() {
    return Err(ValidationError::EmptyStepName { index });
  }
  if !is_frameable_name(&step.name) {
    return Err(ValidationError::InvalidStepName {
      index,
      name: step.name.clone(),
    });
  }

  let constructor = resolve(&step.step_type).map_err(|e| match e {
    RegistryError::UnknownCapabilityType { tag } => ValidationError::UnknownCapabilityType {
      step: step.name.clone(),
      tag,
    },
  })?;

  Ok(ResolvedStep {
    index,
    name: step.name.clone(),
    instructions: step.instructions.clone(),
    constructor,
  })
}
