//! Flowagent Orchestrator
//!
//! Runs a [`WorkflowPlan`](flowagent_config::WorkflowPlan) one step at a time
//! and streams what each step generates.
//!
//! ```text
//! submit(plan) ──► validate ──► spawn run task ──► WorkflowRun
//!                    │                                 │
//!                    │ every tag resolved              │ next_event()
//!                    ▼                                 ▼
//!              ResolvedPlan            StepStart, TextDelta*, StepEnd | Failure
//!
//! run task, per step:
//!   construct capability ─► execute_stream(context + instructions)
//!                          ─► relay fragments (channel capacity 1)
//!                          ─► release capability
//!                          ─► context += [user(instructions), assistant(output)]
//! ```
//!
//! The run never touches session storage. The [`ChatService`] owns the chat
//! path, which is the only writer of sessions.

mod chat;
mod context;
mod error;
mod orchestrator;
mod plan;
mod record;
mod run;

pub use chat::{ChatService, ChatTurn, PLANNER_INSTRUCTIONS};
pub use context::ExecutionContext;
pub use error::{ChatError, OrchestratorError, ValidationError};
pub use orchestrator::Orchestrator;
pub use plan::{ResolvedPlan, ResolvedStep, validate_plan};
pub use record::{ExecutionProgress, RunState, StepExecutionRecord, StepStatus};
pub use run::{WorkflowOutcome, WorkflowRun};
