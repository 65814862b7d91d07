//! Flowagent Config
//!
//! This crate contains the serializable types shared by every part of
//! flowagent:
//! - [`Message`] and [`Role`], the unit of conversation history
//! - [`WorkflowPlan`] and [`TaskStep`], the plan a client submits
//! - [`PlanProposal`], the planner's structured reply carrying a plan
//! - [`RunEvent`], the events a run streams to its client
//! - [`Settings`], the runtime configuration file
//!
//! Plans are definitions only. Step type tags stay raw strings here; the
//! orchestrator resolves them against the capability registry before anything
//! runs.

mod error;
mod event;
mod message;
mod plan;
mod settings;

pub use error::ConfigError;
pub use event::RunEvent;
pub use message::{Message, Role};
pub use plan::{PlanProposal, TaskStep, WorkflowPlan};
pub use settings::{
  BackendSettings, CapabilitySettings, ChatSettings, SessionSettings, Settings,
  ToolServerSettings,
};
