//! Flowagent Capability
//!
//! A capability is the executable unit bound to one task-step type. Every
//! variant implements the same [`Capability`] contract: run to completion, or
//! run with streaming, producing text fragments followed by one final
//! assistant [`Message`](flowagent_config::Message).
//!
//! Capabilities are scoped resources. Construction may spawn an MCP tool
//! server subprocess whose tools the agent calls while it works;
//! [`Capability::release`] closes it, and dropping an unreleased capability
//! still kills the subprocess.
//!
//! # Variants
//!
//! ```text
//! filesystem   - file access confined to a root directory, through an MCP server
//! assistant    - general reasoning, no tools
//! computeruse  - generic computer operation (browser, desktop apps)
//! websearch    - web search
//! ```

mod agent;
mod capability;
mod error;
mod kind;
mod profile;
mod stream;
#[cfg(test)]
mod testing;
mod tool_server;

pub use agent::{AgentCapability, MAX_TOOL_ROUNDS};
pub use capability::{Capability, CapabilityOutput, CapabilityStream};
pub use error::CapabilityError;
pub use kind::CapabilityKind;
pub use profile::AgentProfile;
pub use stream::completion_stream;
pub use tool_server::ToolServer;
