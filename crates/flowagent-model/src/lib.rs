//! Flowagent Model
//!
//! The boundary between flowagent and the large-language-model backend that
//! generates text. Capabilities and the chat path only see the
//! [`ModelBackend`] trait:
//!
//! - [`OpenAiBackend`] talks to an OpenAI-compatible `chat/completions`
//!   endpoint and decodes its server-sent event stream.
//! - [`EchoBackend`] is a deterministic offline backend for demos and tests.
//!
//! Tool use is split between the two sides: a backend reports the calls the
//! model wants through [`ModelBackend::respond`], and the caller runs them and
//! sends the results back in the next request. A failure here surfaces to
//! callers as a single [`BackendError`]; nothing retries.

mod backend;
mod echo;
mod error;
mod openai;
mod sse;

pub use backend::{
  DeltaStream, ModelBackend, ModelRequest, ModelTurn, ToolCall, ToolDescriptor, ToolExchange,
  ToolResult,
};
pub use echo::EchoBackend;
pub use error::BackendError;
pub use openai::OpenAiBackend;
pub use sse::{SseDecoder, SseEvent};
