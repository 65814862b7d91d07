use std::pin::Pin;

use async_trait::async_trait;
use flowagent_config::Message;
use futures::Stream;

use crate::error::CapabilityError;
use crate::kind::CapabilityKind;

/// One item of a streaming execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityOutput {
  /// An incremental piece of generated text.
  Fragment(String),
  /// The final assistant message. Always the last item of a successful
  /// stream.
  Completed(Message),
}

/// A boxed stream of capability output.
pub type CapabilityStream =
  Pin<Box<dyn Stream<Item = Result<CapabilityOutput, CapabilityError>> + Send>>;

/// An executable unit bound to one task-step type.
#[async_trait]
pub trait Capability: Send {
  /// Name of the step this capability serves.
  fn name(&self) -> &str;

  fn kind(&self) -> CapabilityKind;

  /// Run to completion.
  async fn execute(&mut self, input: Vec<Message>) -> Result<Message, CapabilityError>;

  /// Run with streaming.
  async fn execute_stream(
    &mut self,
    input: Vec<Message>,
  ) -> Result<CapabilityStream, CapabilityError>;

  /// Release any resources acquired at construction.
  ///
  /// Called once on every exit path. Must be safe to call on a capability
  /// whose execution failed.
  async fn release(&mut self) -> Result<(), CapabilityError> {
    Ok(())
  }
}
