use flowagent_config::{Message, Role};

/// The accumulated transcript of one run.
///
/// A value: appending a finished step returns the next context and leaves
/// nothing shared behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
  messages: Vec<Message>,
}

impl ExecutionContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_messages(messages: Vec<Message>) -> Self {
    Self { messages }
  }

  pub fn messages(&self) -> &[Message] {
    &self.messages
  }

  pub fn into_messages(self) -> Vec<Message> {
    self.messages
  }

  pub fn len(&self) -> usize {
    self.messages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.messages.is_empty()
  }

  /// Input for the next step: the whole transcript plus its instructions.
  pub fn input_for(&self, instructions: &str) -> Vec<Message> {
    let mut input = Vec::with_capacity(self.messages.len() + 1);
    input.extend(self.messages.iter().cloned());
    input.push(Message::user(instructions));
    input
  }

  /// Record a finished step.
  pub fn with_step(mut self, instructions: &str, output: Message) -> Self {
    self.messages.push(Message::user(instructions));
    self.messages.push(output);
    self
  }

  /// The last assistant output, if any step has finished.
  pub fn final_output(&self) -> Option<&Message> {
    self
      .messages
      .iter()
      .rev()
      .find(|message| message.role == Role::Assistant)
  }
}
