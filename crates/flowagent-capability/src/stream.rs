use flowagent_config::Message;
use flowagent_model::DeltaStream;
use futures::StreamExt;

use crate::capability::{CapabilityOutput, CapabilityStream};
use crate::error::CapabilityError;

struct CompletionState {
  capability: String,
  deltas: DeltaStream,
  content: String,
  finished: bool,
}

/// Adapt a backend delta stream to the capability contract.
///
/// Each delta is relayed as a fragment as soon as it arrives; once the backend
/// stream is exhausted the accumulated text is emitted as the final assistant
/// message. A backend error ends the stream.
pub fn completion_stream(capability: impl Into<String>, deltas: DeltaStream) -> CapabilityStream {
  let state = CompletionState {
    capability: capability.into(),
    deltas,
    content: String::new(),
    finished: false,
  };
  Box::pin(futures::stream::try_unfold(state, next_output))
}

async fn next_output(
  mut state: CompletionState,
) -> Result<Option<(CapabilityOutput, CompletionState)>, CapabilityError> {
  if state.finished {
    return Ok(None);
  }

  match state.deltas.next().await {
    Some(Ok(delta)) => {
      state.content.push_str(&delta);
      Ok(Some((CapabilityOutput::Fragment(delta), state)))
    }
    Some(Err(e)) => Err(CapabilityError::backend(&state.capability, e)),
    None => {
      state.finished = true;
      let message = Message::assistant(std::mem::take(&mut state.content));
      Ok(Some((CapabilityOutput::Completed(message), state)))
    }
  }
}
