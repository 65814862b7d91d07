use flowagent_config::RunEvent;

use crate::error::FrameError;
use crate::framer::{END_MARKER, ERROR_PREFIX, FRAME_TERMINATOR, FrameFormat, RESULT_PREFIX};

/// Incremental frame decoder.
///
/// Feed it chunks as they arrive; a chunk may end anywhere, including in the
/// middle of a marker. Complete frames are decoded as soon as their
/// terminator is seen.
#[derive(Debug, Default)]
pub struct FrameDecoder {
  format: FrameFormat,
  buffer: String,
  open_step: Option<String>,
}

impl FrameDecoder {
  pub fn new(format: FrameFormat) -> Self {
    Self {
      format,
      buffer: String::new(),
      open_step: None,
    }
  }

  /// Decode every frame completed by `chunk`.
  pub fn push(&mut self, chunk: &str) -> Result<Vec<RunEvent>, FrameError> {
    self.buffer.push_str(chunk);
    let terminator = match self.format {
      FrameFormat::Markers => FRAME_TERMINATOR,
      FrameFormat::JsonLines => "\n",
    };

    let mut events = Vec::new();
    while let Some(end) = self.buffer.find(terminator) {
      let frame: String = self.buffer.drain(..end + terminator.len()).collect();
      let frame = &frame[..end];
      let event = match self.format {
        FrameFormat::Markers => Some(self.decode_marker(frame)?),
        FrameFormat::JsonLines => self.decode_json(frame)?,
      };
      events.extend(event);
    }
    Ok(events)
  }

  /// Signal end of stream. Fails if a partial frame is left over.
  pub fn finish(self) -> Result<(), FrameError> {
    if self.buffer.is_empty() {
      Ok(())
    } else {
      Err(FrameError::TruncatedFrame {
        pending: self.buffer,
      })
    }
  }

  fn decode_marker(&mut self, frame: &str) -> Result<RunEvent, FrameError> {
    if frame == END_MARKER {
      let step = self.open_step.take().ok_or(FrameError::EndWithoutStart)?;
      return Ok(RunEvent::StepEnd { step });
    }

    if let Some(rest) = frame.strip_prefix(RESULT_PREFIX) {
      let step = rest
        .strip_suffix("::")
        .ok_or_else(|| FrameError::malformed(frame, "start marker is not closed"))?;
      self.open_step = Some(step.to_string());
      return Ok(RunEvent::step_start(step));
    }

    if let Some(rest) = frame.strip_prefix(ERROR_PREFIX) {
      let (step, error) = rest
        .strip_suffix("::")
        .and_then(|body| body.split_once("::"))
        .ok_or_else(|| FrameError::malformed(frame, "error marker is not closed"))?;
      self.open_step = None;
      let step = (!step.is_empty()).then(|| step.to_string());
      return Ok(RunEvent::failure(step, error));
    }

    Ok(RunEvent::text_delta(frame))
  }

  fn decode_json(&mut self, line: &str) -> Result<Option<RunEvent>, FrameError> {
    if line.trim().is_empty() {
      return Ok(None);
    }
    let event: RunEvent =
      serde_json::from_str(line).map_err(|e| FrameError::malformed(line, e.to_string()))?;
    match &event {
      RunEvent::StepStart { step } => self.open_step = Some(step.clone()),
      RunEvent::StepEnd { .. } | RunEvent::Failure { .. } => self.open_step = None,
      RunEvent::TextDelta { .. } => {}
    }
    Ok(Some(event))
  }
}

/// Decode a complete stream.
pub fn decode_all(format: FrameFormat, input: &str) -> Result<Vec<RunEvent>, FrameError> {
  let mut decoder = FrameDecoder::new(format);
  let events = decoder.push(input)?;
  decoder.finish()?;
  Ok(events)
}
