//! Incremental server-sent event decoding.
//!
//! Network chunks do not respect line (or UTF-8) boundaries, so bytes are
//! buffered until a full line is available. Only `data:` fields matter to the
//! chat completions stream; comments, `event:` and `id:` lines are skipped.

/// A decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
  /// Payload of a `data:` line.
  Data(String),
  /// The `[DONE]` sentinel.
  Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
  buffer: Vec<u8>,
}

impl SseDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Feed a chunk and return every event completed by it.
  pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
    self.buffer.extend_from_slice(chunk);

    let mut events = Vec::new();
    while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
      let line: Vec<u8> = self.buffer.drain(..=pos).collect();
      if let Some(event) = parse_line(&line) {
        events.push(event);
      }
    }
    events
  }

  /// Flush a final line that arrived without a terminator.
  pub fn finish(&mut self) -> Option<SseEvent> {
    let line = std::mem::take(&mut self.buffer);
    parse_line(&line)
  }
}

fn parse_line(line: &[u8]) -> Option<SseEvent> {
  let line = String::from_utf8_lossy(line);
  let line = line.trim_end_matches(['\n', '\r']);
  let data = line.strip_prefix("data:")?;
  let data = data.strip_prefix(' ').unwrap_or(data);

  if data.trim() == "[DONE]" {
    Some(SseEvent::Done)
  } else if data.is_empty() {
    None
  } else {
    Some(SseEvent::Data(data.to_string()))
  }
}
