use std::fmt;
use std::str::FromStr;

use flowagent_config::RunEvent;

use crate::error::FrameError;

/// Terminates every marker frame.
pub const FRAME_TERMINATOR: &str = "<newline>";
pub const RESULT_PREFIX: &str = "::result::";
pub const END_MARKER: &str = "::end::";
pub const ERROR_PREFIX: &str = "::error::";
/// Separates the fields of a control marker.
pub const FIELD_SEPARATOR: &str = "::";

/// Whether `name` survives a trip through marker frames. A step name holding
/// the field separator or the frame terminator would be split on decode.
pub fn is_frameable_name(name: &str) -> bool {
  !name.contains(FIELD_SEPARATOR) && !name.contains(FRAME_TERMINATOR)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameFormat {
  #[default]
  Markers,
  JsonLines,
}

impl FrameFormat {
  pub fn as_str(&self) -> &'static str {
    match self {
      FrameFormat::Markers => "markers",
      FrameFormat::JsonLines => "jsonl",
    }
  }
}

impl fmt::Display for FrameFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for FrameFormat {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "markers" => Ok(FrameFormat::Markers),
      "jsonl" | "json-lines" => Ok(FrameFormat::JsonLines),
      other => Err(FrameError::UnknownFormat {
        name: other.to_string(),
      }),
    }
  }
}

/// Encodes events, one frame each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFramer {
  format: FrameFormat,
}

impl StreamFramer {
  pub fn new(format: FrameFormat) -> Self {
    Self { format }
  }

  pub fn format(&self) -> FrameFormat {
    self.format
  }

  pub fn frame(&self, event: &RunEvent) -> Result<String, FrameError> {
    match self.format {
      FrameFormat::Markers => Ok(marker_frame(event)),
      FrameFormat::JsonLines => {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        Ok(line)
      }
    }
  }
}

fn marker_frame(event: &RunEvent) -> String {
  match event {
    RunEvent::StepStart { step } => format!("{RESULT_PREFIX}{step}::{FRAME_TERMINATOR}"),
    RunEvent::TextDelta { text } => format!("{text}{FRAME_TERMINATOR}"),
    RunEvent::StepEnd { .. } => format!("{END_MARKER}{FRAME_TERMINATOR}"),
    RunEvent::Failure { step, error } => format!(
      "{ERROR_PREFIX}{}::{error}::{FRAME_TERMINATOR}",
      step.as_deref().unwrap_or_default()
    ),
  }
}
