use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
  /// A complete frame could not be parsed.
  #[error("malformed frame '{frame}': {message}")]
  Malformed { frame: String, message: String },

  /// An end marker arrived with no step open.
  #[error("end marker without a matching start marker")]
  EndWithoutStart,

  /// The stream ended in the middle of a frame.
  #[error("stream ended inside a frame: '{pending}'")]
  TruncatedFrame { pending: String },

  #[error("failed to encode event: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("unknown frame format '{name}' (expected 'markers' or 'jsonl')")]
  UnknownFormat { name: String },
}

impl FrameError {
  pub(crate) fn malformed(frame: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Malformed {
      frame: frame.into(),
      message: message.into(),
    }
  }
}
