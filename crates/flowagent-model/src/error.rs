use thiserror::Error;

/// Errors returned by a model backend.
#[derive(Debug, Error)]
pub enum BackendError {
  /// Transport failure talking to the backend.
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// The backend answered with a non-success status.
  #[error("backend returned status {status}: {body}")]
  Status { status: u16, body: String },

  /// The backend sent a payload that could not be decoded.
  #[error("failed to decode backend payload: {message}")]
  Decode { message: String },

  /// The API key environment variable is not set.
  #[error("environment variable {var} is not set")]
  MissingApiKey { var: String },

  /// The backend refused the request.
  #[error("backend rejected request: {message}")]
  Rejected { message: String },
}

impl BackendError {
  pub fn decode(message: impl Into<String>) -> Self {
    Self::Decode {
      message: message.into(),
    }
  }

  pub fn rejected(message: impl Into<String>) -> Self {
    Self::Rejected {
      message: message.into(),
    }
  }
}
