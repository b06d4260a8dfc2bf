//! Error types for the board API boundary and the optimistic mutator.

use thiserror::Error;

/// Failure talking to the remote board API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  /// Connection refused, DNS failure, reset, ...
  #[error("network error: {0}")]
  Network(String),

  #[error("request timed out")]
  Timeout,

  /// The request reached the server and it answered with a non-2xx status.
  #[error("server returned {status}: {message}")]
  Server { status: u16, message: String },

  /// A 2xx response whose body did not match the expected shape.
  #[error("malformed response: {0}")]
  Decode(String),

  #[error("invalid endpoint url: {0}")]
  InvalidUrl(String),
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      ApiError::Timeout
    } else if err.is_decode() {
      ApiError::Decode(err.to_string())
    } else {
      ApiError::Network(err.to_string())
    }
  }
}

impl From<url::ParseError> for ApiError {
  fn from(err: url::ParseError) -> Self {
    ApiError::InvalidUrl(err.to_string())
  }
}

/// Error surfaced to callers of a board mutation.
///
/// `Validation` errors are raised before any state change or I/O. The other
/// two variants mean the optimistic change has already been rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
  #[error("{0}")]
  Validation(String),

  #[error("network error: {0}")]
  Network(String),

  #[error("{message}")]
  Server { status: Option<u16>, message: String },
}

impl MutationError {
  pub fn validation(message: impl Into<String>) -> Self {
    MutationError::Validation(message.into())
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, MutationError::Validation(_))
  }
}

impl From<ApiError> for MutationError {
  fn from(err: ApiError) -> Self {
    match err {
      ApiError::Network(message) => MutationError::Network(message),
      ApiError::Timeout => MutationError::Network("request timed out".to_string()),
      ApiError::Server { status, message } => MutationError::Server {
        status: Some(status),
        message,
      },
      ApiError::Decode(message) => MutationError::Server {
        status: None,
        message: format!("malformed response: {}", message),
      },
      ApiError::InvalidUrl(message) => MutationError::Server {
        status: None,
        message: format!("invalid endpoint url: {}", message),
      },
    }
  }
}
