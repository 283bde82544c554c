use thiserror::Error;

/// Failure talking to the state endpoints.
///
/// None of these reach the feature layer; they decide how a failed push or
/// pull is logged. Every kind is retried by the normal sync cadence.
#[derive(Error, Debug)]
pub enum TransportError {
  #[error("Network error: {0}")]
  Network(#[from] reqwest::Error),

  #[error("Credential rejected (HTTP {0})")]
  Unauthorized(u16),

  #[error("Server rejected request (HTTP {status}): {body}")]
  Status { status: u16, body: String },

  #[error("Malformed response: {0}")]
  Decode(String),

  #[error("Invalid endpoint URL: {0}")]
  InvalidUrl(String),
}

impl TransportError {
  /// Whether the server saw and refused the request, as opposed to the
  /// request never completing.
  pub fn is_rejection(&self) -> bool {
    matches!(self, Self::Unauthorized(_) | Self::Status { .. })
  }
}
