//! Error types for `rowlog-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A value has no content-stable encoding (e.g. a NaN float).
  #[error("value is not serializable: {0}")]
  Unserializable(String),

  #[error("configuration error in namespace {namespace:?}: {reason}")]
  Config { namespace: String, reason: String },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub(crate) fn config(namespace: &str, reason: impl Into<String>) -> Self {
    Self::Config { namespace: namespace.to_owned(), reason: reason.into() }
  }

  pub(crate) fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
