//! Conditions raised by the likelihood core.
//!
//! These travel inside `eyre::Report`, so callers that need to react to a particular condition can recover it with
//! `report.downcast_ref::<CoreError>()`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
  #[error("Invalid state: {0}")]
  InvalidState(String),

  #[error("Dimension mismatch in {what}: expected {expected}, got {actual}")]
  DimensionMismatch {
    what: String,
    expected: String,
    actual: String,
  },

  #[error("Node {node} is not ready: {reason}")]
  NotReady { node: usize, reason: String },

  #[error("Invalid configuration: {0}")]
  Configuration(String),

  #[error("No likelihood backend could be created for {config}. Attempted: {attempted}")]
  NoBackendAvailable { config: String, attempted: String },
}

impl CoreError {
  pub fn dimension_mismatch(what: impl Into<String>, expected: impl ToString, actual: impl ToString) -> Self {
    Self::DimensionMismatch {
      what: what.into(),
      expected: expected.to_string(),
      actual: actual.to_string(),
    }
  }

  pub fn not_ready(node: usize, reason: impl Into<String>) -> Self {
    Self::NotReady {
      node,
      reason: reason.into(),
    }
  }
}

/// Extracts the core condition from a report, if the report carries one
pub fn core_error(report: &eyre::Report) -> Option<&CoreError> {
  report.downcast_ref::<CoreError>()
}
