use crate::constants::SCALING_THRESHOLD;
use crate::likelihood::error::CoreError;
use clap::ValueEnum;
use eyre::Report;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::fmt::{Display, Formatter};
use strum_macros::Display;

/// When partials of a freshly computed node are normalized to avoid floating-point underflow.
///
/// The decision for a node depends only on the values just computed for that node, so repeated evaluation of an
/// unchanged tree makes identical decisions and yields bit-identical results.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, SmartDefault)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum Rescaling {
  /// Partials are never normalized. All scaling factors stay zero.
  #[default]
  Never,

  /// Every pattern of every internal node is normalized by its maximum.
  Always,

  /// A pattern is normalized only if its maximum (over categories and states) is below `threshold`.
  Threshold { threshold: f64 },
}

impl Rescaling {
  pub const fn threshold() -> Self {
    Self::Threshold {
      threshold: SCALING_THRESHOLD,
    }
  }

  pub const fn is_enabled(&self) -> bool {
    !matches!(self, Self::Never)
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, SmartDefault, ValueEnum, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Precision {
  #[default]
  Double,
  Single,
}

/// Dimensions and numeric policy of one likelihood core. Validated once, when a core is constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, SmartDefault)]
pub struct CoreConfig {
  pub node_count: usize,

  pub tip_count: usize,

  pub pattern_count: usize,

  #[default = 4]
  pub state_count: usize,

  #[default = 1]
  pub category_count: usize,

  /// Multiplicity of every pattern. Empty means every pattern has weight one.
  pub pattern_weights: Vec<f64>,

  pub rescaling: Rescaling,

  pub precision: Precision,

  /// Upper bound on worker threads a backend may use. `None` leaves the decision to the backend.
  pub threads: Option<usize>,
}

impl CoreConfig {
  pub fn new(node_count: usize, tip_count: usize, pattern_count: usize, state_count: usize, category_count: usize) -> Self {
    Self {
      node_count,
      tip_count,
      pattern_count,
      state_count,
      category_count,
      ..Self::default()
    }
  }

  #[must_use]
  pub fn with_pattern_weights(mut self, pattern_weights: Vec<f64>) -> Self {
    self.pattern_weights = pattern_weights;
    self
  }

  #[must_use]
  pub const fn with_rescaling(mut self, rescaling: Rescaling) -> Self {
    self.rescaling = rescaling;
    self
  }

  #[must_use]
  pub const fn with_precision(mut self, precision: Precision) -> Self {
    self.precision = precision;
    self
  }

  #[must_use]
  pub const fn with_threads(mut self, threads: Option<usize>) -> Self {
    self.threads = threads;
    self
  }

  pub fn validate(&self) -> Result<(), Report> {
    let fail = |msg: String| -> Result<(), Report> { Err(CoreError::Configuration(msg).into()) };

    if self.state_count < 2 {
      return fail(format!("state count must be at least 2, but got {}", self.state_count));
    }
    if self.category_count == 0 {
      return fail("category count must be at least 1".to_owned());
    }
    if self.pattern_count == 0 {
      return fail("pattern count must be at least 1".to_owned());
    }
    if self.tip_count == 0 {
      return fail("tip count must be at least 1".to_owned());
    }
    if self.node_count < self.tip_count {
      return fail(format!(
        "node count ({}) must not be smaller than tip count ({})",
        self.node_count, self.tip_count
      ));
    }
    if !self.pattern_weights.is_empty() {
      if self.pattern_weights.len() != self.pattern_count {
        return Err(
          CoreError::dimension_mismatch("pattern weights", self.pattern_count, self.pattern_weights.len()).into(),
        );
      }
      if let Some(w) = self.pattern_weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return fail(format!("pattern weights must be finite and non-negative, but found {w}"));
      }
    }
    if let Rescaling::Threshold { threshold } = self.rescaling {
      if !(threshold > 0.0 && threshold.is_finite()) {
        return fail(format!("rescaling threshold must be positive and finite, but got {threshold}"));
      }
    }
    if self.threads == Some(0) {
      return fail("thread count must be at least 1".to_owned());
    }
    Ok(())
  }

  /// Weight of a pattern, with the implicit weight of one when no weights were given
  #[inline]
  pub fn pattern_weight(&self, pattern: usize) -> f64 {
    self.pattern_weights.get(pattern).copied().unwrap_or(1.0)
  }

  pub fn partials_size(&self) -> usize {
    self.pattern_count * self.state_count
  }
}

impl Display for CoreConfig {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{} states x {} categories x {} patterns on {} nodes ({} tips), {} precision",
      self.state_count, self.category_count, self.pattern_count, self.node_count, self.tip_count, self.precision
    )
  }
}
