//! Backend selection.
//!
//! Backends are offered by loaders, kept in a registry in priority order. Creating a core asks each loader in turn
//! until one produces a core; a loader that declines, fails or panics is skipped. The scalar backend never declines,
//! so a registry that contains it always produces a core for a valid configuration.

use crate::constants::THREADED_MIN_PATTERNS;
use crate::likelihood::config::{CoreConfig, Precision};
use crate::likelihood::error::CoreError;
use crate::likelihood::general_core::{Execution, GeneralLikelihoodCore};
use crate::likelihood::likelihood_core::{BackendKind, LikelihoodCore};
use crate::utils::error::report_to_string;
use clap::ValueEnum;
use eyre::Report;
use itertools::Itertools;
use log::info;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::any::Any;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use strum_macros::Display;

/// Result of asking a loader for a core
#[derive(Debug)]
pub enum LoaderOutcome {
  Loaded(Box<dyn LikelihoodCore>),

  /// The backend cannot serve this configuration in this environment
  Unavailable { reason: String },
}

/// Something that can construct a likelihood core of one backend kind
pub trait BackendLoader: Send + Sync + Debug {
  fn kind(&self) -> BackendKind;

  fn name(&self) -> &str {
    "unnamed"
  }

  /// Attempts to construct a core. Errors are treated like `Unavailable`: the registry moves on to the next loader.
  fn load(&self, config: &CoreConfig) -> Result<LoaderOutcome, Report>;
}

/// Double-precision core spreading work over rayon workers
#[derive(Clone, Debug, SmartDefault)]
pub struct ThreadedLoader {
  /// Smallest pattern count for which the backend accepts a configuration
  #[default(THREADED_MIN_PATTERNS)]
  pub min_patterns: usize,
}

impl BackendLoader for ThreadedLoader {
  fn kind(&self) -> BackendKind {
    BackendKind::Threaded
  }

  fn name(&self) -> &str {
    "threaded"
  }

  fn load(&self, config: &CoreConfig) -> Result<LoaderOutcome, Report> {
    let unavailable = |reason: String| Ok(LoaderOutcome::Unavailable { reason });

    if config.precision == Precision::Single {
      return unavailable("single precision was requested".to_owned());
    }
    if config.threads == Some(1) {
      return unavailable("only one thread is allowed".to_owned());
    }
    let workers = config.threads.unwrap_or_else(rayon::current_num_threads);
    if workers < 2 {
      return unavailable(format!("only {workers} worker thread is available"));
    }
    if config.pattern_count < self.min_patterns {
      return unavailable(format!(
        "{} patterns are too few to benefit from threads (at least {} needed)",
        config.pattern_count, self.min_patterns
      ));
    }

    let core = GeneralLikelihoodCore::<f64>::new(BackendKind::Threaded, config.clone(), Execution::Parallel)?;
    Ok(LoaderOutcome::Loaded(Box::new(core)))
  }
}

/// Single-precision serial core. Only offered when single precision is requested.
#[derive(Clone, Debug, Default)]
pub struct SinglePrecisionLoader;

impl BackendLoader for SinglePrecisionLoader {
  fn kind(&self) -> BackendKind {
    BackendKind::SinglePrecision
  }

  fn name(&self) -> &str {
    "single-precision"
  }

  fn load(&self, config: &CoreConfig) -> Result<LoaderOutcome, Report> {
    if config.precision != Precision::Single {
      return Ok(LoaderOutcome::Unavailable {
        reason: "double precision was requested".to_owned(),
      });
    }
    let core = GeneralLikelihoodCore::<f32>::new(BackendKind::SinglePrecision, config.clone(), Execution::Serial)?;
    Ok(LoaderOutcome::Loaded(Box::new(core)))
  }
}

/// Double-precision serial core, available everywhere
#[derive(Clone, Debug, Default)]
pub struct ScalarLoader;

impl BackendLoader for ScalarLoader {
  fn kind(&self) -> BackendKind {
    BackendKind::Scalar
  }

  fn name(&self) -> &str {
    "scalar"
  }

  fn load(&self, config: &CoreConfig) -> Result<LoaderOutcome, Report> {
    let core = GeneralLikelihoodCore::<f64>::new(BackendKind::Scalar, config.clone(), Execution::Serial)?;
    Ok(LoaderOutcome::Loaded(Box::new(core)))
  }
}

/// Which backend the caller would like. The registry still falls back to other backends if this one is unavailable.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, SmartDefault, ValueEnum, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum BackendPreference {
  /// Registry order
  #[default]
  Auto,
  Threaded,
  SinglePrecision,
  Scalar,
}

impl BackendPreference {
  pub const fn kind(self) -> Option<BackendKind> {
    match self {
      Self::Auto => None,
      Self::Threaded => Some(BackendKind::Threaded),
      Self::SinglePrecision => Some(BackendKind::SinglePrecision),
      Self::Scalar => Some(BackendKind::Scalar),
    }
  }
}

/// Ordered collection of backend loaders
#[derive(Debug)]
pub struct BackendRegistry {
  loaders: Vec<Box<dyn BackendLoader>>,
}

impl Default for BackendRegistry {
  /// Threaded, then single precision, then scalar
  fn default() -> Self {
    Self::new()
      .with_loader(ThreadedLoader::default())
      .with_loader(SinglePrecisionLoader)
      .with_loader(ScalarLoader)
  }
}

impl BackendRegistry {
  /// Registry without any loaders
  pub fn new() -> Self {
    Self { loaders: vec![] }
  }

  /// Appends a loader with the lowest priority so far
  #[must_use]
  pub fn with_loader(mut self, loader: impl BackendLoader + 'static) -> Self {
    self.loaders.push(Box::new(loader));
    self
  }

  pub fn kinds(&self) -> Vec<BackendKind> {
    self.loaders.iter().map(|loader| loader.kind()).collect()
  }

  /// Creates a core for the configuration.
  ///
  /// The configuration is validated first; an invalid configuration fails immediately, regardless of backends.
  /// Loaders of the preferred kind are tried first, then the remaining loaders in registry order. Fails with
  /// `CoreError::NoBackendAvailable` when every loader declines.
  pub fn create_core(&self, config: &CoreConfig, preference: BackendPreference) -> Result<Box<dyn LikelihoodCore>, Report> {
    config.validate()?;

    let preferred = preference.kind();
    let order = self
      .loaders
      .iter()
      .sorted_by_key(|loader| Some(loader.kind()) != preferred)
      .collect_vec();

    let mut attempts = vec![];
    for loader in order {
      let name = loader.name();
      let reason = match catch_unwind(AssertUnwindSafe(|| loader.load(config))) {
        Ok(Ok(LoaderOutcome::Loaded(core))) => {
          info!("Using '{name}' likelihood backend for {config}");
          return Ok(core);
        }
        Ok(Ok(LoaderOutcome::Unavailable { reason })) => reason,
        Ok(Err(report)) => format!("failed: {}", report_to_string(&report)),
        Err(panic) => format!("panicked: {}", panic_message(&*panic)),
      };
      info!("Likelihood backend '{name}' is skipped: {reason}");
      attempts.push(format!("{name} ({reason})"));
    }

    Err(
      CoreError::NoBackendAvailable {
        config: config.to_string(),
        attempted: if attempts.is_empty() {
          "no loaders are registered".to_owned()
        } else {
          attempts.join("; ")
        },
      }
      .into(),
    )
  }
}

/// Creates a core with the default registry
pub fn create_core(config: &CoreConfig, preference: BackendPreference) -> Result<Box<dyn LikelihoodCore>, Report> {
  BackendRegistry::default().create_core(config, preference)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(msg) = panic.downcast_ref::<&str>() {
    (*msg).to_owned()
  } else if let Some(msg) = panic.downcast_ref::<String>() {
    msg.clone()
  } else {
    "unknown panic payload".to_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::likelihood::error::core_error;
  use crate::make_error;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[derive(Debug)]
  struct PanickingLoader;

  impl BackendLoader for PanickingLoader {
    fn kind(&self) -> BackendKind {
      BackendKind::Threaded
    }

    fn name(&self) -> &str {
      "panicking"
    }

    fn load(&self, _: &CoreConfig) -> Result<LoaderOutcome, Report> {
      panic!("device lost");
    }
  }

  #[derive(Debug)]
  struct FailingLoader;

  impl BackendLoader for FailingLoader {
    fn kind(&self) -> BackendKind {
      BackendKind::SinglePrecision
    }

    fn load(&self, _: &CoreConfig) -> Result<LoaderOutcome, Report> {
      make_error!("library not found")
    }
  }

  fn config() -> CoreConfig {
    CoreConfig::new(5, 3, 10, 4, 2)
  }

  #[rstest]
  fn falls_back_to_scalar_when_others_fail() {
    let registry = BackendRegistry::new()
      .with_loader(PanickingLoader)
      .with_loader(FailingLoader)
      .with_loader(ScalarLoader);
    let core = registry.create_core(&config(), BackendPreference::Auto).unwrap();
    assert_eq!(core.kind(), BackendKind::Scalar);
  }

  #[rstest]
  fn preference_is_tried_first() {
    let config = config().with_precision(Precision::Single);
    let core = BackendRegistry::default()
      .create_core(&config, BackendPreference::Scalar)
      .unwrap();
    assert_eq!(core.kind(), BackendKind::Scalar);
  }

  #[rstest]
  fn single_precision_is_picked_when_requested() {
    let config = config().with_precision(Precision::Single);
    let core = create_core(&config, BackendPreference::Auto).unwrap();
    assert_eq!(core.kind(), BackendKind::SinglePrecision);
  }

  #[rstest]
  fn threaded_declines_small_problems() {
    let core = create_core(&config().with_threads(Some(4)), BackendPreference::Threaded).unwrap();
    assert_eq!(core.kind(), BackendKind::Scalar);
  }

  #[rstest]
  fn threaded_is_used_for_large_problems() {
    let registry = BackendRegistry::new()
      .with_loader(ThreadedLoader { min_patterns: 1 })
      .with_loader(ScalarLoader);
    let core = registry
      .create_core(&config().with_threads(Some(2)), BackendPreference::Auto)
      .unwrap();
    assert_eq!(core.kind(), BackendKind::Threaded);
  }

  #[rstest]
  fn exhausted_registry_reports_every_attempt() {
    let registry = BackendRegistry::new().with_loader(PanickingLoader).with_loader(FailingLoader);
    let report = registry.create_core(&config(), BackendPreference::Auto).unwrap_err();
    match core_error(&report) {
      Some(CoreError::NoBackendAvailable { attempted, .. }) => {
        assert!(attempted.contains("panicking (panicked: device lost)"));
        assert!(attempted.contains("unnamed (failed: library not found)"));
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[rstest]
  fn invalid_configuration_is_fatal() {
    let report = create_core(&CoreConfig::new(5, 3, 0, 4, 1), BackendPreference::Auto).unwrap_err();
    assert!(matches!(core_error(&report), Some(CoreError::Configuration(_))));
  }

  #[rstest]
  fn default_order() {
    assert_eq!(
      BackendRegistry::default().kinds(),
      vec![BackendKind::Threaded, BackendKind::SinglePrecision, BackendKind::Scalar]
    );
  }
}
