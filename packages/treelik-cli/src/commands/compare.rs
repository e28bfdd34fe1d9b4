use crate::commands::dataset::{Dataset, DatasetArgs, DatasetSummary, EngineArgs};
use clap::Args;
use eyre::Report;
use itertools::Itertools;
use log::{info, warn};
use serde::Serialize;
use std::time::Instant;
use treelik::likelihood::config::Precision;
use treelik::likelihood::likelihood_core::BackendKind;
use treelik::likelihood::registry::{BackendPreference, BackendRegistry};
use treelik::make_error;
use treelik::utils::error::report_to_string;

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
  #[clap(flatten)]
  pub dataset: DatasetArgs,

  #[clap(flatten)]
  pub engine: EngineArgs,

  /// Largest tolerated difference from the scalar backend, relative to its log-likelihood
  #[clap(long, default_value_t = 1e-6)]
  pub tolerance: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct BackendResult {
  pub requested: BackendPreference,
  /// Backend that actually ran, after fallback
  pub backend: Option<BackendKind>,
  pub precision: Precision,
  pub log_likelihood: Option<f64>,
  pub relative_difference: Option<f64>,
  pub elapsed_ms: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CompareReport {
  pub dataset: DatasetSummary,
  pub reference: f64,
  pub results: Vec<BackendResult>,
}

impl CompareReport {
  pub fn max_relative_difference(&self) -> f64 {
    self
      .results
      .iter()
      .filter_map(|result| result.relative_difference)
      .fold(0.0, f64::max)
  }
}

const REQUESTS: [(BackendPreference, Precision); 3] = [
  (BackendPreference::Scalar, Precision::Double),
  (BackendPreference::Threaded, Precision::Double),
  (BackendPreference::SinglePrecision, Precision::Single),
];

pub fn compare(args: &CompareArgs, jobs: usize) -> Result<CompareReport, Report> {
  let dataset = Dataset::simulate(&args.dataset)?;
  let registry = BackendRegistry::default();

  let mut results = REQUESTS
    .iter()
    .map(|&(preference, precision)| {
      let mut engine = args.engine.clone();
      engine.backend = preference;
      engine.precision = precision;
      let outcome = dataset.likelihood(&registry, &engine.params(jobs)).and_then(|mut likelihood| {
        let start = Instant::now();
        let log_likelihood = likelihood.calculate_log_likelihood()?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok((likelihood.core().kind(), log_likelihood, elapsed_ms))
      });
      match outcome {
        Ok((backend, log_likelihood, elapsed_ms)) => {
          info!("{preference}: backend '{backend}' gives {log_likelihood} in {elapsed_ms:.3} ms");
          BackendResult {
            requested: preference,
            backend: Some(backend),
            precision,
            log_likelihood: Some(log_likelihood),
            relative_difference: None,
            elapsed_ms: Some(elapsed_ms),
            error: None,
          }
        }
        Err(report) => {
          warn!("{preference}: {}", report_to_string(&report));
          BackendResult {
            requested: preference,
            backend: None,
            precision,
            log_likelihood: None,
            relative_difference: None,
            elapsed_ms: None,
            error: Some(report_to_string(&report)),
          }
        }
      }
    })
    .collect_vec();

  let Some(reference) = results.first().and_then(|result| result.log_likelihood) else {
    return make_error!("The scalar backend failed to compute the reference log-likelihood");
  };

  for result in &mut results {
    result.relative_difference = result
      .log_likelihood
      .map(|log_likelihood| ((log_likelihood - reference) / reference).abs());
  }

  Ok(CompareReport {
    dataset: DatasetSummary::from(&dataset),
    reference,
    results,
  })
}

pub fn run_compare(args: &CompareArgs, jobs: usize) -> Result<(), Report> {
  let report = compare(args, jobs)?;
  println!("{}", serde_json::to_string_pretty(&report)?);

  let difference = report.max_relative_difference();
  if difference > args.tolerance {
    return make_error!(
      "Backends disagree: relative difference {difference:e} exceeds the tolerance {:e}",
      args.tolerance
    );
  }
  Ok(())
}
