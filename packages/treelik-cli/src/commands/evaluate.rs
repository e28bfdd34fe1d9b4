use crate::commands::dataset::{Dataset, DatasetArgs, DatasetSummary, EngineArgs};
use clap::Args;
use eyre::Report;
use itertools::Itertools;
use log::info;
use serde::Serialize;
use std::time::Instant;
use treelik::likelihood::config::{CoreConfig, Precision, Rescaling};
use treelik::likelihood::likelihood_core::BackendKind;
use treelik::likelihood::registry::BackendRegistry;

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
  #[clap(flatten)]
  pub dataset: DatasetArgs,

  #[clap(flatten)]
  pub engine: EngineArgs,

  /// Also report the log-likelihood of every alignment column
  #[clap(long)]
  pub sitewise: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct EvaluateReport {
  pub dataset: DatasetSummary,
  pub backend: BackendKind,
  pub precision: Precision,
  pub rescaling: Rescaling,
  pub log_likelihood: f64,
  pub elapsed_ms: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub site_log_likelihoods: Option<Vec<f64>>,
}

pub fn evaluate(args: &EvaluateArgs, jobs: usize) -> Result<EvaluateReport, Report> {
  let dataset = Dataset::simulate(&args.dataset)?;
  let registry = BackendRegistry::default();
  let mut likelihood = dataset.likelihood(&registry, &args.engine.params(jobs))?;

  let start = Instant::now();
  let log_likelihood = likelihood.calculate_log_likelihood()?;
  let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

  let site_log_likelihoods = if args.sitewise {
    let per_pattern = likelihood.site_log_likelihoods()?;
    let per_site = dataset
      .patterns
      .site_to_pattern()
      .iter()
      .map(|&pattern| per_pattern[pattern])
      .collect_vec();
    Some(per_site)
  } else {
    None
  };

  let config: &CoreConfig = likelihood.core().config();
  info!("Evaluated {config} in {elapsed_ms:.3} ms");

  Ok(EvaluateReport {
    dataset: DatasetSummary::from(&dataset),
    backend: likelihood.core().kind(),
    precision: config.precision,
    rescaling: likelihood.core().rescaling(),
    log_likelihood,
    elapsed_ms,
    site_log_likelihoods,
  })
}

pub fn run_evaluate(args: &EvaluateArgs, jobs: usize) -> Result<(), Report> {
  let report = evaluate(args, jobs)?;
  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::commands::dataset::{ModelName, RescalingPolicy};
  use approx::assert_abs_diff_eq;
  use rstest::rstest;
  use treelik::likelihood::registry::BackendPreference;

  fn args(backend: BackendPreference, sitewise: bool) -> EvaluateArgs {
    EvaluateArgs {
      dataset: DatasetArgs {
        tips: 10,
        sites: 200,
        mean_branch_length: 0.1,
        seed: Some(3),
        model: ModelName::Hky85,
        kappa: 2.5,
        gamma_categories: 4,
        gamma_shape: 0.8,
        invariant: None,
      },
      engine: EngineArgs {
        backend,
        precision: Precision::Double,
        rescaling: RescalingPolicy::Threshold,
        scaling_threshold: None,
        tip_partials: false,
      },
      sitewise,
    }
  }

  #[rstest]
  fn site_log_likelihoods_sum_to_total() {
    let report = evaluate(&args(BackendPreference::Scalar, true), 1).unwrap();
    assert_eq!(report.backend, BackendKind::Scalar);
    let sites = report.site_log_likelihoods.unwrap();
    assert_eq!(sites.len(), 200);
    assert_abs_diff_eq!(sites.iter().sum::<f64>(), report.log_likelihood, epsilon = 1e-8);
    assert!(report.log_likelihood < 0.0);
  }

  #[rstest]
  fn omits_site_log_likelihoods_unless_requested() {
    let report = evaluate(&args(BackendPreference::Auto, false), 1).unwrap();
    assert!(report.site_log_likelihoods.is_none());
    let json = serde_json::to_string(&report).unwrap();
    assert!(!json.contains("site_log_likelihoods"));
  }
}
