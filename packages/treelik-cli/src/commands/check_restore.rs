use crate::commands::dataset::{Dataset, DatasetArgs, DatasetSummary, EngineArgs};
use clap::Args;
use eyre::Report;
use itertools::Itertools;
use log::{debug, info};
use rand::Rng;
use serde::Serialize;
use treelik::likelihood::likelihood_core::BackendKind;
use treelik::likelihood::registry::BackendRegistry;
use treelik::make_error;
use treelik::treelikelihood::tree_likelihood::TreeLikelihood;
use treelik::utils::random::{get_random_number_generator, random_choice};

#[derive(Args, Debug, Clone)]
pub struct CheckRestoreArgs {
  #[clap(flatten)]
  pub dataset: DatasetArgs,

  #[clap(flatten)]
  pub engine: EngineArgs,

  /// Number of branch-length proposals
  #[clap(long, default_value_t = 200)]
  pub proposals: usize,

  /// Width of the proposal window on the log scale of branch lengths
  #[clap(long, default_value_t = 1.0)]
  pub window: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RestoreMismatch {
  pub proposal: usize,
  pub node: usize,
  pub expected: f64,
  pub actual: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckRestoreReport {
  pub dataset: DatasetSummary,
  pub backend: BackendKind,
  pub initial_log_likelihood: f64,
  pub final_log_likelihood: f64,
  /// Final log-likelihood recalculated from scratch
  pub recomputed_log_likelihood: f64,
  pub accepted: usize,
  pub rejected: usize,
  pub mismatches: Vec<RestoreMismatch>,
}

/// Log-likelihood recomputed by the core from the root partials it currently holds
fn core_log_likelihood(likelihood: &TreeLikelihood) -> Result<f64, Report> {
  likelihood.core().calculate_log_likelihood(
    likelihood.tree().root(),
    likelihood.model().frequencies().view(),
    likelihood.site_model().proportions().view(),
  )
}

/// Metropolis sampling of branch lengths. Every rejected proposal is rolled back with `restore_state`, after which
/// the root partials must reproduce the pre-proposal log-likelihood bit for bit.
pub fn check_restore(args: &CheckRestoreArgs, jobs: usize) -> Result<CheckRestoreReport, Report> {
  if !(args.window > 0.0 && args.window.is_finite()) {
    return make_error!("Proposal window must be positive, but got {}", args.window);
  }

  let dataset = Dataset::simulate(&args.dataset)?;
  let registry = BackendRegistry::default();
  let mut likelihood = dataset.likelihood(&registry, &args.engine.params(jobs))?;
  let mut rng = get_random_number_generator(args.dataset.seed.map(|seed| seed.wrapping_add(1)));

  let root = likelihood.tree().root();
  let branches = (0..likelihood.tree().node_count())
    .filter(|&node| node != root)
    .collect_vec();

  let initial_log_likelihood = likelihood.calculate_log_likelihood()?;
  let mut current = initial_log_likelihood;
  let mut accepted = 0;
  let mut rejected = 0;
  let mut mismatches = vec![];

  for proposal in 0..args.proposals {
    let node = random_choice(branches.iter().copied(), &mut rng)?;
    let old_length = likelihood.tree().branch_length(node);
    let ratio = (args.window * (rng.gen::<f64>() - 0.5)).exp();

    likelihood.store_state();
    likelihood.set_branch_length(node, old_length * ratio)?;
    let proposed = likelihood.calculate_log_likelihood()?;

    // Multiplicative proposal: the Hastings ratio is the ratio of new to old length
    let log_acceptance = proposed - current + ratio.ln();
    if rng.gen::<f64>().ln() < log_acceptance {
      likelihood.accept_state();
      current = proposed;
      accepted += 1;
      debug!("Proposal {proposal}: accepted branch {node} length {}", old_length * ratio);
    } else {
      likelihood.restore_state()?;
      rejected += 1;
      let restored = core_log_likelihood(&likelihood)?;
      if restored.to_bits() != current.to_bits() {
        mismatches.push(RestoreMismatch {
          proposal,
          node,
          expected: current,
          actual: restored,
        });
      }
    }
  }

  likelihood.make_all_dirty();
  let recomputed_log_likelihood = likelihood.calculate_log_likelihood()?;

  info!(
    "{accepted} proposals accepted, {rejected} rejected, {} restore mismatches",
    mismatches.len()
  );

  Ok(CheckRestoreReport {
    dataset: DatasetSummary::from(&dataset),
    backend: likelihood.core().kind(),
    initial_log_likelihood,
    final_log_likelihood: current,
    recomputed_log_likelihood,
    accepted,
    rejected,
    mismatches,
  })
}

pub fn run_check_restore(args: &CheckRestoreArgs, jobs: usize) -> Result<(), Report> {
  let report = check_restore(args, jobs)?;
  println!("{}", serde_json::to_string_pretty(&report)?);

  if !report.mismatches.is_empty() {
    return make_error!(
      "{} of {} rejected proposals did not restore the previous log-likelihood",
      report.mismatches.len(),
      report.rejected
    );
  }
  Ok(())
}
