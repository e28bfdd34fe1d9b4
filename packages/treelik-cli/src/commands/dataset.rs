use clap::{Args, ValueEnum};
use eyre::Report;
use log::info;
use ndarray::Array1;
use serde::Serialize;
use smart_default::SmartDefault;
use std::sync::Arc;
use treelik::alphabet::alphabet::{Alphabet, AlphabetName};
use treelik::constants::DEFAULT_MEAN_BRANCH_LENGTH;
use treelik::likelihood::config::{Precision, Rescaling};
use treelik::likelihood::registry::{BackendPreference, BackendRegistry};
use treelik::make_error;
use treelik::models::site_model::SiteModel;
use treelik::models::substitution::{HKY85Params, Hky85, JC69Params, Jc69, SubstitutionModel};
use treelik::patterns::site_patterns::SitePatterns;
use treelik::simulate::simulate::simulate;
use treelik::tree::tree::Tree;
use treelik::treelikelihood::tree_likelihood::{TreeLikelihood, TreeLikelihoodParams};
use treelik::utils::random::get_random_number_generator;

#[derive(Copy, Clone, Debug, PartialEq, Eq, SmartDefault, ValueEnum, Serialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ModelName {
  Jc69,
  #[default]
  Hky85,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, SmartDefault, ValueEnum, Serialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RescalingPolicy {
  Never,
  Always,
  #[default]
  Threshold,
}

/// Synthetic dataset: a random tree and an alignment simulated on it
#[derive(Args, Debug, Clone)]
pub struct DatasetArgs {
  /// Number of tips of the random tree
  #[clap(long, default_value_t = 50)]
  pub tips: usize,

  /// Number of alignment columns to simulate
  #[clap(long, default_value_t = 1000)]
  pub sites: usize,

  /// Mean branch length of the random tree, in expected substitutions per site
  #[clap(long, default_value_t = DEFAULT_MEAN_BRANCH_LENGTH)]
  pub mean_branch_length: f64,

  /// Random seed. The same seed produces the same tree and alignment.
  #[clap(long)]
  pub seed: Option<u64>,

  /// Nucleotide substitution model
  #[clap(long, value_enum, default_value_t = ModelName::default())]
  pub model: ModelName,

  /// Transition/transversion rate ratio of the HKY85 model
  #[clap(long, default_value_t = 2.0)]
  pub kappa: f64,

  /// Number of discrete gamma rate categories. 1 means no rate variation.
  #[clap(long, default_value_t = 1)]
  pub gamma_categories: usize,

  /// Shape of the gamma distribution of rates across sites
  #[clap(long, default_value_t = 0.5)]
  pub gamma_shape: f64,

  /// Proportion of invariant sites
  #[clap(long)]
  pub invariant: Option<f64>,
}

/// Likelihood engine settings
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
  /// Computation backend. `auto` takes the first backend that loads.
  #[clap(long, value_enum, default_value_t = BackendPreference::default())]
  pub backend: BackendPreference,

  /// Floating-point precision of partials
  #[clap(long, value_enum, default_value_t = Precision::default())]
  pub precision: Precision,

  /// When partials are normalized to avoid underflow
  #[clap(long, value_enum, default_value_t = RescalingPolicy::default())]
  pub rescaling: RescalingPolicy,

  /// Normalization threshold used by `--rescaling=threshold`
  #[clap(long)]
  pub scaling_threshold: Option<f64>,

  /// Give unambiguous tips to the engine as partials rather than compact states
  #[clap(long)]
  pub tip_partials: bool,
}

impl EngineArgs {
  pub fn rescaling(&self) -> Rescaling {
    match (self.rescaling, self.scaling_threshold) {
      (RescalingPolicy::Never, _) => Rescaling::Never,
      (RescalingPolicy::Always, _) => Rescaling::Always,
      (RescalingPolicy::Threshold, Some(threshold)) => Rescaling::Threshold { threshold },
      (RescalingPolicy::Threshold, None) => Rescaling::threshold(),
    }
  }

  pub fn params(&self, jobs: usize) -> TreeLikelihoodParams {
    TreeLikelihoodParams {
      preference: self.backend,
      rescaling: self.rescaling(),
      precision: self.precision,
      threads: Some(jobs),
      use_tip_states: !self.tip_partials,
      dynamic_rescaling: self.rescaling == RescalingPolicy::Never,
    }
  }
}

#[derive(Clone, Debug)]
pub struct Dataset {
  pub tree: Tree,
  pub patterns: SitePatterns,
  pub alphabet: Alphabet,
  pub model: Arc<dyn SubstitutionModel>,
  pub site_model: SiteModel,
}

impl Dataset {
  pub fn simulate(args: &DatasetArgs) -> Result<Self, Report> {
    if args.tips < 2 {
      return make_error!("At least 2 tips are required, but got {}", args.tips);
    }
    if args.sites == 0 {
      return make_error!("At least 1 site is required");
    }

    let mut rng = get_random_number_generator(args.seed);
    let alphabet = Alphabet::new(AlphabetName::Nuc);

    let model: Arc<dyn SubstitutionModel> = match args.model {
      ModelName::Jc69 => Arc::new(Jc69::new(JC69Params {
        n_states: alphabet.n_states(),
      })?),
      ModelName::Hky85 => Arc::new(Hky85::new(&HKY85Params {
        kappa: args.kappa,
        pi: Array1::from_elem(alphabet.n_states(), 1.0 / alphabet.n_states() as f64),
      })?),
    };

    let site_model = if args.gamma_categories > 1 {
      SiteModel::gamma(args.gamma_shape, args.gamma_categories)?
    } else {
      SiteModel::single()
    };
    let site_model = match args.invariant {
      Some(proportion) => site_model.with_proportion_invariant(proportion)?,
      None => site_model,
    };

    let tree = Tree::random(args.tips, args.mean_branch_length, &mut rng)?;
    let alignment = simulate(&tree, model.as_ref(), &site_model, args.sites, &alphabet, &mut rng)?;
    let patterns = SitePatterns::from_alignment(&alignment)?;

    info!(
      "Simulated {} sites ({} unique patterns) on a tree with {} tips under {}",
      patterns.site_count(),
      patterns.pattern_count(),
      tree.tip_count(),
      model.name()
    );

    Ok(Self {
      tree,
      patterns,
      alphabet,
      model,
      site_model,
    })
  }

  pub fn likelihood(&self, registry: &BackendRegistry, params: &TreeLikelihoodParams) -> Result<TreeLikelihood, Report> {
    TreeLikelihood::new(
      self.tree.clone(),
      &self.patterns,
      &self.alphabet,
      Arc::clone(&self.model),
      self.site_model.clone(),
      registry,
      params,
    )
  }
}

/// Dimensions of a dataset, for reports
#[derive(Clone, Debug, Serialize)]
pub struct DatasetSummary {
  pub tips: usize,
  pub sites: usize,
  pub patterns: usize,
  pub categories: usize,
  pub model: String,
}

impl From<&Dataset> for DatasetSummary {
  fn from(dataset: &Dataset) -> Self {
    Self {
      tips: dataset.tree.tip_count(),
      sites: dataset.patterns.site_count(),
      patterns: dataset.patterns.pattern_count(),
      categories: dataset.site_model.category_count(),
      model: dataset.model.name().to_owned(),
    }
  }
}
