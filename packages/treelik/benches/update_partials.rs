use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array3;
use treelik::alphabet::alphabet::Alphabet;
use treelik::likelihood::config::{CoreConfig, Precision, Rescaling};
use treelik::likelihood::likelihood_core::LikelihoodCore;
use treelik::likelihood::operation::{ChildOperand, Operation};
use treelik::likelihood::registry::{BackendPreference, BackendRegistry, ScalarLoader, SinglePrecisionLoader, ThreadedLoader};
use treelik::models::site_model::SiteModel;
use treelik::models::substitution::{JC69Params, Jc69, SubstitutionModel};
use treelik::patterns::site_patterns::SitePatterns;
use treelik::simulate::simulate::simulate;
use treelik::tree::tree::Tree;
use treelik::utils::random::get_random_number_generator;

fn benchmark_main(c: &mut Criterion) {
  let mut rng = get_random_number_generator(Some(42));
  let tree = Tree::random(64, 0.05, &mut rng).unwrap();
  let model = Jc69::new(JC69Params::default()).unwrap();
  let site_model = SiteModel::gamma(0.5, 4).unwrap();
  let alphabet = Alphabet::default();
  let alignment = simulate(&tree, &model, &site_model, 5000, &alphabet, &mut rng).unwrap();
  let patterns = SitePatterns::from_alignment(&alignment).unwrap();

  let matrices: Vec<Array3<f64>> = (0..tree.node_count())
    .map(|node| {
      let mut m = Array3::zeros((4, 4, 4));
      for (mut category, &rate) in m.outer_iter_mut().zip(site_model.rates().iter()) {
        category.assign(&model.transition_matrix(rate * tree.branch_length(node)));
      }
      m
    })
    .collect();

  let operations: Vec<Operation<'_>> = tree
    .internal_post_order()
    .into_iter()
    .map(|node| {
      let children = tree
        .children(node)
        .iter()
        .map(|&child| ChildOperand::new(child, matrices[child].view()))
        .collect();
      Operation::new(node, children)
    })
    .collect();

  let config = CoreConfig::new(tree.node_count(), tree.tip_count(), patterns.pattern_count(), 4, 4)
    .with_pattern_weights(patterns.weights().to_vec())
    .with_rescaling(Rescaling::threshold());

  let backends: [(&str, BackendRegistry, CoreConfig); 3] = [
    ("scalar", BackendRegistry::new().with_loader(ScalarLoader), config.clone()),
    (
      "threaded",
      BackendRegistry::new().with_loader(ThreadedLoader::default()),
      config.clone(),
    ),
    (
      "single-precision",
      BackendRegistry::new().with_loader(SinglePrecisionLoader),
      config.clone().with_precision(Precision::Single),
    ),
  ];

  let mut g = c.benchmark_group("update_partials_operations");
  for (name, registry, config) in &backends {
    let Ok(mut core) = registry.create_core(config, BackendPreference::Auto) else {
      continue;
    };
    for tip in 0..tree.tip_count() {
      let states = patterns.tip_states(&alphabet, tip).unwrap();
      core.set_tip_states(tip, &states).unwrap();
    }

    g.bench_function(BenchmarkId::new(*name, patterns.pattern_count()), |b| {
      b.iter(|| {
        core.update_partials_operations(black_box(&operations)).unwrap();
        black_box(
          core
            .calculate_log_likelihood(tree.root(), model.frequencies().view(), site_model.proportions().view())
            .unwrap(),
        )
      });
    });
  }
  g.finish();
}

criterion_group!(benches, benchmark_main);
criterion_main!(benches);
