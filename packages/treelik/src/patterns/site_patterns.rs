use crate::alphabet::alphabet::Alphabet;
use crate::make_error;
use eyre::{Report, WrapErr};
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{Array2, Axis};

/// Alignment columns compressed into unique patterns.
///
/// `patterns[(p, t)]` is the character of taxon `t` in pattern `p`. Each pattern carries the number of alignment
/// columns it stands for.
#[derive(Clone, Debug)]
pub struct SitePatterns {
  taxa: Vec<String>,
  patterns: Array2<char>,
  weights: Vec<f64>,
  site_to_pattern: Vec<usize>,
}

impl SitePatterns {
  /// Compresses an in-memory alignment (taxon name to sequence). Patterns are numbered in order of first appearance.
  pub fn from_alignment(alignment: &IndexMap<String, String>) -> Result<Self, Report> {
    if alignment.is_empty() {
      return make_error!("Alignment is empty");
    }

    let taxa = alignment.keys().cloned().collect_vec();
    let sequences = alignment
      .values()
      .map(|seq| seq.chars().map(|c| c.to_ascii_uppercase()).collect_vec())
      .collect_vec();

    let site_count = sequences[0].len();
    if site_count == 0 {
      return make_error!("Alignment has no columns");
    }
    if let Some((name, seq)) = taxa.iter().zip(&sequences).find(|(_, seq)| seq.len() != site_count) {
      return make_error!(
        "Sequences of an alignment must have equal length, but sequence '{name}' has length {} and the first sequence has length {site_count}",
        seq.len()
      );
    }

    let mut unique: IndexMap<Vec<char>, usize> = IndexMap::new();
    let mut site_to_pattern = Vec::with_capacity(site_count);
    for site in 0..site_count {
      let column = sequences.iter().map(|seq| seq[site]).collect_vec();
      let entry = unique.entry(column);
      site_to_pattern.push(entry.index());
      *entry.or_insert(0) += 1;
    }

    let weights = unique.values().map(|&count| count as f64).collect_vec();
    let columns = unique.into_keys().collect_vec();
    let patterns = Array2::from_shape_fn((columns.len(), taxa.len()), |(p, t)| columns[p][t]);

    Ok(Self {
      taxa,
      patterns,
      weights,
      site_to_pattern,
    })
  }

  #[inline]
  pub fn pattern_count(&self) -> usize {
    self.patterns.len_of(Axis(0))
  }

  #[inline]
  pub fn taxon_count(&self) -> usize {
    self.taxa.len()
  }

  #[inline]
  pub fn site_count(&self) -> usize {
    self.site_to_pattern.len()
  }

  pub fn taxa(&self) -> &[String] {
    &self.taxa
  }

  /// Number of alignment columns behind each pattern
  pub fn weights(&self) -> &[f64] {
    &self.weights
  }

  /// Pattern index of every alignment column
  pub fn site_to_pattern(&self) -> &[usize] {
    &self.site_to_pattern
  }

  pub fn taxon_index(&self, name: &str) -> Option<usize> {
    self.taxa.iter().position(|taxon| taxon == name)
  }

  /// Characters of one taxon across all patterns
  pub fn taxon_chars(&self, taxon: usize) -> Vec<char> {
    self.patterns.column(taxon).to_vec()
  }

  /// Compact tip states of a taxon, one per pattern
  pub fn tip_states(&self, alphabet: &Alphabet, taxon: usize) -> Result<Vec<usize>, Report> {
    alphabet
      .states(&self.taxon_chars(taxon))
      .wrap_err_with(|| format!("When converting sequence of taxon '{}' to states", self.taxa[taxon]))
  }

  /// Tip partials of a taxon as a `pattern × state` row-major array
  pub fn tip_partials(&self, alphabet: &Alphabet, taxon: usize) -> Result<Vec<f64>, Report> {
    let mut partials = Vec::with_capacity(self.pattern_count() * alphabet.n_states());
    for c in self.taxon_chars(taxon) {
      let profile = alphabet
        .profile(c)
        .wrap_err_with(|| format!("When converting sequence of taxon '{}' to partials", self.taxa[taxon]))?;
      partials.extend(profile.iter());
    }
    Ok(partials)
  }
}
