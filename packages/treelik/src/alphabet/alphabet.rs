use crate::make_error;
use clap::ValueEnum;
use eyre::Report;
use indexmap::{indexmap, IndexMap, IndexSet};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use strum_macros::Display;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, SmartDefault, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum AlphabetName {
  #[default]
  Nuc,
  Aa,
}

/// Characters of a sequence alphabet and their mapping onto likelihood states
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alphabet {
  name: AlphabetName,
  canonical: IndexSet<char>,
  ambiguous: IndexMap<char, Vec<char>>,
  unknown: char,
  gap: char,
}

impl Alphabet {
  pub fn new(name: AlphabetName) -> Self {
    match name {
      AlphabetName::Nuc => Self {
        name,
        canonical: ['A', 'C', 'G', 'T'].into_iter().collect(),
        ambiguous: indexmap! {
          'R' => vec!['A', 'G'],
          'Y' => vec!['C', 'T'],
          'S' => vec!['C', 'G'],
          'W' => vec!['A', 'T'],
          'K' => vec!['G', 'T'],
          'M' => vec!['A', 'C'],
          'D' => vec!['A', 'G', 'T'],
          'H' => vec!['A', 'C', 'T'],
          'B' => vec!['C', 'G', 'T'],
          'V' => vec!['A', 'C', 'G'],
        },
        unknown: 'N',
        gap: '-',
      },
      AlphabetName::Aa => Self {
        name,
        canonical: [
          'A', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'V', 'W', 'Y',
        ]
        .into_iter()
        .collect(),
        ambiguous: indexmap! {
          'B' => vec!['N', 'D'],
          'Z' => vec!['Q', 'E'],
          'J' => vec!['L', 'I'],
        },
        unknown: 'X',
        gap: '-',
      },
    }
  }

  #[inline]
  pub const fn name(&self) -> AlphabetName {
    self.name
  }

  /// Number of likelihood states
  #[inline]
  pub fn n_states(&self) -> usize {
    self.canonical.len()
  }

  /// State code used for characters that do not pin down a single state
  #[inline]
  pub fn ambiguous_state(&self) -> usize {
    self.n_states()
  }

  pub fn canonical(&self) -> impl Iterator<Item = char> + '_ {
    self.canonical.iter().copied()
  }

  #[inline]
  pub fn char(&self, state: usize) -> Option<char> {
    self.canonical.get_index(state).copied()
  }

  #[inline]
  pub fn is_canonical(&self, c: char) -> bool {
    self.canonical.contains(&c)
  }

  #[inline]
  pub fn is_ambiguous(&self, c: char) -> bool {
    self.ambiguous.contains_key(&c)
  }

  #[inline]
  pub fn is_undetermined(&self, c: char) -> bool {
    c == self.unknown || c == self.gap
  }

  #[inline]
  pub fn contains(&self, c: char) -> bool {
    self.is_canonical(c) || self.is_ambiguous(c) || self.is_undetermined(c)
  }

  /// Compact state of a character: its canonical index, or the ambiguous state for anything else
  pub fn state(&self, c: char) -> Result<usize, Report> {
    let c = c.to_ascii_uppercase();
    if let Some(index) = self.canonical.get_index_of(&c) {
      Ok(index)
    } else if self.contains(c) {
      Ok(self.ambiguous_state())
    } else {
      make_error!("Character '{c}' is not part of the {} alphabet", self.name)
    }
  }

  /// Tip partial of a character: one for every state the character is compatible with, zero elsewhere
  pub fn profile(&self, c: char) -> Result<Array1<f64>, Report> {
    let c = c.to_ascii_uppercase();
    let n = self.n_states();
    if let Some(index) = self.canonical.get_index_of(&c) {
      let mut profile = Array1::zeros(n);
      profile[index] = 1.0;
      Ok(profile)
    } else if let Some(resolutions) = self.ambiguous.get(&c) {
      let mut profile = Array1::zeros(n);
      for r in resolutions {
        if let Some(index) = self.canonical.get_index_of(r) {
          profile[index] = 1.0;
        }
      }
      Ok(profile)
    } else if self.is_undetermined(c) {
      Ok(Array1::ones(n))
    } else {
      make_error!("Character '{c}' is not part of the {} alphabet", self.name)
    }
  }

  /// Whether the sequence has characters compatible with some but not all states. Compact tip states cannot express
  /// those, so such tips need full partials.
  pub fn has_partial_ambiguity(&self, seq: &[char]) -> bool {
    seq.iter().any(|&c| self.is_ambiguous(c.to_ascii_uppercase()))
  }

  pub fn states(&self, seq: &[char]) -> Result<Vec<usize>, Report> {
    seq.iter().map(|&c| self.state(c)).collect()
  }
}

impl Default for Alphabet {
  fn default() -> Self {
    Self::new(AlphabetName::default())
  }
}
