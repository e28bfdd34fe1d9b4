use clap::{ArgAction, Args};
use log::LevelFilter;

/// Console log levels from quietest to noisiest
const LEVELS: [LevelFilter; 6] = [
  LevelFilter::Off,
  LevelFilter::Error,
  LevelFilter::Warn,
  LevelFilter::Info,
  LevelFilter::Debug,
  LevelFilter::Trace,
];

fn parse_level(s: &str) -> Result<LevelFilter, String> {
  LEVELS
    .iter()
    .find(|level| level.as_str().eq_ignore_ascii_case(s))
    .copied()
    .ok_or_else(|| format!("unknown level '{s}', expected one of: off, error, warn, info, debug, trace"))
}

#[derive(Args, Debug, Clone)]
pub struct Verbosity {
  /// Log level of console output: off, error, warn, info, debug or trace
  #[clap(long, global = true, value_parser = parse_level, default_value = "warn")]
  #[clap(conflicts_with_all = ["quiet", "verbose", "silent"])]
  #[clap(display_order = 95)]
  pub verbosity: LevelFilter,

  /// Disable all console output. Same as `--verbosity=off`
  #[clap(long, global = true)]
  #[clap(conflicts_with_all = ["quiet", "verbose", "verbosity"])]
  #[clap(display_order = 96)]
  pub silent: bool,

  /// Raise the log level by one step per occurrence
  #[clap(long, short = 'v', action = ArgAction::Count, global = true)]
  #[clap(conflicts_with_all = ["quiet", "verbosity", "silent"])]
  #[clap(display_order = 97)]
  pub verbose: u8,

  /// Lower the log level by one step per occurrence
  #[clap(long, short = 'q', action = ArgAction::Count, global = true)]
  #[clap(conflicts_with_all = ["verbose", "verbosity"])]
  #[clap(display_order = 98)]
  pub quiet: u8,
}

impl Verbosity {
  /// Level after applying `-v`/`-q` steps to the base level, clamped to the known levels
  pub fn get_filter_level(&self) -> LevelFilter {
    if self.silent {
      return LevelFilter::Off;
    }
    let base = LEVELS
      .iter()
      .position(|&level| level == self.verbosity)
      .unwrap_or(2);
    let index = (base + usize::from(self.verbose))
      .saturating_sub(usize::from(self.quiet))
      .min(LEVELS.len() - 1);
    LEVELS[index]
  }
}
