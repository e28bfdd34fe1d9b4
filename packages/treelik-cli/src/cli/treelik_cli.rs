#![allow(clippy::large_enum_variant)]

use crate::cli::clap_styles::styles;
use crate::cli::jobs::Jobs;
use crate::cli::verbosity::Verbosity;
use crate::commands::check_restore::CheckRestoreArgs;
use crate::commands::compare::CompareArgs;
use crate::commands::evaluate::EvaluateArgs;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use eyre::Report;
use std::fmt::Debug;
use std::io;
use treelik::utils::global_init::setup_logger;

#[derive(Parser, Debug)]
#[clap(name = "treelik")]
#[clap(author, version)]
#[clap(styles = styles())]
#[clap(verbatim_doc_comment)]
/// Phylogenetic tree likelihood by Felsenstein pruning, on interchangeable computation backends
///
/// All commands work on synthetic data: a random tree and an alignment simulated on it, both reproducible from a seed.
pub struct TreelikArgs {
  #[clap(subcommand)]
  pub command: TreelikCommands,

  #[clap(flatten)]
  pub jobs: Jobs,

  #[clap(flatten)]
  pub verbosity: Verbosity,
}

#[derive(Subcommand, Debug)]
#[clap(verbatim_doc_comment)]
pub enum TreelikCommands {
  /// Generate shell completions.
  ///
  /// This will print the completions file contents to the console. Refer to your shell's documentation on how to install the completions.
  ///
  /// Example for Ubuntu Linux:
  ///
  ///    treelik completions bash > ~/.local/share/bash-completion/treelik
  ///
  Completions {
    /// Name of the shell to generate appropriate completions
    #[clap(value_name = "SHELL", value_enum, default_value_t = Shell::Bash)]
    shell: Shell,
  },

  /// Computes the log-likelihood of a simulated alignment on the selected backend and prints it as JSON.
  Evaluate(EvaluateArgs),

  /// Computes the log-likelihood on every available backend and reports the differences and timings.
  Compare(CompareArgs),

  /// Runs a sequence of random branch-length proposals, accepting and rejecting them, and verifies that every rejection restores the likelihood exactly.
  CheckRestore(CheckRestoreArgs),
}

pub fn generate_shell_completions(shell: Shell) -> Result<(), Report> {
  let mut command = TreelikArgs::command();
  let bin_name = command.get_name().to_owned();
  generate(shell, &mut command, bin_name, &mut io::stdout());
  Ok(())
}

pub fn treelik_parse_cli_args() -> Result<TreelikArgs, Report> {
  let args = TreelikArgs::parse();
  setup_logger(args.verbosity.get_filter_level());
  Ok(args)
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;
  use rstest::rstest;

  #[rstest]
  fn command_line_interface_is_consistent() {
    TreelikArgs::command().debug_assert();
  }

  #[rstest]
  fn parses_evaluate_arguments() {
    let args = TreelikArgs::try_parse_from([
      "treelik", "evaluate", "--tips", "20", "--sites", "300", "--model", "hky85", "--gamma-categories", "4",
      "--rescaling", "always", "-j", "2", "-vv",
    ])
    .unwrap();
    assert_eq!(args.jobs.jobs, 2);
    match args.command {
      TreelikCommands::Evaluate(evaluate) => {
        assert_eq!(evaluate.dataset.tips, 20);
        assert_eq!(evaluate.dataset.sites, 300);
        assert_eq!(evaluate.dataset.gamma_categories, 4);
      }
      other => panic!("unexpected command: {other:?}"),
    }
  }
}
