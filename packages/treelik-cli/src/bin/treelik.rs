use ctor::ctor;
use eyre::Report;
use log::info;
use treelik::utils::global_init::global_init;
use treelik_cli::cli::treelik_cli::{generate_shell_completions, treelik_parse_cli_args, TreelikCommands};
use treelik_cli::commands::check_restore::run_check_restore;
use treelik_cli::commands::compare::run_compare;
use treelik_cli::commands::evaluate::run_evaluate;

#[ctor]
fn init() {
  global_init();
}

fn main() -> Result<(), Report> {
  let args = treelik_parse_cli_args()?;

  info!("{:#?}", &args);

  args.jobs.init_thread_pool()?;
  let jobs = args.jobs.jobs;

  match args.command {
    TreelikCommands::Evaluate(evaluate_args) => {
      run_evaluate(&evaluate_args, jobs)?;
    }
    TreelikCommands::Compare(compare_args) => {
      run_compare(&compare_args, jobs)?;
    }
    TreelikCommands::CheckRestore(check_restore_args) => {
      run_check_restore(&check_restore_args, jobs)?;
    }
    TreelikCommands::Completions { shell } => {
      generate_shell_completions(shell)?;
    }
  }

  Ok(())
}
