pub mod clap_styles;
pub mod jobs;
pub mod treelik_cli;
pub mod verbosity;
