use eyre::Report;

pub fn report_to_string(report: &Report) -> String {
  let strings: Vec<String> = report.chain().map(std::string::ToString::to_string).collect();
  strings.join(": ")
}

#[macro_export(local_inner_macros)]
macro_rules! make_error {
  ($($arg:tt)*) => {
    {
      Err(eyre::eyre!(std::format!($($arg)*)))
    }
  };
}

pub use make_error;

#[macro_export(local_inner_macros)]
macro_rules! make_report {
  ($($arg:tt)*) => {
    {
      eyre::eyre!($($arg)*)
    }
  };
}

pub use make_report;

#[macro_export(local_inner_macros)]
macro_rules! make_internal_error {
  ($($arg:tt)*) => {
    {
      let msg_external = std::format!($($arg)*);
      let msg = std::format!("{msg_external}. This is an internal error. Please report it to developers.");
      Err(eyre::eyre!(msg))
    }
  };
}

pub use make_internal_error;

#[macro_export(local_inner_macros)]
macro_rules! make_internal_report {
  ($($arg:tt)*) => {
    {
      let msg_external = std::format!($($arg)*);
      let msg = std::format!("{msg_external}. This is an internal error. Please report it to developers.");
      eyre::eyre!(msg)
    }
  };
}

pub use make_internal_report;

#[cfg(test)]
mod tests {
  use super::*;
  use eyre::WrapErr;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  fn joins_report_chain() {
    let report = make_report!("inner failure").wrap_err("When evaluating likelihood");
    assert_eq!(report_to_string(&report), "When evaluating likelihood: inner failure");
  }

  #[rstest]
  fn internal_error_mentions_developers() {
    let result: Result<(), Report> = make_internal_error!("Node {} has no slot", 3);
    let msg = report_to_string(&result.unwrap_err());
    assert_eq!(
      msg,
      "Node 3 has no slot. This is an internal error. Please report it to developers."
    );
  }
}
