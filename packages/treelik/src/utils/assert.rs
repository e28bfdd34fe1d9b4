/// Compares two floating-point values or arrays within an absolute tolerance and, on failure, prints both sides with
/// `pretty_assertions` diff formatting.
#[macro_export]
macro_rules! pretty_assert_abs_diff_eq {
  ($left:expr, $right:expr, epsilon = $eps:expr) => {{
    let (left, right) = (&$left, &$right);
    if !approx::abs_diff_eq!(*left, *right, epsilon = $eps) {
      pretty_assertions::assert_eq!(format!("{left:#?}"), format!("{right:#?}"));
      panic!("Values differ by more than {:e}, but their debug representations are identical", $eps);
    }
  }};
}
