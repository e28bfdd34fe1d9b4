/// Log-likelihood reported when the total likelihood underflows to exactly zero. Finite, so that it never turns an
/// acceptance ratio into NaN.
pub const LOG_ZERO: f64 = -1e300;

/// Largest per-pattern partial below which `Rescaling::Threshold` normalizes a pattern
pub const SCALING_THRESHOLD: f64 = 1e-100;

/// Smallest per-pattern maximum that single-precision partials tolerate before being rescaled
pub const SINGLE_PRECISION_SCALING_THRESHOLD: f64 = 1e-30;

/// Tolerance used when checking that transition-matrix rows and frequency vectors sum to one
pub const STOCHASTIC_TOLERANCE: f64 = 1e-6;

pub const DEFAULT_MEAN_BRANCH_LENGTH: f64 = 0.1;

/// Below this many patterns the threaded backend declines the configuration: there is too little work to spread.
pub const THREADED_MIN_PATTERNS: usize = 128;
