//! Sharpe statistics over materialized return series.
//!
//! Two conventions live here:
//!
//! - [`diversified_sharpe`]: population variance with the ε stabilizer, the same
//!   formula family as the training objective but without sign negation.
//! - [`annualized_sharpe`]: sample standard deviation (`ddof = 1`), used when
//!   reporting backtest performance.

use serde::{Deserialize, Serialize};

/// Default variance stabilizer.
pub const DEFAULT_EPSILON: f64 = 1e-9;

/// Trading days per year.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Numeric constants shared by the objective and the validation monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// Added to the variance before taking its square root.
    pub epsilon: f64,
    /// Periods per year; the ratio is scaled by its square root.
    pub annualization: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            annualization: TRADING_DAYS_PER_YEAR,
        }
    }
}

impl StabilityConfig {
    /// Creates a configuration with explicit constants.
    pub fn new(epsilon: f64, annualization: f64) -> Self {
        Self {
            epsilon,
            annualization,
        }
    }

    /// Replaces the variance stabilizer.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Replaces the annualization factor.
    pub fn with_annualization(mut self, annualization: f64) -> Self {
        self.annualization = annualization;
        self
    }
}

/// Arithmetic mean; zero for an empty series.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance `E[(x - E[x])²]`; zero for an empty series.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (`ddof = 1`); NaN for fewer than two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// `mean / sqrt(var + ε) * sqrt(A)` with population variance.
///
/// An empty series scores 0; a constant series stays finite thanks to ε.
pub fn diversified_sharpe(values: &[f64], config: &StabilityConfig) -> f64 {
    mean(values) / (population_variance(values) + config.epsilon).sqrt()
        * config.annualization.sqrt()
}

/// `mean / std * sqrt(A)` with the sample standard deviation.
///
/// NaN when the ratio is undefined: fewer than two periods or zero dispersion.
pub fn annualized_sharpe(values: &[f64], annualization: f64) -> f64 {
    let std = sample_std(values);
    if !std.is_finite() || std == 0.0 {
        return f64::NAN;
    }
    mean(values) / std * annualization.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol * b.abs().max(1.0)
    }

    #[test]
    fn test_portfolio_of_two_instruments() {
        let portfolio = [0.015, 0.0, 0.005];
        let m: f64 = 0.02 / 3.0;
        let var = ((0.015 - m).powi(2) + m.powi(2) + (0.005 - m).powi(2)) / 3.0;
        let expected = m / (var + 1e-9).sqrt() * 252f64.sqrt();
        let got = diversified_sharpe(&portfolio, &StabilityConfig::default());
        assert!(close(got, expected, 1e-12), "{} vs {}", got, expected);
    }

    #[test]
    fn test_constant_series_is_bounded_by_epsilon() {
        let values = [0.01; 10];
        let got = diversified_sharpe(&values, &StabilityConfig::default());
        let bound = 0.01 / 1e-9f64.sqrt() * 252f64.sqrt();
        assert!(got.is_finite());
        assert!(got <= bound * (1.0 + 1e-9));
    }

    #[test]
    fn test_empty_series_scores_zero() {
        assert_eq!(diversified_sharpe(&[], &StabilityConfig::default()), 0.0);
    }

    #[test]
    fn test_custom_stability_config() {
        let cfg = StabilityConfig::default()
            .with_epsilon(0.0)
            .with_annualization(1.0);
        let got = diversified_sharpe(&[1.0, 3.0], &cfg);
        assert!(close(got, 2.0, 1e-12));
    }

    #[test]
    fn test_annualized_sharpe_uses_sample_std() {
        let values = [0.01, -0.01, 0.02];
        let m: f64 = 0.02 / 3.0;
        let ss = (0.01 - m).powi(2) + (-0.01 - m).powi(2) + (0.02 - m).powi(2);
        let expected = m / (ss / 2.0).sqrt() * 252f64.sqrt();
        assert!(close(annualized_sharpe(&values, 252.0), expected, 1e-12));
    }

    #[test]
    fn test_annualized_sharpe_undefined_cases() {
        assert!(annualized_sharpe(&[0.01], 252.0).is_nan());
        assert!(annualized_sharpe(&[0.01, 0.01], 252.0).is_nan());
    }
}
