//! Backtest of discretized positions.
//!
//! Raw model outputs are mapped onto long, flat or short with a fixed dead
//! zone around 0.5, multiplied by the realized returns, summed across
//! instruments per date and scored with the annualized sample Sharpe ratio.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use ndarray::{s, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use momentum_core::{SequenceDataset, EMPTY_TIME_LABEL};
use momentum_models::TradingModel;
use momentum_tensor::sharpe::{annualized_sharpe, TRADING_DAYS_PER_YEAR};

use crate::error::{Result, TrainingError};

/// Outputs strictly above this go long.
pub const LONG_THRESHOLD: f32 = 0.6;
/// Outputs strictly below this go short.
pub const SHORT_THRESHOLD: f32 = 0.4;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Maps a raw output to +1, 0 or -1. Both thresholds are exclusive.
pub fn discretize_position(output: f32) -> i8 {
    if output > LONG_THRESHOLD {
        1
    } else if output < SHORT_THRESHOLD {
        -1
    } else {
        0
    }
}

/// Calendar years `[years_geq, years_lt)` kept in a backtest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub years_geq: i32,
    pub years_lt: i32,
}

impl Default for YearRange {
    fn default() -> Self {
        Self {
            years_geq: i32::MIN,
            years_lt: i32::MAX,
        }
    }
}

impl YearRange {
    pub fn new(years_geq: i32, years_lt: i32) -> Self {
        Self { years_geq, years_lt }
    }

    pub fn contains(&self, year: i32) -> bool {
        year >= self.years_geq && year < self.years_lt
    }
}

/// One backtested cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub identifier: String,
    pub time: NaiveDateTime,
    pub returns: f64,
    pub position: i8,
    pub captured_returns: f64,
}

/// Per-cell backtest table and the portfolio Sharpe ratio.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResults {
    pub rows: Vec<PositionRecord>,
    pub sharpe: f64,
}

impl BacktestResults {
    /// Captured returns summed across instruments, ordered by date.
    pub fn portfolio_returns(&self) -> BTreeMap<NaiveDateTime, f64> {
        let mut by_time = BTreeMap::new();
        for row in &self.rows {
            *by_time.entry(row.time).or_insert(0.0) += row.captured_returns;
        }
        by_time
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn to_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path).map_err(|source| TrainingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_csv(file)?;
        info!(path = %path.display(), rows = self.rows.len(), "Wrote backtest results");
        Ok(())
    }
}

/// Parses a timestamp label; the empty label has no time.
fn parse_time(label: &str) -> Result<Option<NaiveDateTime>> {
    if label == EMPTY_TIME_LABEL {
        return Ok(None);
    }
    if let Ok(date) = NaiveDate::parse_from_str(label, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0));
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(label, format).ok())
        .map(Some)
        .ok_or_else(|| TrainingError::InvalidTimestamp {
            label: label.to_string(),
        })
}

/// Runs a model over a partition and backtests its positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionEvaluator {
    workers: usize,
    annualization: f64,
}

impl PositionEvaluator {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            annualization: TRADING_DAYS_PER_YEAR,
        }
    }

    pub fn with_annualization(mut self, annualization: f64) -> Self {
        self.annualization = annualization;
        self
    }

    /// Backtests the first output channel.
    ///
    /// With `sliding_window` only the last step of every window is used;
    /// otherwise every step is. Cells without a timestamp are skipped.
    pub fn get_positions(
        &self,
        data: &SequenceDataset,
        model: &dyn TradingModel,
        sliding_window: bool,
        years: YearRange,
    ) -> Result<BacktestResults> {
        let (inputs, labels, _, identifiers, timestamps) = data.unpack();
        let outputs = model.predict(inputs, self.workers)?;
        let outputs = outputs.index_axis(Axis(2), 0);
        let returns = labels.index_axis(Axis(2), 0);

        let steps = if sliding_window {
            data.time_steps().saturating_sub(1)..data.time_steps()
        } else {
            0..data.time_steps()
        };

        let mut rows = Vec::new();
        for ((ids, times), (outs, rets)) in identifiers
            .slice(s![.., steps.clone()])
            .outer_iter()
            .zip(timestamps.slice(s![.., steps.clone()]).outer_iter())
            .zip(
                outputs
                    .slice(s![.., steps.clone()])
                    .outer_iter()
                    .zip(returns.slice(s![.., steps.clone()]).outer_iter()),
            )
        {
            for (((identifier, label), output), ret) in ids.iter().zip(times).zip(outs).zip(rets) {
                let Some(time) = parse_time(label)? else {
                    continue;
                };
                if !years.contains(time.year()) {
                    continue;
                }
                let position = discretize_position(*output);
                let returns = f64::from(*ret);
                rows.push(PositionRecord {
                    identifier: identifier.clone(),
                    time,
                    returns,
                    position,
                    captured_returns: returns * f64::from(position),
                });
            }
        }

        let mut results = BacktestResults {
            rows,
            sharpe: f64::NAN,
        };
        let series: Vec<f64> = results.portfolio_returns().into_values().collect();
        results.sharpe = annualized_sharpe(&series, self.annualization);
        debug!(
            rows = results.rows.len(),
            periods = series.len(),
            sharpe = results.sharpe,
            "Backtest finished"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{peeking_dataset, ScriptedModel};
    use ndarray::{array, Array2, Array3};

    #[test]
    fn test_discretize_boundaries() {
        assert_eq!(discretize_position(0.6), 0);
        assert_eq!(discretize_position(0.4), 0);
        assert_eq!(discretize_position(0.7), 1);
        assert_eq!(discretize_position(0.3), -1);
        assert_eq!(discretize_position(0.5), 0);
    }

    #[test]
    fn test_parse_time_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 3, 4)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_time("2020-03-04").unwrap(), Some(expected));
        assert_eq!(parse_time("2020-03-04 00:00:00").unwrap(), Some(expected));
        assert_eq!(parse_time("2020-03-04T00:00:00").unwrap(), Some(expected));
        assert_eq!(parse_time("").unwrap(), None);
        assert!(matches!(
            parse_time("04/03/2020"),
            Err(TrainingError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_two_instrument_backtest() {
        let data = peeking_dataset(&[[0.01, -0.01, 0.02], [0.02, 0.01, -0.01]]);
        let mut model = ScriptedModel::new(vec![]);
        model.set_version(1.0);

        let results = PositionEvaluator::new(2)
            .get_positions(&data, &model, false, YearRange::default())
            .unwrap();
        assert_eq!(results.rows.len(), 6);
        assert!(results.rows.iter().all(|r| r.position == 1));

        let portfolio: Vec<f64> = results.portfolio_returns().into_values().collect();
        let expected = [0.03, 0.0, 0.01];
        for (got, want) in portfolio.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
        let want = annualized_sharpe(&portfolio, 252.0);
        assert!((results.sharpe - want).abs() < 1e-9);
        assert!((results.sharpe - 13.856).abs() < 1e-2);
    }

    #[test]
    fn test_sliding_window_uses_last_step() {
        let data = peeking_dataset(&[[0.01, -0.01, 0.02], [0.02, 0.01, -0.01]]);
        let mut model = ScriptedModel::new(vec![]);
        model.set_version(0.0);

        let results = PositionEvaluator::new(1)
            .get_positions(&data, &model, true, YearRange::default())
            .unwrap();
        assert_eq!(results.rows.len(), 2);
        // outputs equal the returns, far below the short threshold
        assert!(results.rows.iter().all(|r| r.position == -1));
        assert_eq!(results.rows[0].time.day(), 3);
        assert!((results.rows[1].captured_returns - 0.01).abs() < 1e-7);
        // a single period has no sample dispersion
        assert!(results.sharpe.is_nan());
    }

    #[test]
    fn test_year_range_and_padding() {
        let data = SequenceDataset::new(
            Array3::zeros((1, 4, 1)),
            array![[[0.01f32], [0.02], [0.03], [0.0]]],
            array![[1.0f32, 1.0, 1.0, 0.0]],
            Array2::from_elem((1, 4), "A".to_string()),
            array![["2019-12-31", "2020-01-02", "2021-01-04", ""]].mapv(str::to_string),
        )
        .unwrap();
        let mut model = ScriptedModel::new(vec![]);
        model.set_version(0.9);

        let results = PositionEvaluator::new(1)
            .get_positions(&data, &model, false, YearRange::new(2020, 2021))
            .unwrap();
        assert_eq!(results.rows.len(), 1);
        assert_eq!(results.rows[0].time.year(), 2020);

        let all = PositionEvaluator::new(1)
            .get_positions(&data, &model, false, YearRange::default())
            .unwrap();
        assert_eq!(all.rows.len(), 3);
    }

    #[test]
    fn test_invalid_timestamp_is_reported() {
        let data = SequenceDataset::new(
            Array3::zeros((1, 1, 1)),
            Array3::zeros((1, 1, 1)),
            Array2::ones((1, 1)),
            Array2::from_elem((1, 1), "A".to_string()),
            Array2::from_elem((1, 1), "yesterday".to_string()),
        )
        .unwrap();
        let model = ScriptedModel::new(vec![]);
        let err = PositionEvaluator::new(1)
            .get_positions(&data, &model, false, YearRange::default())
            .unwrap_err();
        assert!(matches!(err, TrainingError::InvalidTimestamp { label } if label == "yesterday"));
    }

    #[test]
    fn test_results_csv() {
        let data = peeking_dataset(&[[0.01, -0.01]]);
        let mut model = ScriptedModel::new(vec![]);
        model.set_version(1.0);
        let results = PositionEvaluator::new(1)
            .get_positions(&data, &model, false, YearRange::default())
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        results.to_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("identifier,time,returns,position,captured_returns")
        );
        assert_eq!(lines.count(), 2);
    }
}
