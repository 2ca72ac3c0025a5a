//! Sharpe-ratio training engine.
//!
//! This crate drives models from `momentum-models` through training, validation,
//! hyperparameter search and backtesting:
//!
//! - **Time indexing**: [`TimeIndex`] maps per-cell timestamp labels onto a dense
//!   index space with index 0 reserved for padding.
//! - **Diversified validation**: [`DiversifiedSharpeMonitor`] aggregates captured
//!   returns across instruments per time index, scores the portfolio each epoch,
//!   checkpoints on improvement and stops after the patience budget.
//! - **Training**: [`Trainer`] runs the epoch loop with [`Hook`]s and one of two
//!   stopping strategies.
//! - **Search**: [`Tuner`] samples hyperparameters with a [`RandomSearchOracle`] and
//!   delegates each trial to a [`TrialStrategy`].
//! - **Backtesting**: [`PositionEvaluator`] discretizes positions and reports the
//!   portfolio Sharpe ratio with a per-cell results table.
//! - **Facade**: [`MomentumNetwork`] ties the pieces together.
//!
//! ```text
//!   search ──► Tuner ──► TrialStrategy ──► Trainer ──► TradingModel
//!                              │               │
//!                              │               └──► DiversifiedSharpeMonitor ──► TimeIndex
//!                              ▼
//!                      best hyperparameters ──► fit ──► PositionEvaluator
//! ```

pub mod error;
pub mod evaluator;
pub mod hooks;
pub mod metrics;
pub mod monitor;
pub mod network;
pub mod time_index;
pub mod trainer;
pub mod tuner;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{Result, TrainingError};
pub use evaluator::{discretize_position, BacktestResults, PositionEvaluator, PositionRecord, YearRange};
pub use hooks::{EarlyStoppingHook, Hook, HookAction, HookError, HookList, LoggingHook, TerminateOnNaN};
pub use metrics::{Direction, EpochMetrics, History, LossRecorder};
pub use monitor::{DiversifiedSharpeMonitor, EpochReport, MonitorOutcome, MonitorState, ValidationSet};
pub use network::MomentumNetwork;
pub use time_index::TimeIndex;
pub use trainer::{FitReport, StoppingStrategy, Trainer, TrainerConfig};
pub use tuner::{
    DiversifiedSharpeStrategy, Objective, RandomSearchOracle, Trial, TrialMetrics, TrialRecord,
    TrialStatus, TrialStrategy, Tuner, ValidationLossStrategy,
};
