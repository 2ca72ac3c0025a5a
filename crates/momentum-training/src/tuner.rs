//! Random hyperparameter search.
//!
//! A [`Tuner`] asks its [`RandomSearchOracle`] for samples, hands each one to
//! a [`TrialStrategy`] and records the reported metrics under the project
//! directory. The two strategies differ in what they optimize:
//!
//! - [`ValidationLossStrategy`]: one fit per trial with early stopping on
//!   `val_loss`, minimized.
//! - [`DiversifiedSharpeStrategy`]: `executions_per_trial` fits per trial under
//!   a fresh [`DiversifiedSharpeMonitor`] each, best-epoch metrics averaged,
//!   `sharpe` maximized.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use momentum_checkpoint::{CheckpointError, CheckpointManager, ProjectLayout};
use momentum_core::{HyperParameters, SearchSpace, SequenceDataset, BATCH_SIZE};
use momentum_models::{ModelBuilder, TradingModel};

use crate::error::{Result, TrainingError};
use crate::metrics::Direction;
use crate::monitor::{DiversifiedSharpeMonitor, ValidationSet};
use crate::trainer::Trainer;

/// Best-epoch value of every metric reported by a trial.
pub type TrialMetrics = BTreeMap<String, f64>;

/// Draws before the oracle gives up on finding an untried sample.
const DEFAULT_MAX_COLLISIONS: usize = 20;

/// The metric a search optimizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub name: String,
    pub direction: Direction,
}

impl Objective {
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }

    pub fn validation_loss() -> Self {
        Self::new("val_loss", Direction::Min)
    }

    pub fn diversified_sharpe() -> Self {
        Self::new("sharpe", Direction::Max)
    }

    /// Objective value of a metric set, if present and finite.
    pub fn score(&self, metrics: &TrialMetrics) -> Option<f64> {
        metrics.get(&self.name).copied().filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Running,
    Completed,
    Failed,
}

/// One sample handed to a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub id: String,
    pub hyperparameters: HyperParameters,
    /// Where this trial keeps its best weights.
    pub checkpoint_dir: PathBuf,
    pub step: u64,
}

/// Persisted outcome of a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_id: String,
    pub hyperparameters: HyperParameters,
    pub metrics: TrialMetrics,
    pub score: Option<f64>,
    pub status: TrialStatus,
    pub step: u64,
    pub checkpoint_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Serialize)]
struct OracleFile<'a> {
    objective: &'a Objective,
    max_trials: usize,
    trials: Vec<&'a TrialRecord>,
}

/// Samples every dimension uniformly and independently, skipping repeats.
#[derive(Debug)]
pub struct RandomSearchOracle {
    space: SearchSpace,
    objective: Objective,
    max_trials: usize,
    max_collisions: usize,
    rng: StdRng,
    trials: BTreeMap<String, TrialRecord>,
    tried: HashSet<String>,
}

impl RandomSearchOracle {
    pub fn new(space: SearchSpace, objective: Objective, max_trials: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            space,
            objective,
            max_trials,
            max_collisions: DEFAULT_MAX_COLLISIONS,
            rng,
            trials: BTreeMap::new(),
            tried: HashSet::new(),
        }
    }

    pub fn with_max_collisions(mut self, max_collisions: usize) -> Self {
        self.max_collisions = max_collisions.max(1);
        self
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn trials(&self) -> impl Iterator<Item = &TrialRecord> {
        self.trials.values()
    }

    pub fn trial(&self, trial_id: &str) -> Option<&TrialRecord> {
        self.trials.get(trial_id)
    }

    /// Registers a new trial, or `None` once the budget or the space is used up.
    pub fn create_trial(&mut self, layout: &ProjectLayout, step: u64) -> Option<Trial> {
        if self.trials.len() >= self.max_trials {
            return None;
        }
        if self.tried.len() >= self.space.cardinality() {
            info!(tried = self.tried.len(), "Search space exhausted");
            return None;
        }

        for _ in 0..self.max_collisions {
            let hyperparameters = self.space.sample(&mut self.rng);
            if !self.tried.insert(hyperparameters.fingerprint()) {
                debug!(%hyperparameters, "Skipping repeated sample");
                continue;
            }
            let id = format!("{:04}", self.trials.len());
            let checkpoint_dir = layout.checkpoint_dir(&id, step);
            self.trials.insert(
                id.clone(),
                TrialRecord {
                    trial_id: id.clone(),
                    hyperparameters: hyperparameters.clone(),
                    metrics: TrialMetrics::new(),
                    score: None,
                    status: TrialStatus::Running,
                    step,
                    checkpoint_dir: checkpoint_dir.clone(),
                    failure: None,
                },
            );
            return Some(Trial {
                id,
                hyperparameters,
                checkpoint_dir,
                step,
            });
        }
        info!(
            attempts = self.max_collisions,
            "No untried sample found, ending search"
        );
        None
    }

    pub fn update_trial(&mut self, trial_id: &str, metrics: TrialMetrics) {
        let score = self.objective.score(&metrics);
        if let Some(record) = self.trials.get_mut(trial_id) {
            record.metrics = metrics;
            record.score = score;
            record.status = TrialStatus::Completed;
        }
    }

    pub fn fail_trial(&mut self, trial_id: &str, reason: impl Into<String>) {
        if let Some(record) = self.trials.get_mut(trial_id) {
            record.status = TrialStatus::Failed;
            record.failure = Some(reason.into());
        }
    }

    /// Completed trial with the best score; the earliest wins ties.
    pub fn best_trial(&self) -> Option<&TrialRecord> {
        let direction = self.objective.direction;
        let mut best: Option<(f64, &TrialRecord)> = None;
        for record in self.trials.values() {
            if record.status != TrialStatus::Completed {
                continue;
            }
            let Some(score) = record.score else {
                continue;
            };
            match best {
                Some((best_score, _)) if !direction.is_improvement(score, best_score, 0.0) => {}
                _ => best = Some((score, record)),
            }
        }
        best.map(|(_, record)| record)
    }

    /// Writes all trial records to `path` as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = OracleFile {
            objective: &self.objective,
            max_trials: self.max_trials,
            trials: self.trials.values().collect(),
        };
        write_json(path, &file)
    }
}

/// Runs one trial and reports its metrics.
pub trait TrialStrategy: Send + Sync {
    fn objective(&self) -> Objective;

    fn run_trial(
        &self,
        trial: &Trial,
        builder: &dyn ModelBuilder,
        train: &SequenceDataset,
        valid: &SequenceDataset,
    ) -> Result<TrialMetrics>;
}

/// One fit with early stopping on `val_loss`.
#[derive(Debug, Clone)]
pub struct ValidationLossStrategy {
    trainer: Trainer,
}

impl ValidationLossStrategy {
    pub fn new(trainer: Trainer) -> Self {
        Self { trainer }
    }
}

impl TrialStrategy for ValidationLossStrategy {
    fn objective(&self) -> Objective {
        Objective::validation_loss()
    }

    fn run_trial(
        &self,
        trial: &Trial,
        builder: &dyn ModelBuilder,
        train: &SequenceDataset,
        valid: &SequenceDataset,
    ) -> Result<TrialMetrics> {
        let batch_size = trial.hyperparameters.batch_size()?;
        let mut model = builder.build(&trial.hyperparameters)?;
        let report = self
            .trainer
            .fit_with_validation_loss(model.as_mut(), train, valid, batch_size)?;

        let metrics = report.history.best_per_metric();
        let mut checkpoint =
            CheckpointManager::new(&trial.checkpoint_dir).with_metadata("trial_id", trial.id.as_str());
        checkpoint.save(&*model, report.epochs_run, metrics.get("val_loss").copied())?;
        Ok(metrics)
    }
}

/// Repeated fits under the diversified Sharpe monitor, metrics averaged.
#[derive(Debug, Clone)]
pub struct DiversifiedSharpeStrategy {
    trainer: Trainer,
    executions_per_trial: usize,
}

impl DiversifiedSharpeStrategy {
    pub fn new(trainer: Trainer, executions_per_trial: usize) -> Self {
        Self {
            trainer,
            executions_per_trial: executions_per_trial.max(1),
        }
    }

    pub fn executions_per_trial(&self) -> usize {
        self.executions_per_trial
    }

    fn monitor(
        &self,
        validation: &Arc<ValidationSet>,
        trial: &Trial,
        execution: usize,
    ) -> DiversifiedSharpeMonitor {
        self.trainer
            .monitor(Arc::clone(validation), &trial.checkpoint_dir)
            .with_checkpoint_metadata("trial_id", trial.id.as_str())
            .with_checkpoint_metadata("execution", execution.to_string())
    }
}

impl TrialStrategy for DiversifiedSharpeStrategy {
    fn objective(&self) -> Objective {
        Objective::diversified_sharpe()
    }

    fn run_trial(
        &self,
        trial: &Trial,
        builder: &dyn ModelBuilder,
        train: &SequenceDataset,
        valid: &SequenceDataset,
    ) -> Result<TrialMetrics> {
        let batch_size = trial.hyperparameters.batch_size()?;
        let validation = self.trainer.validation_set(valid)?;
        let mut collected: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut failures = Vec::new();

        for execution in 0..self.executions_per_trial {
            let mut monitor = self.monitor(&validation, trial, execution);
            let mut model = builder.build(&trial.hyperparameters)?;
            match self
                .trainer
                .fit_with_monitor(model.as_mut(), train, batch_size, &mut monitor)
            {
                Ok(report) => {
                    for (name, value) in report.history.best_per_metric() {
                        collected.entry(name).or_default().push(value);
                    }
                }
                Err(e) if is_execution_failure(&e) => {
                    warn!(trial_id = %trial.id, execution, error = %e, "Execution abandoned");
                    failures.push(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        if collected.is_empty() {
            return Err(TrainingError::TrialFailed {
                trial_id: trial.id.clone(),
                reason: failures.join("; "),
            });
        }
        Ok(collected
            .into_iter()
            .map(|(name, values)| {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                (name, mean)
            })
            .collect())
    }
}

/// Errors that end a single run without aborting the whole search.
fn is_execution_failure(error: &TrainingError) -> bool {
    matches!(
        error,
        TrainingError::NonFiniteLoss { .. }
            | TrainingError::TrialFailed { .. }
            | TrainingError::Checkpoint(CheckpointError::NotFound(_))
    )
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| TrainingError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|source| TrainingError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Random search over a builder's space plus the minibatch size.
pub struct Tuner {
    builder: Arc<dyn ModelBuilder>,
    strategy: Box<dyn TrialStrategy>,
    layout: ProjectLayout,
    oracle: RandomSearchOracle,
    reported_step: u64,
}

impl Tuner {
    pub fn new(
        builder: Arc<dyn ModelBuilder>,
        strategy: Box<dyn TrialStrategy>,
        layout: ProjectLayout,
        max_trials: usize,
        batch_sizes: &[i64],
        seed: Option<u64>,
    ) -> Result<Self> {
        let mut space = builder.search_space()?;
        space.define_choice(BATCH_SIZE, batch_sizes.iter().copied())?;
        let oracle = RandomSearchOracle::new(space, strategy.objective(), max_trials, seed);
        Ok(Self {
            builder,
            strategy,
            layout,
            oracle,
            reported_step: 0,
        })
    }

    pub fn oracle(&self) -> &RandomSearchOracle {
        &self.oracle
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Runs trials until the budget or the space is exhausted.
    pub fn search(&mut self, train: &SequenceDataset, valid: &SequenceDataset) -> Result<()> {
        self.layout.create()?;
        let objective = self.oracle.objective().clone();
        info!(
            project = self.layout.project_name(),
            objective = %objective.name,
            space_size = self.oracle.space().cardinality(),
            "Starting hyperparameter search"
        );

        while let Some(trial) = self.oracle.create_trial(&self.layout, self.reported_step) {
            info!(trial_id = %trial.id, hyperparameters = %trial.hyperparameters, "Running trial");
            match self
                .strategy
                .run_trial(&trial, self.builder.as_ref(), train, valid)
            {
                Ok(metrics) => {
                    info!(trial_id = %trial.id, ?metrics, "Trial completed");
                    self.oracle.update_trial(&trial.id, metrics);
                }
                Err(e) if is_execution_failure(&e) => {
                    warn!(trial_id = %trial.id, error = %e, "Trial failed");
                    self.oracle.fail_trial(&trial.id, e.to_string());
                }
                Err(e) => return Err(e),
            }

            if let Some(record) = self.oracle.trial(&trial.id) {
                write_json(&self.layout.trial_record_path(&trial.id), record)?;
            }
            self.oracle.save(&self.layout.oracle_path())?;
            self.reported_step += 1;
        }

        if let Ok(best) = self.best_trial() {
            info!(trial_id = %best.trial_id, score = ?best.score, "Search finished");
        }
        Ok(())
    }

    pub fn best_trial(&self) -> Result<&TrialRecord> {
        self.oracle
            .best_trial()
            .ok_or(TrainingError::NoSuccessfulTrials)
    }

    pub fn get_best_hyperparameters(&self) -> Result<HyperParameters> {
        Ok(self.best_trial()?.hyperparameters.clone())
    }

    /// Rebuilds the best configuration and loads its trial checkpoint.
    pub fn get_best_model(&self) -> Result<Box<dyn TradingModel>> {
        let best = self.best_trial()?;
        let mut model = self.builder.build(&best.hyperparameters)?;
        CheckpointManager::new(&best.checkpoint_dir).restore(model.as_mut())?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{peeking_dataset, ScriptedBuilder};
    use crate::trainer::TrainerConfig;
    use tempfile::tempdir;

    const RETURNS: [f64; 4] = [0.01, -0.01, 0.02, -0.02];

    fn trainer() -> Trainer {
        Trainer::new(
            TrainerConfig::default()
                .with_num_epochs(6)
                .with_patience(2)
                .with_seed(3),
        )
    }

    fn space() -> SearchSpace {
        SearchSpace::new()
            .with_choice("offset", [0.0, 0.5, 1.0, 2.0])
            .unwrap()
    }

    #[test]
    fn test_oracle_skips_repeats_and_stops_when_exhausted() {
        let dir = tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path(), "p");
        let mut oracle = RandomSearchOracle::new(space(), Objective::validation_loss(), 10, Some(1))
            .with_max_collisions(200);
        let mut seen = HashSet::new();
        while let Some(trial) = oracle.create_trial(&layout, 0) {
            assert!(seen.insert(trial.hyperparameters.fingerprint()));
            assert_eq!(trial.checkpoint_dir, layout.checkpoint_dir(&trial.id, 0));
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(oracle.trials().count(), 4);
    }

    #[test]
    fn test_oracle_respects_max_trials() {
        let dir = tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path(), "p");
        let mut oracle = RandomSearchOracle::new(space(), Objective::validation_loss(), 2, Some(1));
        assert_eq!(oracle.create_trial(&layout, 0).unwrap().id, "0000");
        assert_eq!(oracle.create_trial(&layout, 1).unwrap().id, "0001");
        assert!(oracle.create_trial(&layout, 2).is_none());
    }

    #[test]
    fn test_best_trial_follows_direction_and_skips_failures() {
        let dir = tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path(), "p");
        let mut oracle = RandomSearchOracle::new(space(), Objective::diversified_sharpe(), 3, Some(5))
            .with_max_collisions(200);
        let ids: Vec<String> = (0..3)
            .map(|step| oracle.create_trial(&layout, step).unwrap().id)
            .collect();
        oracle.update_trial(&ids[0], TrialMetrics::from([("sharpe".to_string(), 0.4)]));
        oracle.update_trial(&ids[1], TrialMetrics::from([("sharpe".to_string(), 1.2)]));
        oracle.fail_trial(&ids[2], "non-finite loss");
        assert_eq!(oracle.best_trial().unwrap().trial_id, ids[1]);
        assert_eq!(oracle.trial(&ids[2]).unwrap().status, TrialStatus::Failed);
    }

    #[test]
    fn test_validation_loss_search_picks_lowest_and_reloads() {
        let data = peeking_dataset(&[RETURNS, RETURNS]);
        let dir = tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path(), "vl");
        let builder = Arc::new(ScriptedBuilder::new(space()).with_failing_offset(2.0));
        let strategy = Box::new(ValidationLossStrategy::new(trainer()));
        let mut tuner = Tuner::new(builder, strategy, layout.clone(), 10, &[8], Some(11)).unwrap();

        tuner.search(&data, &data).unwrap();

        assert_eq!(tuner.oracle().trials().count(), 4);
        let failed: Vec<_> = tuner
            .oracle()
            .trials()
            .filter(|r| r.status == TrialStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);

        let best = tuner.get_best_hyperparameters().unwrap();
        assert_eq!(best.get_float("offset").unwrap(), 0.0);
        assert_eq!(best.batch_size().unwrap(), 8);

        let model = tuner.get_best_model().unwrap();
        assert_eq!(model.evaluate(&data, 1).unwrap(), 0.0);

        assert!(layout.oracle_path().exists());
        for record in tuner.oracle().trials() {
            assert!(layout.trial_record_path(&record.trial_id).exists());
        }
    }

    #[test]
    fn test_diversified_search_averages_executions() {
        let data = peeking_dataset(&[RETURNS, RETURNS]);
        let dir = tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path(), "ds");
        let builder = Arc::new(ScriptedBuilder::new(space()).with_failing_offset(2.0));
        let strategy = Box::new(DiversifiedSharpeStrategy::new(trainer(), 2));
        let mut tuner = Tuner::new(builder, strategy, layout, 10, &[8], Some(11)).unwrap();

        tuner.search(&data, &data).unwrap();

        let best = tuner.best_trial().unwrap();
        assert_eq!(best.hyperparameters.get_float("offset").unwrap(), 0.0);
        assert!(best.metrics.contains_key("sharpe"));
        assert!(best.metrics.contains_key("loss"));
        let state = momentum_checkpoint::CheckpointState::read(
            &best.checkpoint_dir.join(momentum_checkpoint::manager::STATE_FILE),
        )
        .unwrap();
        assert_eq!(state.metadata.get("trial_id"), Some(&best.trial_id));
        assert!(state.metadata.contains_key("execution"));
        let failed = tuner
            .oracle()
            .trials()
            .find(|r| r.status == TrialStatus::Failed)
            .unwrap();
        assert!(failed.failure.as_deref().unwrap().contains("Non-finite loss"));
    }

    #[test]
    fn test_diversified_trial_scores_the_given_validation_set() {
        let train = peeking_dataset(&[RETURNS, RETURNS]);
        let other = peeking_dataset(&[[0.01, 0.01, 0.01, -0.03], [0.02, -0.01, 0.0, 0.01]]);
        let dir = tempdir().unwrap();
        let builder = ScriptedBuilder::new(space());
        let strategy = DiversifiedSharpeStrategy::new(trainer(), 1);
        let trial = |id: &str| Trial {
            id: id.to_string(),
            hyperparameters: HyperParameters::from_values([("offset", 0.0f64)])
                .with_value(BATCH_SIZE, 8i64),
            checkpoint_dir: dir.path().join(id),
            step: 0,
        };

        let on_train = strategy.run_trial(&trial("a"), &builder, &train, &train).unwrap();
        let on_other = strategy.run_trial(&trial("b"), &builder, &train, &other).unwrap();

        let model = builder.build(&trial("b").hyperparameters).unwrap();
        let t = trainer();
        let expected = t
            .monitor(t.validation_set(&other).unwrap(), dir.path().join("x"))
            .evaluate(model.as_ref())
            .unwrap();
        assert!((on_other["sharpe"] - expected).abs() < 1e-9);
        assert!((on_train["sharpe"] - on_other["sharpe"]).abs() > 1e-3);
    }

    #[test]
    fn test_no_successful_trials() {
        let data = peeking_dataset(&[RETURNS]);
        let dir = tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path(), "none");
        let space = SearchSpace::new().with_choice("offset", [2.0]).unwrap();
        let builder = Arc::new(ScriptedBuilder::new(space).with_failing_offset(2.0));
        let strategy = Box::new(ValidationLossStrategy::new(trainer()));
        let mut tuner = Tuner::new(builder, strategy, layout, 5, &[8], Some(1)).unwrap();

        tuner.search(&data, &data).unwrap();
        assert!(matches!(
            tuner.get_best_hyperparameters(),
            Err(TrainingError::NoSuccessfulTrials)
        ));
    }
}
