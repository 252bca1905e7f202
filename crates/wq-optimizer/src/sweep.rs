//! Hyperparameter sweep: one tracked run per grid combination.
//!
//! Each combination moves through start, fit, evaluate, log and end. A run
//! always ends as `FINISHED` or `FAILED`; with [`FailurePolicy::FailFast`] the
//! failing run is closed before the error propagates.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wq_data::Partitions;
use wq_types::{DataError, DataPaths, WqResult};

use crate::grid::{elasticnet_grid, ridge_grid, GridSearch, ParameterGrid, ParameterSet};
use crate::metrics::{eval_metrics, Metric, DEFAULT_METRICS};
use crate::model::{build_regressor, ModelKind};
use crate::tracking::{ExperimentId, ModelSnapshot, RunId, RunStatus, Tracker};
use crate::trial::{ObjectiveDirection, SweepReport, Trial};

/// What to do when a single trial fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// End the run as failed and abort the sweep.
    #[default]
    FailFast,
    /// End the run as failed and continue with the next combination.
    Isolate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub model: ModelKind,
    pub grid: ParameterGrid,
    pub metrics: Vec<Metric>,
    /// Metric used to pick the best trial.
    pub objective: Metric,
    pub failure: FailurePolicy,
}

impl SweepConfig {
    /// Built-in grid for `model`, default metrics, best trial by lowest RMSE.
    pub fn new(model: ModelKind) -> Self {
        let grid = match model {
            ModelKind::ElasticNet => elasticnet_grid(),
            ModelKind::Ridge => ridge_grid(),
        };
        Self {
            model,
            grid,
            metrics: DEFAULT_METRICS.to_vec(),
            objective: Metric::Rmse,
            failure: FailurePolicy::default(),
        }
    }

    pub fn with_grid(mut self, grid: ParameterGrid) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_failure_policy(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    fn direction(&self) -> ObjectiveDirection {
        if self.objective.higher_is_better() {
            ObjectiveDirection::Maximize
        } else {
            ObjectiveDirection::Minimize
        }
    }

    fn evaluated_metrics(&self) -> Vec<Metric> {
        let mut metrics = self.metrics.clone();
        if !metrics.contains(&self.objective) {
            metrics.push(self.objective);
        }
        metrics
    }
}

/// Dense training and validation arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingData {
    pub x_train: Array2<f64>,
    pub x_val: Array2<f64>,
    pub y_train: Array1<f64>,
    pub y_val: Array1<f64>,
    pub feature_names: Vec<String>,
}

impl TrainingData {
    pub fn new(
        x_train: Array2<f64>,
        x_val: Array2<f64>,
        y_train: Array1<f64>,
        y_val: Array1<f64>,
        feature_names: Vec<String>,
    ) -> WqResult<Self> {
        let shapes_agree = x_train.nrows() == y_train.len()
            && x_val.nrows() == y_val.len()
            && x_train.ncols() == x_val.ncols()
            && x_train.ncols() == feature_names.len();
        if !shapes_agree {
            return Err(DataError::ShapeMismatch {
                message: format!(
                    "x_train {:?}, y_train {}, x_val {:?}, y_val {}, {} features",
                    x_train.dim(),
                    y_train.len(),
                    x_val.dim(),
                    y_val.len(),
                    feature_names.len()
                ),
            }
            .into());
        }
        if x_train.nrows() == 0 || x_val.nrows() == 0 {
            return Err(DataError::EmptyPartition {
                message: "training and validation sets must both have rows".to_string(),
            }
            .into());
        }
        Ok(Self {
            x_train,
            x_val,
            y_train,
            y_val,
            feature_names,
        })
    }

    pub fn from_partitions(partitions: &Partitions) -> WqResult<Self> {
        Self::new(
            partitions.x_train.to_matrix()?,
            partitions.x_test.to_matrix()?,
            partitions.y_train.to_vector(&partitions.target)?,
            partitions.y_test.to_vector(&partitions.target)?,
            partitions.features.clone(),
        )
    }

    /// Read the four partition files.
    pub fn load(paths: &DataPaths) -> WqResult<Self> {
        Self::from_partitions(&Partitions::read(paths)?)
    }
}

/// Run every grid combination against `experiment`, sequentially.
pub async fn run_sweep(
    tracker: &dyn Tracker,
    experiment: &ExperimentId,
    data: &TrainingData,
    config: &SweepConfig,
) -> WqResult<SweepReport> {
    let search = GridSearch::new(&config.grid);
    let total = search.total();
    let mut report = SweepReport::new(
        experiment.to_string(),
        config.objective.key(),
        config.direction(),
    );

    tracing::info!(
        model = %config.model,
        combinations = total,
        experiment = %experiment,
        "starting sweep"
    );

    for (number, params) in search.enumerate() {
        let run_name = format!("{}-{number}", config.model.name());
        let run = tracker.start_run(experiment, Some(&run_name)).await?;
        let mut trial = Trial::new(number, params);
        trial.mark_running(run.id.clone());

        match run_trial(tracker, &run, data, config, &trial.parameters).await {
            Ok(metrics) => {
                tracker.end_run(&run, RunStatus::Finished).await?;
                tracing::info!(
                    trial = number + 1,
                    total,
                    run = %run,
                    ?metrics,
                    "trial finished"
                );
                trial.mark_completed(metrics);
                report.record(trial);
            }
            Err(error) => {
                tracing::warn!(trial = number + 1, total, run = %run, "trial failed: {error}");
                if let Err(end_error) = tracker.end_run(&run, RunStatus::Failed).await {
                    tracing::error!(run = %run, "could not mark run failed: {end_error}");
                }
                trial.mark_failed(error.to_string());
                report.record(trial);
                if config.failure == FailurePolicy::FailFast {
                    return Err(error);
                }
            }
        }
    }

    if let Some(best) = report.best_trial() {
        tracing::info!(
            run = best.run_id.as_deref().unwrap_or_default(),
            objective = %config.objective,
            value = best.metrics.get(config.objective.key()).copied().unwrap_or(f64::NAN),
            "best trial"
        );
    }
    Ok(report)
}

async fn run_trial(
    tracker: &dyn Tracker,
    run: &RunId,
    data: &TrainingData,
    config: &SweepConfig,
    params: &ParameterSet,
) -> WqResult<BTreeMap<String, f64>> {
    tracker.log_params(run, params).await?;

    let mut model = build_regressor(config.model, params)?;
    model.fit(&data.x_train, &data.y_train)?;

    let predicted = model.predict(&data.x_val)?;
    let metrics = eval_metrics(&data.y_val, &predicted, &config.evaluated_metrics())?;
    tracker.log_metrics(run, &metrics).await?;

    let snapshot = ModelSnapshot::capture(&*model, &data.feature_names, &data.x_train)?;
    tracker
        .log_model(run, config.model.name(), &snapshot)
        .await?;

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ParameterValue;
    use crate::memory::InMemoryTracker;
    use crate::tracking::ensure_experiment;
    use crate::trial::TrialStatus;
    use std::collections::BTreeSet;

    /// y = 1 + 2a - b on a small deterministic design.
    fn linear_data() -> TrainingData {
        let rows = |range: std::ops::Range<usize>| {
            let n = range.len();
            let mut x = Array2::<f64>::zeros((n, 2));
            for (i, k) in range.enumerate() {
                x[[i, 0]] = (k % 7) as f64 * 0.5;
                x[[i, 1]] = ((k * 3) % 5) as f64 - 2.0;
            }
            let y: Array1<f64> = x.rows().into_iter().map(|r| 1.0 + 2.0 * r[0] - r[1]).collect();
            (x, y)
        };
        let (x_train, y_train) = rows(0..28);
        let (x_val, y_val) = rows(28..40);
        TrainingData::new(
            x_train,
            x_val,
            y_train,
            y_val,
            vec!["alcohol".into(), "volatile_acidity".into()],
        )
        .unwrap()
    }

    fn failing_grid() -> ParameterGrid {
        ParameterGrid::new().add_floats("alpha", &[0.01, -1.0, 0.1])
    }

    #[tokio::test]
    async fn one_finished_run_per_combination() {
        let tracker = InMemoryTracker::new();
        let experiment = ensure_experiment(&tracker, "demo-alice-wine").await.unwrap();
        let config = SweepConfig::new(ModelKind::ElasticNet);

        let report = run_sweep(&tracker, &experiment, &linear_data(), &config)
            .await
            .unwrap();

        let runs = tracker.runs();
        assert_eq!(runs.len(), 12);
        assert_eq!(report.completed(), 12);
        for run in &runs {
            assert_eq!(run.status, RunStatus::Finished);
            assert_eq!(run.run_id.experiment_id, experiment);
            assert!(run.params.contains_key("alpha"));
            assert!(run.params.contains_key("l1_ratio"));
            for key in ["rmse", "mae", "r2"] {
                assert!(run.metrics.contains_key(key), "missing {key}");
            }
            assert_eq!(run.models.len(), 1);
            assert_eq!(run.models[0].0, "ElasticNet");
            assert_eq!(run.models[0].1.input_example.len(), 2);
        }

        for (trial, run) in report.trials.iter().zip(&runs) {
            assert_eq!(trial.parameters, run.params);
            assert_eq!(trial.run_id.as_deref(), Some(run.run_id.id.as_str()));
        }

        let key = |params: &ParameterSet| serde_json::to_string(params).unwrap();
        let logged: BTreeSet<String> = runs.iter().map(|run| key(&run.params)).collect();
        let expected: BTreeSet<String> = config.grid.combinations().iter().map(key).collect();
        assert_eq!(logged.len(), 12);
        assert_eq!(logged, expected);

        let best = report.best_trial().unwrap();
        for trial in &report.trials {
            assert!(best.metrics["rmse"] <= trial.metrics["rmse"]);
        }
        assert_eq!(best.parameters["alpha"], ParameterValue::Float(0.001));
    }

    #[tokio::test]
    async fn ridge_sweep_uses_ridge_grid() {
        let tracker = InMemoryTracker::new();
        let experiment = tracker.create_experiment("ridge").await.unwrap();
        let config = SweepConfig::new(ModelKind::Ridge);

        let report = run_sweep(&tracker, &experiment, &linear_data(), &config)
            .await
            .unwrap();
        assert_eq!(report.trials.len(), 4);
        assert!(tracker.runs().iter().all(|r| r.models[0].0 == "Ridge"));
    }

    #[tokio::test]
    async fn isolate_skips_failing_trial() {
        let tracker = InMemoryTracker::new();
        let experiment = tracker.create_experiment("exp").await.unwrap();
        let config = SweepConfig::new(ModelKind::ElasticNet)
            .with_grid(failing_grid())
            .with_failure_policy(FailurePolicy::Isolate);

        let report = run_sweep(&tracker, &experiment, &linear_data(), &config)
            .await
            .unwrap();

        let statuses: Vec<RunStatus> = tracker.runs().iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![RunStatus::Finished, RunStatus::Failed, RunStatus::Finished]
        );
        assert_eq!(report.failed(), 1);
        assert_eq!(report.trials[1].status, TrialStatus::Failed);
        assert!(report.trials[1].error.is_some());

        // Parameters are logged even when the trial fails.
        assert!(tracker.runs()[1].params.contains_key("alpha"));
        assert!(tracker.runs()[1].metrics.is_empty());
    }

    #[tokio::test]
    async fn fail_fast_ends_run_and_aborts() {
        let tracker = InMemoryTracker::new();
        let experiment = tracker.create_experiment("exp").await.unwrap();
        let config = SweepConfig::new(ModelKind::ElasticNet).with_grid(failing_grid());

        let result = run_sweep(&tracker, &experiment, &linear_data(), &config).await;
        assert!(matches!(result, Err(wq_types::WqError::Config(_))));

        let statuses: Vec<RunStatus> = tracker.runs().iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![RunStatus::Finished, RunStatus::Failed]);
    }

    #[test]
    fn training_data_rejects_mismatched_shapes() {
        let data = linear_data();
        let result = TrainingData::new(
            data.x_train.clone(),
            data.x_val.clone(),
            data.y_val.clone(),
            data.y_val.clone(),
            data.feature_names.clone(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn training_data_from_written_partitions() {
        use wq_data::prep::{self, IndicatorSpec, PrepConfig};

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("wine.csv");
        let mut csv = String::from("type,alcohol,density,quality\n");
        for i in 0..20 {
            let alcohol = 9.0 + (i % 5) as f64 * 0.5 + i as f64 * 0.01;
            let density = 0.99 + (i % 3) as f64 * 0.001;
            let quality = 3 + (i % 5);
            let kind = if i % 2 == 0 { "red" } else { "white" };
            csv.push_str(&format!("{kind},{alcohol},{density},{quality}\n"));
        }
        std::fs::write(&input, csv).unwrap();

        let config = PrepConfig {
            input,
            indicator: Some(IndicatorSpec::default()),
            ..PrepConfig::default()
        };
        let paths = DataPaths::for_project(dir.path(), "wine");
        let partitions = prep::run(&config, &paths).unwrap();

        let data = TrainingData::load(&paths).unwrap();
        assert_eq!(data.feature_names, partitions.features);
        assert_eq!(data.x_train.nrows() + data.x_val.nrows(), 20);
        assert_eq!(data.y_val.len(), 6);
        assert!(data.feature_names.iter().any(|f| f == "alcohol"));
    }
}
