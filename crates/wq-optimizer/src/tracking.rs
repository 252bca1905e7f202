//! Experiment tracking abstraction.
//!
//! A [`Tracker`] owns experiments and the runs logged under them. The sweep
//! only talks to this trait, so the MLflow REST backend and the in-memory
//! backend are interchangeable.

use async_trait::async_trait;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wq_types::{DataError, WqResult};

use crate::grid::ParameterSet;
use crate::model::{ModelKind, Regressor};

/// Tracker-assigned experiment identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentId(pub String);

impl std::fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A run inside an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId {
    pub id: String,
    pub experiment_id: ExperimentId,
    /// Root the server assigned to this run's artifacts, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_uri: Option<String>,
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Terminal or in-flight run state, spelled the way MLflow spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

/// Serializable record of a fitted model, logged as the run's model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub kind: ModelKind,
    pub features: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub hyperparameters: ParameterSet,
    /// One training row, in `features` order.
    pub input_example: Vec<f64>,
}

impl ModelSnapshot {
    /// Capture a fitted model together with the first row of `x_train`.
    pub fn capture(
        model: &dyn Regressor,
        features: &[String],
        x_train: &Array2<f64>,
    ) -> WqResult<Self> {
        let fit = model.fitted().ok_or_else(|| DataError::InvalidFormat {
            message: format!("{} has not been fitted", model.kind()),
        })?;
        if features.len() != fit.coefficients.len() {
            return Err(DataError::ShapeMismatch {
                message: format!(
                    "{} feature names for {} coefficients",
                    features.len(),
                    fit.coefficients.len()
                ),
            }
            .into());
        }
        let input_example = x_train
            .rows()
            .into_iter()
            .next()
            .map(|row| row.to_vec())
            .ok_or_else(|| DataError::EmptyPartition {
                message: "no training row for the input example".to_string(),
            })?;

        Ok(Self {
            kind: model.kind(),
            features: features.to_vec(),
            coefficients: fit.coefficients.clone(),
            intercept: fit.intercept,
            hyperparameters: model.hyperparameters(),
            input_example,
        })
    }
}

/// Experiment tracking backend.
#[async_trait]
pub trait Tracker: Send + Sync {
    async fn get_experiment_by_name(&self, name: &str) -> WqResult<Option<ExperimentId>>;

    async fn create_experiment(&self, name: &str) -> WqResult<ExperimentId>;

    async fn start_run(
        &self,
        experiment: &ExperimentId,
        run_name: Option<&str>,
    ) -> WqResult<RunId>;

    async fn log_params(&self, run: &RunId, params: &ParameterSet) -> WqResult<()>;

    async fn log_metrics(&self, run: &RunId, metrics: &BTreeMap<String, f64>) -> WqResult<()>;

    /// Store `snapshot` under `artifact_path` in the run's artifacts.
    async fn log_model(
        &self,
        run: &RunId,
        artifact_path: &str,
        snapshot: &ModelSnapshot,
    ) -> WqResult<()>;

    async fn end_run(&self, run: &RunId, status: RunStatus) -> WqResult<()>;
}

/// Look an experiment up by name, creating it only when absent.
pub async fn ensure_experiment(tracker: &dyn Tracker, name: &str) -> WqResult<ExperimentId> {
    if let Some(id) = tracker.get_experiment_by_name(name).await? {
        tracing::info!(experiment = name, id = %id, "using existing experiment");
        return Ok(id);
    }

    tracing::info!(experiment = name, "creating experiment");
    tracker.create_experiment(name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTracker;
    use crate::model::ElasticNet;
    use ndarray::{array, Array1};

    #[tokio::test]
    async fn ensure_experiment_creates_once() {
        let tracker = InMemoryTracker::new();

        let first = ensure_experiment(&tracker, "demo-alice-wine").await.unwrap();
        let second = ensure_experiment(&tracker, "demo-alice-wine").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(tracker.experiments_created(), 1);
    }

    #[tokio::test]
    async fn ensure_experiment_reuses_existing() {
        let tracker = InMemoryTracker::new();
        let existing = tracker.create_experiment("demo-bob-wine").await.unwrap();

        let found = ensure_experiment(&tracker, "demo-bob-wine").await.unwrap();
        assert_eq!(found, existing);
        assert_eq!(tracker.experiments_created(), 1);
    }

    #[test]
    fn snapshot_requires_fitted_model() {
        let model = ElasticNet::new(0.1, 0.5);
        let x = array![[1.0, 2.0]];
        let features = vec!["a".to_string(), "b".to_string()];
        assert!(ModelSnapshot::capture(&model, &features, &x).is_err());
    }

    #[test]
    fn snapshot_captures_first_row() {
        let mut model = ElasticNet::new(0.001, 0.5);
        let x = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 1.0]];
        let y: Array1<f64> = array![1.0, 2.0, 3.0, 4.0];
        model.fit(&x, &y).unwrap();

        let features = vec!["alcohol".to_string(), "density".to_string()];
        let snapshot = ModelSnapshot::capture(&model, &features, &x).unwrap();
        assert_eq!(snapshot.kind, ModelKind::ElasticNet);
        assert_eq!(snapshot.input_example, vec![1.0, 0.0]);
        assert_eq!(snapshot.coefficients.len(), 2);
        assert!(snapshot.hyperparameters.contains_key("alpha"));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["kind"], "elasticnet");

        let wrong = vec!["alcohol".to_string()];
        assert!(ModelSnapshot::capture(&model, &wrong, &x).is_err());
    }

    #[test]
    fn run_status_wire_names() {
        assert_eq!(RunStatus::Finished.as_str(), "FINISHED");
        assert_eq!(
            serde_json::to_value(RunStatus::Failed).unwrap(),
            serde_json::json!("FAILED")
        );
    }
}
