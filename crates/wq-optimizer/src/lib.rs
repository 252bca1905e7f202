//! # wq-optimizer
//!
//! Hyperparameter sweeps for the wine-quality regressors.
//!
//! Provides parameter grids, coordinate-descent ElasticNet and Ridge models,
//! evaluation metrics, trial bookkeeping, and experiment tracking backends
//! (an MLflow REST client and an in-memory tracker). [`run_sweep`] ties them
//! together, logging one tracked run per grid combination.

pub mod grid;
pub mod memory;
pub mod metrics;
pub mod mlflow;
pub mod model;
pub mod sweep;
pub mod tracking;
pub mod trial;

pub use grid::{
    elasticnet_grid, ridge_grid, GridSearch, ParameterAxis, ParameterGrid, ParameterSet,
    ParameterValue,
};
pub use memory::{InMemoryTracker, RecordedRun};
pub use metrics::{eval_metrics, Metric, DEFAULT_METRICS};
pub use mlflow::MlflowClient;
pub use model::{build_regressor, ElasticNet, LinearFit, ModelKind, Regressor, Ridge, SolverOptions};
pub use sweep::{run_sweep, FailurePolicy, SweepConfig, TrainingData};
pub use tracking::{ensure_experiment, ExperimentId, ModelSnapshot, RunId, RunStatus, Tracker};
pub use trial::{ObjectiveDirection, SweepReport, Trial, TrialStatus};
