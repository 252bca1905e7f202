//! In-process tracking backend for offline runs and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;
use wq_types::{RemoteServiceError, WqResult};

use crate::grid::ParameterSet;
use crate::tracking::{ExperimentId, ModelSnapshot, RunId, RunStatus, Tracker};

/// Everything logged to one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRun {
    pub run_id: RunId,
    pub run_name: Option<String>,
    pub params: ParameterSet,
    pub metrics: BTreeMap<String, f64>,
    pub models: Vec<(String, ModelSnapshot)>,
    pub status: RunStatus,
}

#[derive(Debug, Default)]
struct State {
    experiments: HashMap<String, ExperimentId>,
    runs: Vec<RecordedRun>,
    experiments_created: usize,
}

/// Tracker that keeps experiments and runs in memory.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    state: RwLock<State>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `create_experiment` has succeeded.
    pub fn experiments_created(&self) -> usize {
        self.state.read().experiments_created
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        self.state.read().runs.clone()
    }

    pub fn run(&self, run: &RunId) -> Option<RecordedRun> {
        self.state.read().runs.iter().find(|r| &r.run_id == run).cloned()
    }

    fn with_run<T>(&self, run: &RunId, f: impl FnOnce(&mut RecordedRun) -> T) -> WqResult<T> {
        let mut state = self.state.write();
        let recorded = state
            .runs
            .iter_mut()
            .find(|r| &r.run_id == run)
            .ok_or_else(|| RemoteServiceError::InvalidResponse {
                url: "memory://".to_string(),
                message: format!("unknown run {run}"),
            })?;
        if recorded.status != RunStatus::Running {
            return Err(RemoteServiceError::InvalidResponse {
                url: "memory://".to_string(),
                message: format!("run {run} already ended"),
            }
            .into());
        }
        Ok(f(recorded))
    }
}

#[async_trait]
impl Tracker for InMemoryTracker {
    async fn get_experiment_by_name(&self, name: &str) -> WqResult<Option<ExperimentId>> {
        Ok(self.state.read().experiments.get(name).cloned())
    }

    async fn create_experiment(&self, name: &str) -> WqResult<ExperimentId> {
        let mut state = self.state.write();
        if state.experiments.contains_key(name) {
            return Err(RemoteServiceError::Status {
                url: "memory://experiments/create".to_string(),
                status: 400,
                body: format!("RESOURCE_ALREADY_EXISTS: experiment '{name}'"),
            }
            .into());
        }
        let id = ExperimentId(state.experiments.len().to_string());
        state.experiments.insert(name.to_string(), id.clone());
        state.experiments_created += 1;
        Ok(id)
    }

    async fn start_run(
        &self,
        experiment: &ExperimentId,
        run_name: Option<&str>,
    ) -> WqResult<RunId> {
        let run_id = RunId {
            id: Uuid::new_v4().simple().to_string(),
            experiment_id: experiment.clone(),
            artifact_uri: None,
        };
        self.state.write().runs.push(RecordedRun {
            run_id: run_id.clone(),
            run_name: run_name.map(str::to_string),
            params: ParameterSet::new(),
            metrics: BTreeMap::new(),
            models: Vec::new(),
            status: RunStatus::Running,
        });
        Ok(run_id)
    }

    async fn log_params(&self, run: &RunId, params: &ParameterSet) -> WqResult<()> {
        self.with_run(run, |r| {
            r.params
                .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())))
        })
    }

    async fn log_metrics(&self, run: &RunId, metrics: &BTreeMap<String, f64>) -> WqResult<()> {
        self.with_run(run, |r| r.metrics.extend(metrics.iter().map(|(k, v)| (k.clone(), *v))))
    }

    async fn log_model(
        &self,
        run: &RunId,
        artifact_path: &str,
        snapshot: &ModelSnapshot,
    ) -> WqResult<()> {
        self.with_run(run, |r| {
            r.models.push((artifact_path.to_string(), snapshot.clone()))
        })
    }

    async fn end_run(&self, run: &RunId, status: RunStatus) -> WqResult<()> {
        self.with_run(run, |r| r.status = status)
    }
}
