//! Trial records and sweep-level bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::grid::ParameterSet;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Minimize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One grid combination evaluated in its own tracked run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub trial_number: usize,
    pub parameters: ParameterSet,
    pub status: TrialStatus,
    /// Tracker run id once the run has been started.
    pub run_id: Option<String>,
    pub metrics: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(trial_number: usize, parameters: ParameterSet) -> Self {
        Self {
            id: Uuid::new_v4(),
            trial_number,
            parameters,
            status: TrialStatus::Pending,
            run_id: None,
            metrics: BTreeMap::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self, run_id: String) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
        self.run_id = Some(run_id);
    }

    pub fn mark_completed(&mut self, metrics: BTreeMap<String, f64>) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.metrics = metrics;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// Outcome of a full sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub experiment_id: String,
    pub objective_metric: String,
    pub direction: ObjectiveDirection,
    pub trials: Vec<Trial>,
    /// Index into `trials` of the best completed trial.
    pub best: Option<usize>,
}

impl SweepReport {
    pub fn new(
        experiment_id: String,
        objective_metric: &str,
        direction: ObjectiveDirection,
    ) -> Self {
        Self {
            experiment_id,
            objective_metric: objective_metric.to_string(),
            direction,
            trials: Vec::new(),
            best: None,
        }
    }

    /// Append a finished trial, updating the best if it improves on it.
    pub fn record(&mut self, trial: Trial) {
        let improves = match trial.metrics.get(&self.objective_metric) {
            Some(&objective) if trial.status == TrialStatus::Completed => {
                match self.best_trial().and_then(|b| b.metrics.get(&self.objective_metric)) {
                    None => true,
                    Some(&current) => match self.direction {
                        ObjectiveDirection::Maximize => objective > current,
                        ObjectiveDirection::Minimize => objective < current,
                    },
                }
            }
            _ => false,
        };
        self.trials.push(trial);
        if improves {
            self.best = Some(self.trials.len() - 1);
        }
    }

    pub fn best_trial(&self) -> Option<&Trial> {
        self.best.and_then(|i| self.trials.get(i))
    }

    pub fn completed(&self) -> usize {
        self.count(TrialStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(TrialStatus::Failed)
    }

    fn count(&self, status: TrialStatus) -> usize {
        self.trials.iter().filter(|t| t.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ParameterValue;

    fn completed(number: usize, rmse: f64) -> Trial {
        let mut trial = Trial::new(number, ParameterSet::new());
        trial.mark_running(format!("run-{number}"));
        trial.mark_completed(BTreeMap::from([("rmse".to_string(), rmse)]));
        trial
    }

    #[test]
    fn trial_lifecycle() {
        let mut params = ParameterSet::new();
        params.insert("alpha".into(), ParameterValue::Float(0.1));

        let mut trial = Trial::new(1, params);
        assert_eq!(trial.status, TrialStatus::Pending);

        trial.mark_running("abc".into());
        assert_eq!(trial.status, TrialStatus::Running);
        assert_eq!(trial.run_id.as_deref(), Some("abc"));

        trial.mark_completed(BTreeMap::from([("rmse".to_string(), 0.7)]));
        assert_eq!(trial.status, TrialStatus::Completed);
        assert!(trial.finished_at.is_some());
        assert!(trial.duration_seconds().is_some());
    }

    #[test]
    fn trial_failure() {
        let mut trial = Trial::new(0, ParameterSet::new());
        trial.mark_running("r".into());
        trial.mark_failed("fit diverged".into());
        assert_eq!(trial.status, TrialStatus::Failed);
        assert_eq!(trial.error.as_deref(), Some("fit diverged"));
    }

    #[test]
    fn best_trial_tracking_minimize() {
        let mut report = SweepReport::new("1".into(), "rmse", ObjectiveDirection::Minimize);
        report.record(completed(0, 0.9));
        assert_eq!(report.best, Some(0));

        report.record(completed(1, 0.6));
        assert_eq!(report.best, Some(1));

        // Worse result should not replace
        report.record(completed(2, 0.8));
        assert_eq!(report.best_trial().unwrap().trial_number, 1);
        assert_eq!(report.completed(), 3);
    }

    #[test]
    fn best_trial_tracking_maximize() {
        let mut report = SweepReport::new("1".into(), "rmse", ObjectiveDirection::Maximize);
        report.record(completed(0, 0.5));
        report.record(completed(1, 0.4));
        assert_eq!(report.best, Some(0));
    }

    #[test]
    fn failed_trials_never_become_best() {
        let mut report = SweepReport::new("1".into(), "rmse", ObjectiveDirection::Minimize);
        let mut failed = Trial::new(0, ParameterSet::new());
        failed.mark_failed("boom".into());
        report.record(failed);
        assert_eq!(report.best, None);
        assert_eq!(report.failed(), 1);

        report.record(completed(1, 2.0));
        assert_eq!(report.best, Some(1));
    }
}
