//! Regression evaluation metrics.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use wq_types::{DataError, WqResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Rmse,
    Mse,
    Mae,
    R2,
}

/// Metrics logged when nothing else is configured.
pub const DEFAULT_METRICS: [Metric; 3] = [Metric::Rmse, Metric::Mae, Metric::R2];

impl Metric {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Rmse => "rmse",
            Self::Mse => "mse",
            Self::Mae => "mae",
            Self::R2 => "r2",
        }
    }

    /// Whether larger values are better.
    pub fn higher_is_better(&self) -> bool {
        matches!(self, Self::R2)
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rmse" => Ok(Self::Rmse),
            "mse" => Ok(Self::Mse),
            "mae" => Ok(Self::Mae),
            "r2" => Ok(Self::R2),
            other => Err(format!("unknown metric '{other}'")),
        }
    }
}

/// Compute `metrics` comparing `predicted` against `actual`.
pub fn eval_metrics(
    actual: &Array1<f64>,
    predicted: &Array1<f64>,
    metrics: &[Metric],
) -> WqResult<BTreeMap<String, f64>> {
    if actual.len() != predicted.len() {
        return Err(DataError::ShapeMismatch {
            message: format!(
                "{} targets but {} predictions",
                actual.len(),
                predicted.len()
            ),
        }
        .into());
    }
    if actual.is_empty() {
        return Err(DataError::EmptyPartition {
            message: "no validation rows to evaluate".to_string(),
        }
        .into());
    }

    let n = actual.len() as f64;
    let errors = predicted - actual;
    let sse = errors.mapv(|e| e * e).sum();
    let mse = sse / n;

    let mut out = BTreeMap::new();
    for metric in metrics {
        let value = match metric {
            Metric::Rmse => mse.sqrt(),
            Metric::Mse => mse,
            Metric::Mae => errors.mapv(f64::abs).sum() / n,
            Metric::R2 => {
                let mean = actual.sum() / n;
                let sst = actual.mapv(|a| (a - mean).powi(2)).sum();
                if sst == 0.0 {
                    if sse == 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    1.0 - sse / sst
                }
            }
        };
        out.insert(metric.key().to_string(), value);
    }
    Ok(out)
}
