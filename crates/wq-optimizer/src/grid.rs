//! Hyperparameter grids and exhaustive grid search.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wq_types::{config_error, WqResult};

/// A concrete parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            Self::Int(v) => usize::try_from(*v).ok(),
            Self::Float(v) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as usize),
            Self::Json(v) => v.as_u64().and_then(|n| usize::try_from(n).ok()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Json(v) => v.as_bool(),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for ParameterValue {
    fn from(value: serde_json::Value) -> Self {
        if let Some(i) = value.as_i64() {
            Self::Int(i)
        } else if let Some(f) = value.as_f64() {
            Self::Float(f)
        } else {
            Self::Json(value)
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(serde_json::Value::String(s)) => write!(f, "{s}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// One trial's parameter combination, keyed by parameter name.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

/// A named parameter and its ordered candidate values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterAxis {
    pub name: String,
    pub values: Vec<ParameterValue>,
}

/// Candidate values per parameter; the grid is their Cartesian product.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterGrid {
    pub axes: Vec<ParameterAxis>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_floats(self, name: impl Into<String>, values: &[f64]) -> Self {
        self.add_axis(name, values.iter().copied().map(ParameterValue::Float).collect())
    }

    pub fn add_ints(self, name: impl Into<String>, values: &[i64]) -> Self {
        self.add_axis(name, values.iter().copied().map(ParameterValue::Int).collect())
    }

    pub fn add_choice(self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.add_axis(name, values.into_iter().map(ParameterValue::Json).collect())
    }

    fn add_axis(mut self, name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        let name = name.into();
        self.axes.retain(|a| a.name != name);
        self.axes.push(ParameterAxis { name, values });
        self
    }

    /// Parse `{"alpha": [0.1, 1.0], "l1_ratio": [0.5]}`.
    pub fn from_json(value: &serde_json::Value) -> WqResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| config_error!("grid", "expected an object of name -> [values]"))?;

        let mut grid = Self::new();
        for (name, candidates) in object {
            let candidates = candidates.as_array().ok_or_else(|| {
                config_error!("grid", "values for {name} must be an array")
            })?;
            if candidates.is_empty() {
                return Err(config_error!("grid", "no candidate values for {name}"));
            }
            grid = grid.add_axis(
                name.clone(),
                candidates.iter().cloned().map(ParameterValue::from).collect(),
            );
        }
        Ok(grid)
    }

    /// Number of combinations (the product of axis lengths).
    pub fn size(&self) -> usize {
        self.axes.iter().map(|a| a.values.len()).product()
    }

    /// Every combination exactly once, first axis varying slowest.
    pub fn combinations(&self) -> Vec<ParameterSet> {
        let mut result: Vec<ParameterSet> = vec![ParameterSet::new()];
        for axis in &self.axes {
            let mut next = Vec::with_capacity(result.len() * axis.values.len());
            for existing in &result {
                for value in &axis.values {
                    let mut combo = existing.clone();
                    combo.insert(axis.name.clone(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }
        result
    }
}

/// Built-in ElasticNet grid.
pub fn elasticnet_grid() -> ParameterGrid {
    ParameterGrid::new()
        .add_floats("alpha", &[0.001, 0.01, 0.1, 1.0])
        .add_floats("l1_ratio", &[0.1, 0.5, 0.9])
}

/// Built-in Ridge grid.
pub fn ridge_grid() -> ParameterGrid {
    ParameterGrid::new().add_floats("alpha", &[0.1, 1.0, 10.0, 100.0])
}

/// Exhaustive walk over a grid with a resumable cursor.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<ParameterSet>,
}

impl GridSearch {
    pub fn new(grid: &ParameterGrid) -> Self {
        Self {
            cursor: 0,
            combos: grid.combinations(),
        }
    }

    /// Next batch of at most `count` untried combinations.
    pub fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        let end = self.cursor.saturating_add(count).min(self.combos.len());
        let batch = self.combos[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    pub fn remaining(&self) -> usize {
        self.combos.len() - self.cursor
    }

    pub fn total(&self) -> usize {
        self.combos.len()
    }
}

impl Iterator for GridSearch {
    type Item = ParameterSet;

    fn next(&mut self) -> Option<Self::Item> {
        self.suggest(1).pop()
    }
}
