//! Penalized linear regressors fitted by cyclic coordinate descent.
//!
//! Both models minimize `0.5 * ||y - Xw||^2 + l1 * ||w||_1 + 0.5 * l2 * ||w||^2`
//! on centered data. [`ElasticNet`] maps its `(alpha, l1_ratio)` onto that
//! objective with scikit-learn's `1 / (2 n)` loss scaling; [`Ridge`] uses the
//! unscaled `||y - Xw||^2 + alpha * ||w||^2` form.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use wq_types::{config_error, data_error, ConfigError, DataError, WqResult};

use crate::grid::{ParameterSet, ParameterValue};

/// A regression model that can be fitted, evaluated and snapshotted.
pub trait Regressor: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> WqResult<()>;

    fn predict(&self, x: &Array2<f64>) -> WqResult<Array1<f64>>;

    /// Coefficients and intercept once fitted.
    fn fitted(&self) -> Option<&LinearFit>;

    /// Effective hyperparameters, including defaults.
    fn hyperparameters(&self) -> ParameterSet;
}

/// Which regressor a sweep trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    ElasticNet,
    Ridge,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ElasticNet => "ElasticNet",
            Self::Ridge => "Ridge",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "elasticnet" | "elastic_net" | "elastic-net" => Ok(Self::ElasticNet),
            "ridge" => Ok(Self::Ridge),
            other => Err(format!("unknown model '{other}' (expected elasticnet or ridge)")),
        }
    }
}

/// Learned weights of a linear model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub n_iter: usize,
}

impl LinearFit {
    fn predict(&self, x: &Array2<f64>) -> WqResult<Array1<f64>> {
        if x.ncols() != self.coefficients.len() {
            return Err(DataError::ShapeMismatch {
                message: format!(
                    "model has {} coefficients, input has {} columns",
                    self.coefficients.len(),
                    x.ncols()
                ),
            }
            .into());
        }
        let w = Array1::from(self.coefficients.clone());
        Ok(x.dot(&w) + self.intercept)
    }
}

/// Solver settings shared by both models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    pub max_iter: usize,
    pub tol: f64,
    pub fit_intercept: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-4,
            fit_intercept: true,
        }
    }
}

impl SolverOptions {
    fn apply(&mut self, name: &str, value: &ParameterValue) -> WqResult<bool> {
        match name {
            "max_iter" => {
                self.max_iter = value
                    .as_usize()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| {
                        config_error!(name, "expected a positive integer, got {value}")
                    })?;
            }
            "tol" => {
                self.tol = positive(name, value)?;
            }
            "fit_intercept" => {
                self.fit_intercept = value
                    .as_bool()
                    .ok_or_else(|| config_error!(name, "expected true or false, got {value}"))?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn insert_into(&self, params: &mut ParameterSet) {
        params.insert("max_iter".into(), ParameterValue::Int(self.max_iter as i64));
        params.insert("tol".into(), ParameterValue::Float(self.tol));
        params.insert(
            "fit_intercept".into(),
            ParameterValue::Json(serde_json::Value::Bool(self.fit_intercept)),
        );
    }
}

fn positive(name: &str, value: &ParameterValue) -> WqResult<f64> {
    value
        .as_f64()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| config_error!(name, "expected a positive number, got {value}"))
}

fn non_negative(name: &str, value: &ParameterValue) -> WqResult<f64> {
    value
        .as_f64()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| config_error!(name, "expected a non-negative number, got {value}"))
}

fn unknown(name: &str, model: ModelKind) -> wq_types::WqError {
    ConfigError::UnknownParameter {
        name: name.to_string(),
        model: model.to_string(),
    }
    .into()
}

/// Linear regression with combined L1 and L2 penalties.
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticNet {
    pub alpha: f64,
    pub l1_ratio: f64,
    pub options: SolverOptions,
    fit: Option<LinearFit>,
}

impl Default for ElasticNet {
    fn default() -> Self {
        Self::new(1.0, 0.5)
    }
}

impl ElasticNet {
    pub fn new(alpha: f64, l1_ratio: f64) -> Self {
        Self {
            alpha,
            l1_ratio,
            options: SolverOptions::default(),
            fit: None,
        }
    }

    pub fn from_params(params: &ParameterSet) -> WqResult<Self> {
        let mut model = Self::default();
        for (name, value) in params {
            match name.as_str() {
                "alpha" => model.alpha = non_negative(name, value)?,
                "l1_ratio" => {
                    model.l1_ratio = value
                        .as_f64()
                        .filter(|r| (0.0..=1.0).contains(r))
                        .ok_or_else(|| {
                            config_error!(name, "expected a value in [0, 1], got {value}")
                        })?
                }
                _ => {
                    if !model.options.apply(name, value)? {
                        return Err(unknown(name, ModelKind::ElasticNet));
                    }
                }
            }
        }
        Ok(model)
    }
}

impl Regressor for ElasticNet {
    fn kind(&self) -> ModelKind {
        ModelKind::ElasticNet
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> WqResult<()> {
        let n = x.nrows() as f64;
        let l1 = self.alpha * self.l1_ratio * n;
        let l2 = self.alpha * (1.0 - self.l1_ratio) * n;
        self.fit = Some(fit_linear(x, y, l1, l2, &self.options)?);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> WqResult<Array1<f64>> {
        self.fit
            .as_ref()
            .ok_or_else(|| data_error!("ElasticNet has not been fitted"))?
            .predict(x)
    }

    fn fitted(&self) -> Option<&LinearFit> {
        self.fit.as_ref()
    }

    fn hyperparameters(&self) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("alpha".into(), ParameterValue::Float(self.alpha));
        params.insert("l1_ratio".into(), ParameterValue::Float(self.l1_ratio));
        self.options.insert_into(&mut params);
        params
    }
}

/// Linear regression with an L2 penalty.
#[derive(Debug, Clone, PartialEq)]
pub struct Ridge {
    pub alpha: f64,
    pub options: SolverOptions,
    fit: Option<LinearFit>,
}

impl Default for Ridge {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Ridge {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            options: SolverOptions::default(),
            fit: None,
        }
    }

    pub fn from_params(params: &ParameterSet) -> WqResult<Self> {
        let mut model = Self::default();
        for (name, value) in params {
            if name == "alpha" {
                model.alpha = non_negative(name, value)?;
            } else if !model.options.apply(name, value)? {
                return Err(unknown(name, ModelKind::Ridge));
            }
        }
        Ok(model)
    }
}

impl Regressor for Ridge {
    fn kind(&self) -> ModelKind {
        ModelKind::Ridge
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> WqResult<()> {
        self.fit = Some(fit_linear(x, y, 0.0, self.alpha, &self.options)?);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> WqResult<Array1<f64>> {
        self.fit
            .as_ref()
            .ok_or_else(|| data_error!("Ridge has not been fitted"))?
            .predict(x)
    }

    fn fitted(&self) -> Option<&LinearFit> {
        self.fit.as_ref()
    }

    fn hyperparameters(&self) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("alpha".into(), ParameterValue::Float(self.alpha));
        self.options.insert_into(&mut params);
        params
    }
}

/// Construct an unfitted regressor from one grid combination.
pub fn build_regressor(kind: ModelKind, params: &ParameterSet) -> WqResult<Box<dyn Regressor>> {
    Ok(match kind {
        ModelKind::ElasticNet => Box::new(ElasticNet::from_params(params)?),
        ModelKind::Ridge => Box::new(Ridge::from_params(params)?),
    })
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

fn fit_linear(
    x: &Array2<f64>,
    y: &Array1<f64>,
    l1: f64,
    l2: f64,
    options: &SolverOptions,
) -> WqResult<LinearFit> {
    let (n_rows, n_cols) = x.dim();
    if n_rows == 0 {
        return Err(DataError::EmptyPartition {
            message: "cannot fit on zero rows".to_string(),
        }
        .into());
    }
    if y.len() != n_rows {
        return Err(DataError::ShapeMismatch {
            message: format!("X has {n_rows} rows but y has {}", y.len()),
        }
        .into());
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(DataError::NumericalFailure {
            message: "input contains NaN or infinite values".to_string(),
        }
        .into());
    }

    let (x_mean, y_mean) = if options.fit_intercept {
        let x_mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_cols));
        (x_mean, y.mean().unwrap_or(0.0))
    } else {
        (Array1::zeros(n_cols), 0.0)
    };
    let xc = x - &x_mean;
    let mut residual = y - y_mean;

    let col_norms: Vec<f64> = xc.columns().into_iter().map(|c| c.dot(&c)).collect();
    let mut w = Array1::<f64>::zeros(n_cols);
    let mut n_iter = 0;
    let mut converged = n_cols == 0;

    while !converged && n_iter < options.max_iter {
        n_iter += 1;
        let mut max_delta = 0.0_f64;
        let mut max_weight = 0.0_f64;

        for j in 0..n_cols {
            if col_norms[j] == 0.0 {
                continue;
            }
            let column = xc.column(j);
            let old = w[j];
            let rho = column.dot(&residual) + col_norms[j] * old;
            let new = soft_threshold(rho, l1) / (col_norms[j] + l2);

            if new != old {
                residual.scaled_add(old - new, &column);
                w[j] = new;
            }
            max_delta = max_delta.max((new - old).abs());
            max_weight = max_weight.max(new.abs());
        }

        if !max_delta.is_finite() {
            return Err(DataError::NumericalFailure {
                message: format!("coordinate descent diverged at iteration {n_iter}"),
            }
            .into());
        }
        converged = max_weight == 0.0 || max_delta <= options.tol * max_weight;
    }

    if !converged {
        tracing::warn!(
            "coordinate descent did not converge in {} iterations (l1={:.4}, l2={:.4})",
            options.max_iter,
            l1,
            l2
        );
    }

    let intercept = y_mean - x_mean.dot(&w);
    if !intercept.is_finite() || w.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NumericalFailure {
            message: "fitted coefficients are not finite".to_string(),
        }
        .into());
    }

    Ok(LinearFit {
        coefficients: w.to_vec(),
        intercept,
        n_iter,
    })
}
