//! The data preparation step: correlation-filtered features split into four partitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use wq_types::{DataError, DataPaths, WqResult};

use crate::features::{correlations_with, select_features, DEFAULT_CORRELATION_THRESHOLD};
use crate::frame::Frame;
use crate::split::{train_test_split, SplitConfig};

/// Derive a 0/1 column from a categorical one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub source: String,
    pub value: String,
    pub name: String,
}

impl Default for IndicatorSpec {
    fn default() -> Self {
        Self {
            source: "type".to_string(),
            value: "red".to_string(),
            name: "is_red".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepConfig {
    pub input: PathBuf,
    pub target: String,
    pub indicator: Option<IndicatorSpec>,
    pub threshold: f64,
    pub split: SplitConfig,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data/WineQualityData.csv"),
            target: "quality".to_string(),
            indicator: Some(IndicatorSpec::default()),
            threshold: DEFAULT_CORRELATION_THRESHOLD,
            split: SplitConfig::default(),
        }
    }
}

/// Feature and target frames for each side of the split.
#[derive(Debug, Clone, PartialEq)]
pub struct Partitions {
    pub x_train: Frame,
    pub x_test: Frame,
    pub y_train: Frame,
    pub y_test: Frame,
    pub features: Vec<String>,
    pub target: String,
}

impl Partitions {
    pub fn write(&self, paths: &DataPaths) -> WqResult<()> {
        self.x_train.write_csv(&paths.x_train)?;
        self.x_test.write_csv(&paths.x_test)?;
        self.y_train.write_csv(&paths.y_train)?;
        self.y_test.write_csv(&paths.y_test)?;
        Ok(())
    }

    /// Load partitions previously written by [`Partitions::write`].
    pub fn read(paths: &DataPaths) -> WqResult<Self> {
        let x_train = Frame::read_csv(&paths.x_train)?;
        let x_test = Frame::read_csv(&paths.x_test)?;
        let y_train = Frame::read_csv(&paths.y_train)?;
        let y_test = Frame::read_csv(&paths.y_test)?;

        if x_train.column_names() != x_test.column_names() {
            return Err(DataError::ShapeMismatch {
                message: "train and validation feature columns differ".to_string(),
            }
            .into());
        }
        let target = match (y_train.column_names().as_slice(), y_test.column_names().as_slice()) {
            ([a], [b]) if a == b => a.to_string(),
            _ => {
                return Err(DataError::ShapeMismatch {
                    message: "target files must hold the same single column".to_string(),
                }
                .into())
            }
        };

        let features = x_train.column_names().iter().map(|s| s.to_string()).collect();
        Ok(Self {
            x_train,
            x_test,
            y_train,
            y_test,
            features,
            target,
        })
    }
}

/// Run the full preparation pipeline on an already loaded frame.
pub fn prepare(mut frame: Frame, config: &PrepConfig) -> WqResult<Partitions> {
    frame.normalize_column_names();
    if let Some(ind) = &config.indicator {
        frame.add_indicator(&ind.source, &ind.value, &ind.name)?;
    }

    // Correlations use every row; missing values are only dropped afterwards.
    let features = select_features(&frame, &config.target, config.threshold)?;
    if features.is_empty() {
        let best = correlations_with(&frame, &config.target)?
            .into_iter()
            .map(|(_, r)| r.abs())
            .fold(0.0_f64, f64::max);
        return Err(DataError::EmptyPartition {
            message: format!(
                "no feature has |r| > {} against {} (strongest is {:.4})",
                config.threshold, config.target, best
            ),
        }
        .into());
    }

    let complete = frame.drop_missing();
    tracing::info!(
        "Dropped {} rows with missing values, {} remain",
        frame.n_rows() - complete.n_rows(),
        complete.n_rows()
    );

    let x = complete.select(&features)?;
    let y = complete.select(&[config.target.as_str()])?;
    let split = train_test_split(complete.n_rows(), &config.split)?;

    Ok(Partitions {
        x_train: x.take_rows(&split.train),
        x_test: x.take_rows(&split.test),
        y_train: y.take_rows(&split.train),
        y_test: y.take_rows(&split.test),
        features,
        target: config.target.clone(),
    })
}

/// Load `config.input`, prepare it and write the four partition files.
pub fn run(config: &PrepConfig, paths: &DataPaths) -> WqResult<Partitions> {
    let frame = Frame::read_csv(&config.input)?;
    let partitions = prepare(frame, config)?;
    partitions.write(paths)?;
    tracing::info!(
        "Wrote {} train / {} validation rows with features {:?}",
        partitions.x_train.n_rows(),
        partitions.x_test.n_rows(),
        partitions.features
    );
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Twenty wines where alcohol tracks quality; row 7 lacks a pH reading.
    fn wine_csv() -> String {
        let mut csv = String::from("type,alcohol,residual sugar,pH,quality\n");
        for i in 0..20 {
            let quality = 3 + i % 6;
            let kind = if i % 3 == 0 { "red" } else { "white" };
            let alcohol = 8.0 + quality as f64 * 0.5 + i as f64 * 0.01;
            let sugar = if i % 2 == 0 { 2.0 } else { 2.0000001 };
            let ph = if i == 7 {
                String::new()
            } else {
                format!("{:.2}", 3.0 + (i % 4) as f64 * 0.1)
            };
            csv.push_str(&format!("{kind},{alcohol},{sugar},{ph},{quality}\n"));
        }
        csv
    }

    fn frame() -> Frame {
        Frame::from_reader(wine_csv().as_bytes()).unwrap()
    }

    fn row_keys(x: &Frame, y: &Frame) -> Vec<String> {
        let x_matrix = x.to_matrix().unwrap();
        let y_values = y.to_vector("quality").unwrap();
        x_matrix
            .rows()
            .into_iter()
            .zip(y_values.iter())
            .map(|(row, q)| format!("{row:?}|{q}"))
            .collect()
    }

    #[test]
    fn prepare_selects_correlated_features() {
        let partitions = prepare(frame(), &PrepConfig::default()).unwrap();
        assert!(partitions.features.contains(&"alcohol".to_string()));
        assert!(!partitions.features.contains(&"quality".to_string()));
        assert_eq!(partitions.y_train.column_names(), vec!["quality"]);
    }

    #[test]
    fn prepare_drops_incomplete_rows_and_covers_the_rest() {
        let partitions = prepare(frame(), &PrepConfig::default()).unwrap();
        let total = partitions.x_train.n_rows() + partitions.x_test.n_rows();
        assert_eq!(total, 19);
        assert_eq!(partitions.x_test.n_rows(), 6);
        assert_eq!(partitions.y_train.n_rows(), partitions.x_train.n_rows());
    }

    #[test]
    fn prepare_is_deterministic() {
        let a = prepare(frame(), &PrepConfig::default()).unwrap();
        let b = prepare(frame(), &PrepConfig::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            row_keys(&a.x_test, &a.y_test),
            row_keys(&b.x_test, &b.y_test)
        );
    }

    #[test]
    fn missing_target_column_fails() {
        let config = PrepConfig {
            target: "score".to_string(),
            ..PrepConfig::default()
        };
        assert!(prepare(frame(), &config).is_err());
    }

    #[test]
    fn nothing_above_threshold_fails() {
        let config = PrepConfig {
            threshold: 1.0,
            ..PrepConfig::default()
        };
        let err = prepare(frame(), &config).unwrap_err();
        assert!(err.to_string().contains("no feature"));
    }

    #[test]
    fn run_writes_four_files_that_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("WineQualityData.csv");
        std::fs::write(&input, wine_csv()).unwrap();

        let config = PrepConfig {
            input,
            ..PrepConfig::default()
        };
        let paths = DataPaths::for_project(dir.path().join("out"), "demo1");
        let written = run(&config, &paths).unwrap();

        for path in paths.all() {
            assert!(path.exists(), "missing {}", path.display());
        }

        let back = Partitions::read(&paths).unwrap();
        assert_eq!(back, written);

        let train: HashSet<String> = row_keys(&back.x_train, &back.y_train).into_iter().collect();
        let test: HashSet<String> = row_keys(&back.x_test, &back.y_test).into_iter().collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), 19);
    }
}
