//! Seeded train/validation row partitioning.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use wq_types::{config_error, DataError, WqResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of rows held out for validation, in (0, 1).
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.3,
            seed: 42,
        }
    }
}

/// Row indices of each side of a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `0..n_rows` with a seeded RNG and cut off the validation share.
///
/// The validation side gets `ceil(n_rows * test_fraction)` rows.
pub fn train_test_split(n_rows: usize, config: &SplitConfig) -> WqResult<SplitIndices> {
    let fraction = config.test_fraction;
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(config_error!(
            "test_fraction",
            "must be strictly between 0 and 1, got {fraction}"
        ));
    }

    let n_test = (n_rows as f64 * fraction).ceil() as usize;
    let n_train = n_rows.saturating_sub(n_test);
    if n_test == 0 || n_train == 0 {
        return Err(DataError::EmptyPartition {
            message: format!(
                "{n_rows} rows with test_fraction {fraction} leaves {n_train} train / {n_test} validation rows"
            ),
        }
        .into());
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut order: Vec<usize> = (0..n_rows).collect();
    order.shuffle(&mut rng);

    let train = order.split_off(n_test);
    tracing::debug!(
        "Split {} rows into {} train / {} validation (seed {})",
        n_rows,
        train.len(),
        order.len(),
        config.seed
    );
    Ok(SplitIndices { train, test: order })
}
