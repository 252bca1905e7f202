//! Correlation-based feature selection.

use crate::frame::Frame;
use wq_types::WqResult;

/// Minimum |r| a feature needs against the target to be kept.
pub const DEFAULT_CORRELATION_THRESHOLD: f64 = 0.08;

/// Pearson correlation over rows where both values are present.
///
/// Returns `None` with fewer than two complete pairs or when either side
/// has zero variance.
pub fn pearson(x: &[Option<f64>], y: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Some((*a, *b)),
            _ => None,
        })
        .collect();

    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

/// Correlation of every other numeric column with `target`, ascending by r.
///
/// Columns whose correlation is undefined are left out.
pub fn correlations_with(frame: &Frame, target: &str) -> WqResult<Vec<(String, f64)>> {
    let y = frame.numeric(target)?;

    let mut correlations: Vec<(String, f64)> = frame
        .columns()
        .iter()
        .filter(|c| c.is_numeric() && c.name != target)
        .filter_map(|c| {
            let x = frame.numeric(&c.name).ok()?;
            pearson(x, y).map(|r| (c.name.clone(), r))
        })
        .collect();

    correlations.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(correlations)
}

/// Names of the columns with |r| strictly above `threshold`, ascending by r.
pub fn select_features(frame: &Frame, target: &str, threshold: f64) -> WqResult<Vec<String>> {
    let correlations = correlations_with(frame, target)?;
    for (name, r) in &correlations {
        tracing::debug!("corr({name}, {target}) = {r:.4}");
    }

    let selected: Vec<String> = correlations
        .into_iter()
        .filter(|(_, r)| r.abs() > threshold)
        .map(|(name, _)| name)
        .collect();

    tracing::info!(
        "Selected {} features with |r| > {} against {}: {:?}",
        selected.len(),
        threshold,
        target,
        selected
    );
    Ok(selected)
}
