//! Summary metrics across a comparison run.

use serde::Serialize;

use super::calculators::ComparisonEntry;

/// A model id paired with its primary output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelValue {
    pub model_id: String,
    pub value: f64,
}

/// Universal metrics over every successful comparison entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniversalMetrics {
    pub successes: usize,
    pub failures: usize,
    pub lowest: Option<ModelValue>,
    pub highest: Option<ModelValue>,
    pub mean: Option<f64>,
    /// highest - lowest
    pub spread: Option<f64>,
    /// spread relative to lowest, when lowest is non-zero
    pub spread_ratio: Option<f64>,
}

/// Summarize primary outputs of a comparison.
///
/// Ties keep the entry that appears first.
pub fn calculate_universal_metrics(entries: &[ComparisonEntry]) -> UniversalMetrics {
    let values: Vec<ModelValue> = entries
        .iter()
        .filter_map(|entry| {
            entry.result.as_ref().ok().map(|r| ModelValue {
                model_id: entry.model_id.clone(),
                value: r.value,
            })
        })
        .collect();

    let successes = values.len();
    let failures = entries.len() - successes;

    let lowest = values
        .iter()
        .fold(None::<&ModelValue>, |best, v| match best {
            Some(b) if b.value <= v.value => Some(b),
            _ => Some(v),
        })
        .cloned();
    let highest = values
        .iter()
        .fold(None::<&ModelValue>, |best, v| match best {
            Some(b) if b.value >= v.value => Some(b),
            _ => Some(v),
        })
        .cloned();

    let mean = (successes > 0).then(|| values.iter().map(|v| v.value).sum::<f64>() / successes as f64);
    let spread = match (&lowest, &highest) {
        (Some(lo), Some(hi)) => Some(hi.value - lo.value),
        _ => None,
    };
    let spread_ratio = match (&lowest, spread) {
        (Some(lo), Some(spread)) if lo.value != 0.0 => Some(spread / lo.value.abs()),
        _ => None,
    };

    UniversalMetrics {
        successes,
        failures,
        lowest,
        highest,
        mean,
        spread,
        spread_ratio,
    }
}
