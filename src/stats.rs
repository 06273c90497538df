//! Per-entity sentiment collection and summary statistics.
//!
//! Sentiment samples are appended while the record stream is scanned and
//! summarized once at the end: percentiles and entropy need the full sample.

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::stats::MEDIAN_PERCENTILE;
use crate::mentions::{AliasRoster, MentionFlags};

/// Arithmetic mean, `None` for an empty sample.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation around `mean`.
pub fn population_std(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

/// Percentile of an ascending-sorted sample using linear interpolation
/// between closest ranks. `pct` is clamped to `[0, 100]`.
pub fn percentile_sorted(sorted: &[f64], pct: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = pct.clamp(0.0, 100.0) / 100.0 * last as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Shannon entropy (base 2) of an equal-width histogram over the sample's
/// observed range, divided by `log2(bins)`.
///
/// Empty samples and `bins <= 1` yield `0.0`. A constant sample is binned
/// over `[value - 0.5, value + 0.5]` and lands in a single bin.
pub fn normalized_entropy(values: &[f64], bins: usize) -> f64 {
    if values.is_empty() || bins <= 1 {
        return 0.0;
    }
    let max_entropy = (bins as f64).log2();
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), value| {
            (lo.min(*value), hi.max(*value))
        });
    let (low, high) = if min == max {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    };
    let width = (high - low) / bins as f64;
    let mut counts = vec![0u64; bins];
    for value in values {
        let idx = (((value - low) / width).floor() as usize).min(bins - 1);
        counts[idx] += 1;
    }
    // Equal-width bins make density proportional to count.
    let total = values.len() as f64;
    let entropy: f64 = counts
        .iter()
        .filter(|count| **count > 0)
        .map(|count| {
            let p = *count as f64 / total;
            p * (1.0 / p).log2()
        })
        .sum();
    (entropy / max_entropy).clamp(0.0, 1.0)
}

/// Output column name for a percentile (`10.0` -> `percentile_10`).
pub fn percentile_column(pct: f64) -> String {
    if pct.fract() == 0.0 {
        format!("percentile_{}", pct as u64)
    } else {
        format!("percentile_{pct}")
    }
}

/// Descriptive statistics for one sentiment sample.
#[derive(Clone, Debug, PartialEq)]
pub struct SentimentSummary {
    /// Sample size.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// 50th percentile, linearly interpolated.
    pub median: f64,
    /// Population standard deviation.
    pub std: f64,
    /// `(percentile, value)` pairs in requested order.
    pub percentiles: Vec<(f64, f64)>,
    /// Histogram entropy normalized to `[0, 1]`.
    pub entropy: f64,
}

impl SentimentSummary {
    /// Summarize `values`, or `None` when the sample is empty.
    ///
    /// NaN values must be filtered out by the caller.
    pub fn from_values(values: &[f64], percentiles: &[f64], bins: usize) -> Option<Self> {
        let mean = mean(values)?;
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let median = percentile_sorted(&sorted, MEDIAN_PERCENTILE)?;
        let percentiles = percentiles
            .iter()
            .filter_map(|pct| percentile_sorted(&sorted, *pct).map(|value| (*pct, value)))
            .collect();
        Some(Self {
            count: sorted.len(),
            mean,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            median,
            std: population_std(&sorted, mean),
            percentiles,
            entropy: normalized_entropy(&sorted, bins),
        })
    }
}

/// Final per-entity output row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    /// Display name of the entity.
    pub person: String,
    /// Mentions with a valid sentiment.
    pub count: usize,
    /// See [`SentimentSummary::mean`].
    pub avg_sentiment: f64,
    /// See [`SentimentSummary::min`].
    pub min_sentiment: f64,
    /// See [`SentimentSummary::max`].
    pub max_sentiment: f64,
    /// See [`SentimentSummary::median`].
    pub median_sentiment: f64,
    /// See [`SentimentSummary::std`].
    pub std_sentiment: f64,
    /// `percentile_<p>` columns, flattened into the row when serialized.
    #[serde(flatten)]
    pub percentiles: IndexMap<String, f64>,
    /// See [`SentimentSummary::entropy`].
    pub sentiment_entropy: f64,
}

impl EntityRow {
    fn from_summary(person: String, summary: SentimentSummary) -> Self {
        Self {
            person,
            count: summary.count,
            avg_sentiment: summary.mean,
            min_sentiment: summary.min,
            max_sentiment: summary.max,
            median_sentiment: summary.median,
            std_sentiment: summary.std,
            percentiles: summary
                .percentiles
                .iter()
                .map(|(pct, value)| (percentile_column(*pct), *value))
                .collect(),
            sentiment_entropy: summary.entropy,
        }
    }

    /// Value of the `pct` percentile column, if it was requested.
    pub fn percentile(&self, pct: f64) -> Option<f64> {
        self.percentiles.get(&percentile_column(pct)).copied()
    }
}

/// Append-only per-entity sentiment samples, indexed in roster order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntitySentimentCollector {
    samples: Vec<Vec<f64>>,
}

impl EntitySentimentCollector {
    /// Create an empty collector sized for `roster`.
    pub fn new(roster: &AliasRoster) -> Self {
        Self {
            samples: vec![Vec::new(); roster.len()],
        }
    }

    /// Record `sentiment` for every entity flagged in `flags`.
    ///
    /// Missing or NaN sentiment is ignored.
    pub fn observe(&mut self, flags: &MentionFlags<'_>, sentiment: Option<f64>) {
        let Some(sentiment) = sentiment.filter(|value| !value.is_nan()) else {
            return;
        };
        for idx in flags.mentioned() {
            if let Some(samples) = self.samples.get_mut(idx) {
                samples.push(sentiment);
            }
        }
    }

    /// Append every sample from `other`.
    pub fn merge(&mut self, other: EntitySentimentCollector) {
        if self.samples.len() < other.samples.len() {
            self.samples.resize_with(other.samples.len(), Vec::new);
        }
        for (mine, theirs) in self.samples.iter_mut().zip(other.samples) {
            mine.extend(theirs);
        }
    }

    /// Collected samples for the entity at roster index `idx`.
    pub fn samples(&self, idx: usize) -> &[f64] {
        self.samples.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total samples across all entities.
    pub fn total_samples(&self) -> usize {
        self.samples.iter().map(Vec::len).sum()
    }

    /// Summarize each entity with at least one sample, sorted by descending
    /// count (ties keep roster order).
    pub fn finalize(
        self,
        roster: &AliasRoster,
        percentiles: &[f64],
        bins: usize,
    ) -> Vec<EntityRow> {
        let mut rows: Vec<EntityRow> = roster
            .groups()
            .par_iter()
            .zip(self.samples.into_par_iter())
            .filter_map(|(group, values)| {
                SentimentSummary::from_values(&values, percentiles, bins)
                    .map(|summary| EntityRow::from_summary(group.display_name(), summary))
            })
            .collect();
        rows.sort_by(|a, b| b.count.cmp(&a.count));
        rows
    }
}
