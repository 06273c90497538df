use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::pipeline::{
    DEFAULT_BATCH_SIZE, DEFAULT_LANGUAGE, DEFAULT_MAX_BATCH_RETRIES, DEFAULT_MENTION_MAX_ROWS,
    DEFAULT_MENTION_THEME, DEFAULT_PARALLEL_BATCHES,
};
use crate::constants::stats::{DEFAULT_HISTOGRAM_BINS, DEFAULT_PERCENTILES};
use crate::data::PostRecord;
use crate::errors::PipelineError;
use crate::features::{DayBlockTable, ThemeTable};
use crate::mentions::AliasRoster;

/// Record admission rule applied before an analysis sees a record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordFilter {
    /// Keep only records with this `language`.
    pub language: Option<String>,
    /// Keep only records with this `primary_theme`.
    pub primary_theme: Option<String>,
    /// Stop admitting records after this many matches.
    pub max_rows: Option<u64>,
}

impl RecordFilter {
    /// Filter that admits every record.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Returns `true` when `record` satisfies the field constraints
    /// (the `max_rows` cap is enforced by `FilterGate`).
    pub fn matches(&self, record: &PostRecord) -> bool {
        field_matches(self.language.as_deref(), record.language.as_deref())
            && field_matches(self.primary_theme.as_deref(), record.primary_theme.as_deref())
    }
}

fn field_matches(expected: Option<&str>, actual: Option<&str>) -> bool {
    match expected {
        Some(expected) => actual == Some(expected),
        None => true,
    }
}

/// Stateful admission counter for one `RecordFilter`.
#[derive(Clone, Debug)]
pub struct FilterGate {
    filter: RecordFilter,
    admitted: u64,
}

impl FilterGate {
    /// Create a gate with no admitted records.
    pub fn new(filter: RecordFilter) -> Self {
        Self {
            filter,
            admitted: 0,
        }
    }

    /// Admit `record` if it matches and the row cap is not reached.
    pub fn admit(&mut self, record: &PostRecord) -> bool {
        if self.is_saturated() || !self.filter.matches(record) {
            return false;
        }
        self.admitted += 1;
        true
    }

    /// Returns `true` once `max_rows` records were admitted.
    pub fn is_saturated(&self) -> bool {
        self.filter
            .max_rows
            .is_some_and(|max_rows| self.admitted >= max_rows)
    }

    /// Records admitted so far.
    pub fn admitted(&self) -> u64 {
        self.admitted
    }
}

/// Top-level pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Records requested from the source per batch.
    pub batch_size: usize,
    /// Batches processed concurrently per round.
    pub parallel_batches: usize,
    /// Additional fetch attempts for a failing batch.
    pub max_batch_retries: usize,
    /// Hard cap on distinct group keys; exceeding it is fatal.
    pub max_groups: Option<usize>,
    /// Admission rule for grouped aggregation.
    pub grouping_filter: RecordFilter,
    /// Admission rule for mention detection.
    pub mention_filter: RecordFilter,
    /// Tracked entities and their aliases.
    pub aliases: AliasRoster,
    /// Secondary theme code labels.
    pub themes: ThemeTable,
    /// Hour ranges per day block.
    pub day_blocks: DayBlockTable,
    /// Histogram bins used for sentiment entropy.
    pub histogram_bins: usize,
    /// Percentiles reported per entity.
    pub percentiles: Vec<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallel_batches: DEFAULT_PARALLEL_BATCHES,
            max_batch_retries: DEFAULT_MAX_BATCH_RETRIES,
            max_groups: None,
            grouping_filter: RecordFilter {
                language: Some(DEFAULT_LANGUAGE.to_string()),
                ..RecordFilter::default()
            },
            mention_filter: RecordFilter {
                language: Some(DEFAULT_LANGUAGE.to_string()),
                primary_theme: Some(DEFAULT_MENTION_THEME.to_string()),
                max_rows: Some(DEFAULT_MENTION_MAX_ROWS),
            },
            aliases: AliasRoster::default(),
            themes: ThemeTable::default(),
            day_blocks: DayBlockTable::default(),
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file; omitted fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            PipelineError::Configuration(format!(
                "failed reading config {}: {err}",
                path.display()
            ))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|err| {
            PipelineError::Configuration(format!(
                "failed parsing config {}: {err}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::Configuration(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.parallel_batches == 0 {
            return Err(PipelineError::Configuration(
                "parallel_batches must be greater than zero".to_string(),
            ));
        }
        if self.histogram_bins == 0 {
            return Err(PipelineError::Configuration(
                "histogram_bins must be greater than zero".to_string(),
            ));
        }
        if let Some(pct) = self
            .percentiles
            .iter()
            .find(|pct| !(0.0..=100.0).contains(*pct))
        {
            return Err(PipelineError::Configuration(format!(
                "percentile {pct} is outside 0-100"
            )));
        }
        self.day_blocks.validate()?;
        self.aliases.validate()?;
        Ok(())
    }
}
