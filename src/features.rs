//! Per-record feature derivation: platform, hour/day, day block, and
//! positional secondary-theme labels.
//!
//! Every helper here is total: malformed inputs map to empty or missing
//! values instead of errors, so a bad record never fails its batch.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::day_blocks::{DEFAULT_RANGES, HOURS_PER_DAY};
use crate::constants::features::{
    DAY_FORMAT, SECONDARY_THEME_SLOTS, TIMESTAMP_FORMAT, UNKNOWN_THEME_LABEL,
};
use crate::constants::themes::DEFAULT_THEMES;
use crate::data::{DerivedFeatures, EnrichedRecord, PostRecord};
use crate::errors::PipelineError;
use crate::types::{DayBlockLabel, Platform, ThemeCode, ThemeLabel};

/// Secondary-theme code to label table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThemeTable {
    labels: BTreeMap<ThemeCode, ThemeLabel>,
}

impl Default for ThemeTable {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_THEMES)
    }
}

impl ThemeTable {
    /// Build a table from `(code, label)` pairs; later pairs win on duplicate codes.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (ThemeCode, S)>,
        S: Into<ThemeLabel>,
    {
        Self {
            labels: pairs
                .into_iter()
                .map(|(code, label)| (code, label.into()))
                .collect(),
        }
    }

    /// Label for `code`, or `Unknown` when the code is not in the table.
    pub fn label_for(&self, code: ThemeCode) -> ThemeLabel {
        self.labels
            .get(&code)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_THEME_LABEL.to_string())
    }

    /// Number of configured codes.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` when no codes are configured.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Inclusive hour range mapped to a day-block label.
///
/// `start > end` wraps past midnight (`23..=4` covers 23, 0, 1, 2, 3, 4).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayBlockRange {
    /// Label emitted for hours in the range.
    pub label: DayBlockLabel,
    /// First hour, inclusive.
    pub start: u32,
    /// Last hour, inclusive.
    pub end: u32,
}

impl DayBlockRange {
    /// Create a range for `label` covering `start..=end` (wrapping when `start > end`).
    pub fn new(label: impl Into<DayBlockLabel>, start: u32, end: u32) -> Self {
        Self {
            label: label.into(),
            start,
            end,
        }
    }

    /// Returns `true` when `hour` falls inside this range.
    pub fn contains(&self, hour: u32) -> bool {
        if hour >= HOURS_PER_DAY {
            return false;
        }
        if self.start <= self.end {
            (self.start..=self.end).contains(&hour)
        } else {
            hour >= self.start || hour <= self.end
        }
    }
}

/// Ordered day-block table that must partition the hours 0-23.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayBlockTable {
    ranges: Vec<DayBlockRange>,
}

impl Default for DayBlockTable {
    fn default() -> Self {
        Self {
            ranges: DEFAULT_RANGES
                .iter()
                .map(|(label, start, end)| DayBlockRange::new(*label, *start, *end))
                .collect(),
        }
    }
}

impl DayBlockTable {
    /// Build a table and check that it covers every hour exactly once.
    pub fn new(ranges: Vec<DayBlockRange>) -> Result<Self, PipelineError> {
        let table = Self { ranges };
        table.validate()?;
        Ok(table)
    }

    /// Check the partition invariant: each hour 0-23 matches exactly one range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for range in &self.ranges {
            if range.start >= HOURS_PER_DAY || range.end >= HOURS_PER_DAY {
                return Err(PipelineError::Configuration(format!(
                    "day block '{}' has hour outside 0-23: {}..={}",
                    range.label, range.start, range.end
                )));
            }
        }
        for hour in 0..HOURS_PER_DAY {
            let matches: Vec<&str> = self
                .ranges
                .iter()
                .filter(|range| range.contains(hour))
                .map(|range| range.label.as_str())
                .collect();
            match matches.len() {
                1 => {}
                0 => {
                    return Err(PipelineError::Configuration(format!(
                        "day blocks leave hour {hour} uncovered"
                    )));
                }
                _ => {
                    return Err(PipelineError::Configuration(format!(
                        "day blocks overlap at hour {hour}: {}",
                        matches.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }

    /// Label of the block containing `hour`.
    pub fn block_for(&self, hour: u32) -> Option<&str> {
        self.ranges
            .iter()
            .find(|range| range.contains(hour))
            .map(|range| range.label.as_str())
    }

    /// Configured ranges in table order.
    pub fn ranges(&self) -> &[DayBlockRange] {
        &self.ranges
    }
}

/// Parse a record timestamp using the fixed `date` layout.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok()
}

/// Network location of `raw` as written, without case folding or port removal.
/// Empty when the url does not parse or has no authority.
pub fn platform_from_url(raw: &str) -> Platform {
    match Url::parse(raw) {
        Ok(parsed) if parsed.has_authority() => raw_authority(raw).unwrap_or_default(),
        _ => Platform::new(),
    }
}

fn raw_authority(raw: &str) -> Option<Platform> {
    let (_, rest) = raw.split_once("//")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

/// Map theme codes to positional label slots.
///
/// Order is preserved; slots past the supplied codes are `None`, and codes
/// beyond the slot count are ignored. A null code is labelled `Unknown` in
/// its own slot.
pub fn secondary_theme_slots(
    codes: &[Option<ThemeCode>],
    themes: &ThemeTable,
) -> [Option<ThemeLabel>; SECONDARY_THEME_SLOTS] {
    let mut slots: [Option<ThemeLabel>; SECONDARY_THEME_SLOTS] = Default::default();
    for (slot, code) in slots.iter_mut().zip(codes) {
        *slot = Some(match code {
            Some(code) => themes.label_for(*code),
            None => UNKNOWN_THEME_LABEL.to_string(),
        });
    }
    slots
}

/// Stateless record-to-features mapper.
#[derive(Clone, Debug, Default)]
pub struct FeatureDeriver {
    themes: ThemeTable,
    day_blocks: DayBlockTable,
}

impl FeatureDeriver {
    /// Create a deriver from theme and day-block tables.
    pub fn new(themes: ThemeTable, day_blocks: DayBlockTable) -> Self {
        Self { themes, day_blocks }
    }

    /// Derive platform, time, and theme fields for one record.
    pub fn derive(&self, record: &PostRecord) -> DerivedFeatures {
        let platform = record
            .url
            .as_deref()
            .map(platform_from_url)
            .unwrap_or_default();
        let timestamp = record.date.as_deref().and_then(parse_timestamp);
        let hour = timestamp.map(|ts| ts.hour());
        let day = timestamp.map(|ts| ts.format(DAY_FORMAT).to_string());
        let day_block = hour
            .and_then(|hour| self.day_blocks.block_for(hour))
            .map(str::to_string);
        DerivedFeatures {
            platform,
            hour,
            day,
            day_block,
            secondary_themes: secondary_theme_slots(record.secondary_theme_codes(), &self.themes),
        }
    }

    /// Derive features and project the record for grouped aggregation.
    pub fn enrich(&self, record: &PostRecord) -> EnrichedRecord {
        EnrichedRecord::new(record, self.derive(record))
    }

    /// Day-block table used by this deriver.
    pub fn day_blocks(&self) -> &DayBlockTable {
        &self.day_blocks
    }
}
