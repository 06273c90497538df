//! Grouped sentiment aggregation.
//!
//! Each batch builds an owned `PartialAggregate`; a single `GlobalReducer`
//! folds partials together. Merging is element-wise addition per key, so
//! any batching and any merge order produce the same groups.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde::{Deserialize, Serialize};

use crate::data::EnrichedRecord;
use crate::errors::{PipelineError, Stage};
use crate::types::{DayBlockLabel, DayName, Platform, ThemeLabel};

/// Composite categorical key identifying one aggregate bucket.
///
/// `None` slots are a missing-value sentinel distinct from every concrete
/// value, including the empty string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    /// Day-block label of the post hour.
    pub day_block: Option<DayBlockLabel>,
    /// Abbreviated weekday name.
    pub day: Option<DayName>,
    /// Network location of the post url; empty when unknown.
    pub platform: Platform,
    /// Dominant emotion label.
    pub main_emotion: Option<String>,
    /// Primary theme label.
    pub primary_theme: Option<String>,
    /// First secondary theme label.
    pub secondary_theme_1: Option<ThemeLabel>,
    /// Second secondary theme label.
    pub secondary_theme_2: Option<ThemeLabel>,
    /// Third secondary theme label.
    pub secondary_theme_3: Option<ThemeLabel>,
}

impl GroupKey {
    /// Build the key for an enriched record.
    pub fn for_record(record: &EnrichedRecord) -> Self {
        let features = &record.features;
        let [secondary_theme_1, secondary_theme_2, secondary_theme_3] =
            features.secondary_themes.clone();
        Self {
            day_block: features.day_block.clone(),
            day: features.day.clone(),
            platform: features.platform.clone(),
            main_emotion: record.main_emotion.clone(),
            primary_theme: record.primary_theme.clone(),
            secondary_theme_1,
            secondary_theme_2,
            secondary_theme_3,
        }
    }
}

/// Running `(count, sentiment_sum)` state for one group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    /// Sentiment observations added.
    pub count: u64,
    /// Sum of the added sentiments.
    pub sentiment_sum: f64,
}

impl Accumulator {
    /// Add one sentiment observation.
    pub fn add(&mut self, sentiment: f64) {
        self.count += 1;
        self.sentiment_sum += sentiment;
    }

    /// Add another accumulator's totals.
    pub fn merge(&mut self, other: Accumulator) {
        self.count += other.count;
        self.sentiment_sum += other.sentiment_sum;
    }

    /// Mean sentiment, `None` when nothing was counted.
    pub fn avg_sentiment(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sentiment_sum / self.count as f64)
    }
}

/// Group accumulators for one disjoint batch of records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartialAggregate {
    groups: HashMap<GroupKey, Accumulator>,
    skipped_sentiment: u64,
}

impl PartialAggregate {
    /// Aggregate every record in `records`.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a EnrichedRecord>,
    {
        let mut partial = Self::default();
        for record in records {
            partial.observe(record);
        }
        partial
    }

    /// Add one record. Missing or NaN sentiment leaves every group untouched.
    pub fn observe(&mut self, record: &EnrichedRecord) {
        let Some(sentiment) = record.valid_sentiment() else {
            self.skipped_sentiment += 1;
            return;
        };
        self.groups
            .entry(GroupKey::for_record(record))
            .or_default()
            .add(sentiment);
    }

    /// Combine two partials by summing accumulators per key.
    pub fn merge(mut self, mut other: PartialAggregate) -> PartialAggregate {
        if self.groups.len() < other.groups.len() {
            std::mem::swap(&mut self, &mut other);
        }
        for (key, acc) in other.groups {
            self.groups.entry(key).or_default().merge(acc);
        }
        self.skipped_sentiment += other.skipped_sentiment;
        self
    }

    /// Accumulator for `key`.
    pub fn get(&self, key: &GroupKey) -> Option<&Accumulator> {
        self.groups.get(key)
    }

    /// Iterate over `(key, accumulator)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &Accumulator)> {
        self.groups.iter()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns `true` when no record contributed.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Records excluded for missing or NaN sentiment.
    pub fn skipped_sentiment(&self) -> u64 {
        self.skipped_sentiment
    }
}

/// Final grouped output row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupedRow {
    /// See [`GroupKey::day_block`].
    pub day_block: Option<DayBlockLabel>,
    /// See [`GroupKey::day`].
    pub day: Option<DayName>,
    /// See [`GroupKey::platform`].
    pub platform: Platform,
    /// See [`GroupKey::main_emotion`].
    pub main_emotion: Option<String>,
    /// See [`GroupKey::primary_theme`].
    pub primary_theme: Option<String>,
    /// See [`GroupKey::secondary_theme_1`].
    pub secondary_theme_1: Option<ThemeLabel>,
    /// See [`GroupKey::secondary_theme_2`].
    pub secondary_theme_2: Option<ThemeLabel>,
    /// See [`GroupKey::secondary_theme_3`].
    pub secondary_theme_3: Option<ThemeLabel>,
    /// Records counted in the group.
    pub count: u64,
    /// Mean sentiment of the group; `None` for an empty group.
    pub avg_sentiment: Option<f64>,
}

impl GroupedRow {
    fn new(key: GroupKey, acc: Accumulator) -> Self {
        Self {
            day_block: key.day_block,
            day: key.day,
            platform: key.platform,
            main_emotion: key.main_emotion,
            primary_theme: key.primary_theme,
            secondary_theme_1: key.secondary_theme_1,
            secondary_theme_2: key.secondary_theme_2,
            secondary_theme_3: key.secondary_theme_3,
            count: acc.count,
            avg_sentiment: acc.avg_sentiment(),
        }
    }

    /// Group key this row was produced from.
    pub fn key(&self) -> GroupKey {
        GroupKey {
            day_block: self.day_block.clone(),
            day: self.day.clone(),
            platform: self.platform.clone(),
            main_emotion: self.main_emotion.clone(),
            primary_theme: self.primary_theme.clone(),
            secondary_theme_1: self.secondary_theme_1.clone(),
            secondary_theme_2: self.secondary_theme_2.clone(),
            secondary_theme_3: self.secondary_theme_3.clone(),
        }
    }
}

/// Single owner of the merged group state.
#[derive(Debug, Default)]
pub struct GlobalReducer {
    groups: HashMap<GroupKey, Accumulator>,
    max_groups: Option<usize>,
    partials_merged: u64,
}

impl GlobalReducer {
    /// Create a reducer; `max_groups` caps the number of distinct keys.
    pub fn new(max_groups: Option<usize>) -> Self {
        Self {
            groups: HashMap::new(),
            max_groups,
            partials_merged: 0,
        }
    }

    /// Merge one partial.
    ///
    /// Capacity is checked and reserved before any accumulator changes, so a
    /// rejected partial leaves previously merged state intact.
    pub fn absorb(&mut self, partial: PartialAggregate) -> Result<(), PipelineError> {
        let new_keys = partial
            .groups
            .keys()
            .filter(|key| !self.groups.contains_key(*key))
            .count();
        if let Some(limit) = self.max_groups {
            let projected = self.groups.len() + new_keys;
            if projected > limit {
                return Err(PipelineError::stage(
                    Stage::GlobalReduce,
                    format!("distinct group count {projected} exceeds limit {limit}"),
                ));
            }
        }
        self.groups.try_reserve(new_keys).map_err(|err| {
            PipelineError::stage(
                Stage::GlobalReduce,
                format!("cannot grow group table by {new_keys} keys: {err}"),
            )
        })?;
        for (key, acc) in partial.groups {
            match self.groups.entry(key) {
                Entry::Occupied(mut slot) => slot.get_mut().merge(acc),
                Entry::Vacant(slot) => {
                    slot.insert(acc);
                }
            }
        }
        self.partials_merged += 1;
        Ok(())
    }

    /// Number of distinct keys merged so far.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns `true` when nothing has been merged.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of partials merged.
    pub fn partials_merged(&self) -> u64 {
        self.partials_merged
    }

    /// Accumulator for `key`.
    pub fn get(&self, key: &GroupKey) -> Option<&Accumulator> {
        self.groups.get(key)
    }

    /// Emit final rows ordered by group key.
    pub fn finish(self) -> Vec<GroupedRow> {
        let mut entries: Vec<(GroupKey, Accumulator)> = self.groups.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
            .into_iter()
            .map(|(key, acc)| GroupedRow::new(key, acc))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DerivedFeatures;

    fn enriched(day_block: &str, emotion: &str, sentiment: Option<f64>) -> EnrichedRecord {
        EnrichedRecord {
            features: DerivedFeatures {
                platform: "x.com".to_string(),
                hour: Some(10),
                day: Some("Tue".to_string()),
                day_block: Some(day_block.to_string()),
                secondary_themes: [Some("Politics".to_string()), None, None],
            },
            main_emotion: Some(emotion.to_string()),
            primary_theme: Some("Politics".to_string()),
            sentiment,
        }
    }

    #[test]
    fn aggregates_count_and_mean_excluding_missing_sentiment() {
        let records = vec![
            enriched("Morning", "joy", Some(0.5)),
            enriched("Morning", "joy", Some(0.7)),
            enriched("Morning", "joy", None),
        ];
        let partial = PartialAggregate::from_records(&records);
        assert_eq!(partial.len(), 1);
        assert_eq!(partial.skipped_sentiment(), 1);
        let acc = partial
            .get(&GroupKey::for_record(&records[0]))
            .expect("group");
        assert_eq!(acc.count, 2);
        assert!((acc.avg_sentiment().unwrap() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn nan_only_key_creates_no_group() {
        let records = vec![
            enriched("Morning", "joy", Some(f64::NAN)),
            enriched("Evening", "anger", Some(-0.2)),
        ];
        let partial = PartialAggregate::from_records(&records);
        assert_eq!(partial.len(), 1);
        assert!(partial.get(&GroupKey::for_record(&records[0])).is_none());
    }

    #[test]
    fn missing_slots_differ_from_empty_strings() {
        let mut with_none = enriched("Morning", "joy", Some(0.1));
        with_none.main_emotion = None;
        let mut with_empty = enriched("Morning", "joy", Some(0.1));
        with_empty.main_emotion = Some(String::new());
        assert_ne!(
            GroupKey::for_record(&with_none),
            GroupKey::for_record(&with_empty)
        );
    }

    #[test]
    fn merge_sums_per_key() {
        let a = PartialAggregate::from_records(&[
            enriched("Morning", "joy", Some(0.5)),
            enriched("Evening", "fear", Some(-1.0)),
        ]);
        let b = PartialAggregate::from_records(&[enriched("Morning", "joy", Some(0.25))]);
        let merged = a.merge(b);
        let key = GroupKey::for_record(&enriched("Morning", "joy", None));
        let acc = merged.get(&key).expect("merged group");
        assert_eq!(acc.count, 2);
        assert!((acc.sentiment_sum - 0.75).abs() < 1e-12);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn reducer_rejects_partial_over_group_limit_without_mutating() {
        let mut reducer = GlobalReducer::new(Some(1));
        reducer
            .absorb(PartialAggregate::from_records(&[enriched("Morning", "joy", Some(0.5))]))
            .expect("first partial fits");
        let err = reducer
            .absorb(PartialAggregate::from_records(&[
                enriched("Morning", "joy", Some(0.5)),
                enriched("Night", "joy", Some(0.5)),
            ]))
            .expect_err("second partial exceeds limit");
        assert!(matches!(
            err,
            PipelineError::Stage {
                stage: Stage::GlobalReduce,
                ..
            }
        ));
        assert_eq!(reducer.len(), 1);
        let key = GroupKey::for_record(&enriched("Morning", "joy", None));
        assert_eq!(reducer.get(&key).map(|acc| acc.count), Some(1));
        assert_eq!(reducer.partials_merged(), 1);
    }

    #[test]
    fn finish_emits_sorted_rows_with_average() {
        let mut reducer = GlobalReducer::new(None);
        reducer
            .absorb(PartialAggregate::from_records(&[
                enriched("Night", "joy", Some(0.5)),
                enriched("Evening", "joy", Some(0.1)),
                enriched("Evening", "joy", Some(0.3)),
            ]))
            .expect("absorb");
        let rows = reducer.finish();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].day_block.as_deref(), Some("Evening"));
        assert_eq!(rows[0].count, 2);
        assert!((rows[0].avg_sentiment.unwrap() - 0.2).abs() < 1e-12);
        assert_eq!(rows[1].key().day_block.as_deref(), Some("Night"));
    }
}
