//! Batch scheduling for the two analyses.
//!
//! Each round fetches up to `parallel_batches` batches sequentially, admits
//! records through the per-analysis filters, then processes the batches in
//! parallel. Every batch produces owned partial results; only fully built
//! partials are handed to the single reducer, so a failed batch contributes
//! nothing.

use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::{GlobalReducer, GroupedRow, PartialAggregate};
use crate::config::{FilterGate, PipelineConfig};
use crate::data::PostRecord;
use crate::errors::{PipelineError, Stage};
use crate::features::FeatureDeriver;
use crate::mentions::MentionDetector;
use crate::source::{RecordSource, SourceBatch, SourceCursor};
use crate::stats::{EntityRow, EntitySentimentCollector};

/// A batch whose fetch failed after all retries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    /// Zero-based batch sequence number.
    pub batch_index: u64,
    /// Shard of the cursor the batch was fetched from.
    pub shard: usize,
    /// Offset of the cursor the batch was fetched from.
    pub offset: u64,
    /// Last error message.
    pub reason: String,
}

/// Counters describing one pipeline run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Identifier of the source that was read.
    pub source_id: String,
    /// Batches merged into the output.
    pub batches_processed: u64,
    /// Batch that stopped the run, if any.
    pub batches_failed: Vec<BatchFailure>,
    /// Fetch attempts repeated after a failure.
    pub fetch_retries: u64,
    /// Decoded records returned by the source.
    pub records_read: u64,
    /// Raw entries the source could not decode.
    pub records_skipped: u64,
    /// Records admitted to grouped aggregation.
    pub grouped_records: u64,
    /// Records admitted to mention detection.
    pub mention_records: u64,
    /// Grouped records excluded for missing or NaN sentiment.
    pub skipped_sentiment: u64,
    /// Grouped records whose `date` was present but did not parse.
    pub malformed_timestamps: u64,
    /// Groups in the grouped output.
    pub distinct_groups: u64,
    /// Entities with at least one valid mention.
    pub entities_reported: u64,
    /// `false` when the run stopped before the source was exhausted.
    pub complete: bool,
}

/// Final results of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineOutput {
    /// Grouped rows ordered by group key.
    pub grouped: Vec<GroupedRow>,
    /// Entity rows ordered by descending mention count.
    pub entities: Vec<EntityRow>,
    /// Counters for the run.
    pub report: RunReport,
}

/// Records of one fetched batch plus their admission flags.
struct BatchPlan {
    index: u64,
    records: Vec<PostRecord>,
    grouped: Vec<bool>,
    mentioned: Vec<bool>,
}

/// Owned per-batch results awaiting the reducer.
struct BatchResult {
    index: u64,
    partial: PartialAggregate,
    mentions: EntitySentimentCollector,
    grouped_records: u64,
    mention_records: u64,
    malformed_timestamps: u64,
}

/// Streaming filter, feature derivation, aggregation, and mention summary.
pub struct Pipeline {
    config: PipelineConfig,
    deriver: FeatureDeriver,
    detector: MentionDetector,
}

impl Pipeline {
    /// Validate `config` and build the per-record components.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let deriver = FeatureDeriver::new(config.themes.clone(), config.day_blocks.clone());
        let detector = MentionDetector::new(config.aliases.clone());
        Ok(Self {
            config,
            deriver,
            detector,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Feature deriver built from the configuration.
    pub fn deriver(&self) -> &FeatureDeriver {
        &self.deriver
    }

    /// Mention detector built from the configuration.
    pub fn detector(&self) -> &MentionDetector {
        &self.detector
    }

    /// Derive features and aggregate `records` without filtering.
    pub fn aggregate_batch(&self, records: &[PostRecord]) -> PartialAggregate {
        let mut partial = PartialAggregate::default();
        for record in records {
            partial.observe(&self.deriver.enrich(record));
        }
        partial
    }

    /// Collect per-entity sentiment for `records` without filtering.
    pub fn collect_mentions(&self, records: &[PostRecord]) -> EntitySentimentCollector {
        let mut collector = EntitySentimentCollector::new(self.detector.roster());
        for record in records {
            let flags = self.detector.detect(record.english_keywords.as_deref());
            collector.observe(&flags, record.sentiment);
        }
        collector
    }

    /// Run both analyses over every batch of `source`.
    ///
    /// A batch that still fails after `max_batch_retries` stops the run; the
    /// output then holds everything merged before it and
    /// `report.complete == false`. Reducer failures are fatal.
    pub fn run(&self, source: &dyn RecordSource) -> Result<PipelineOutput, PipelineError> {
        let started = Instant::now();
        let mut report = RunReport {
            source_id: source.id().to_string(),
            ..RunReport::default()
        };
        let mut reducer = GlobalReducer::new(self.config.max_groups);
        let mut entities = EntitySentimentCollector::new(self.detector.roster());
        let mut grouping_gate = FilterGate::new(self.config.grouping_filter.clone());
        let mut mention_gate = FilterGate::new(self.config.mention_filter.clone());
        let mut cursor: Option<SourceCursor> = None;
        let mut next_index = 0u64;
        let mut exhausted = false;
        let mut stopped = false;

        info!(
            "[postscope:pipeline] run start source='{}' batch_size={} parallel_batches={} reported_records={:?}",
            source.id(),
            self.config.batch_size,
            self.config.parallel_batches,
            source.reported_record_count()
        );

        while !exhausted && !stopped {
            let mut round = Vec::with_capacity(self.config.parallel_batches);
            while round.len() < self.config.parallel_batches {
                let index = next_index;
                next_index += 1;
                match self.fetch_batch(source, cursor.as_ref(), &mut report) {
                    Ok(batch) => {
                        report.records_read += batch.records.len() as u64;
                        report.records_skipped += batch.skipped;
                        cursor = Some(batch.cursor);
                        exhausted = batch.exhausted;
                        if !batch.records.is_empty() {
                            round.push(plan_batch(
                                index,
                                batch.records,
                                &mut grouping_gate,
                                &mut mention_gate,
                            ));
                        }
                        if exhausted {
                            break;
                        }
                    }
                    Err(err) => {
                        let at = cursor.unwrap_or_default();
                        warn!(
                            "[postscope:pipeline] batch {index} failed at shard={} offset={}; stopping run: {err}",
                            at.shard, at.offset
                        );
                        report.batches_failed.push(BatchFailure {
                            batch_index: index,
                            shard: at.shard,
                            offset: at.offset,
                            reason: err.to_string(),
                        });
                        stopped = true;
                        break;
                    }
                }
            }

            let results: Vec<BatchResult> = round
                .into_par_iter()
                .map(|plan| self.process_batch(plan))
                .collect();
            for result in results {
                debug!(
                    "[postscope:pipeline] merging batch {} groups={} mention_records={}",
                    result.index,
                    result.partial.len(),
                    result.mention_records
                );
                report.skipped_sentiment += result.partial.skipped_sentiment();
                report.grouped_records += result.grouped_records;
                report.mention_records += result.mention_records;
                report.malformed_timestamps += result.malformed_timestamps;
                reducer.absorb(result.partial)?;
                entities.merge(result.mentions);
                report.batches_processed += 1;
            }
            debug!(
                "[postscope:pipeline] round done records_read={} groups={} elapsed={:.1}s",
                report.records_read,
                reducer.len(),
                started.elapsed().as_secs_f64()
            );
        }

        report.complete = exhausted && !stopped;
        report.distinct_groups = reducer.len() as u64;
        let grouped = reducer.finish();
        let entity_rows = entities.finalize(
            self.detector.roster(),
            &self.config.percentiles,
            self.config.histogram_bins,
        );
        report.entities_reported = entity_rows.len() as u64;

        if report.complete {
            info!(
                "[postscope:pipeline] run done source='{}' batches={} records={} groups={} entities={} elapsed={:.2}s",
                report.source_id,
                report.batches_processed,
                report.records_read,
                report.distinct_groups,
                report.entities_reported,
                started.elapsed().as_secs_f64()
            );
        } else {
            warn!(
                "[postscope:pipeline] run INCOMPLETE source='{}' batches={} failed={} records={}",
                report.source_id,
                report.batches_processed,
                report.batches_failed.len(),
                report.records_read
            );
        }

        Ok(PipelineOutput {
            grouped,
            entities: entity_rows,
            report,
        })
    }

    fn fetch_batch(
        &self,
        source: &dyn RecordSource,
        cursor: Option<&SourceCursor>,
        report: &mut RunReport,
    ) -> Result<SourceBatch, PipelineError> {
        let mut attempt = 0usize;
        loop {
            match source.fetch(cursor, self.config.batch_size) {
                Ok(batch) => {
                    // A cursor that did not move would hand back the same batch forever.
                    let stalled =
                        !batch.exhausted && batch.cursor == cursor.copied().unwrap_or_default();
                    if stalled {
                        return Err(PipelineError::stage(
                            Stage::Fetch,
                            format!("source '{}' made no progress", source.id()),
                        ));
                    }
                    return Ok(batch);
                }
                Err(err) if attempt < self.config.max_batch_retries => {
                    attempt += 1;
                    report.fetch_retries += 1;
                    warn!(
                        "[postscope:pipeline] fetch attempt {attempt} of {} failed, retrying: {err}",
                        self.config.max_batch_retries + 1
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn process_batch(&self, plan: BatchPlan) -> BatchResult {
        let mut partial = PartialAggregate::default();
        let mut mentions = EntitySentimentCollector::new(self.detector.roster());
        let mut grouped_records = 0u64;
        let mut mention_records = 0u64;
        let mut malformed_timestamps = 0u64;

        let admitted = plan.grouped.iter().zip(&plan.mentioned);
        for (record, (grouped, mentioned)) in plan.records.iter().zip(admitted) {
            if *grouped {
                grouped_records += 1;
                let enriched = self.deriver.enrich(record);
                if record.date.is_some() && enriched.features.hour.is_none() {
                    malformed_timestamps += 1;
                }
                partial.observe(&enriched);
            }
            if *mentioned {
                mention_records += 1;
                let flags = self.detector.detect(record.english_keywords.as_deref());
                mentions.observe(&flags, record.sentiment);
            }
        }

        BatchResult {
            index: plan.index,
            partial,
            mentions,
            grouped_records,
            mention_records,
            malformed_timestamps,
        }
    }
}

/// Apply both admission gates in stream order so row caps are deterministic.
fn plan_batch(
    index: u64,
    records: Vec<PostRecord>,
    grouping_gate: &mut FilterGate,
    mention_gate: &mut FilterGate,
) -> BatchPlan {
    let grouped = records
        .iter()
        .map(|record| grouping_gate.admit(record))
        .collect();
    let mentioned = records
        .iter()
        .map(|record| mention_gate.admit(record))
        .collect();
    BatchPlan {
        index,
        records,
        grouped,
        mentioned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordFilter;
    use crate::source::InMemorySource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn post(keywords: &str, sentiment: Option<f64>) -> PostRecord {
        PostRecord {
            language: Some("en".to_string()),
            primary_theme: Some("Politics".to_string()),
            url: Some("https://x.com/status/1".to_string()),
            date: Some("2024-12-03T09:30:00.000Z".to_string()),
            sentiment,
            main_emotion: Some("neutral".to_string()),
            english_keywords: Some(keywords.to_string()),
            secondary_themes: Some(vec![Some(7)]),
        }
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            batch_size: 2,
            parallel_batches: 2,
            ..PipelineConfig::default()
        }
    }

    struct FlakySource {
        inner: InMemorySource,
        failures_left: AtomicUsize,
        fail_from_offset: u64,
    }

    impl RecordSource for FlakySource {
        fn id(&self) -> &str {
            "flaky"
        }

        fn fetch(
            &self,
            cursor: Option<&SourceCursor>,
            limit: usize,
        ) -> Result<SourceBatch, PipelineError> {
            let offset = cursor.map(|c| c.offset).unwrap_or(0);
            if offset >= self.fail_from_offset
                && self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(PipelineError::SourceUnavailable {
                    source_id: "flaky".to_string(),
                    reason: "disk went away".to_string(),
                });
            }
            self.inner.fetch(cursor, limit)
        }
    }

    /// Returns records on every call but stops advancing after the first batch.
    struct StuckSource {
        calls: AtomicUsize,
    }

    impl RecordSource for StuckSource {
        fn id(&self) -> &str {
            "stuck"
        }

        fn fetch(
            &self,
            cursor: Option<&SourceCursor>,
            limit: usize,
        ) -> Result<SourceBatch, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SourceBatch {
                records: (0..limit).map(|_| post("joe", Some(0.2))).collect(),
                cursor: cursor.copied().unwrap_or(SourceCursor {
                    shard: 0,
                    offset: limit as u64,
                }),
                exhausted: false,
                skipped: 0,
            })
        }
    }

    #[test]
    fn run_aggregates_groups_and_entities() {
        let records = vec![
            post("Trump, economy", Some(0.5)),
            post("trump", Some(0.7)),
            post("biden", None),
            post("elon", Some(-0.2)),
            post("", Some(0.1)),
        ];
        let pipeline = Pipeline::new(small_config()).expect("pipeline");
        let output = pipeline
            .run(&InMemorySource::new("memory", records))
            .expect("run");

        assert!(output.report.complete);
        assert_eq!(output.report.records_read, 5);
        assert_eq!(output.report.batches_processed, 3);
        assert_eq!(output.report.skipped_sentiment, 1);
        assert_eq!(output.grouped.len(), 1);
        assert_eq!(output.grouped[0].count, 4);
        assert_eq!(output.grouped[0].day_block.as_deref(), Some("Morning"));
        assert_eq!(output.grouped[0].day.as_deref(), Some("Tue"));

        let people: Vec<&str> = output.entities.iter().map(|r| r.person.as_str()).collect();
        assert_eq!(people, vec!["Donald Trump", "Elon Musk"]);
        assert_eq!(output.entities[0].count, 2);
    }

    #[test]
    fn filters_apply_per_analysis() {
        let mut sports = post("trump", Some(0.9));
        sports.primary_theme = Some("Sports".to_string());
        let mut french = post("trump", Some(0.9));
        french.language = Some("fr".to_string());
        let records = vec![sports, french, post("trump", Some(0.1))];

        let pipeline = Pipeline::new(small_config()).expect("pipeline");
        let output = pipeline
            .run(&InMemorySource::new("memory", records))
            .expect("run");
        assert_eq!(output.report.grouped_records, 2);
        assert_eq!(output.report.mention_records, 1);
        assert_eq!(output.entities[0].count, 1);
    }

    #[test]
    fn mention_row_cap_stops_admission() {
        let config = PipelineConfig {
            mention_filter: RecordFilter {
                max_rows: Some(2),
                ..RecordFilter::allow_all()
            },
            ..small_config()
        };
        let records = (0..5).map(|_| post("vance", Some(0.3))).collect();
        let output = Pipeline::new(config)
            .expect("pipeline")
            .run(&InMemorySource::new("memory", records))
            .expect("run");
        assert_eq!(output.report.mention_records, 2);
        assert_eq!(output.entities[0].count, 2);
        assert_eq!(output.report.grouped_records, 5);
    }

    #[test]
    fn transient_fetch_failure_is_retried() {
        let source = FlakySource {
            inner: InMemorySource::new("memory", (0..4).map(|_| post("joe", Some(0.2))).collect()),
            failures_left: AtomicUsize::new(1),
            fail_from_offset: 2,
        };
        let output = Pipeline::new(small_config())
            .expect("pipeline")
            .run(&source)
            .expect("run");
        assert!(output.report.complete);
        assert_eq!(output.report.fetch_retries, 1);
        assert_eq!(output.grouped[0].count, 4);
    }

    #[test]
    fn persistent_fetch_failure_marks_run_incomplete() {
        let source = FlakySource {
            inner: InMemorySource::new("memory", (0..6).map(|_| post("joe", Some(0.2))).collect()),
            failures_left: AtomicUsize::new(usize::MAX),
            fail_from_offset: 2,
        };
        let output = Pipeline::new(small_config())
            .expect("pipeline")
            .run(&source)
            .expect("run");
        assert!(!output.report.complete);
        assert_eq!(output.report.batches_failed.len(), 1);
        assert_eq!(output.report.batches_failed[0].offset, 2);
        assert_eq!(output.report.fetch_retries, 2);
        assert_eq!(output.grouped[0].count, 2);
        assert_eq!(output.entities[0].count, 2);
    }

    #[test]
    fn non_advancing_cursor_with_records_stops_the_run() {
        let source = StuckSource {
            calls: AtomicUsize::new(0),
        };
        let output = Pipeline::new(small_config())
            .expect("pipeline")
            .run(&source)
            .expect("run returns partial output");
        assert!(!output.report.complete);
        assert_eq!(output.report.records_read, 2);
        assert_eq!(output.report.batches_failed.len(), 1);
        assert_eq!(output.report.batches_failed[0].batch_index, 1);
        assert_eq!(output.report.batches_failed[0].offset, 2);
        assert!(output.report.batches_failed[0].reason.contains("no progress"));
        assert_eq!(output.report.fetch_retries, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(output.grouped[0].count, 2);
    }

    #[test]
    fn group_limit_is_fatal_and_names_stage() {
        let config = PipelineConfig {
            max_groups: Some(1),
            ..small_config()
        };
        let mut other = post("joe", Some(0.4));
        other.main_emotion = Some("anger".to_string());
        let records = vec![post("joe", Some(0.2)), other];
        let err = Pipeline::new(config)
            .expect("pipeline")
            .run(&InMemorySource::new("memory", records))
            .expect_err("limit exceeded");
        assert!(err.to_string().contains("global_reduce"));
    }

    #[test]
    fn collect_mentions_flags_multiple_entities_per_record() {
        let pipeline = Pipeline::new(PipelineConfig::default()).expect("pipeline");
        let collector = pipeline.collect_mentions(&[
            post("Trump, economy, biden", Some(0.5)),
            post("trumpet", Some(0.9)),
        ]);
        let roster = pipeline.detector().roster();
        let trump = roster.position("donald trump").expect("trump");
        let biden = roster.position("joe biden").expect("biden");
        assert_eq!(collector.samples(trump), &[0.5]);
        assert_eq!(collector.samples(biden), &[0.5]);
        assert_eq!(collector.total_samples(), 2);
    }

    #[test]
    fn malformed_timestamps_are_counted_not_fatal() {
        let mut bad = post("joe", Some(0.4));
        bad.date = Some("2024/12/03 09:30".to_string());
        let output = Pipeline::new(small_config())
            .expect("pipeline")
            .run(&InMemorySource::new("memory", vec![bad, post("joe", Some(0.2))]))
            .expect("run");
        assert_eq!(output.report.malformed_timestamps, 1);
        assert_eq!(output.grouped.len(), 2);
        assert!(output.grouped.iter().any(|row| row.day_block.is_none()));
    }
}
