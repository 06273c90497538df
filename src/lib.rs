#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Grouped sentiment accumulators and the global reducer.
pub mod aggregate;
/// Command-line entry point shared by the `postscope` binary.
pub mod cli;
/// Pipeline configuration and record filters.
pub mod config;
/// Centralized constants used across features, mentions, stats, and sources.
pub mod constants;
/// Post record and derived feature types.
pub mod data;
/// Per-record feature derivation (platform, time buckets, theme labels).
pub mod features;
/// Entity alias rosters and mention detection.
pub mod mentions;
/// Batch scheduling and the run report.
pub mod pipeline;
/// Output writers and run summaries.
pub mod report;
/// Record source trait and built-in sources.
pub mod source;
/// Sentiment summary statistics and per-entity collection.
pub mod stats;
/// Shared type aliases.
pub mod types;

mod errors;

pub use aggregate::{Accumulator, GlobalReducer, GroupKey, GroupedRow, PartialAggregate};
pub use config::{FilterGate, PipelineConfig, RecordFilter};
pub use data::{DerivedFeatures, EnrichedRecord, PostRecord};
pub use errors::{PipelineError, Stage};
pub use features::{DayBlockRange, DayBlockTable, FeatureDeriver, ThemeTable};
pub use mentions::{AliasGroup, AliasRoster, MentionDetector, MentionFlags};
pub use pipeline::{BatchFailure, Pipeline, PipelineOutput, RunReport};
#[cfg(feature = "parquet")]
pub use source::ParquetSource;
pub use source::{InMemorySource, JsonlSource, RecordSource, SourceBatch, SourceCursor};
pub use stats::{EntityRow, EntitySentimentCollector, SentimentSummary};
pub use types::{
    Alias, DayBlockLabel, DayName, EntityName, Platform, SourceId, ThemeCode, ThemeLabel,
};
