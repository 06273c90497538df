//! Record source interfaces and built-in sources.
//!
//! Ownership model:
//! - `RecordSource` is the pipeline-facing interface that produces batches.
//! - The pipeline owns the `SourceCursor` between calls; sources stay stateless
//!   so a batch can be fetched again from the same cursor on retry.

use crate::data::PostRecord;
use crate::errors::PipelineError;
use crate::types::SourceId;

/// Newline-delimited JSON file and directory source.
pub mod jsonl;
/// Parquet shard source.
#[cfg(feature = "parquet")]
pub mod parquet;

pub use jsonl::JsonlSource;
#[cfg(feature = "parquet")]
pub use parquet::ParquetSource;

/// Source-owned paging position.
///
/// `shard` indexes the source's ordered shard list; `offset` is interpreted
/// by the source (a byte offset for JSONL, a row offset for parquet, a record
/// index for in-memory sources).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceCursor {
    /// Shard the next batch starts in.
    pub shard: usize,
    /// Position inside `shard`.
    pub offset: u64,
}

/// Result of a single fetch call.
///
/// Pass the returned `cursor` back into the next fetch to continue paging.
#[derive(Clone, Debug, Default)]
pub struct SourceBatch {
    /// Records in this batch.
    pub records: Vec<PostRecord>,
    /// Cursor positioned after the last record of this batch.
    pub cursor: SourceCursor,
    /// `true` when no records remain after `cursor`.
    pub exhausted: bool,
    /// Raw entries skipped because they could not be decoded.
    pub skipped: u64,
}

/// Pipeline-facing record source.
///
/// For a fixed dataset state, fetching the same cursor must return the same
/// batch.
pub trait RecordSource: Send + Sync {
    /// Stable source identifier used in logs and reports.
    fn id(&self) -> &str;

    /// Fetch up to `limit` records starting at `cursor` (`None` = start).
    fn fetch(
        &self,
        cursor: Option<&SourceCursor>,
        limit: usize,
    ) -> Result<SourceBatch, PipelineError>;

    /// Exact record count when the source can report it without a scan.
    fn reported_record_count(&self) -> Option<u64> {
        None
    }
}

/// Record source backed by an in-memory vector.
pub struct InMemorySource {
    id: SourceId,
    records: Vec<PostRecord>,
}

impl InMemorySource {
    /// Create a source over `records`.
    pub fn new(id: impl Into<SourceId>, records: Vec<PostRecord>) -> Self {
        Self {
            id: id.into(),
            records,
        }
    }
}

impl RecordSource for InMemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn fetch(
        &self,
        cursor: Option<&SourceCursor>,
        limit: usize,
    ) -> Result<SourceBatch, PipelineError> {
        let start = cursor.map(|cursor| cursor.offset as usize).unwrap_or(0);
        if start > self.records.len() {
            return Err(PipelineError::SourceInconsistent {
                source_id: self.id.clone(),
                details: format!(
                    "cursor offset {start} is past the end ({} records)",
                    self.records.len()
                ),
            });
        }
        let end = start.saturating_add(limit).min(self.records.len());
        Ok(SourceBatch {
            records: self.records[start..end].to_vec(),
            cursor: SourceCursor {
                shard: 0,
                offset: end as u64,
            },
            exhausted: end >= self.records.len(),
            skipped: 0,
        })
    }

    fn reported_record_count(&self) -> Option<u64> {
        Some(self.records.len() as u64)
    }
}
