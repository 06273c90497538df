use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use parquet::file::metadata::RowGroupMetaData;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::serialized_reader::ReadOptionsBuilder;
use parquet::record::reader::RowIter;
use parquet::record::{Field, Row};
use tracing::debug;
use walkdir::WalkDir;

use super::{RecordSource, SourceBatch, SourceCursor};
use crate::constants::source::{PARQUET_EXTENSION, SKIP_MALFORMED_MSG};
use crate::data::PostRecord;
use crate::errors::PipelineError;
use crate::types::{SourceId, ThemeCode};

/// Row iterator left open after a fetch, positioned at `cursor`.
struct OpenShard {
    cursor: SourceCursor,
    total_rows: u64,
    rows: RowIter<'static>,
}

/// Source reading post rows from parquet shards (for example a local copy of
/// the Exorde social-media export).
///
/// Cursor offsets are row offsets into the current shard. The row iterator of
/// the last fetch stays open, so paging forward continues decoding where the
/// previous batch stopped. Any other cursor reopens the shard without the row
/// groups that end before the offset.
pub struct ParquetSource {
    id: SourceId,
    shards: Vec<PathBuf>,
    open: Mutex<Option<OpenShard>>,
}

impl ParquetSource {
    /// Open `path`, which may be a single parquet file or a directory of shards.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let id = format!("parquet:{}", path.display());
        let shards = if path.is_dir() {
            let mut shards: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|shard| {
                    shard
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| ext == PARQUET_EXTENSION)
                })
                .collect();
            shards.sort();
            shards
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        };
        if shards.is_empty() {
            return Err(PipelineError::SourceUnavailable {
                source_id: id,
                reason: format!("no parquet shards found at {}", path.display()),
            });
        }
        Ok(Self {
            id,
            shards,
            open: Mutex::new(None),
        })
    }

    /// Shard files in read order.
    pub fn shards(&self) -> &[PathBuf] {
        &self.shards
    }

    /// Take the open iterator when it is positioned exactly at `position`.
    fn take_open(&self, position: SourceCursor) -> Result<Option<OpenShard>, PipelineError> {
        let mut open = self.open.lock().map_err(|_| PipelineError::SourceUnavailable {
            source_id: self.id.clone(),
            reason: "parquet reader lock poisoned".to_string(),
        })?;
        Ok(open.take().filter(|shard| shard.cursor == position))
    }

    fn keep_open(&self, shard: OpenShard) {
        if let Ok(mut open) = self.open.lock() {
            *open = Some(shard);
        }
    }

    /// Open the shard at `position`, leaving out row groups that end at or
    /// before its offset, and skip to the first wanted row.
    fn open_at(&self, position: SourceCursor) -> Result<OpenShard, PipelineError> {
        let path = &self.shards[position.shard];
        let file = File::open(path).map_err(|err| PipelineError::SourceUnavailable {
            source_id: self.id.clone(),
            reason: format!("failed opening parquet shard {}: {err}", path.display()),
        })?;
        let offset = position.offset;
        let mut group_start = 0u64;
        let options = ReadOptionsBuilder::new()
            .with_predicate(Box::new(move |group: &RowGroupMetaData, _: usize| {
                let group_end = group_start + group.num_rows().max(0) as u64;
                group_start = group_end;
                group_end > offset
            }))
            .build();
        let reader = SerializedFileReader::new_with_options(file, options).map_err(|err| {
            PipelineError::SourceUnavailable {
                source_id: self.id.clone(),
                reason: format!("failed reading parquet shard {}: {err}", path.display()),
            }
        })?;
        let metadata = reader.metadata();
        let total_rows = metadata.file_metadata().num_rows().max(0) as u64;
        let kept_rows: u64 = metadata
            .row_groups()
            .iter()
            .map(|group| group.num_rows().max(0) as u64)
            .sum();
        let first_kept = total_rows.saturating_sub(kept_rows);
        let mut rows = RowIter::from_file_into(Box::new(reader));
        for _ in first_kept..offset.min(total_rows) {
            if rows.next().is_none() {
                break;
            }
        }
        debug!(
            "[postscope:source] opened {} at row {offset} of {total_rows}",
            path.display()
        );
        Ok(OpenShard {
            cursor: position,
            total_rows,
            rows,
        })
    }

    /// Append up to `want` rows of the shard at `position` to `records`.
    /// Returns `(rows consumed, rows in shard, rows skipped)`.
    fn read_shard(
        &self,
        position: SourceCursor,
        want: usize,
        records: &mut Vec<PostRecord>,
    ) -> Result<(u64, u64, u64), PipelineError> {
        let mut shard = match self.take_open(position)? {
            Some(shard) => shard,
            None => self.open_at(position)?,
        };
        let path = &self.shards[position.shard];
        let mut consumed = 0u64;
        let mut skipped = 0u64;
        while (consumed as usize) < want {
            let Some(row) = shard.rows.next() else {
                break;
            };
            consumed += 1;
            match row {
                Ok(row) => records.push(row_to_record(&row)),
                Err(err) => {
                    skipped += 1;
                    debug!(
                        "[postscope:source] {SKIP_MALFORMED_MSG} shard={}: {err}",
                        path.display()
                    );
                }
            }
        }
        let total_rows = shard.total_rows;
        shard.cursor.offset += consumed;
        if shard.cursor.offset < total_rows {
            self.keep_open(shard);
        }
        Ok((consumed, total_rows, skipped))
    }
}

impl RecordSource for ParquetSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn fetch(
        &self,
        cursor: Option<&SourceCursor>,
        limit: usize,
    ) -> Result<SourceBatch, PipelineError> {
        let mut position = cursor.copied().unwrap_or_default();
        let mut records = Vec::with_capacity(limit.min(4096));
        let mut skipped = 0u64;

        while records.len() + (skipped as usize) < limit && position.shard < self.shards.len() {
            let want = limit - records.len() - skipped as usize;
            let (consumed, total_rows, bad) = self.read_shard(position, want, &mut records)?;
            skipped += bad;
            if consumed == 0 && position.offset < total_rows {
                return Err(PipelineError::SourceInconsistent {
                    source_id: self.id.clone(),
                    details: format!(
                        "{} reports {total_rows} rows but yielded none at offset {}",
                        self.shards[position.shard].display(),
                        position.offset
                    ),
                });
            }
            position.offset += consumed;
            if position.offset >= total_rows {
                position = SourceCursor {
                    shard: position.shard + 1,
                    offset: 0,
                };
            }
        }

        Ok(SourceBatch {
            records,
            exhausted: position.shard >= self.shards.len(),
            cursor: position,
            skipped,
        })
    }
}

/// Map the post columns of a parquet row; unknown columns are ignored.
fn row_to_record(row: &Row) -> PostRecord {
    let mut record = PostRecord::default();
    for (name, field) in row.get_column_iter() {
        match name.as_str() {
            "language" => record.language = field_string(field),
            "primary_theme" => record.primary_theme = field_string(field),
            "url" => record.url = field_string(field),
            "date" => record.date = field_string(field),
            "main_emotion" => record.main_emotion = field_string(field),
            "english_keywords" => record.english_keywords = field_string(field),
            "sentiment" => record.sentiment = field_f64(field),
            "secondary_themes" => record.secondary_themes = field_codes(field),
            _ => {}
        }
    }
    record
}

fn field_string(field: &Field) -> Option<String> {
    match field {
        Field::Str(value) => Some(value.clone()),
        _ => None,
    }
}

fn field_f64(field: &Field) -> Option<f64> {
    match field {
        Field::Double(value) => Some(*value),
        Field::Float(value) => Some(f64::from(*value)),
        _ => None,
    }
}

fn field_code(field: &Field) -> Option<ThemeCode> {
    match field {
        Field::Byte(value) => Some(ThemeCode::from(*value)),
        Field::Short(value) => Some(ThemeCode::from(*value)),
        Field::Int(value) => Some(ThemeCode::from(*value)),
        Field::Long(value) => Some(*value),
        Field::UByte(value) => Some(ThemeCode::from(*value)),
        Field::UShort(value) => Some(ThemeCode::from(*value)),
        Field::UInt(value) => Some(ThemeCode::from(*value)),
        _ => None,
    }
}

/// Null list elements stay in place as `None`.
fn field_codes(field: &Field) -> Option<Vec<Option<ThemeCode>>> {
    match field {
        Field::ListInternal(list) => Some(list.elements().iter().map(field_code).collect()),
        _ => None,
    }
}
