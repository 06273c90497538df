use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::{RecordSource, SourceBatch, SourceCursor};
use crate::constants::source::{JSONL_EXTENSIONS, SKIP_MALFORMED_MSG};
use crate::data::PostRecord;
use crate::errors::PipelineError;
use crate::types::SourceId;

/// Source reading one JSON record per line from a file or from every
/// `.jsonl`/`.ndjson` shard under a directory (walked in path order).
///
/// Cursor offsets are byte offsets into the current shard, so a fetch seeks
/// straight to its start instead of re-reading earlier lines.
#[derive(Clone, Debug)]
pub struct JsonlSource {
    id: SourceId,
    shards: Vec<PathBuf>,
}

impl JsonlSource {
    /// Open `path`, which may be a single file or a directory of shards.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let id = format!("jsonl:{}", path.display());
        let shards = if path.is_dir() {
            discover_shards(path)
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(PipelineError::SourceUnavailable {
                source_id: id,
                reason: format!("{} does not exist", path.display()),
            });
        };
        if shards.is_empty() {
            return Err(PipelineError::SourceUnavailable {
                source_id: id,
                reason: format!("no jsonl shards found under {}", path.display()),
            });
        }
        Ok(Self { id, shards })
    }

    /// Shard files in read order.
    pub fn shards(&self) -> &[PathBuf] {
        &self.shards
    }

    fn unavailable(&self, path: &Path, err: impl std::fmt::Display) -> PipelineError {
        PipelineError::SourceUnavailable {
            source_id: self.id.clone(),
            reason: format!("failed reading {}: {err}", path.display()),
        }
    }
}

fn discover_shards(root: &Path) -> Vec<PathBuf> {
    let mut shards: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| JSONL_EXTENSIONS.contains(&ext))
        })
        .collect();
    shards.sort();
    shards
}

impl RecordSource for JsonlSource {
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
        let mut line = Vec::new();

        while records.len() < limit && position.shard < self.shards.len() {
            let path = &self.shards[position.shard];
            let mut file = File::open(path).map_err(|err| self.unavailable(path, err))?;
            file.seek(SeekFrom::Start(position.offset))
                .map_err(|err| self.unavailable(path, err))?;
            let mut reader = BufReader::new(file);
            loop {
                if records.len() >= limit {
                    break;
                }
                line.clear();
                let read = reader
                    .read_until(b'\n', &mut line)
                    .map_err(|err| self.unavailable(path, err))?;
                if read == 0 {
                    position = SourceCursor {
                        shard: position.shard + 1,
                        offset: 0,
                    };
                    break;
                }
                position.offset += read as u64;
                if line.trim_ascii().is_empty() {
                    continue;
                }
                match serde_json::from_slice::<PostRecord>(&line) {
                    Ok(record) => records.push(record),
                    Err(err) => {
                        skipped += 1;
                        debug!(
                            "[postscope:source] {SKIP_MALFORMED_MSG} shard={} offset={}: {err}",
                            path.display(),
                            position.offset
                        );
                    }
                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn line(sentiment: f64) -> String {
        format!(r#"{{"language":"en","sentiment":{sentiment},"english_keywords":"trump"}}"#)
    }

    #[test]
    fn reads_across_shards_with_byte_cursor() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("chunk_0.jsonl"),
            format!("{}\n{}\n", line(0.1), line(0.2)),
        )
        .expect("write");
        fs::create_dir(dir.path().join("nested")).expect("mkdir");
        fs::write(
            dir.path().join("nested").join("chunk_1.jsonl"),
            format!("{}\n", line(0.3)),
        )
        .expect("write");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let source = JsonlSource::open(dir.path()).expect("source");
        assert_eq!(source.shards().len(), 2);

        let first = source.fetch(None, 1).expect("first");
        assert_eq!(first.records.len(), 1);
        assert_eq!(first.records[0].sentiment, Some(0.1));
        assert!(!first.exhausted);

        let rest = source.fetch(Some(&first.cursor), 10).expect("rest");
        let sentiments: Vec<Option<f64>> = rest.records.iter().map(|r| r.sentiment).collect();
        assert_eq!(sentiments, vec![Some(0.2), Some(0.3)]);
        assert!(rest.exhausted);
    }

    #[test]
    fn malformed_lines_are_skipped_and_counted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("posts.jsonl");
        fs::write(&path, format!("{}\nnot json\n\n{}\n", line(0.5), line(-0.5))).expect("write");
        let source = JsonlSource::open(&path).expect("source");
        let batch = source.fetch(None, 10).expect("batch");
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.skipped, 1);
        assert!(batch.exhausted);
    }

    #[test]
    fn invalid_utf8_line_is_skipped_without_losing_neighbors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("posts.jsonl");
        let mut bytes = Vec::new();
        for sentiment in [0.1, 0.2, 0.3] {
            bytes.extend_from_slice(line(sentiment).as_bytes());
            bytes.push(b'\n');
        }
        bytes.extend_from_slice(b"{\"language\":\"\xff\xfe\"}\n");
        for sentiment in [0.4, 0.5, 0.6] {
            bytes.extend_from_slice(line(sentiment).as_bytes());
            bytes.push(b'\n');
        }
        fs::write(&path, bytes).expect("write");

        let source = JsonlSource::open(&path).expect("source");
        let batch = source.fetch(None, 100).expect("batch");
        assert_eq!(batch.records.len(), 6);
        assert_eq!(batch.skipped, 1);
        assert!(batch.exhausted);
        assert_eq!(batch.records[3].sentiment, Some(0.4));
    }

    #[test]
    fn missing_path_and_empty_directory_are_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            JsonlSource::open(dir.path()),
            Err(PipelineError::SourceUnavailable { .. })
        ));
        assert!(matches!(
            JsonlSource::open(dir.path().join("missing.jsonl")),
            Err(PipelineError::SourceUnavailable { .. })
        ));
    }
}
