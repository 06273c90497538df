use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::aggregate::GroupedRow;
use crate::errors::{PipelineError, Stage};
use crate::pipeline::RunReport;
use crate::stats::EntityRow;

/// Write grouped rows as newline-delimited JSON.
pub fn write_grouped_jsonl(
    path: impl AsRef<Path>,
    rows: &[GroupedRow],
) -> Result<(), PipelineError> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(create_output(path)?);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Write entity rows as a pretty-printed JSON array.
pub fn write_entities_json(
    path: impl AsRef<Path>,
    rows: &[EntityRow],
) -> Result<(), PipelineError> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(create_output(path)?);
    serde_json::to_writer_pretty(&mut writer, rows)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn create_output(path: &Path) -> Result<File, PipelineError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            PipelineError::stage(
                Stage::Output,
                format!("failed creating {}: {err}", parent.display()),
            )
        })?;
    }
    File::create(path).map_err(|err| {
        PipelineError::stage(
            Stage::Output,
            format!("failed creating {}: {err}", path.display()),
        )
    })
}

/// Format an integer with `,` thousands separators.
pub fn format_count(value: u64) -> String {
    let raw = value.to_string();
    let mut grouped_reversed = String::with_capacity(raw.len() + (raw.len() / 3));
    for (idx, ch) in raw.chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            grouped_reversed.push(',');
        }
        grouped_reversed.push(ch);
    }
    grouped_reversed.chars().rev().collect()
}

/// Human-readable run summary printed by the CLI.
pub fn render_summary(report: &RunReport, entities: &[EntityRow]) -> String {
    let mut out = String::new();
    out.push_str("=== postscope run ===\n");
    out.push_str(&format!("source: {}\n", report.source_id));
    out.push_str(&format!(
        "status: {}\n",
        if report.complete { "complete" } else { "INCOMPLETE" }
    ));
    out.push('\n');
    out.push_str("[RECORDS]\n");
    out.push_str(&format!("  read:                 {}\n", format_count(report.records_read)));
    out.push_str(&format!("  undecodable:          {}\n", format_count(report.records_skipped)));
    out.push_str(&format!("  grouped:              {}\n", format_count(report.grouped_records)));
    out.push_str(&format!("  mention candidates:   {}\n", format_count(report.mention_records)));
    out.push_str(&format!("  missing sentiment:    {}\n", format_count(report.skipped_sentiment)));
    out.push_str(&format!(
        "  malformed timestamps: {}\n",
        format_count(report.malformed_timestamps)
    ));
    out.push('\n');
    out.push_str("[BATCHES]\n");
    out.push_str(&format!("  processed: {}\n", format_count(report.batches_processed)));
    out.push_str(&format!("  retries:   {}\n", format_count(report.fetch_retries)));
    for failure in &report.batches_failed {
        out.push_str(&format!(
            "  failed #{} (shard {}, offset {}): {}\n",
            failure.batch_index, failure.shard, failure.offset, failure.reason
        ));
    }
    out.push('\n');
    out.push_str(&format!("[GROUPS] {}\n", format_count(report.distinct_groups)));
    out.push_str(&format!("[ENTITIES] {}\n", entities.len()));
    for row in entities {
        out.push_str(&format!(
            "  {:<16} count={:<8} avg={:+.4} median={:+.4} std={:.4} entropy={:.4}\n",
            row.person,
            format_count(row.count as u64),
            row.avg_sentiment,
            row.median_sentiment,
            row.std_sentiment,
            row.sentiment_entropy
        ));
    }
    out
}
