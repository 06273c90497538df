/// Constants used by per-record feature derivation.
pub mod features {
    /// Timestamp layout of the `date` field (`2024-12-01T13:45:09.512Z`).
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%fZ";
    /// Weekday layout used for the derived `day` field.
    pub const DAY_FORMAT: &str = "%a";
    /// Number of positional secondary-theme slots carried into the group key.
    pub const SECONDARY_THEME_SLOTS: usize = 3;
    /// Label emitted for secondary-theme codes missing from the theme table.
    pub const UNKNOWN_THEME_LABEL: &str = "Unknown";
}

/// Day-block labels and their default inclusive hour ranges.
pub mod day_blocks {
    /// Hours 23 through 4, wrapping past midnight.
    pub const LATE_NIGHT: &str = "Late-Night";
    /// Hours 5 through 8.
    pub const EARLY_MORNING: &str = "Early-Morning";
    /// Hours 9 through 11.
    pub const MORNING: &str = "Morning";
    /// Hours 12 through 15.
    pub const MID_DAY: &str = "Mid-day";
    /// Hours 16 through 19.
    pub const EVENING: &str = "Evening";
    /// Hours 20 through 22.
    pub const NIGHT: &str = "Night";

    /// Default `(label, start_hour, end_hour)` table. A range whose start is
    /// greater than its end wraps past midnight.
    pub const DEFAULT_RANGES: [(&str, u32, u32); 6] = [
        (LATE_NIGHT, 23, 4),
        (EARLY_MORNING, 5, 8),
        (MORNING, 9, 11),
        (MID_DAY, 12, 15),
        (EVENING, 16, 19),
        (NIGHT, 20, 22),
    ];
    /// Hours in a day.
    pub const HOURS_PER_DAY: u32 = 24;
}

/// Default secondary-theme code table.
pub mod themes {
    use crate::types::ThemeCode;

    /// Code to label pairs used when no theme table is configured.
    pub const DEFAULT_THEMES: [(ThemeCode, &str); 15] = [
        (1, "Economy"),
        (2, "Technology"),
        (3, "Investing"),
        (4, "Business"),
        (5, "Cryptocurrency"),
        (6, "Social"),
        (7, "Politics"),
        (8, "Finance"),
        (9, "Entertainment"),
        (10, "Health"),
        (11, "Law"),
        (12, "Sports"),
        (13, "Science"),
        (14, "Environment"),
        (15, "People"),
    ];
}

/// Default alias roster and mention column naming.
pub mod mentions {
    /// Prefix for per-entity boolean mention columns.
    pub const MENTION_COLUMN_PREFIX: &str = "mentions_";
    /// Separator between keyword tokens in `english_keywords`.
    pub const KEYWORD_DELIMITER: char = ',';

    /// Entities tracked when no roster is configured, in output order.
    pub const DEFAULT_ROSTER: [(&str, &[&str]); 5] = [
        (
            "donald trump",
            &[
                "trump",
                "donald",
                "donald trump",
                "donald j trump",
                "djt",
                "president trump",
            ],
        ),
        ("elon musk", &["elon", "musk", "elonmusk", "elon musk"]),
        (
            "kamala harris",
            &["kamala", "harris", "vp harris", "kamala harris"],
        ),
        (
            "joe biden",
            &["biden", "joe", "joe biden", "president biden", "joebiden"],
        ),
        ("jd vance", &["jd", "vance", "jd vance"]),
    ];
}

/// Constants used by the entity sentiment summarizer.
pub mod stats {
    /// Default number of equal-width histogram bins for sentiment entropy.
    pub const DEFAULT_HISTOGRAM_BINS: usize = 10;
    /// Default percentiles reported per entity.
    pub const DEFAULT_PERCENTILES: [f64; 4] = [10.0, 25.0, 75.0, 90.0];
    /// Percentile used for the median.
    pub const MEDIAN_PERCENTILE: f64 = 50.0;
}

/// Constants used by batch scheduling and filtering.
pub mod pipeline {
    /// Records requested from a source per batch.
    pub const DEFAULT_BATCH_SIZE: usize = 10_000;
    /// Batches fetched before a parallel processing round.
    pub const DEFAULT_PARALLEL_BATCHES: usize = 4;
    /// Additional fetch attempts for a failing batch before the run stops.
    pub const DEFAULT_MAX_BATCH_RETRIES: usize = 2;
    /// Language kept by the default record filters.
    pub const DEFAULT_LANGUAGE: &str = "en";
    /// Primary theme kept by the default mention filter.
    pub const DEFAULT_MENTION_THEME: &str = "Politics";
    /// Cap on records accepted by the default mention filter.
    pub const DEFAULT_MENTION_MAX_ROWS: u64 = 20_000_000;
}

/// Constants used by file-backed sources.
pub mod source {
    /// File extension recognized for newline-delimited JSON shards.
    pub const JSONL_EXTENSIONS: [&str; 2] = ["jsonl", "ndjson"];
    /// File extension recognized for parquet shards.
    pub const PARQUET_EXTENSION: &str = "parquet";
    /// Log message used when unparsable lines are skipped.
    pub const SKIP_MALFORMED_MSG: &str = "skipping malformed record line";
}
