/// Configured entity name (lowercase, as keyed in the alias roster).
/// Examples: `donald trump`, `jd vance`
pub type EntityName = String;
/// Lowercase alias token matched against keyword tokens.
/// Examples: `trump`, `president biden`
pub type Alias = String;
/// Network location parsed from a post url.
/// Examples: `twitter.com`, `www.reddit.com`, `` (unparsable)
pub type Platform = String;
/// Human-readable theme label.
/// Examples: `Politics`, `Economy`, `Unknown`
pub type ThemeLabel = String;
/// Integer code used for secondary themes in raw records.
/// Example: `7` (Politics)
pub type ThemeCode = i64;
/// Abbreviated weekday name.
/// Examples: `Mon`, `Sat`
pub type DayName = String;
/// Named bucket of hour-of-day ranges.
/// Examples: `Late-Night`, `Mid-day`
pub type DayBlockLabel = String;
/// Identifier for the source that produced records.
/// Examples: `memory`, `jsonl:/data/filtered_data`
pub type SourceId = String;
