use serde::{Deserialize, Serialize};

pub use crate::types::{DayBlockLabel, DayName, Platform, ThemeCode, ThemeLabel};

use crate::constants::features::SECONDARY_THEME_SLOTS;

/// One social-media post as produced by a record source.
///
/// Every attribute is optional at the type level; absent or `null` fields
/// deserialize to `None` and are handled explicitly downstream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    /// ISO language code (for example `en`).
    #[serde(default)]
    pub language: Option<String>,
    /// Categorical primary theme (for example `Politics`).
    #[serde(default)]
    pub primary_theme: Option<String>,
    /// Secondary theme codes in source order; a null element keeps its position.
    #[serde(default)]
    pub secondary_themes: Option<Vec<Option<ThemeCode>>>,
    /// Post url; its network location becomes the platform.
    #[serde(default)]
    pub url: Option<String>,
    /// Raw timestamp string, possibly malformed.
    #[serde(default)]
    pub date: Option<String>,
    /// Sentiment score; `None` or NaN excludes the record from sentiment statistics.
    #[serde(default)]
    pub sentiment: Option<f64>,
    /// Dominant emotion label.
    #[serde(default)]
    pub main_emotion: Option<String>,
    /// Comma-separated free-text keywords.
    #[serde(default)]
    pub english_keywords: Option<String>,
}

impl PostRecord {
    /// Sentiment value when present and a number.
    pub fn valid_sentiment(&self) -> Option<f64> {
        self.sentiment.filter(|value| !value.is_nan())
    }

    /// Secondary theme codes, empty when absent.
    pub fn secondary_theme_codes(&self) -> &[Option<ThemeCode>] {
        self.secondary_themes.as_deref().unwrap_or(&[])
    }
}

/// Fields derived from a single `PostRecord`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFeatures {
    /// Network location of the url, empty when unparsable or absent.
    pub platform: Platform,
    /// Hour of day (0-23), `None` when the timestamp did not parse.
    pub hour: Option<u32>,
    /// Abbreviated weekday, `None` when the timestamp did not parse.
    pub day: Option<DayName>,
    /// Day-block bucket for `hour`; missing hour stays missing.
    pub day_block: Option<DayBlockLabel>,
    /// Positional secondary theme labels; unused slots are `None`.
    pub secondary_themes: [Option<ThemeLabel>; SECONDARY_THEME_SLOTS],
}

/// Record projection consumed by grouped aggregation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// Features derived from the raw record.
    pub features: DerivedFeatures,
    /// Copied from [`PostRecord::main_emotion`].
    pub main_emotion: Option<String>,
    /// Copied from [`PostRecord::primary_theme`].
    pub primary_theme: Option<String>,
    /// Raw sentiment; may be missing or NaN.
    pub sentiment: Option<f64>,
}

impl EnrichedRecord {
    /// Combine a source record with its derived features.
    pub fn new(record: &PostRecord, features: DerivedFeatures) -> Self {
        Self {
            features,
            main_emotion: record.main_emotion.clone(),
            primary_theme: record.primary_theme.clone(),
            sentiment: record.sentiment,
        }
    }

    /// Sentiment value when present and a number.
    pub fn valid_sentiment(&self) -> Option<f64> {
        self.sentiment.filter(|value| !value.is_nan())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_missing_and_null_fields_as_none() {
        let record: PostRecord =
            serde_json::from_str(r#"{"language":"en","sentiment":null,"secondary_themes":null}"#)
                .expect("record");
        assert_eq!(record.language.as_deref(), Some("en"));
        assert_eq!(record.sentiment, None);
        assert!(record.secondary_theme_codes().is_empty());
        assert_eq!(record.url, None);
    }

    #[test]
    fn null_secondary_theme_elements_keep_their_position() {
        let record: PostRecord =
            serde_json::from_str(r#"{"secondary_themes":[1,null,7]}"#).expect("record");
        assert_eq!(record.secondary_theme_codes(), &[Some(1), None, Some(7)]);
    }

    #[test]
    fn valid_sentiment_rejects_nan() {
        let record = PostRecord {
            sentiment: Some(f64::NAN),
            ..PostRecord::default()
        };
        assert_eq!(record.valid_sentiment(), None);
        let record = PostRecord {
            sentiment: Some(-0.25),
            ..PostRecord::default()
        };
        assert_eq!(record.valid_sentiment(), Some(-0.25));
    }
}
