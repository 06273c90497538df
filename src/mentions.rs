//! Exact-token mention detection against a fixed roster of named entities.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::constants::mentions::{DEFAULT_ROSTER, KEYWORD_DELIMITER, MENTION_COLUMN_PREFIX};
use crate::errors::PipelineError;
use crate::types::{Alias, EntityName};

/// Named entity plus its case-insensitive alias set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliasGroup {
    /// Lowercase entity name (for example `donald trump`).
    pub name: EntityName,
    /// Trimmed, lowercase aliases.
    pub aliases: HashSet<Alias>,
}

impl AliasGroup {
    /// Create a group, normalizing the name and aliases to trimmed lowercase.
    pub fn new<I, S>(name: impl AsRef<str>, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: normalize_token(name.as_ref()),
            aliases: aliases
                .into_iter()
                .map(|alias| normalize_token(alias.as_ref()))
                .filter(|alias| !alias.is_empty())
                .collect(),
        }
    }

    /// Returns `true` when any alias equals one of `tokens`.
    pub fn matches(&self, tokens: &HashSet<String>) -> bool {
        !self.aliases.is_disjoint(tokens)
    }

    /// Boolean column name for this entity (`mentions_donald_trump`).
    pub fn mention_column(&self) -> String {
        mention_column(&self.name)
    }

    /// Title-cased name used in entity output rows.
    pub fn display_name(&self) -> String {
        title_case(&self.name)
    }
}

/// Ordered entity roster.
///
/// Serialized as a map of entity name to alias list so configuration files
/// stay readable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "IndexMap<EntityName, Vec<Alias>>",
    into = "IndexMap<EntityName, Vec<Alias>>"
)]
pub struct AliasRoster {
    groups: Vec<AliasGroup>,
}

impl Default for AliasRoster {
    fn default() -> Self {
        Self::new(
            DEFAULT_ROSTER
                .iter()
                .map(|(name, aliases)| AliasGroup::new(name, aliases.iter())),
        )
    }
}

impl From<IndexMap<EntityName, Vec<Alias>>> for AliasRoster {
    fn from(value: IndexMap<EntityName, Vec<Alias>>) -> Self {
        Self::new(
            value
                .into_iter()
                .map(|(name, aliases)| AliasGroup::new(name, aliases)),
        )
    }
}

impl From<AliasRoster> for IndexMap<EntityName, Vec<Alias>> {
    fn from(value: AliasRoster) -> Self {
        value
            .groups
            .into_iter()
            .map(|group| {
                let mut aliases: Vec<Alias> = group.aliases.into_iter().collect();
                aliases.sort();
                (group.name, aliases)
            })
            .collect()
    }
}

impl AliasRoster {
    /// Build a roster from groups in output order.
    pub fn new(groups: impl IntoIterator<Item = AliasGroup>) -> Self {
        Self {
            groups: groups.into_iter().collect(),
        }
    }

    /// Reject empty alias sets and duplicate entity names.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut seen = HashSet::new();
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(PipelineError::Configuration(
                    "alias roster contains an empty entity name".to_string(),
                ));
            }
            if group.aliases.is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "entity '{}' has no aliases",
                    group.name
                )));
            }
            if !seen.insert(group.name.as_str()) {
                return Err(PipelineError::Configuration(format!(
                    "entity '{}' is listed more than once",
                    group.name
                )));
            }
        }
        Ok(())
    }

    /// Groups in roster order.
    pub fn groups(&self) -> &[AliasGroup] {
        &self.groups
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns `true` when no entities are configured.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Roster index of `name` (matched case-insensitively).
    pub fn position(&self, name: &str) -> Option<usize> {
        let name = normalize_token(name);
        self.groups.iter().position(|group| group.name == name)
    }
}

/// Per-record mention flags, one per roster entity in roster order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MentionFlags<'a> {
    roster: &'a AliasRoster,
    flags: Vec<bool>,
}

impl<'a> MentionFlags<'a> {
    /// Flag for `entity`, or `None` when it is not in the roster.
    pub fn get(&self, entity: &str) -> Option<bool> {
        self.roster.position(entity).map(|idx| self.flags[idx])
    }

    /// Flags in roster order.
    pub fn as_slice(&self) -> &[bool] {
        &self.flags
    }

    /// Returns `true` when at least one entity is mentioned.
    pub fn any(&self) -> bool {
        self.flags.iter().any(|flag| *flag)
    }

    /// Roster indices of mentioned entities.
    pub fn mentioned(&self) -> impl Iterator<Item = usize> + '_ {
        self.flags
            .iter()
            .enumerate()
            .filter_map(|(idx, flag)| flag.then_some(idx))
    }

    /// `(mention column, flag)` pairs for every roster entity.
    pub fn columns(&self) -> impl Iterator<Item = (String, bool)> + '_ {
        self.roster
            .groups()
            .iter()
            .zip(&self.flags)
            .map(|(group, flag)| (group.mention_column(), *flag))
    }
}

/// Flags roster entities mentioned in a record's keyword field.
#[derive(Clone, Debug, Default)]
pub struct MentionDetector {
    roster: AliasRoster,
}

impl MentionDetector {
    /// Create a detector for `roster`.
    pub fn new(roster: AliasRoster) -> Self {
        Self { roster }
    }

    /// Roster used by this detector.
    pub fn roster(&self) -> &AliasRoster {
        &self.roster
    }

    /// Flag every roster entity against the comma-separated `keywords`.
    ///
    /// A missing keyword field flags nothing.
    pub fn detect(&self, keywords: Option<&str>) -> MentionFlags<'_> {
        let tokens = keywords.map(keyword_tokens).unwrap_or_default();
        MentionFlags {
            roster: &self.roster,
            flags: self
                .roster
                .groups()
                .iter()
                .map(|group| group.matches(&tokens))
                .collect(),
        }
    }
}

/// Split a keyword field on commas into a set of trimmed, lowercase tokens.
pub fn keyword_tokens(keywords: &str) -> HashSet<String> {
    keywords
        .split(KEYWORD_DELIMITER)
        .map(normalize_token)
        .filter(|token| !token.is_empty())
        .collect()
}

/// Boolean column name for an entity (`jd vance` -> `mentions_jd_vance`).
pub fn mention_column(name: &str) -> String {
    format!("{MENTION_COLUMN_PREFIX}{}", name.replace(' ', "_"))
}

/// Uppercase the first letter of each alphabetic run and lowercase the rest.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

fn normalize_token(token: &str) -> String {
    token.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_tokens_trim_lowercase_and_dedupe() {
        let tokens = keyword_tokens(" Trump,economy , TRUMP,, ");
        assert_eq!(tokens.len(), 2);
        assert!(tokens.contains("trump"));
        assert!(tokens.contains("economy"));
    }

    #[test]
    fn detects_multiple_entities_in_one_record() {
        let detector = MentionDetector::default();
        let flags = detector.detect(Some("Trump, economy, biden"));
        assert_eq!(flags.get("donald trump"), Some(true));
        assert_eq!(flags.get("joe biden"), Some(true));
        assert_eq!(flags.get("elon musk"), Some(false));
        assert_eq!(flags.get("kamala harris"), Some(false));
        assert_eq!(flags.get("jd vance"), Some(false));
        assert_eq!(flags.mentioned().count(), 2);
    }

    #[test]
    fn matching_is_exact_token_not_substring() {
        let detector = MentionDetector::default();
        let flags = detector.detect(Some("trumpet, bidenomics"));
        assert!(!flags.any());
        let flags = detector.detect(Some("trump"));
        assert_eq!(flags.get("Donald Trump"), Some(true));
    }

    #[test]
    fn multi_word_alias_matches_whole_token() {
        let detector = MentionDetector::default();
        assert_eq!(
            detector.detect(Some("President Biden")).get("joe biden"),
            Some(true)
        );
        assert_eq!(
            detector.detect(Some("president, biden administration")).get("joe biden"),
            Some(false)
        );
    }

    #[test]
    fn missing_keywords_flag_nothing_but_report_every_entity() {
        let detector = MentionDetector::default();
        let flags = detector.detect(None);
        assert!(!flags.any());
        let columns: Vec<(String, bool)> = flags.columns().collect();
        assert_eq!(columns.len(), 5);
        assert_eq!(columns[0], ("mentions_donald_trump".to_string(), false));
        assert_eq!(columns[4], ("mentions_jd_vance".to_string(), false));
    }

    #[test]
    fn roster_round_trips_through_config_map() {
        let json = r#"{"Ada Lovelace": [" Ada ", "LOVELACE"], "alan turing": ["turing"]}"#;
        let roster: AliasRoster = serde_json::from_str(json).expect("roster");
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.groups()[0].name, "ada lovelace");
        assert!(roster.groups()[0].aliases.contains("ada"));
        assert!(roster.groups()[0].aliases.contains("lovelace"));
        roster.validate().expect("valid roster");
    }

    #[test]
    fn roster_validation_rejects_empty_alias_sets_and_duplicates() {
        let empty = AliasRoster::new([AliasGroup::new("nobody", Vec::<String>::new())]);
        assert!(empty.validate().is_err());
        let duplicate = AliasRoster::new([
            AliasGroup::new("joe biden", ["biden"]),
            AliasGroup::new("Joe Biden", ["joe"]),
        ]);
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn title_case_matches_display_names() {
        assert_eq!(title_case("donald trump"), "Donald Trump");
        assert_eq!(title_case("jd vance"), "Jd Vance");
        assert_eq!(title_case("o'neil"), "O'Neil");
    }
}
