//! Cross-source race/runner matching.
//!
//! Sources disagree on spelling, abbreviations, and scratched-runner
//! sets, so quotes are aligned into one canonical record per runner.
//! Matching key precedence: saddlecloth/program number when present
//! and consistent, normalized name otherwise. Conflicting identities
//! are surfaced as diagnostics, never merged by guesswork.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::types::{MatchNotice, RunnerRecord, Snapshot};

// ---------------------------------------------------------------------------
// Name normalization
// ---------------------------------------------------------------------------

/// Configurable runner-name normalization ruleset.
///
/// The built-in steps (case-fold, punctuation strip, whitespace
/// collapse, trailing parenthesised tag removal) cover the stable
/// conventions; bookmaker-specific decorations go in the strip lists,
/// which live in config because feed formatting drifts independently
/// of logic changes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NormalizationRules {
    /// Literal prefixes removed after case-folding.
    pub strip_prefixes: Vec<String>,
    /// Literal suffixes removed after case-folding.
    pub strip_suffixes: Vec<String>,
}

impl NormalizationRules {
    /// Normalize a runner name for cross-source comparison.
    ///
    /// Case-folds, drops a trailing parenthesised barrier/country tag
    /// ("Diamond Flash (NZ)"), strips configured affixes and all
    /// punctuation, and collapses whitespace.
    pub fn normalize(&self, raw: &str) -> String {
        let mut name = raw.trim().to_lowercase();

        // Trailing "(...)" tags: barrier indicators, country of origin.
        if let (Some(open), true) = (name.rfind('('), name.ends_with(')')) {
            name.truncate(open);
        }

        for prefix in &self.strip_prefixes {
            if let Some(rest) = name.strip_prefix(&prefix.to_lowercase()) {
                name = rest.to_string();
            }
        }
        for suffix in &self.strip_suffixes {
            if let Some(rest) = name.strip_suffix(&suffix.to_lowercase()) {
                name = rest.to_string();
            }
        }

        name.chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Split a leading program number off a display name
/// ("1. Diamond Flash" → (Some(1), "Diamond Flash")).
pub fn split_program_number(raw: &str) -> (Option<u32>, &str) {
    if let Some((head, tail)) = raw.split_once('.') {
        if let Ok(num) = head.trim().parse::<u32>() {
            return (Some(num), tail.trim());
        }
    }
    (None, raw.trim())
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Align runners across snapshots into canonical per-runner records.
///
/// Deterministic: snapshots are processed in source-id order and the
/// output is sorted by (program number ascending, canonical name),
/// number-less runners last — repeated runs over the same input yield
/// identical output regardless of fetch completion order.
///
/// A runner present in at least one snapshot yields exactly one
/// record; bookmakers that lack it simply have no entry in `quotes`.
pub fn match_snapshots(snapshots: &[Snapshot], rules: &NormalizationRules) -> Vec<RunnerRecord> {
    let mut ordered: Vec<&Snapshot> = snapshots.iter().collect();
    ordered.sort_by(|a, b| a.source.cmp(&b.source));

    let mut records: Vec<RunnerRecord> = Vec::new();
    let mut by_number: HashMap<u32, usize> = HashMap::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for snapshot in ordered {
        for quote in &snapshot.runners {
            let (parsed_number, bare_name) = split_program_number(&quote.name);
            let number = quote.number.or(parsed_number);
            let normalized = rules.normalize(bare_name);

            let existing = number
                .and_then(|n| by_number.get(&n).copied())
                .or_else(|| by_name.get(&normalized).copied());

            match existing {
                Some(idx) => {
                    let record = &mut records[idx];

                    // Same normalized name but materially different
                    // program numbers: don't guess — report and skip.
                    if let (Some(have), Some(got)) = (record.number, number) {
                        if have != got {
                            warn!(
                                source = %snapshot.source,
                                runner = %normalized,
                                have, got,
                                "Program number conflict, quote not attached"
                            );
                            record.unresolved.push(MatchNotice {
                                source: snapshot.source.clone(),
                                reason: format!(
                                    "program number {got} conflicts with {have} for '{normalized}'"
                                ),
                            });
                            continue;
                        }
                    }

                    if record.number.is_none() {
                        record.number = number;
                        if let Some(n) = number {
                            by_number.entry(n).or_insert(idx);
                        }
                    }
                    by_name.entry(normalized).or_insert(idx);
                    record
                        .quotes
                        .entry(snapshot.source.clone())
                        .or_insert_with(|| quote.clone());
                }
                None => {
                    let idx = records.len();
                    let mut quotes = BTreeMap::new();
                    quotes.insert(snapshot.source.clone(), quote.clone());
                    records.push(RunnerRecord {
                        name: bare_name.to_string(),
                        number,
                        quotes,
                        unresolved: Vec::new(),
                    });
                    if let Some(n) = number {
                        by_number.insert(n, idx);
                    }
                    by_name.insert(normalized, idx);
                }
            }
        }
    }

    records.sort_by(|a, b| match (a.number, b.number) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.name.cmp(&b.name)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });

    debug!(
        snapshots = snapshots.len(),
        runners = records.len(),
        "Matching complete"
    );

    records
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Quote, RaceIdentity, RunnerQuote};
    use chrono::{TimeZone, Utc};

    fn race() -> RaceIdentity {
        RaceIdentity {
            venue: "Flemington".to_string(),
            race_number: 4,
            start_time: Utc.with_ymd_and_hms(2026, 1, 8, 3, 30, 0).unwrap(),
        }
    }

    fn quote(name: &str, number: Option<u32>, odds: f64) -> RunnerQuote {
        RunnerQuote {
            name: name.to_string(),
            number,
            scratched: false,
            price: Some(Quote::FixedWin(odds)),
        }
    }

    fn snap(source: &str, runners: Vec<RunnerQuote>) -> Snapshot {
        Snapshot::new(source, race(), runners)
    }

    // -- Normalization -----------------------------------------------------

    #[test]
    fn test_normalize_case_and_whitespace() {
        let rules = NormalizationRules::default();
        assert_eq!(rules.normalize("  DIAMOND   Flash "), "diamond flash");
    }

    #[test]
    fn test_normalize_strips_punctuation() {
        let rules = NormalizationRules::default();
        assert_eq!(rules.normalize("D'Artagnan's-Pride"), "d artagnan s pride");
    }

    #[test]
    fn test_normalize_strips_trailing_tag() {
        let rules = NormalizationRules::default();
        assert_eq!(rules.normalize("Diamond Flash (NZ)"), "diamond flash");
        assert_eq!(rules.normalize("Diamond Flash (1)"), "diamond flash");
        // A parenthesis mid-name is not a trailing tag.
        assert_eq!(rules.normalize("Fly (by) Night"), "fly by night");
    }

    #[test]
    fn test_normalize_configured_affixes() {
        let rules = NormalizationRules {
            strip_prefixes: vec![],
            strip_suffixes: vec![" emg".to_string()],
        };
        assert_eq!(rules.normalize("Diamond Flash EMG"), "diamond flash");
    }

    #[test]
    fn test_split_program_number() {
        assert_eq!(split_program_number("1. Diamond Flash"), (Some(1), "Diamond Flash"));
        assert_eq!(split_program_number("Diamond Flash"), (None, "Diamond Flash"));
        assert_eq!(split_program_number("Mr. Brightside"), (None, "Mr. Brightside"));
    }

    // -- Matching ----------------------------------------------------------

    #[test]
    fn test_match_by_number_across_spellings() {
        let snapshots = vec![
            snap("betfair", vec![quote("Diamond Flash", Some(1), 4.0)]),
            snap("sportsbet", vec![quote("DIAMOND FLASH (NZ)", Some(1), 5.0)]),
        ];
        let records = match_snapshots(&snapshots, &NormalizationRules::default());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, Some(1));
        assert_eq!(records[0].quotes.len(), 2);
        assert!(records[0].quotes.contains_key("betfair"));
        assert!(records[0].quotes.contains_key("sportsbet"));
    }

    #[test]
    fn test_match_by_name_when_number_absent() {
        let snapshots = vec![
            snap("betfair", vec![quote("Diamond Flash", Some(1), 4.0)]),
            snap("sportsbet", vec![quote("diamond flash", None, 5.0)]),
        ];
        let records = match_snapshots(&snapshots, &NormalizationRules::default());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].quotes.len(), 2);
    }

    #[test]
    fn test_number_parsed_from_display_name() {
        let snapshots = vec![
            snap("betfair", vec![quote("1. Diamond Flash", None, 4.0)]),
            snap("sportsbet", vec![quote("Diamond Flash", Some(1), 5.0)]),
        ];
        let records = match_snapshots(&snapshots, &NormalizationRules::default());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, Some(1));
        assert_eq!(records[0].name, "Diamond Flash");
    }

    #[test]
    fn test_absent_runner_never_dropped() {
        let snapshots = vec![
            snap(
                "betfair",
                vec![
                    quote("Diamond Flash", Some(1), 4.0),
                    quote("Midnight Harbour", Some(2), 8.0),
                ],
            ),
            // Sportsbet doesn't list runner 2 at all.
            snap("sportsbet", vec![quote("Diamond Flash", Some(1), 5.0)]),
        ];
        let records = match_snapshots(&snapshots, &NormalizationRules::default());

        assert_eq!(records.len(), 2);
        let harbour = &records[1];
        assert_eq!(harbour.number, Some(2));
        assert!(harbour.quotes.contains_key("betfair"));
        assert!(!harbour.quotes.contains_key("sportsbet"));
    }

    #[test]
    fn test_conflicting_numbers_not_merged() {
        let snapshots = vec![
            snap("betfair", vec![quote("Diamond Flash", Some(1), 4.0)]),
            // Same name, materially different saddlecloth number.
            snap("sportsbet", vec![quote("Diamond Flash", Some(7), 5.0)]),
        ];
        let records = match_snapshots(&snapshots, &NormalizationRules::default());

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.number, Some(1));
        assert!(!record.quotes.contains_key("sportsbet"));
        assert_eq!(record.unresolved.len(), 1);
        assert_eq!(record.unresolved[0].source, "sportsbet");
    }

    #[test]
    fn test_deterministic_ordering() {
        let snapshots = vec![
            snap(
                "betfair",
                vec![
                    quote("Zou Zou Express", Some(3), 9.0),
                    quote("Diamond Flash", Some(1), 4.0),
                    quote("Unnumbered Colt", None, 12.0),
                ],
            ),
            snap("sportsbet", vec![quote("Midnight Harbour", Some(2), 8.0)]),
        ];
        let records = match_snapshots(&snapshots, &NormalizationRules::default());

        let order: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            order,
            vec!["Diamond Flash", "Midnight Harbour", "Zou Zou Express", "Unnumbered Colt"]
        );
    }

    #[test]
    fn test_matching_idempotent() {
        let snapshots = vec![
            snap("betfair", vec![quote("1. Diamond Flash", None, 4.0)]),
            snap("sportsbet", vec![quote("Diamond Flash (NZ)", Some(1), 5.0)]),
            snap("pointsbet", vec![quote("DIAMOND FLASH", None, 5.5)]),
        ];
        let rules = NormalizationRules::default();
        let first = match_snapshots(&snapshots, &rules);
        let second = match_snapshots(&snapshots, &rules);
        assert_eq!(first, second);
    }

    #[test]
    fn test_arrival_order_does_not_leak() {
        let a = snap("betfair", vec![quote("Diamond Flash", Some(1), 4.0)]);
        let b = snap("sportsbet", vec![quote("Diamond Flash", Some(1), 5.0)]);

        let rules = NormalizationRules::default();
        let forward = match_snapshots(&[a.clone(), b.clone()], &rules);
        let reverse = match_snapshots(&[b, a], &rules);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_empty_input() {
        assert!(match_snapshots(&[], &NormalizationRules::default()).is_empty());
    }
}
