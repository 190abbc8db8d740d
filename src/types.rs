//! Shared types for the TRACKMON odds core.
//!
//! These types form the data model used across all modules.
//! Snapshots are write-once by their producing source adapter and
//! read-only thereafter, so the matcher and EV calculator never
//! need to coordinate with in-flight fetches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Race identity
// ---------------------------------------------------------------------------

/// Identity of a single race, as supplied by the caller.
///
/// Derived from an external race-card lookup (out of scope here).
/// Each bookmaker adapter resolves this into its own event/market ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceIdentity {
    pub venue: String,
    pub race_number: u32,
    /// Scheduled start time, timezone-aware.
    pub start_time: DateTime<Utc>,
}

impl fmt::Display for RaceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} R{} ({})",
            self.venue,
            self.race_number,
            self.start_time.format("%Y-%m-%d %H:%M UTC"),
        )
    }
}

impl RaceIdentity {
    /// Seconds from `now` until the scheduled start (negative once started).
    pub fn seconds_until_start(&self) -> i64 {
        (self.start_time - Utc::now()).num_seconds()
    }
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

/// Best available exchange prices for one runner.
///
/// Lay prices are the probability proxy for EV math: implied
/// probability = 1 / price.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExchangePrices {
    /// Best back price on the WIN market.
    pub back_win: Option<f64>,
    /// Best lay price on the WIN market.
    pub lay_win: Option<f64>,
    /// Stake available at the best lay WIN price.
    pub lay_win_size: Option<f64>,
    /// Best back price on the PLACE market.
    pub back_place: Option<f64>,
    /// Best lay price on the PLACE market.
    pub lay_place: Option<f64>,
}

/// The prices one bookmaker offers for one runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Quote {
    /// Fixed decimal odds on the WIN market.
    FixedWin(f64),
    /// Fixed decimal odds on the PLACE market.
    FixedPlace(f64),
    /// Exchange back/lay prices for WIN and PLACE markets.
    Exchange(ExchangePrices),
}

/// One bookmaker's entry for one runner in one race.
///
/// `price` is `None` for runners the bookmaker lists but does not
/// price (scratched, suspended, or simply unquoted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerQuote {
    /// Runner display name exactly as this bookmaker spells it.
    pub name: String,
    /// Saddlecloth/program number, when the bookmaker provides one.
    pub number: Option<u32>,
    pub scratched: bool,
    pub price: Option<Quote>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One bookmaker's complete view of one race at fetch time.
///
/// Constructed fully by the producing adapter, then handed off
/// immutable — never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Bookmaker identifier, e.g. "betfair" or "sportsbet".
    pub source: String,
    pub race: RaceIdentity,
    pub runners: Vec<RunnerQuote>,
    pub fetched_at: DateTime<Utc>,
    /// Partial-failure marker, e.g. "place market not yet open".
    pub caveat: Option<String>,
}

impl Snapshot {
    pub fn new(source: &str, race: RaceIdentity, runners: Vec<RunnerQuote>) -> Self {
        Self {
            source: source.to_string(),
            race,
            runners,
            fetched_at: Utc::now(),
            caveat: None,
        }
    }

    pub fn with_caveat(mut self, caveat: &str) -> Self {
        self.caveat = Some(caveat.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Canonical post-matching records
// ---------------------------------------------------------------------------

/// Diagnostic attached to a runner when sources disagree about its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchNotice {
    /// The source whose quote could not be attached.
    pub source: String,
    pub reason: String,
}

impl fmt::Display for MatchNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.source, self.reason)
    }
}

/// Canonical per-runner record produced by the matcher.
///
/// One entry per bookmaker in `quotes`; an absent entry means that
/// bookmaker offered no quote (scratched, not listed, or unresolved).
/// Built once per evaluation, immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerRecord {
    /// Canonical display name (first quote in deterministic source order).
    pub name: String,
    pub number: Option<u32>,
    pub quotes: BTreeMap<String, RunnerQuote>,
    /// Unresolved-match conditions — surfaced, never silently merged.
    pub unresolved: Vec<MatchNotice>,
}

impl RunnerRecord {
    /// The exchange prices this record carries for `source`, if any.
    pub fn exchange_prices(&self, source: &str) -> Option<&ExchangePrices> {
        match self.quotes.get(source) {
            Some(RunnerQuote {
                scratched: false,
                price: Some(Quote::Exchange(ex)),
                ..
            }) => Some(ex),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Promo & EV
// ---------------------------------------------------------------------------

/// Promotional bet type the EV is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Promo {
    /// Stake back as a bonus if the runner finishes 2nd or 3rd.
    SecondOrThird,
    /// Stake back as a bonus if the runner loses.
    FreeHit,
    /// Stake-not-returned bonus bet retention.
    Bonus,
}

impl fmt::Display for Promo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Promo::SecondOrThird => write!(f, "2/3"),
            Promo::FreeHit => write!(f, "free_hit"),
            Promo::Bonus => write!(f, "bonus"),
        }
    }
}

impl std::str::FromStr for Promo {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "2/3" | "2nd3rd" | "second_or_third" => Ok(Promo::SecondOrThird),
            "free_hit" | "freehit" => Ok(Promo::FreeHit),
            "bonus" | "snr" => Ok(Promo::Bonus),
            _ => Err(anyhow::anyhow!("Unknown promo type: {s}")),
        }
    }
}

/// EV outcome for one (runner, bookmaker) pair.
///
/// Insufficient data is an explicit marker, never a zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Ev {
    /// Expected value as a percentage of stake.
    Percent(f64),
    /// EV undefined for this pair, with the reason.
    Insufficient(String),
}

impl Ev {
    pub fn percent(&self) -> Option<f64> {
        match self {
            Ev::Percent(p) => Some(*p),
            Ev::Insufficient(_) => None,
        }
    }
}

impl fmt::Display for Ev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ev::Percent(p) => write!(f, "{p:+.1}%"),
            Ev::Insufficient(reason) => write!(f, "n/a ({reason})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Race result
// ---------------------------------------------------------------------------

/// A matched runner annotated with per-bookmaker EV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerAssessment {
    pub record: RunnerRecord,
    /// EV per fixed-odds bookmaker that quoted this runner.
    pub evs: BTreeMap<String, Ev>,
}

impl RunnerAssessment {
    /// Best computed EV across bookmakers, if any.
    pub fn best_ev(&self) -> Option<(&str, f64)> {
        self.evs
            .iter()
            .filter_map(|(source, ev)| ev.percent().map(|p| (source.as_str(), p)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// The sole output of the core: one race, fully aggregated.
///
/// Runner ordering is deterministic (program number ascending, then
/// canonical name, number-less runners last), so repeated evaluations
/// of an unchanged race produce identical structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    pub race: RaceIdentity,
    pub runners: Vec<RunnerAssessment>,
    /// Sources that failed to respond, and why.
    pub failures: BTreeMap<String, SourceError>,
    pub evaluated_at: DateTime<Utc>,
}

impl RaceResult {
    /// The single best EV opportunity across all runners and bookmakers.
    pub fn best_opportunity(&self) -> Option<(&RunnerAssessment, &str, f64)> {
        self.runners
            .iter()
            .filter_map(|r| r.best_ev().map(|(source, ev)| (r, source, ev)))
            .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Classified failure of a single source fetch.
///
/// These are always contained at the orchestrator boundary and
/// downgraded to per-source failure entries — they never abort an
/// evaluation.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    Parse(String),

    #[error("race not found")]
    NotFound,

    #[error("market closed")]
    MarketClosed,

    #[error("timed out")]
    Timeout,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
