//! Bookmaker data sources.
//!
//! Defines the `OddsSource` trait and provides implementations for:
//! - Betfair — exchange back/lay odds for WIN and PLACE markets (the
//!   probability reference for EV math)
//! - Sportsbet, Pointsbet, Amused — fixed WIN odds
//!
//! Each adapter validates and normalizes at this boundary: malformed
//! fields become `SourceError::Parse` here and never propagate inward.

pub mod amused;
pub mod betfair;
pub mod pointsbet;
pub mod sportsbet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{RaceIdentity, Snapshot, SourceError};

/// Default tolerance when matching a race across sources by start time.
/// Race numbers can differ between sources, so time is the anchor.
pub const DEFAULT_TIME_TOLERANCE_SECS: i64 = 300;

/// Abstraction over bookmaker odds sources.
///
/// Implementors resolve a `RaceIdentity` into their own event ids and
/// return a normalized snapshot of that race's odds, or a classified
/// error. The core depends only on this capability, never on
/// transport details.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OddsSource: Send + Sync {
    /// Fetch one bookmaker's odds snapshot for the given race.
    async fn fetch(&self, race: &RaceIdentity) -> Result<Snapshot, SourceError>;

    /// Source name for logging, matching and result keys.
    fn name(&self) -> &'static str;
}

/// Loose venue comparison: case-insensitive, whitespace-insensitive,
/// containment either way ("Sandown" vs "Sandown Hillside").
pub(crate) fn venue_matches(a: &str, b: &str) -> bool {
    let squash = |s: &str| s.to_lowercase().replace(char::is_whitespace, "");
    let a = squash(a);
    let b = squash(b);
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

/// Absolute difference in seconds between two start times.
pub(crate) fn start_time_diff(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    (a - b).num_seconds().abs()
}
