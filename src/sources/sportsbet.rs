//! Sportsbet data source — fixed WIN odds.
//!
//! Two-step fetch: the AllRacing feed for a date resolves the venue and
//! start time to an event id, then the event's Markets feed supplies
//! the "Win or Place"/"Win" market with live fixed prices (code "L").

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{start_time_diff, venue_matches, OddsSource, DEFAULT_TIME_TOLERANCE_SECS};
use crate::types::{Quote, RaceIdentity, RunnerQuote, Snapshot, SourceError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const MEETINGS_URL: &str =
    "https://www.sportsbet.com.au/apigw/sportsbook-racing/Sportsbook/Racing/AllRacing";
const MARKETS_URL: &str =
    "https://www.sportsbet.com.au/apigw/sportsbook-racing/Sportsbook/Racing/Events";
const SOURCE_NAME: &str = "sportsbet";

/// Market names that carry the fixed WIN price.
const WIN_MARKET_NAMES: [&str; 2] = ["Win or Place", "Win"];

/// Live/fixed price code.
const LIVE_PRICE_CODE: &str = "L";

// ---------------------------------------------------------------------------
// Sportsbet API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllRacingResponse {
    #[serde(default)]
    dates: Vec<RacingDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RacingDate {
    #[serde(default)]
    sections: Vec<RacingSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RacingSection {
    #[serde(default)]
    race_type: Option<String>,
    #[serde(default)]
    meetings: Vec<SbMeeting>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SbMeeting {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    events: Vec<SbEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SbEvent {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    race_number: Option<u32>,
    /// Start time as seconds since epoch.
    #[serde(default)]
    start_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SbMarket {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    selections: Vec<SbSelection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SbSelection {
    #[serde(default)]
    runner_number: Option<u32>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_out: bool,
    #[serde(default)]
    prices: Vec<SbPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SbPrice {
    #[serde(default)]
    price_code: Option<String>,
    #[serde(default)]
    win_price: Option<f64>,
}

/// Pull runner quotes out of the first WIN-capable market.
fn parse_markets(markets: Vec<SbMarket>) -> Vec<RunnerQuote> {
    let Some(market) = markets
        .into_iter()
        .find(|m| WIN_MARKET_NAMES.contains(&m.name.as_deref().unwrap_or("")))
    else {
        return Vec::new();
    };

    market
        .selections
        .into_iter()
        .map(|sel| {
            let win_odds = sel
                .prices
                .iter()
                .find(|p| p.price_code.as_deref() == Some(LIVE_PRICE_CODE))
                .and_then(|p| p.win_price)
                .or_else(|| sel.prices.iter().find_map(|p| p.win_price));

            let scratched = sel.is_out;
            RunnerQuote {
                name: sel.name.unwrap_or_else(|| "Unknown".to_string()),
                number: sel.runner_number,
                scratched,
                price: if scratched { None } else { win_odds.map(Quote::FixedWin) },
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Sportsbet bookmaker data source.
pub struct SportsbetSource {
    http: Client,
    time_tolerance_secs: i64,
}

impl SportsbetSource {
    pub fn new() -> Result<Self> {
        Self::with_tolerance(DEFAULT_TIME_TOLERANCE_SECS)
    }

    pub fn with_tolerance(time_tolerance_secs: i64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36")
            .build()
            .context("Failed to build HTTP client for Sportsbet")?;
        Ok(Self {
            http,
            time_tolerance_secs,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let resp = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SourceError::Network(format!(
                "Sportsbet returned HTTP {}",
                resp.status()
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    /// Find this bookmaker's event id for a race.
    ///
    /// Matches by venue and closest start time within tolerance, since
    /// race numbers can differ between sources.
    async fn find_event(&self, race: &RaceIdentity) -> Result<u64, SourceError> {
        let date = race.start_time.format("%Y-%m-%d");
        let url = format!("{MEETINGS_URL}/{date}");
        let feed: AllRacingResponse = self.get_json(&url).await?;

        let mut best: Option<(i64, u64)> = None;
        for date_obj in &feed.dates {
            for section in &date_obj.sections {
                if section.race_type.as_deref() != Some("horse") {
                    continue;
                }
                for meeting in &section.meetings {
                    let venue = meeting.name.as_deref().unwrap_or("");
                    if !venue_matches(venue, &race.venue) {
                        continue;
                    }
                    for event in &meeting.events {
                        let (Some(id), Some(epoch)) = (event.id, event.start_time) else {
                            continue;
                        };
                        let Some(start) = Utc.timestamp_opt(epoch, 0).single() else {
                            continue;
                        };
                        let diff = start_time_diff(start, race.start_time);
                        if diff > self.time_tolerance_secs {
                            continue;
                        }
                        if event.race_number == Some(race.race_number) {
                            return Ok(id);
                        }
                        if best.as_ref().map(|(d, _)| diff < *d).unwrap_or(true) {
                            best = Some((diff, id));
                        }
                    }
                }
            }
        }

        best.map(|(_, id)| id).ok_or(SourceError::NotFound)
    }
}

#[async_trait]
impl OddsSource for SportsbetSource {
    async fn fetch(&self, race: &RaceIdentity) -> Result<Snapshot, SourceError> {
        let event_id = self.find_event(race).await?;
        debug!(event_id, race = %race, "Sportsbet event located");

        let url = format!("{MARKETS_URL}/{event_id}/Markets");
        let markets: Vec<SbMarket> = self.get_json(&url).await?;
        let runners = parse_markets(markets);
        if runners.is_empty() {
            return Err(SourceError::MarketClosed);
        }

        Ok(Snapshot::new(SOURCE_NAME, race.clone(), runners))
    }

    fn name(&self) -> &'static str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
