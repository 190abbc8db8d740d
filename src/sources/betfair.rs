//! Betfair Exchange data source.
//!
//! Provides back/lay odds and liquidity for both WIN and PLACE markets.
//! This is the probability reference for EV math (lay price ⇒ 1/price).
//!
//! Uses the public Australian EDS/ERO endpoints:
//! - Meetings:  https://apieds.betfair.com.au/api/eds/meeting-races/v4
//! - Odds:      https://ero.betfair.com.au/www/sports/exchange/readonly/v1/bymarket
//! - Nav:       https://ero.betfair.com.au/www/sports/navigation/facet/v1/search
//!
//! Betfair uses decimal odds and a back/lay model:
//! - Back = bet FOR a runner
//! - Lay = bet AGAINST a runner
//! - Implied probability = 1 / decimal_odds
//!
//! AU runner names carry the saddlecloth number ("1. Diamond Flash");
//! the number is split off here so the matcher can key on it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{start_time_diff, venue_matches, OddsSource, DEFAULT_TIME_TOLERANCE_SECS};
use crate::types::{ExchangePrices, Quote, RaceIdentity, RunnerQuote, Snapshot, SourceError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const MEETINGS_URL: &str = "https://apieds.betfair.com.au/api/eds/meeting-races/v4";
const ODDS_URL: &str = "https://ero.betfair.com.au/www/sports/exchange/readonly/v1/bymarket";
const NAV_URL: &str = "https://ero.betfair.com.au/www/sports/navigation/facet/v1/search";
const SOURCE_NAME: &str = "betfair";

/// Horse racing event type on the exchange.
const EVENT_TYPE_HORSE_RACING: &str = "7";

/// How far around the scheduled start to search for the market.
const SEARCH_WINDOW_HOURS: i64 = 2;

// ---------------------------------------------------------------------------
// Betfair API types
// ---------------------------------------------------------------------------

/// One country group in the meeting-races response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountryRaces {
    #[serde(default)]
    meetings: Vec<EdsMeeting>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdsMeeting {
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    races: Vec<EdsRace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdsRace {
    #[serde(default)]
    market_id: Option<String>,
    /// Race number as a string, sometimes prefixed "R" ("R4").
    #[serde(default)]
    race_number: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// The `bymarket` read-only odds response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ByMarketResponse {
    #[serde(default)]
    event_types: Vec<EroEventType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EroEventType {
    #[serde(default)]
    event_nodes: Vec<EroEventNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EroEventNode {
    #[serde(default)]
    event_id: Option<u64>,
    #[serde(default)]
    market_nodes: Vec<EroMarketNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EroMarketNode {
    #[serde(default)]
    state: Option<EroMarketState>,
    #[serde(default)]
    runners: Vec<EroRunner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EroMarketState {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EroRunner {
    #[serde(default)]
    description: Option<EroRunnerDescription>,
    #[serde(default)]
    state: Option<EroRunnerState>,
    #[serde(default)]
    exchange: Option<EroExchange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EroRunnerDescription {
    #[serde(default)]
    runner_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EroRunnerState {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EroExchange {
    #[serde(default)]
    available_to_back: Vec<PriceSize>,
    #[serde(default)]
    available_to_lay: Vec<PriceSize>,
}

#[derive(Debug, Deserialize)]
struct PriceSize {
    price: f64,
    size: f64,
}

/// Navigation facet search response (used to locate the PLACE market).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavResponse {
    #[serde(default)]
    attachments: Option<NavAttachments>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavAttachments {
    #[serde(default)]
    markets: Option<HashMap<String, NavMarket>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavMarket {
    #[serde(default)]
    market_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsed intermediate market
// ---------------------------------------------------------------------------

/// One market's runners after boundary validation, keyed for merging.
#[derive(Debug, Default)]
struct ParsedMarket {
    status: Option<String>,
    event_id: Option<u64>,
    runners: Vec<ParsedRunner>,
}

#[derive(Debug)]
struct ParsedRunner {
    number: Option<u32>,
    name: String,
    back: Option<f64>,
    lay: Option<f64>,
    lay_size: Option<f64>,
    scratched: bool,
}

/// Split an AU-format runner name into saddlecloth number and bare name
/// ("1. Diamond Flash" → (Some(1), "Diamond Flash")).
fn split_runner_name(raw: &str) -> (Option<u32>, String) {
    if let Some((head, tail)) = raw.split_once('.') {
        if let Ok(num) = head.trim().parse::<u32>() {
            return (Some(num), tail.trim().to_string());
        }
    }
    (None, raw.trim().to_string())
}

/// Flatten a `bymarket` response into the first market's runners.
fn parse_market(resp: ByMarketResponse) -> ParsedMarket {
    let mut parsed = ParsedMarket::default();

    for et in resp.event_types {
        for event_node in et.event_nodes {
            if parsed.event_id.is_none() {
                parsed.event_id = event_node.event_id;
            }
            for market_node in event_node.market_nodes {
                if let Some(state) = &market_node.state {
                    parsed.status = state.status.clone();
                }
                for runner in market_node.runners {
                    let raw_name = runner
                        .description
                        .and_then(|d| d.runner_name)
                        .unwrap_or_else(|| "Unknown".to_string());
                    let (number, name) = split_runner_name(&raw_name);

                    let status = runner.state.and_then(|s| s.status);
                    let scratched = matches!(status.as_deref(), Some("REMOVED"));

                    let exchange = runner.exchange.unwrap_or(EroExchange {
                        available_to_back: Vec::new(),
                        available_to_lay: Vec::new(),
                    });
                    let best_back = exchange.available_to_back.first();
                    let best_lay = exchange.available_to_lay.first();

                    parsed.runners.push(ParsedRunner {
                        number,
                        name,
                        back: best_back.map(|p| p.price),
                        lay: best_lay.map(|p| p.price),
                        lay_size: best_lay.map(|p| p.size),
                        scratched,
                    });
                }
            }
        }
    }

    parsed
}

/// Merge WIN and PLACE markets into runner quotes, joining on
/// saddlecloth number (falling back to bare name when absent).
fn merge_markets(win: ParsedMarket, place: Option<ParsedMarket>) -> Vec<RunnerQuote> {
    let place_runners: Vec<ParsedRunner> = place.map(|p| p.runners).unwrap_or_default();

    let find_place = |number: Option<u32>, name: &str| -> Option<&ParsedRunner> {
        place_runners.iter().find(|r| match (number, r.number) {
            (Some(a), Some(b)) => a == b,
            _ => r.name == name,
        })
    };

    win.runners
        .iter()
        .map(|r| {
            let place = find_place(r.number, &r.name).filter(|p| !p.scratched);
            let price = if r.scratched {
                None
            } else {
                Some(Quote::Exchange(ExchangePrices {
                    back_win: r.back,
                    lay_win: r.lay,
                    lay_win_size: r.lay_size,
                    back_place: place.and_then(|p| p.back),
                    lay_place: place.and_then(|p| p.lay),
                }))
            };
            RunnerQuote {
                name: r.name.clone(),
                number: r.number,
                scratched: r.scratched,
                price,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Betfair Exchange data source.
pub struct BetfairSource {
    http: Client,
    app_key: String,
    time_tolerance_secs: i64,
}

impl BetfairSource {
    /// Create a new Betfair source with the given EDS application key.
    pub fn new(app_key: String) -> Result<Self> {
        Self::with_tolerance(app_key, DEFAULT_TIME_TOLERANCE_SECS)
    }

    pub fn with_tolerance(app_key: String, time_tolerance_secs: i64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36")
            .build()
            .context("Failed to build HTTP client for Betfair")?;
        Ok(Self {
            http,
            app_key,
            time_tolerance_secs,
        })
    }

    // -- Internal helpers --------------------------------------------------

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let resp = self
            .http
            .get(url)
            .query(params)
            .header("Referer", "https://www.betfair.com.au/")
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SourceError::Network(format!(
                "Betfair returned HTTP {}",
                resp.status()
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    /// Resolve a race identity to its WIN market id via the meetings feed.
    async fn find_win_market(&self, race: &RaceIdentity) -> Result<String, SourceError> {
        let window = Duration::hours(SEARCH_WINDOW_HOURS);
        let after = (race.start_time - window).format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let before = (race.start_time + window).format("%Y-%m-%dT%H:%M:%S%.3fZ");

        let params = [
            ("_ak", self.app_key.clone()),
            ("eventTypeId", EVENT_TYPE_HORSE_RACING.to_string()),
            ("marketStartingAfter", after.to_string()),
            ("marketStartingBefore", before.to_string()),
        ];

        let countries: Vec<CountryRaces> = self.fetch_json(MEETINGS_URL, &params).await?;

        let mut best: Option<(i64, String)> = None;
        for country in &countries {
            for meeting in &country.meetings {
                let venue = meeting.venue.as_deref().unwrap_or("");
                if !venue_matches(venue, &race.venue) {
                    continue;
                }
                for entry in &meeting.races {
                    let Some(market_id) = &entry.market_id else {
                        continue;
                    };
                    let number = entry
                        .race_number
                        .as_deref()
                        .and_then(|n| n.trim_start_matches('R').parse::<u32>().ok());
                    let start = entry
                        .start_time
                        .as_deref()
                        .and_then(|s| s.parse::<chrono::DateTime<chrono::Utc>>().ok());
                    let diff = start
                        .map(|s| start_time_diff(s, race.start_time))
                        .unwrap_or(i64::MAX);

                    // Exact race number within tolerance wins outright;
                    // otherwise nearest start time within tolerance.
                    if diff > self.time_tolerance_secs {
                        continue;
                    }
                    if number == Some(race.race_number) {
                        return Ok(market_id.clone());
                    }
                    if best.as_ref().map(|(d, _)| diff < *d).unwrap_or(true) {
                        best = Some((diff, market_id.clone()));
                    }
                }
            }
        }

        best.map(|(_, id)| id).ok_or(SourceError::NotFound)
    }

    async fn market_odds(&self, market_id: &str) -> Result<ParsedMarket, SourceError> {
        let params = [
            ("_ak", self.app_key.clone()),
            ("currencyCode", "AUD".to_string()),
            ("marketIds", market_id.to_string()),
            ("rollupLimit", "5".to_string()),
            ("rollupModel", "STAKE".to_string()),
            (
                "types",
                "MARKET_STATE,RUNNER_STATE,RUNNER_EXCHANGE_PRICES_BEST,RUNNER_DESCRIPTION"
                    .to_string(),
            ),
        ];
        let resp: ByMarketResponse = self.fetch_json(ODDS_URL, &params).await?;
        Ok(parse_market(resp))
    }

    /// Locate the PLACE market for a WIN market: navigation facet search
    /// by event id, falling back to the sequential market-id convention.
    async fn place_market_id(&self, win_market_id: &str, event_id: Option<u64>) -> Option<String> {
        if let Some(event_id) = event_id {
            let params = [
                ("_ak", self.app_key.clone()),
                ("eventId", event_id.to_string()),
                ("marketBettingTypes", "ODDS".to_string()),
                ("maxResults", "10".to_string()),
            ];
            match self.fetch_json::<NavResponse>(NAV_URL, &params).await {
                Ok(nav) => {
                    let markets = nav.attachments.and_then(|a| a.markets).unwrap_or_default();
                    for (id, market) in &markets {
                        let market_type = market.market_type.as_deref().unwrap_or("");
                        if market_type.to_uppercase().contains("PLACE") {
                            return Some(id.clone());
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Betfair place market search failed");
                }
            }
        }

        // Place markets conventionally sit one id above the win market.
        let (prefix, seq) = win_market_id.split_once('.')?;
        let seq: u64 = seq.parse().ok()?;
        Some(format!("{prefix}.{}", seq + 1))
    }
}

#[async_trait]
impl OddsSource for BetfairSource {
    async fn fetch(&self, race: &RaceIdentity) -> Result<Snapshot, SourceError> {
        let win_market_id = self.find_win_market(race).await?;
        debug!(market_id = %win_market_id, race = %race, "Betfair WIN market located");

        let win = self.market_odds(&win_market_id).await?;
        if matches!(win.status.as_deref(), Some("CLOSED")) {
            return Err(SourceError::MarketClosed);
        }

        let mut caveat = None;
        let place = match self.place_market_id(&win_market_id, win.event_id).await {
            Some(place_id) => match self.market_odds(&place_id).await {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, "Betfair PLACE market fetch failed");
                    caveat = Some("place market unavailable".to_string());
                    None
                }
            },
            None => {
                caveat = Some("place market not found".to_string());
                None
            }
        };

        let runners = merge_markets(win, place);
        let mut snapshot = Snapshot::new(SOURCE_NAME, race.clone(), runners);
        if let Some(c) = caveat {
            snapshot = snapshot.with_caveat(&c);
        }
        Ok(snapshot)
    }

    fn name(&self) -> &'static str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_runner_name_au_format() {
        assert_eq!(
            split_runner_name("1. Diamond Flash"),
            (Some(1), "Diamond Flash".to_string())
        );
        assert_eq!(
            split_runner_name("12. Zou Zou Express"),
            (Some(12), "Zou Zou Express".to_string())
        );
    }

    #[test]
    fn test_split_runner_name_without_number() {
        assert_eq!(split_runner_name("Diamond Flash"), (None, "Diamond Flash".to_string()));
        // A dot that is not a number prefix stays intact.
        assert_eq!(split_runner_name("Mr. Brightside"), (None, "Mr. Brightside".to_string()));
    }

    fn sample_bymarket(status: &str) -> ByMarketResponse {
        serde_json::from_value(json!({
            "eventTypes": [{
                "eventNodes": [{
                    "eventId": 33445566u64,
                    "marketNodes": [{
                        "state": { "status": status },
                        "runners": [
                            {
                                "description": { "runnerName": "1. Diamond Flash" },
                                "state": { "status": "ACTIVE" },
                                "exchange": {
                                    "availableToBack": [{ "price": 3.9, "size": 120.0 }],
                                    "availableToLay": [{ "price": 4.0, "size": 250.0 }]
                                }
                            },
                            {
                                "description": { "runnerName": "2. Midnight Harbour" },
                                "state": { "status": "REMOVED" },
                                "exchange": { "availableToBack": [], "availableToLay": [] }
                            }
                        ]
                    }]
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_market_extracts_best_prices() {
        let parsed = parse_market(sample_bymarket("OPEN"));
        assert_eq!(parsed.status.as_deref(), Some("OPEN"));
        assert_eq!(parsed.event_id, Some(33445566));
        assert_eq!(parsed.runners.len(), 2);

        let first = &parsed.runners[0];
        assert_eq!(first.number, Some(1));
        assert_eq!(first.name, "Diamond Flash");
        assert_eq!(first.back, Some(3.9));
        assert_eq!(first.lay, Some(4.0));
        assert_eq!(first.lay_size, Some(250.0));
        assert!(!first.scratched);

        assert!(parsed.runners[1].scratched);
        assert_eq!(parsed.runners[1].lay, None);
    }

    #[test]
    fn test_merge_markets_joins_place_by_number() {
        let win = parse_market(sample_bymarket("OPEN"));
        let place: ByMarketResponse = serde_json::from_value(json!({
            "eventTypes": [{
                "eventNodes": [{
                    "marketNodes": [{
                        "state": { "status": "OPEN" },
                        "runners": [{
                            "description": { "runnerName": "1. Diamond Flash" },
                            "state": { "status": "ACTIVE" },
                            "exchange": {
                                "availableToBack": [{ "price": 1.75, "size": 80.0 }],
                                "availableToLay": [{ "price": 1.8, "size": 150.0 }]
                            }
                        }]
                    }]
                }]
            }]
        }))
        .unwrap();

        let quotes = merge_markets(win, Some(parse_market(place)));
        assert_eq!(quotes.len(), 2);

        let Some(Quote::Exchange(ex)) = &quotes[0].price else {
            panic!("expected exchange quote");
        };
        assert_eq!(ex.lay_win, Some(4.0));
        assert_eq!(ex.lay_place, Some(1.8));
        assert_eq!(ex.back_place, Some(1.75));

        // Scratched runner keeps its row but carries no prices.
        assert!(quotes[1].scratched);
        assert!(quotes[1].price.is_none());
    }

    #[test]
    fn test_merge_markets_without_place_market() {
        let win = parse_market(sample_bymarket("OPEN"));
        let quotes = merge_markets(win, None);
        let Some(Quote::Exchange(ex)) = &quotes[0].price else {
            panic!("expected exchange quote");
        };
        assert_eq!(ex.lay_win, Some(4.0));
        assert_eq!(ex.lay_place, None);
    }
}
