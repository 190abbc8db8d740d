//! Amused data source — fixed WIN odds.
//!
//! The schedule feed resolves venue/start time to meet and race ids;
//! the racecard feed lists runners with a price history, of which the
//! last entry is the current fixed WIN price.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{start_time_diff, venue_matches, OddsSource, DEFAULT_TIME_TOLERANCE_SECS};
use crate::types::{Quote, RaceIdentity, RunnerQuote, Snapshot, SourceError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api.blackstream.com.au/api/racing/v1";
const SOURCE_NAME: &str = "amused";

// ---------------------------------------------------------------------------
// Amused API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleResponse {
    #[serde(default)]
    data: Option<ScheduleData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleData {
    #[serde(default)]
    thoroughbred: Vec<AmMeeting>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmMeeting {
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    meet_id: Option<u64>,
    #[serde(default)]
    races: Vec<AmRace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmRace {
    #[serde(default)]
    event_id: Option<u64>,
    #[serde(default)]
    race_number: Option<u32>,
    #[serde(default)]
    advertised_start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RacecardResponse {
    #[serde(default)]
    data: Option<RacecardData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RacecardData {
    #[serde(default)]
    race: Option<AmRaceDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmRaceDetail {
    #[serde(default)]
    runners: Vec<AmRunner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmRunner {
    /// Saddlecloth number (named outcomeId in this feed).
    #[serde(default)]
    outcome_id: Option<u32>,
    #[serde(default)]
    runner_name: Option<String>,
    #[serde(default)]
    is_scratched: bool,
    /// Price history; the last entry is the current price.
    #[serde(default)]
    win_prices: Vec<f64>,
}

fn parse_racecard(resp: RacecardResponse) -> Vec<RunnerQuote> {
    let runners = resp
        .data
        .and_then(|d| d.race)
        .map(|r| r.runners)
        .unwrap_or_default();

    runners
        .into_iter()
        .map(|r| {
            let odds = r.win_prices.last().copied();
            RunnerQuote {
                name: r.runner_name.unwrap_or_else(|| "Unknown".to_string()),
                number: r.outcome_id,
                scratched: r.is_scratched,
                price: if r.is_scratched {
                    None
                } else {
                    odds.map(Quote::FixedWin)
                },
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Amused bookmaker data source.
pub struct AmusedSource {
    http: Client,
    time_tolerance_secs: i64,
}

impl AmusedSource {
    pub fn new() -> Result<Self> {
        Self::with_tolerance(DEFAULT_TIME_TOLERANCE_SECS)
    }

    pub fn with_tolerance(time_tolerance_secs: i64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36")
            .build()
            .context("Failed to build HTTP client for Amused")?;
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
                "Amused returned HTTP {}",
                resp.status()
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    async fn find_race_ids(&self, race: &RaceIdentity) -> Result<(u64, u64), SourceError> {
        let start = (race.start_time - Duration::hours(12)).format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let end = (race.start_time + Duration::hours(12)).format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let url = format!(
            "{BASE_URL}/schedule?startDateTime={}&endDateTime={}&topfouroutcomes=true",
            urlencoding::encode(&start.to_string()),
            urlencoding::encode(&end.to_string()),
        );
        let schedule: ScheduleResponse = self.get_json(&url).await?;
        let meetings = schedule.data.map(|d| d.thoroughbred).unwrap_or_default();

        let mut best: Option<(i64, (u64, u64))> = None;
        for meeting in &meetings {
            let venue = meeting.venue.as_deref().unwrap_or("");
            if !venue_matches(venue, &race.venue) {
                continue;
            }
            let Some(meet_id) = meeting.meet_id else {
                continue;
            };
            for entry in &meeting.races {
                let (Some(event_id), Some(start)) = (entry.event_id, entry.advertised_start_time)
                else {
                    continue;
                };
                let diff = start_time_diff(start, race.start_time);
                if diff > self.time_tolerance_secs {
                    continue;
                }
                if entry.race_number == Some(race.race_number) {
                    return Ok((meet_id, event_id));
                }
                if best.as_ref().map(|(d, _)| diff < *d).unwrap_or(true) {
                    best = Some((diff, (meet_id, event_id)));
                }
            }
        }

        best.map(|(_, ids)| ids).ok_or(SourceError::NotFound)
    }
}

#[async_trait]
impl OddsSource for AmusedSource {
    async fn fetch(&self, race: &RaceIdentity) -> Result<Snapshot, SourceError> {
        let (meet_id, race_id) = self.find_race_ids(race).await?;
        debug!(meet_id, race_id, race = %race, "Amused race located");

        let url = format!("{BASE_URL}/meetings/{meet_id}/races/{race_id}/racecard");
        let racecard: RacecardResponse = self.get_json(&url).await?;
        let runners = parse_racecard(racecard);
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
