//! Pointsbet data source — fixed WIN odds.
//!
//! The meetings feed resolves venue/start time to a race id; the race
//! detail feed carries per-runner price fluctuations, of which only
//! the current value is used.

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

const MEETINGS_URL: &str = "https://api.au.pointsbet.com/api/racing/v4/meetings";
const RACE_URL: &str = "https://api.au.pointsbet.com/api/racing/v3/races";
const SOURCE_NAME: &str = "pointsbet";

/// Thoroughbred racing type in the meetings feed.
const RACING_TYPE_HORSE: u32 = 1;

// ---------------------------------------------------------------------------
// Pointsbet API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeetingGroup {
    #[serde(default)]
    meetings: Vec<PbMeeting>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PbMeeting {
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    racing_type: Option<u32>,
    #[serde(default)]
    races: Vec<PbRace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PbRace {
    #[serde(default)]
    race_id: Option<u64>,
    #[serde(default)]
    race_number: Option<u32>,
    #[serde(default)]
    advertised_start_date_time_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PbRaceDetail {
    #[serde(default)]
    runners: Vec<PbRunner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PbRunner {
    #[serde(default)]
    number: Option<u32>,
    #[serde(default)]
    runner_name: Option<String>,
    #[serde(default)]
    is_scratched: bool,
    #[serde(default)]
    fluctuations: Option<PbFluctuations>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PbFluctuations {
    #[serde(default)]
    current: Option<f64>,
}

fn parse_runners(detail: PbRaceDetail) -> Vec<RunnerQuote> {
    detail
        .runners
        .into_iter()
        .map(|r| {
            let odds = r.fluctuations.and_then(|f| f.current);
            RunnerQuote {
                name: r.runner_name.unwrap_or_else(|| "Unknown".to_string()),
                number: r.number,
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

/// Pointsbet bookmaker data source.
pub struct PointsbetSource {
    http: Client,
    time_tolerance_secs: i64,
}

impl PointsbetSource {
    pub fn new() -> Result<Self> {
        Self::with_tolerance(DEFAULT_TIME_TOLERANCE_SECS)
    }

    pub fn with_tolerance(time_tolerance_secs: i64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36")
            .build()
            .context("Failed to build HTTP client for Pointsbet")?;
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
                "Pointsbet returned HTTP {}",
                resp.status()
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    async fn find_race_id(&self, race: &RaceIdentity) -> Result<u64, SourceError> {
        let start = (race.start_time - Duration::hours(12)).format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let end = (race.start_time + Duration::hours(12)).format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let url = format!("{MEETINGS_URL}?startDate={start}&endDate={end}");
        let groups: Vec<MeetingGroup> = self.get_json(&url).await?;

        let mut best: Option<(i64, u64)> = None;
        for group in &groups {
            for meeting in &group.meetings {
                if meeting.racing_type != Some(RACING_TYPE_HORSE) {
                    continue;
                }
                let venue = meeting.venue.as_deref().unwrap_or("");
                if !venue_matches(venue, &race.venue) {
                    continue;
                }
                for entry in &meeting.races {
                    let (Some(id), Some(start)) = (entry.race_id, entry.advertised_start_date_time_utc)
                    else {
                        continue;
                    };
                    let diff = start_time_diff(start, race.start_time);
                    if diff > self.time_tolerance_secs {
                        continue;
                    }
                    if entry.race_number == Some(race.race_number) {
                        return Ok(id);
                    }
                    if best.as_ref().map(|(d, _)| diff < *d).unwrap_or(true) {
                        best = Some((diff, id));
                    }
                }
            }
        }

        best.map(|(_, id)| id).ok_or(SourceError::NotFound)
    }
}

#[async_trait]
impl OddsSource for PointsbetSource {
    async fn fetch(&self, race: &RaceIdentity) -> Result<Snapshot, SourceError> {
        let race_id = self.find_race_id(race).await?;
        debug!(race_id, race = %race, "Pointsbet race located");

        let url = format!("{RACE_URL}/{race_id}");
        let detail: PbRaceDetail = self.get_json(&url).await?;
        let runners = parse_runners(detail);
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_runners_uses_current_fluctuation() {
        let detail: PbRaceDetail = serde_json::from_value(json!({
            "runners": [
                {
                    "number": 1,
                    "runnerName": "Diamond Flash",
                    "isScratched": false,
                    "fluctuations": { "opening": 6.0, "current": 5.5 }
                },
                {
                    "number": 2,
                    "runnerName": "Midnight Harbour",
                    "isScratched": true,
                    "fluctuations": { "current": 8.0 }
                },
                {
                    "number": 3,
                    "runnerName": "Zou Zou Express",
                    "isScratched": false
                }
            ]
        }))
        .unwrap();

        let runners = parse_runners(detail);
        assert_eq!(runners.len(), 3);
        assert_eq!(runners[0].price, Some(Quote::FixedWin(5.5)));
        // Scratched runners never carry a price, even when quoted.
        assert!(runners[1].scratched);
        assert_eq!(runners[1].price, None);
        // Unquoted but running: listed with no price.
        assert!(!runners[2].scratched);
        assert_eq!(runners[2].price, None);
    }
}
