//! Top-level race aggregator.
//!
//! Wires the fan-out orchestrator, the runner matcher, and the EV
//! calculator into a single `evaluate` call. Evaluation never fails:
//! source trouble degrades to per-source failure entries and a
//! possibly-empty runner list.

use anyhow::{bail, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::ev::{compute_evs, DEFAULT_RETENTION_FACTOR};
use super::matcher::{match_snapshots, NormalizationRules};
use super::orchestrator::fetch_all;
use crate::sources::OddsSource;
use crate::types::{Promo, RaceIdentity, RaceResult, RunnerAssessment};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for one aggregator instance.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Fraction of a bonus bet converted back to cash, in (0, 1].
    pub retention_factor: f64,
    /// Per-source fetch deadline.
    pub fetch_timeout: Duration,
    /// Source id whose lay prices anchor the probability model.
    pub exchange_source: String,
    pub promo: Promo,
    pub rules: NormalizationRules,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            retention_factor: DEFAULT_RETENTION_FACTOR,
            fetch_timeout: Duration::from_secs(5),
            exchange_source: "betfair".to_string(),
            promo: Promo::SecondOrThird,
            rules: NormalizationRules::default(),
        }
    }
}

impl AggregatorConfig {
    fn validate(&self) -> Result<()> {
        if !(self.retention_factor > 0.0 && self.retention_factor <= 1.0) {
            bail!(
                "retention_factor must be in (0, 1], got {}",
                self.retention_factor
            );
        }
        if self.fetch_timeout.is_zero() {
            bail!("fetch_timeout must be non-zero");
        }
        if self.exchange_source.is_empty() {
            bail!("exchange_source must be set");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Aggregates one race across all configured sources and prices the
/// configured promo against every fixed-odds bookmaker.
pub struct RaceAggregator {
    sources: Vec<Arc<dyn OddsSource>>,
    config: AggregatorConfig,
}

impl RaceAggregator {
    pub fn new(sources: Vec<Arc<dyn OddsSource>>, config: AggregatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { sources, config })
    }

    /// Evaluate one race end to end: fetch, match, price.
    ///
    /// Infallible by design of the pipeline — an all-sources-down race
    /// comes back with zero runners and a failure entry per source,
    /// and the caller decides what that means.
    #[instrument(skip(self), fields(race = %race))]
    pub async fn evaluate(&self, race: &RaceIdentity) -> RaceResult {
        let outcome = fetch_all(race, &self.sources, self.config.fetch_timeout).await;

        if outcome.snapshots.is_empty() {
            warn!(failed = outcome.failures.len(), "No source produced a snapshot");
        } else if !outcome
            .snapshots
            .iter()
            .any(|s| s.source == self.config.exchange_source)
        {
            warn!(
                exchange = %self.config.exchange_source,
                "Exchange source missing, EVs will be insufficient"
            );
        }

        let records = match_snapshots(&outcome.snapshots, &self.config.rules);

        let runners: Vec<RunnerAssessment> = records
            .into_iter()
            .map(|record| {
                let evs = compute_evs(
                    &record,
                    &self.config.exchange_source,
                    self.config.promo,
                    self.config.retention_factor,
                );
                RunnerAssessment { record, evs }
            })
            .collect();

        let result = RaceResult {
            race: race.clone(),
            runners,
            failures: outcome.failures,
            evaluated_at: Utc::now(),
        };

        match result.best_opportunity() {
            Some((runner, source, ev)) => info!(
                runners = result.runners.len(),
                best_runner = %runner.record.name,
                best_source = %source,
                best_ev = format!("{ev:+.1}%"),
                "Race evaluated"
            ),
            None => info!(
                runners = result.runners.len(),
                "Race evaluated, no priceable opportunity"
            ),
        }

        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
