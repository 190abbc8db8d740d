//! Concurrent multi-source fetch orchestration.
//!
//! Fans one race out to every configured source at once, waits up to a
//! bounded deadline for the slowest, and returns whatever succeeded.
//! A failing or slow source becomes a per-source failure entry; it can
//! never abort the evaluation or smuggle a late result in afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::sources::OddsSource;
use crate::types::{RaceIdentity, Snapshot, SourceError};

/// Result of fanning a race out to all sources.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Successful snapshots, sorted by source id so arrival order
    /// never leaks into downstream output.
    pub snapshots: Vec<Snapshot>,
    /// Sources that produced nothing, and why.
    pub failures: BTreeMap<String, SourceError>,
}

/// Fetch one race from every source concurrently, bounded by `timeout`
/// per source.
///
/// Each fetch runs on its own task; a task that outlives the deadline
/// is cancelled and recorded as `SourceError::Timeout` — its eventual
/// result, if any, is discarded. Zero successes is a valid degenerate
/// outcome, not an error.
pub async fn fetch_all(
    race: &RaceIdentity,
    sources: &[Arc<dyn OddsSource>],
    timeout: Duration,
) -> FetchOutcome {
    debug!(race = %race, sources = sources.len(), "Fanning out fetches");

    let mut handles = Vec::with_capacity(sources.len());
    for source in sources {
        let source = Arc::clone(source);
        let race = race.clone();
        let name = source.name().to_string();
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, source.fetch(&race)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout),
            }
        });
        handles.push((name, handle));
    }

    let mut outcome = FetchOutcome::default();
    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(snapshot)) => {
                info!(
                    source = %name,
                    runners = snapshot.runners.len(),
                    caveat = ?snapshot.caveat,
                    "Snapshot received"
                );
                outcome.snapshots.push(snapshot);
            }
            Ok(Err(e)) => {
                warn!(source = %name, error = %e, "Source fetch failed, continuing without");
                outcome.failures.insert(name, e);
            }
            Err(e) => {
                warn!(source = %name, error = %e, "Fetch task aborted");
                outcome
                    .failures
                    .insert(name, SourceError::Network(format!("fetch task aborted: {e}")));
            }
        }
    }

    outcome.snapshots.sort_by(|a, b| a.source.cmp(&b.source));

    info!(
        race = %race,
        ok = outcome.snapshots.len(),
        failed = outcome.failures.len(),
        "Fan-out complete"
    );

    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
