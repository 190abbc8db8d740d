//! TRACKMON binary entry point.
//!
//! Evaluates one race across all enabled sources and prints the
//! per-runner odds and promo EV table.
//!
//! Usage: trackmon <venue> <race_number> <start_rfc3339> [config_path]
//!   e.g. trackmon Flemington 4 2026-01-08T03:30:00Z

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trackmon::config::AppConfig;
use trackmon::engine::aggregator::{AggregatorConfig, RaceAggregator};
use trackmon::engine::matcher::NormalizationRules;
use trackmon::sources::{
    amused::AmusedSource, betfair::BetfairSource, pointsbet::PointsbetSource,
    sportsbet::SportsbetSource, OddsSource,
};
use trackmon::types::{Ev, Quote, RaceIdentity, RaceResult, RunnerQuote};

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trackmon=info"));

    let json = std::env::var("TRACKMON_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

struct CliArgs {
    race: RaceIdentity,
    config_path: String,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs> {
    let usage = "usage: trackmon <venue> <race_number> <start_rfc3339> [config_path]";

    let Some(venue) = args.next() else {
        bail!(usage);
    };
    let Some(number) = args.next() else {
        bail!(usage);
    };
    let Some(start) = args.next() else {
        bail!(usage);
    };

    let race_number: u32 = number
        .parse()
        .with_context(|| format!("Invalid race number: {number}"))?;
    let start_time: DateTime<Utc> = start
        .parse::<DateTime<chrono::FixedOffset>>()
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid RFC3339 start time: {start}"))?;

    Ok(CliArgs {
        race: RaceIdentity {
            venue,
            race_number,
            start_time,
        },
        config_path: args.next().unwrap_or_else(|| "config.toml".to_string()),
    })
}

fn build_sources(config: &AppConfig) -> Result<Vec<Arc<dyn OddsSource>>> {
    let tolerance = config.matching.time_tolerance_secs;
    let mut sources: Vec<Arc<dyn OddsSource>> = Vec::new();

    if config.sources.betfair.enabled {
        let app_key = AppConfig::resolve_env(&config.sources.betfair.app_key_env)?;
        sources.push(Arc::new(BetfairSource::with_tolerance(app_key, tolerance)?));
    }
    if config.sources.sportsbet.enabled {
        sources.push(Arc::new(SportsbetSource::with_tolerance(tolerance)?));
    }
    if config.sources.pointsbet.enabled {
        sources.push(Arc::new(PointsbetSource::with_tolerance(tolerance)?));
    }
    if config.sources.amused.enabled {
        sources.push(Arc::new(AmusedSource::with_tolerance(tolerance)?));
    }

    if sources.is_empty() {
        bail!("No sources enabled in config");
    }
    Ok(sources)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn format_quote(quote: &RunnerQuote) -> String {
    if quote.scratched {
        return "SCR".to_string();
    }
    match &quote.price {
        Some(Quote::FixedWin(b)) => format!("{b:.2}"),
        Some(Quote::FixedPlace(b)) => format!("{b:.2}p"),
        Some(Quote::Exchange(ex)) => {
            let lay_win = ex.lay_win.map_or("-".to_string(), |p| format!("{p:.2}"));
            let lay_place = ex.lay_place.map_or("-".to_string(), |p| format!("{p:.2}"));
            format!("L{lay_win}/{lay_place}")
        }
        None => "-".to_string(),
    }
}

fn print_result(result: &RaceResult) {
    println!("{}", result.race);
    println!();

    for assessment in &result.runners {
        let number = assessment
            .record
            .number
            .map_or("--".to_string(), |n| format!("{n:2}"));
        print!("{number}. {:<24}", assessment.record.name);

        for (source, quote) in &assessment.record.quotes {
            print!("  {source}={}", format_quote(quote));
        }
        for (source, ev) in &assessment.evs {
            if let Ev::Percent(p) = ev {
                print!("  EV[{source}]={p:+.1}%");
            }
        }
        println!();

        for notice in &assessment.record.unresolved {
            println!("      ! {notice}");
        }
    }

    if let Some((runner, source, ev)) = result.best_opportunity() {
        println!();
        println!("best: {} @ {source} {ev:+.1}%", runner.record.name);
    }

    if !result.failures.is_empty() {
        println!();
        for (source, error) in &result.failures {
            println!("warn: {source} unavailable ({error})");
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let args = parse_args(std::env::args().skip(1))?;
    if args.race.seconds_until_start() < 0 {
        warn!(race = %args.race, "Race start time is in the past, odds may be gone");
    }
    let config = AppConfig::load(&args.config_path)?;

    let sources = build_sources(&config)?;
    info!(
        race = %args.race,
        sources = sources.len(),
        promo = %config.core.promo,
        "Starting evaluation"
    );

    let aggregator = RaceAggregator::new(
        sources,
        AggregatorConfig {
            retention_factor: config.core.retention_factor,
            fetch_timeout: std::time::Duration::from_secs(config.core.fetch_timeout_secs),
            exchange_source: config.core.exchange_source.clone(),
            promo: config.core.promo.parse()?,
            rules: NormalizationRules {
                strip_prefixes: config.matching.strip_prefixes.clone(),
                strip_suffixes: config.matching.strip_suffixes.clone(),
            },
        },
    )?;

    let result = aggregator.evaluate(&args.race).await;
    print_result(&result);

    Ok(())
}
