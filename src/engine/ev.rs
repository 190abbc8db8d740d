//! Expected-value computation for promotional bets.
//!
//! All probabilities come from exchange lay prices (implied
//! probability = 1 / lay price). EV is expressed as a percentage of
//! stake, so +46.4 means a 46.4c expected profit per dollar staked.
//! Pairs where the math is undefined get an explicit
//! `Ev::Insufficient` marker rather than a misleading zero.

use std::collections::BTreeMap;
use tracing::trace;

use crate::types::{Ev, Promo, Quote, RunnerRecord};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Lay prices at or below the minimum tradeable tick imply a
/// probability of ~1 — stale or in-play junk, not usable for EV.
pub const MIN_LAY_PRICE: f64 = 1.01;

/// Default fraction of a bonus bet converted back to cash.
pub const DEFAULT_RETENTION_FACTOR: f64 = 0.70;

// ---------------------------------------------------------------------------
// Pure EV formulas
// ---------------------------------------------------------------------------

/// EV% of a "money back as bonus if 2nd or 3rd" promo bet.
///
/// The promo pays the fixed WIN bet as normal, and additionally
/// refunds the stake as a bonus bet when the runner runs 2nd or 3rd.
/// P(2nd or 3rd) = P(place) − P(win), clamped at zero when the place
/// market is inverted relative to the win market.
pub fn second_or_third_ev(fixed_win: f64, lay_win: f64, lay_place: f64, retention: f64) -> Ev {
    if let Some(reason) = invalid_inputs(fixed_win, &[lay_win, lay_place]) {
        return Ev::Insufficient(reason);
    }

    let p_win = 1.0 / lay_win;
    let p_place = 1.0 / lay_place;
    let p_2nd_or_3rd = (p_place - p_win).max(0.0);

    Ev::Percent((p_win * fixed_win + p_2nd_or_3rd * retention - 1.0) * 100.0)
}

/// EV% of a "money back as bonus if the bet loses" promo bet.
pub fn free_hit_ev(fixed_win: f64, lay_win: f64, retention: f64) -> Ev {
    if let Some(reason) = invalid_inputs(fixed_win, &[lay_win]) {
        return Ev::Insufficient(reason);
    }

    let p_win = 1.0 / lay_win;
    Ev::Percent((p_win * fixed_win + (1.0 - p_win) * retention - 1.0) * 100.0)
}

/// Retention% of a stake-not-returned bonus bet laid off at the
/// exchange: winnings are (B − 1), hedged at the lay WIN price.
pub fn bonus_retention(fixed_win: f64, lay_win: f64) -> Ev {
    if let Some(reason) = invalid_inputs(fixed_win, &[lay_win]) {
        return Ev::Insufficient(reason);
    }

    Ev::Percent((fixed_win - 1.0) / lay_win * 100.0)
}

fn invalid_inputs(fixed_win: f64, lays: &[f64]) -> Option<String> {
    if !fixed_win.is_finite() || fixed_win <= 1.0 {
        return Some(format!("fixed price {fixed_win} not above 1.0"));
    }
    for &lay in lays {
        if !lay.is_finite() || lay <= MIN_LAY_PRICE {
            return Some(format!("lay price {lay} at or below minimum {MIN_LAY_PRICE}"));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Per-runner assessment
// ---------------------------------------------------------------------------

/// Compute the promo EV of one runner against every fixed-odds
/// bookmaker that quotes it.
///
/// The exchange source itself never appears in the output — it is the
/// probability reference, not a promo venue. Bookmakers carrying no
/// price at all are omitted; bookmakers whose quote is unusable
/// (scratched, wrong market, no exchange reference) get an explicit
/// `Insufficient` entry so the caller can tell "no quote" from
/// "quote we could not price".
pub fn compute_evs(
    record: &RunnerRecord,
    exchange_source: &str,
    promo: Promo,
    retention: f64,
) -> BTreeMap<String, Ev> {
    let exchange = record.exchange_prices(exchange_source);
    let mut evs = BTreeMap::new();

    for (source, quote) in &record.quotes {
        if source == exchange_source {
            continue;
        }
        if quote.scratched {
            evs.insert(source.clone(), Ev::Insufficient("scratched".to_string()));
            continue;
        }
        let fixed_win = match &quote.price {
            Some(Quote::FixedWin(b)) => *b,
            // PLACE-only quotes can't price a WIN promo.
            Some(Quote::FixedPlace(_)) => {
                evs.insert(source.clone(), Ev::Insufficient("no fixed win price".to_string()));
                continue;
            }
            Some(Quote::Exchange(_)) | None => continue,
        };

        let Some(ex) = exchange else {
            evs.insert(source.clone(), Ev::Insufficient("no exchange quote".to_string()));
            continue;
        };
        let Some(lay_win) = ex.lay_win else {
            evs.insert(source.clone(), Ev::Insufficient("no lay win price".to_string()));
            continue;
        };

        let ev = match promo {
            Promo::SecondOrThird => match ex.lay_place {
                Some(lay_place) => second_or_third_ev(fixed_win, lay_win, lay_place, retention),
                None => Ev::Insufficient("no lay place price".to_string()),
            },
            Promo::FreeHit => free_hit_ev(fixed_win, lay_win, retention),
            Promo::Bonus => bonus_retention(fixed_win, lay_win),
        };

        trace!(runner = %record.name, source = %source, %ev, "EV computed");
        evs.insert(source.clone(), ev);
    }

    evs
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExchangePrices, RunnerQuote};

    const EPS: f64 = 1e-6;

    fn assert_percent(ev: &Ev, expected: f64) {
        match ev {
            Ev::Percent(p) => assert!(
                (p - expected).abs() < 1e-2,
                "expected {expected}, got {p}"
            ),
            Ev::Insufficient(reason) => panic!("expected percent, got n/a ({reason})"),
        }
    }

    // -- Formula vectors -----------------------------------------------------

    #[test]
    fn test_second_or_third_reference_vector() {
        // lay WIN 4.0, lay PLACE 1.8, retention 0.70, fixed 5.0:
        // 0.25*5 + (1/1.8 - 0.25)*0.7 - 1 = 0.463889
        assert_percent(&second_or_third_ev(5.0, 4.0, 1.8, 0.70), 46.39);
    }

    #[test]
    fn test_second_or_third_inverted_place_clamps() {
        // lay PLACE above lay WIN implies negative P(2nd or 3rd);
        // clamped to zero, EV degrades to the plain win bet.
        assert_percent(&second_or_third_ev(5.0, 4.0, 6.0, 0.70), 25.0);
    }

    #[test]
    fn test_second_or_third_linear_in_fixed_price() {
        let low = second_or_third_ev(4.0, 4.0, 1.8, 0.70).percent().unwrap();
        let high = second_or_third_ev(6.0, 4.0, 1.8, 0.70).percent().unwrap();
        // dEV/dB = p_win * 100 per unit of fixed price.
        assert!((high - low - 2.0 * 0.25 * 100.0).abs() < EPS);
    }

    #[test]
    fn test_free_hit_reference_vector() {
        // 0.25*5 + 0.75*0.7 - 1 = 0.775
        assert_percent(&free_hit_ev(5.0, 4.0, 0.70), 77.5);
    }

    #[test]
    fn test_bonus_retention_reference_vector() {
        // (5 - 1) / 4 = 100%
        assert_percent(&bonus_retention(5.0, 4.0), 100.0);
    }

    #[test]
    fn test_rejects_degenerate_lay_price() {
        assert!(matches!(
            second_or_third_ev(5.0, 1.0, 1.8, 0.70),
            Ev::Insufficient(_)
        ));
        // The minimum tradeable tick itself is still degenerate.
        assert!(matches!(
            second_or_third_ev(5.0, 4.0, 1.01, 0.70),
            Ev::Insufficient(_)
        ));
        assert!(matches!(free_hit_ev(5.0, 1.005, 0.70), Ev::Insufficient(_)));
        assert!(matches!(bonus_retention(5.0, f64::NAN), Ev::Insufficient(_)));
    }

    #[test]
    fn test_rejects_fixed_price_at_or_below_evens_floor() {
        assert!(matches!(
            second_or_third_ev(1.0, 4.0, 1.8, 0.70),
            Ev::Insufficient(_)
        ));
        assert!(matches!(
            second_or_third_ev(0.0, 4.0, 1.8, 0.70),
            Ev::Insufficient(_)
        ));
    }

    // -- Per-runner assessment ------------------------------------------------

    fn exchange_quote(lay_win: Option<f64>, lay_place: Option<f64>) -> RunnerQuote {
        RunnerQuote {
            name: "1. Diamond Flash".to_string(),
            number: Some(1),
            scratched: false,
            price: Some(Quote::Exchange(ExchangePrices {
                lay_win,
                lay_place,
                ..Default::default()
            })),
        }
    }

    fn fixed_quote(odds: f64) -> RunnerQuote {
        RunnerQuote {
            name: "Diamond Flash".to_string(),
            number: Some(1),
            scratched: false,
            price: Some(Quote::FixedWin(odds)),
        }
    }

    fn record(quotes: Vec<(&str, RunnerQuote)>) -> RunnerRecord {
        RunnerRecord {
            name: "Diamond Flash".to_string(),
            number: Some(1),
            quotes: quotes
                .into_iter()
                .map(|(s, q)| (s.to_string(), q))
                .collect(),
            unresolved: Vec::new(),
        }
    }

    #[test]
    fn test_compute_evs_per_bookmaker() {
        let rec = record(vec![
            ("betfair", exchange_quote(Some(4.0), Some(1.8))),
            ("sportsbet", fixed_quote(5.0)),
            ("pointsbet", fixed_quote(4.0)),
        ]);
        let evs = compute_evs(&rec, "betfair", Promo::SecondOrThird, 0.70);

        assert_eq!(evs.len(), 2);
        assert!(!evs.contains_key("betfair"));
        assert_percent(&evs["sportsbet"], 46.39);
        assert_percent(&evs["pointsbet"], 21.39);
    }

    #[test]
    fn test_compute_evs_scratched_marker() {
        let mut scratched = fixed_quote(5.0);
        scratched.scratched = true;
        scratched.price = None;
        let rec = record(vec![
            ("betfair", exchange_quote(Some(4.0), Some(1.8))),
            ("sportsbet", scratched),
        ]);
        let evs = compute_evs(&rec, "betfair", Promo::SecondOrThird, 0.70);

        assert_eq!(evs["sportsbet"], Ev::Insufficient("scratched".to_string()));
    }

    #[test]
    fn test_compute_evs_without_exchange_reference() {
        let rec = record(vec![("sportsbet", fixed_quote(5.0))]);
        let evs = compute_evs(&rec, "betfair", Promo::SecondOrThird, 0.70);

        assert_eq!(
            evs["sportsbet"],
            Ev::Insufficient("no exchange quote".to_string())
        );
    }

    #[test]
    fn test_compute_evs_missing_place_market() {
        let rec = record(vec![
            ("betfair", exchange_quote(Some(4.0), None)),
            ("sportsbet", fixed_quote(5.0)),
        ]);

        let evs = compute_evs(&rec, "betfair", Promo::SecondOrThird, 0.70);
        assert_eq!(
            evs["sportsbet"],
            Ev::Insufficient("no lay place price".to_string())
        );

        // A win-only promo is unaffected by the missing place market.
        let evs = compute_evs(&rec, "betfair", Promo::Bonus, 0.70);
        assert_percent(&evs["sportsbet"], 100.0);
    }

    #[test]
    fn test_compute_evs_unquoted_bookmaker_omitted() {
        let unquoted = RunnerQuote {
            name: "Diamond Flash".to_string(),
            number: Some(1),
            scratched: false,
            price: None,
        };
        let rec = record(vec![
            ("betfair", exchange_quote(Some(4.0), Some(1.8))),
            ("amused", unquoted),
        ]);
        let evs = compute_evs(&rec, "betfair", Promo::SecondOrThird, 0.70);
        assert!(evs.is_empty());
    }
}
