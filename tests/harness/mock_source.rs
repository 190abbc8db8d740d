//! Deterministic in-memory odds source for end-to-end tests.
//!
//! Returns a canned runner list (or a canned error) for any race, so
//! full pipeline behavior can be asserted without network access.

use async_trait::async_trait;

use trackmon::sources::OddsSource;
use trackmon::types::{
    ExchangePrices, Quote, RaceIdentity, RunnerQuote, Snapshot, SourceError,
};

pub struct MockSource {
    name: &'static str,
    result: Result<Vec<RunnerQuote>, SourceError>,
}

impl MockSource {
    pub fn ok(name: &'static str, runners: Vec<RunnerQuote>) -> Self {
        Self {
            name,
            result: Ok(runners),
        }
    }

    pub fn failing(name: &'static str, error: SourceError) -> Self {
        Self {
            name,
            result: Err(error),
        }
    }
}

#[async_trait]
impl OddsSource for MockSource {
    async fn fetch(&self, race: &RaceIdentity) -> Result<Snapshot, SourceError> {
        match &self.result {
            Ok(runners) => Ok(Snapshot::new(self.name, race.clone(), runners.clone())),
            Err(e) => Err(e.clone()),
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

// -- Quote builders ----------------------------------------------------------

pub fn exchange_runner(name: &str, number: u32, lay_win: f64, lay_place: f64) -> RunnerQuote {
    RunnerQuote {
        name: name.to_string(),
        number: Some(number),
        scratched: false,
        price: Some(Quote::Exchange(ExchangePrices {
            back_win: Some(lay_win - 0.2),
            lay_win: Some(lay_win),
            lay_win_size: Some(500.0),
            back_place: Some(lay_place - 0.1),
            lay_place: Some(lay_place),
        })),
    }
}

pub fn fixed_runner(name: &str, number: Option<u32>, odds: f64) -> RunnerQuote {
    RunnerQuote {
        name: name.to_string(),
        number,
        scratched: false,
        price: Some(Quote::FixedWin(odds)),
    }
}

pub fn scratched_runner(name: &str, number: u32) -> RunnerQuote {
    RunnerQuote {
        name: name.to_string(),
        number: Some(number),
        scratched: true,
        price: None,
    }
}
