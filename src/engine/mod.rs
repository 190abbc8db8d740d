//! The aggregation core: fetch orchestration, runner matching,
//! EV computation, and the top-level race aggregator.

pub mod aggregator;
pub mod ev;
pub mod matcher;
pub mod orchestrator;
