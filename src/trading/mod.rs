//! Trading module - trade placement and settlement
//!
//! The engine owns every balance-affecting trade operation; the API layer
//! only authorizes and translates.

mod engine;

pub use engine::{
    nudged_exit_price, parse_outcome, plan_settlement, PlaceTradeRequest, SweepFailure,
    SweepReport, TradingEngine, TradingError,
};
