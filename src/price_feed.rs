//! Market price source used for natural (non-forced) settlement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PriceFeedError {
    #[error("No price available for {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Price of `symbol` at `at`. `reference` is the trade's entry price,
    /// which feeds without history may use as an anchor.
    async fn price_at(
        &self,
        symbol: &str,
        reference: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Decimal, PriceFeedError>;
}

/// Random walk around the entry price. Placeholder until a real market
/// data source is wired in.
pub struct SimulatedPriceFeed {
    max_move: f64,
}

impl SimulatedPriceFeed {
    pub fn new(max_move: f64) -> Self {
        Self { max_move: max_move.abs() }
    }
}

impl Default for SimulatedPriceFeed {
    fn default() -> Self {
        Self::new(0.005)
    }
}

#[async_trait]
impl PriceFeed for SimulatedPriceFeed {
    async fn price_at(
        &self,
        symbol: &str,
        reference: Decimal,
        _at: DateTime<Utc>,
    ) -> Result<Decimal, PriceFeedError> {
        let change = if self.max_move > 0.0 {
            rand::thread_rng().gen_range(-self.max_move..=self.max_move)
        } else {
            0.0
        };
        let factor = Decimal::from_f64(1.0 + change)
            .ok_or_else(|| PriceFeedError::Unavailable(symbol.to_string()))?;
        Ok((reference * factor).round_dp(8))
    }
}
