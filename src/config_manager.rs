//! Config manager - runtime-adjustable settlement parameters
//!
//! Holds the fallback payout rate (used when no trading setting matches a
//! trade's duration) and the exit-price nudge applied when a trade settles
//! without a market price.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettlementConfigError {
    #[error("default_payout_rate must be greater than 0 and at most 10, got {0}")]
    PayoutRate(Decimal),
    #[error("exit_price_nudge must be in [0, 0.5), got {0}")]
    Nudge(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub default_payout_rate: Decimal,
    pub exit_price_nudge: Decimal,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            default_payout_rate: Decimal::new(8, 1),
            exit_price_nudge: Decimal::new(1, 2),
        }
    }
}

impl SettlementConfig {
    fn validate(&self) -> Result<(), SettlementConfigError> {
        if self.default_payout_rate <= Decimal::ZERO || self.default_payout_rate > Decimal::TEN {
            return Err(SettlementConfigError::PayoutRate(self.default_payout_rate));
        }
        if self.exit_price_nudge < Decimal::ZERO || self.exit_price_nudge >= Decimal::new(5, 1) {
            return Err(SettlementConfigError::Nudge(self.exit_price_nudge));
        }
        Ok(())
    }
}

/// Manages settlement configuration
pub struct ConfigManager {
    config: RwLock<SettlementConfig>,
}

impl ConfigManager {
    pub fn new(config: SettlementConfig) -> Result<Self, SettlementConfigError> {
        config.validate()?;
        info!(
            "ConfigManager initialized: default_payout_rate={}, exit_price_nudge={}",
            config.default_payout_rate, config.exit_price_nudge
        );

        Ok(Self {
            config: RwLock::new(config),
        })
    }

    /// Update settlement parameters; nothing changes if any value is invalid
    pub fn update_config(
        &self,
        default_payout_rate: Option<Decimal>,
        exit_price_nudge: Option<Decimal>,
    ) -> Result<SettlementConfig, SettlementConfigError> {
        let mut config = self.config.write();

        let mut next = config.clone();
        if let Some(rate) = default_payout_rate {
            next.default_payout_rate = rate;
        }
        if let Some(nudge) = exit_price_nudge {
            next.exit_price_nudge = nudge;
        }
        next.validate()?;

        if next.default_payout_rate != config.default_payout_rate {
            info!("Updated default payout rate to {}", next.default_payout_rate);
        }
        if next.exit_price_nudge != config.exit_price_nudge {
            info!("Updated exit price nudge to {}", next.exit_price_nudge);
        }
        *config = next.clone();
        Ok(next)
    }

    /// Get current configuration
    pub fn get_config(&self) -> SettlementConfig {
        self.config.read().clone()
    }
}
