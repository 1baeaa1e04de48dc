//! Genesis configuration for the auction module.
//!
//! This module defines the settlement parameters every new auction starts
//! from and the limits enforced when auctions are deployed.

use auction_fenwick::{SearchFallback, TickDomain};
use auction_types::Width;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Genesis configuration for the auction module.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionGenesisConfig {
    /// Settlement parameters for auctions that do not override them
    pub default_settlement: SettlementParams,

    /// Bounds checked at deployment
    pub limits: AuctionLimits,
}

/// Per-auction settlement parameters.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct SettlementParams {
    /// Tick domain is `1..2^tick_bits`
    pub tick_bits: u8,
    /// Width of encrypted bid quantities; cumulative sums use the next wider width
    pub quantity_width: Width,
    /// Prices are fixed point with this many decimals
    pub price_precision: u8,
    /// Seconds a decryption callback may take before the step can be retried
    pub step_timeout: u64,
    /// Slack added per step when sizing the whole-search lock
    pub step_grace: u64,
    /// Answer when demand never reaches supply
    pub search_fallback: SearchFallback,
}

/// Deployment limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionLimits {
    /// Minimum time between deployment and end of bidding (seconds)
    pub min_duration: u64,
}

impl Default for SettlementParams {
    fn default() -> Self {
        Self {
            tick_bits: 8,
            quantity_width: Width::U64,
            price_precision: 6,
            step_timeout: 300,
            step_grace: 60,
            search_fallback: SearchFallback::LargestInserted,
        }
    }
}

impl Default for AuctionLimits {
    fn default() -> Self {
        Self {
            min_duration: 60, // 1 minute
        }
    }
}

/// Largest supported fixed-point precision.
///
/// Costs are computed as `quantity * price` in 128 bits and rounded up by
/// adding `10^precision - 1`, which must not wrap for 64-bit operands.
pub const MAX_PRICE_PRECISION: u8 = 18;

impl SettlementParams {
    pub fn domain(&self) -> Result<TickDomain, GenesisValidationError> {
        TickDomain::new(self.tick_bits)
            .map_err(|_| GenesisValidationError::InvalidTickBits(self.tick_bits))
    }

    /// Width of the cumulative slots and per-tick aggregates.
    pub fn cumulative_width(&self) -> Result<Width, GenesisValidationError> {
        match self.quantity_width {
            Width::U16 | Width::U32 | Width::U64 => self
                .quantity_width
                .wider()
                .ok_or(GenesisValidationError::InvalidQuantityWidth(self.quantity_width)),
            other => Err(GenesisValidationError::InvalidQuantityWidth(other)),
        }
    }

    /// Divisor turning `quantity * price` into base-token units.
    pub fn price_scale(&self) -> u128 {
        10u128.pow(self.price_precision as u32)
    }

    /// Duration of the whole-search lock: every round may time out once.
    pub fn settlement_timeout(&self) -> u64 {
        let rounds = self.tick_bits as u64 + 1;
        rounds.saturating_mul(self.step_timeout.saturating_add(self.step_grace))
    }

    /// Lifetime of a step's decryption request at the gateway.
    pub fn request_timeout(&self) -> u64 {
        self.step_timeout.saturating_add(self.step_grace)
    }

    pub fn validate(&self) -> Result<(), GenesisValidationError> {
        self.domain()?;
        self.cumulative_width()?;
        if self.price_precision > MAX_PRICE_PRECISION {
            return Err(GenesisValidationError::InvalidPricePrecision(
                self.price_precision,
            ));
        }
        if self.step_timeout == 0 {
            return Err(GenesisValidationError::InvalidTimeout(
                "Step timeout cannot be zero".into(),
            ));
        }
        Ok(())
    }
}

impl AuctionGenesisConfig {
    /// Validate the genesis configuration.
    pub fn validate(&self) -> Result<(), GenesisValidationError> {
        self.default_settlement.validate()?;
        if self.limits.min_duration == 0 {
            return Err(GenesisValidationError::InvalidLimits(
                "Minimum duration cannot be zero".into(),
            ));
        }
        Ok(())
    }
}

/// Errors that can occur during genesis validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenesisValidationError {
    #[error("Tick domain must be 1 to 16 bits, got {0}")]
    InvalidTickBits(u8),

    #[error("Quantity width must be U16, U32 or U64, got {0:?}")]
    InvalidQuantityWidth(Width),

    #[error("Price precision {0} too large")]
    InvalidPricePrecision(u8),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid limits: {0}")]
    InvalidLimits(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuctionGenesisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.default_settlement.cumulative_width().unwrap(),
            Width::U128
        );
        assert_eq!(config.default_settlement.price_scale(), 1_000_000);
    }

    #[test]
    fn test_settlement_timeout_covers_every_round() {
        let params = SettlementParams {
            tick_bits: 8,
            step_timeout: 100,
            step_grace: 20,
            ..Default::default()
        };
        assert_eq!(params.settlement_timeout(), 9 * 120);
        assert_eq!(params.request_timeout(), 120);
    }

    #[test]
    fn test_invalid_tick_bits() {
        let mut config = AuctionGenesisConfig::default();
        config.default_settlement.tick_bits = 17;
        assert!(matches!(
            config.validate(),
            Err(GenesisValidationError::InvalidTickBits(17))
        ));
    }

    #[test]
    fn test_invalid_quantity_width() {
        let mut config = AuctionGenesisConfig::default();
        config.default_settlement.quantity_width = Width::U128;
        assert!(matches!(
            config.validate(),
            Err(GenesisValidationError::InvalidQuantityWidth(Width::U128))
        ));
        config.default_settlement.quantity_width = Width::U8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = AuctionGenesisConfig::default();
        config.default_settlement.step_timeout = 0;
        assert!(matches!(
            config.validate(),
            Err(GenesisValidationError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "default_settlement": {
                "tick_bits": 16,
                "quantity_width": "U32",
                "price_precision": 12,
                "step_timeout": 30,
                "step_grace": 5,
                "search_fallback": "NotFound"
            },
            "limits": { "min_duration": 10 }
        }"#;
        let config: AuctionGenesisConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_settlement.cumulative_width().unwrap(), Width::U64);
        assert_eq!(
            config.default_settlement.search_fallback,
            SearchFallback::NotFound
        );
    }
}
