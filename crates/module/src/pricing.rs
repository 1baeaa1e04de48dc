//! Price discretization.
//!
//! Prices are wide cleartext integers; the cumulative structure is indexed by
//! narrow ticks. Ticks run in the opposite direction to prices: tick 1 is the
//! best (highest) price, so a prefix sum over ticks accumulates demand from
//! the most generous bidders downwards.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when converting between prices and ticks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("Price {price} outside ({min}, {max}]")]
    PriceOutOfRange { price: u64, min: u64, max: u64 },

    #[error("Tick {tick} outside [1, {max_tick}]")]
    TickOutOfRange { tick: u32, max_tick: u32 },

    #[error("Invalid price range: min {min}, max {max}, {max_tick} ticks")]
    InvalidRange { min: u64, max: u64, max_tick: u32 },
}

/// Mapping between cleartext prices and ticks.
pub trait PriceDiscretization {
    fn max_tick(&self) -> u32;

    fn price_to_tick(&self, price: u64) -> Result<u32, PricingError>;

    fn tick_to_price(&self, tick: u32) -> Result<u64, PricingError>;
}

/// Evenly spaced ticks over `(min_price, max_price]`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct LinearDiscretization {
    min_price: u64,
    max_price: u64,
    max_tick: u32,
}

impl LinearDiscretization {
    /// Requires at least one price unit per tick, otherwise distinct ticks
    /// would share a price and the inverse mapping would not exist.
    pub fn new(min_price: u64, max_price: u64, max_tick: u32) -> Result<Self, PricingError> {
        let invalid = PricingError::InvalidRange {
            min: min_price,
            max: max_price,
            max_tick,
        };
        if min_price >= max_price || max_tick == 0 {
            return Err(invalid);
        }
        if max_price - min_price < max_tick as u64 {
            return Err(invalid);
        }
        Ok(Self {
            min_price,
            max_price,
            max_tick,
        })
    }

    pub fn min_price(&self) -> u64 {
        self.min_price
    }

    pub fn max_price(&self) -> u64 {
        self.max_price
    }

    fn span(&self) -> u128 {
        (self.max_price - self.min_price) as u128
    }
}

impl PriceDiscretization for LinearDiscretization {
    fn max_tick(&self) -> u32 {
        self.max_tick
    }

    fn price_to_tick(&self, price: u64) -> Result<u32, PricingError> {
        if price <= self.min_price || price > self.max_price {
            return Err(PricingError::PriceOutOfRange {
                price,
                min: self.min_price,
                max: self.max_price,
            });
        }
        let offset = (self.max_price - price) as u128 * self.max_tick as u128 / self.span();
        // price > min keeps offset below max_tick.
        Ok(offset as u32 + 1)
    }

    fn tick_to_price(&self, tick: u32) -> Result<u64, PricingError> {
        if tick == 0 || tick > self.max_tick {
            return Err(PricingError::TickOutOfRange {
                tick,
                max_tick: self.max_tick,
            });
        }
        let scaled = (tick - 1) as u128 * self.span();
        let drop = scaled.div_ceil(self.max_tick as u128);
        Ok(self.max_price - drop as u64)
    }
}
