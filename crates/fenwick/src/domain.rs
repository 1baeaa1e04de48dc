//! Tick domain arithmetic.

use auction_types::Width;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::TreeError;

/// Widest supported tick domain.
pub const MAX_TICK_BITS: u8 = 16;

/// Least-significant set bit of `i` (`0` for `0`).
pub fn lsb(i: u32) -> u32 {
    i & i.wrapping_neg()
}

/// A `K`-bit tick domain: valid indices are `1..=2^K - 1`.
///
/// Index arithmetic wraps modulo `2^K`, the same way a fixed-width index
/// type would.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TickDomain {
    bits: u8,
}

impl TickDomain {
    pub fn new(bits: u8) -> Result<Self, TreeError> {
        if bits == 0 || bits > MAX_TICK_BITS {
            return Err(TreeError::InvalidDomain(bits));
        }
        Ok(Self { bits })
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Number of slots, including the reserved slot 0.
    pub fn size(&self) -> u32 {
        1 << self.bits
    }

    pub fn max_index(&self) -> u32 {
        self.size() - 1
    }

    /// Root of the implicit search tree, `2^(K-1)`.
    pub fn root(&self) -> u32 {
        1 << (self.bits - 1)
    }

    /// Width of the encrypted integers holding indices.
    pub fn index_width(&self) -> Width {
        if self.bits <= 8 {
            Width::U8
        } else {
            Width::U16
        }
    }

    /// Reduce `index` modulo `2^K`.
    pub fn wrap(&self, index: u32) -> u32 {
        index & self.max_index()
    }

    /// Reject the reserved index and anything past the domain.
    pub fn check(&self, index: u32) -> Result<(), TreeError> {
        if index == 0 {
            return Err(TreeError::ReservedIndex);
        }
        if index > self.max_index() {
            return Err(TreeError::IndexOutOfDomain {
                index,
                max: self.max_index(),
            });
        }
        Ok(())
    }

    /// Worst-case number of decryption round trips for one rank search:
    /// one per tree level plus the decryption of the result.
    pub fn search_rounds(&self) -> u32 {
        self.bits as u32 + 1
    }
}
