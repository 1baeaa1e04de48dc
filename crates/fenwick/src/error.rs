//! Error types for the cumulative structure.

use auction_fhe::FheError;
use thiserror::Error;

/// Errors that can occur while updating or searching the tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("Index 0 is reserved for the grand total")]
    ReservedIndex,

    #[error("Index {index} outside tick domain (max {max})")]
    IndexOutOfDomain { index: u32, max: u32 },

    #[error("Invalid tick domain width: {0} bits")]
    InvalidDomain(u8),

    #[error("Cumulative width must be wider than the quantity width")]
    ValueWidthTooNarrow,

    #[error("Search hint {hint} outside tick domain")]
    InvalidHint { hint: u32 },

    #[error(transparent)]
    Fhe(#[from] FheError),
}
