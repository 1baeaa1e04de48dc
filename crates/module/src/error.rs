//! Auction module error types.
//!
//! These are hard rejections: the call aborts and no state changes. Soft
//! failures never surface here; they go to the encrypted error log.

use thiserror::Error;

use auction_fenwick::TreeError;
use auction_fhe::FheError;
use auction_token::TokenError;
use auction_types::AuctionState;
use decryption_gateway::GatewayError;

use crate::locks::LockTag;
use crate::pricing::PricingError;

/// Errors that can occur in the auction module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuctionError {
    #[error("Auction not found: {0}")]
    AuctionNotFound(u64),

    #[error("Invalid state. Expected: {expected:?}, Got: {got:?}")]
    InvalidState {
        expected: AuctionState,
        got: AuctionState,
    },

    #[error("Invalid auction configuration: {0}")]
    InvalidConfig(String),

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Bidding period ended")]
    BiddingEnded,

    #[error("Bidding period not ended")]
    BiddingNotEnded,

    #[error("Operation locked by {tag:?} until {until}")]
    Locked { tag: LockTag, until: u64 },

    #[error("Quantity must be a {expected}-bit ciphertext")]
    QuantityWidthMismatch { expected: u32 },

    #[error("Bid index {index} out of range ({count} bids)")]
    BidIndexOutOfRange { index: u64, count: u64 },

    #[error("Already settled")]
    AlreadySettled,

    #[error("Already claimed")]
    AlreadyClaimed,

    #[error("No deposit recorded for this bidder")]
    NoDeposit,

    #[error("Settlement search has not started")]
    SearchNotStarted,

    #[error("Stale or unexpected decryption {0}")]
    StaleDecryption(String),

    #[error("Malformed decryption result")]
    MalformedDecryption,

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Fhe(#[from] FheError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
