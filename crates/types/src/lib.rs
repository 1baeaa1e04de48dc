//! Core type definitions for confidential uniform-price auctions.
//!
//! This crate provides the shared data structures used across the auction system:
//! account and token identifiers, opaque ciphertext handles, integer widths,
//! the auction lifecycle and the events emitted while it runs.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

// =========================
// IDENTIFIERS
// =========================

/// Generic address type (32 bytes)
pub type Address = [u8; 32];

/// Identifier of a confidential token registered with the host.
pub type TokenId = [u8; 32];

/// Opaque reference to a ciphertext held by the coprocessor.
///
/// Handles carry no information about the value they refer to; only the
/// decryption gateway (or an account granted access) can resolve them.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Handle(pub [u8; 32]);

impl Handle {
    /// Hex encoding, used in logs and RPC payloads.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Identifier of a decryption request.
pub type RequestId = [u8; 32];

// =========================
// ENCRYPTED INTEGER WIDTHS
// =========================

/// Bit width of an encrypted unsigned integer.
///
/// Arithmetic on a value of a given width wraps modulo `2^bits`.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
    U128,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Width::U8 => 8,
            Width::U16 => 16,
            Width::U32 => 32,
            Width::U64 => 64,
            Width::U128 => 128,
        }
    }

    /// Largest value representable at this width.
    pub fn max_value(self) -> u128 {
        match self {
            Width::U128 => u128::MAX,
            other => (1u128 << other.bits()) - 1,
        }
    }

    /// Reduce `value` modulo `2^bits`.
    pub fn truncate(self, value: u128) -> u128 {
        value & self.max_value()
    }

    /// The next wider width, if any.
    pub fn wider(self) -> Option<Width> {
        match self {
            Width::U8 => Some(Width::U16),
            Width::U16 => Some(Width::U32),
            Width::U32 => Some(Width::U64),
            Width::U64 => Some(Width::U128),
            Width::U128 => None,
        }
    }
}

// =========================
// AUCTION TYPES
// =========================

/// Auction lifecycle state
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum AuctionState {
    /// Waiting for the auctioneer to escrow the auctioned supply
    WaitDeposit,
    /// Accepting bids until the end time
    Active,
    /// Auction aborted; escrowed funds can be recovered
    Cancelled,
    /// Clearing tick search in progress
    WithdrawalPending,
    /// Clearing tick fixed; claims open
    WithdrawalReady,
}

impl AuctionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionState::WaitDeposit => "wait_deposit",
            AuctionState::Active => "active",
            AuctionState::Cancelled => "cancelled",
            AuctionState::WithdrawalPending => "withdrawal_pending",
            AuctionState::WithdrawalReady => "withdrawal_ready",
        }
    }
}

/// Soft-failure codes stored encrypted in the error log.
///
/// Only the account that triggered an operation can decrypt its code.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum BidErrorCode {
    NoError = 0,
    /// Requested quantity exceeds the auctioned supply
    QuantityExceedsSupply = 1,
    /// Deposit does not fit the base token's amount width
    DepositOverflow = 2,
    /// Base token pull failed (balance or allowance too low)
    DepositTransferFailed = 3,
    /// Auctioneer's supply deposit was not received in full
    AuctionDepositFailed = 4,
}

impl BidErrorCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(BidErrorCode::NoError),
            1 => Some(BidErrorCode::QuantityExceedsSupply),
            2 => Some(BidErrorCode::DepositOverflow),
            3 => Some(BidErrorCode::DepositTransferFailed),
            4 => Some(BidErrorCode::AuctionDepositFailed),
            _ => None,
        }
    }
}

/// Notifications emitted by an auction, drained by the host after each call.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum AuctionEvent {
    DepositRequested { request_id: RequestId },
    AuctionActivated,
    DepositFailed,
    BidPlaced { bidder: Address, index: u64, tick: u32 },
    ErrorChanged { account: Address, error_index: u64 },
    Cancelled,
    SettlementStarted { restart: bool },
    StepRequested { request_id: RequestId, terminal: bool },
    StepReady { steps: u32 },
    SettlementReady { clearing_tick: u32 },
    AuctioneerPaid,
    BidSettled { bidder: Address, index: u64 },
    Recovered { account: Address },
}

// =========================
// HELPER FUNCTIONS
// =========================

/// Derive the escrow address an auction holds funds under.
pub fn compute_auction_address(auction_id: u64) -> Address {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"AUCTION_ESCROW_V1:");
    hasher.update(auction_id.to_le_bytes());
    hasher.finalize().into()
}

/// Derive a token identifier from its symbol.
pub fn compute_token_id(symbol: &str) -> TokenId {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"CONFIDENTIAL_TOKEN_V1:");
    hasher.update(symbol.as_bytes());
    hasher.finalize().into()
}

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(data).into()
}
