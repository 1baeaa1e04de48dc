//! State structures for the auction module.

use std::collections::BTreeMap;

use auction_fenwick::{EncryptedFenwick, SearchIterator};
use auction_fhe::{Ebool, Euint};
use auction_types::{Address, AuctionEvent, AuctionState, RequestId, TokenId};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::AuctionError;
use crate::error_log::ErrorLog;
use crate::genesis::{AuctionGenesisConfig, SettlementParams};
use crate::locks::TimeLocks;
use crate::pricing::LinearDiscretization;

/// Immutable parameters fixed at deployment.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct AuctionConfig {
    pub auction_id: u64,
    pub auctioneer: Address,
    /// Address the auction escrows both tokens under
    pub escrow: Address,
    pub auction_token: TokenId,
    pub supply: u64,
    pub base_token: TokenId,
    pub end_time: u64,
    pub pricing: LinearDiscretization,
    pub settlement: SettlementParams,
}

/// One bid attempt; zero-quantity when soft validation failed.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Bid {
    pub tick: u32,
    pub quantity: Euint,
    pub deposit: Euint,
    /// Tombstone, set before any payout
    pub settled: bool,
}

/// Full state of one auction.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct Auction {
    pub config: AuctionConfig,
    pub state: AuctionState,
    /// Written once by the final decryption callback
    pub clearing_tick: Option<u32>,
    pub has_bids: bool,
    pub bids: BTreeMap<Address, Vec<Bid>>,
    /// Base-token deposit per bidder, used for cancellation refunds
    pub deposits: BTreeMap<Address, Euint>,
    /// Quantity per tick, drained by claims at the clearing tick
    pub tick_aggregates: BTreeMap<u32, Euint>,
    pub tree: EncryptedFenwick,
    pub search: Option<SearchIterator>,
    pub locks: TimeLocks,
    /// The only decryption request whose callback is accepted
    pub pending_decryption: Option<RequestId>,
    /// Success bit of a supply pull whose confirmation has not landed
    pub pending_deposit: Option<Ebool>,
    pub errors: ErrorLog,
    pub events: Vec<AuctionEvent>,
}

impl Auction {
    pub fn new(config: AuctionConfig, tree: EncryptedFenwick) -> Self {
        Self {
            config,
            state: AuctionState::WaitDeposit,
            clearing_tick: None,
            has_bids: false,
            bids: BTreeMap::new(),
            deposits: BTreeMap::new(),
            tick_aggregates: BTreeMap::new(),
            tree,
            search: None,
            locks: TimeLocks::new(),
            pending_decryption: None,
            pending_deposit: None,
            errors: ErrorLog::new(),
            events: Vec::new(),
        }
    }

    pub fn expect_state(&self, expected: AuctionState) -> Result<(), AuctionError> {
        if self.state != expected {
            return Err(AuctionError::InvalidState {
                expected,
                got: self.state,
            });
        }
        Ok(())
    }

    pub fn bid_count(&self, bidder: &Address) -> u64 {
        self.bids.get(bidder).map(|b| b.len() as u64).unwrap_or(0)
    }

    pub fn get_bid(&self, bidder: &Address, index: u64) -> Option<&Bid> {
        self.bids.get(bidder)?.get(index as usize)
    }

    pub fn emit(&mut self, event: AuctionEvent) {
        self.events.push(event);
    }
}

/// Auction module state.
///
/// A simplified in-memory representation; a chain would keep each auction
/// under its own storage key.
#[derive(Debug)]
pub struct ModuleState {
    /// Next auction ID to assign
    pub next_auction_id: u64,

    /// All auctions by ID
    pub auctions: BTreeMap<u64, Auction>,

    pub config: AuctionGenesisConfig,
}

impl Default for ModuleState {
    fn default() -> Self {
        Self::new(AuctionGenesisConfig::default())
    }
}

impl ModuleState {
    /// Create a new module state.
    pub fn new(config: AuctionGenesisConfig) -> Self {
        Self {
            next_auction_id: 1,
            auctions: BTreeMap::new(),
            config,
        }
    }

    /// Get the next auction ID and increment.
    pub fn allocate_auction_id(&mut self) -> u64 {
        let id = self.next_auction_id;
        self.next_auction_id += 1;
        id
    }

    /// Get auction by ID.
    pub fn get_auction(&self, auction_id: u64) -> Option<&Auction> {
        self.auctions.get(&auction_id)
    }

    /// Get mutable auction by ID.
    pub fn get_auction_mut(&mut self, auction_id: u64) -> Option<&mut Auction> {
        self.auctions.get_mut(&auction_id)
    }

    pub fn auction(&self, auction_id: u64) -> Result<&Auction, AuctionError> {
        self.get_auction(auction_id)
            .ok_or(AuctionError::AuctionNotFound(auction_id))
    }

    pub fn auction_mut(&mut self, auction_id: u64) -> Result<&mut Auction, AuctionError> {
        self.get_auction_mut(auction_id)
            .ok_or(AuctionError::AuctionNotFound(auction_id))
    }

    pub fn insert_auction(&mut self, auction: Auction) {
        self.auctions.insert(auction.config.auction_id, auction);
    }

    /// Take the events emitted by an auction since the last drain.
    pub fn drain_events(&mut self, auction_id: u64) -> Vec<AuctionEvent> {
        self.get_auction_mut(auction_id)
            .map(|a| std::mem::take(&mut a.events))
            .unwrap_or_default()
    }
}
