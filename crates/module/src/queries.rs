//! Query handlers for the auction module.
//!
//! These functions provide read-only access to auction state. Encrypted
//! values are returned as handles; reading them takes a user decryption.

use crate::handlers::{is_running_withdrawal_decryption, HandlerResult};
use crate::locks::LockTag;
use crate::pricing::PriceDiscretization;
use crate::state::{Auction, ModuleState};
use auction_fhe::Euint;
use auction_types::{Address, AuctionState, RequestId, TokenId};
use serde::{Deserialize, Serialize};

/// Query request types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuctionQuery {
    /// Get auction details by ID.
    GetAuction { auction_id: u64 },

    /// Get all auctions (paginated).
    ListAuctions { offset: u64, limit: u64 },

    /// Get the lifecycle state.
    GetState { auction_id: u64 },

    /// Get the clearing tick and price, once known.
    GetClearing { auction_id: u64 },

    /// Convert a price to its tick.
    PriceToTick { auction_id: u64, price: u64 },

    /// Convert a tick to its price.
    TickToPrice { auction_id: u64, tick: u32 },

    /// Number of bids placed by `bidder`.
    GetBidCount { auction_id: u64, bidder: Address },

    /// Get a specific bid.
    GetBid {
        auction_id: u64,
        bidder: Address,
        index: u64,
    },

    /// Latest encrypted error code of `account`.
    GetLastError { auction_id: u64, account: Address },

    /// Size of the error log.
    GetErrorCount { auction_id: u64 },

    /// Whether the clearing search is running and not stalled.
    IsRunningWithdrawalDecryption { auction_id: u64, now: u64 },

    /// Auctions whose search can be stepped or restarted at `now`.
    ListPendingSettlement { now: u64 },
}

/// Query response types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuctionQueryResponse {
    /// Auction details.
    Auction(Option<AuctionSummary>),

    /// List of auctions.
    AuctionList(Vec<AuctionSummary>),

    State(Option<AuctionState>),

    Clearing(Option<ClearingView>),

    Tick(Option<u32>),

    Price(Option<u64>),

    BidCount(u64),

    Bid(Option<BidView>),

    /// `(index, code)` of the latest entry.
    LastError(Option<(u64, Euint)>),

    ErrorCount(u64),

    Running(bool),

    PendingSettlement(Vec<PendingSettlement>),
}

/// Summary of an auction for listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionSummary {
    pub auction_id: u64,
    pub auctioneer: Address,
    pub escrow: Address,
    pub auction_token: TokenId,
    pub base_token: TokenId,
    pub supply: u64,
    pub end_time: u64,
    pub min_price: u64,
    pub max_price: u64,
    pub max_tick: u32,
    pub state: AuctionState,
    pub has_bids: bool,
    pub clearing_tick: Option<u32>,
    pub pending_decryption: Option<RequestId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearingView {
    pub tick: u32,
    /// `None` for the not-found tick `0`
    pub price: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidView {
    pub tick: u32,
    pub price: u64,
    pub quantity: Euint,
    pub deposit: Euint,
    pub settled: bool,
}

/// An auction waiting on someone to drive its search.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSettlement {
    pub auction_id: u64,
    pub state: AuctionState,
    /// A step request may be filed now
    pub can_step: bool,
    /// The search may be (re)started now
    pub can_start: bool,
}

impl AuctionSummary {
    pub fn from_auction(auction: &Auction) -> Self {
        let config = &auction.config;
        Self {
            auction_id: config.auction_id,
            auctioneer: config.auctioneer,
            escrow: config.escrow,
            auction_token: config.auction_token,
            base_token: config.base_token,
            supply: config.supply,
            end_time: config.end_time,
            min_price: config.pricing.min_price(),
            max_price: config.pricing.max_price(),
            max_tick: config.pricing.max_tick(),
            state: auction.state,
            has_bids: auction.has_bids,
            clearing_tick: auction.clearing_tick,
            pending_decryption: auction.pending_decryption,
        }
    }
}

fn pending_settlement(auction: &Auction, now: u64) -> Option<PendingSettlement> {
    let outer_locked = auction.locks.is_locked(&LockTag::ComputeSettlement, now);
    let (can_start, can_step) = match auction.state {
        AuctionState::Active => (now >= auction.config.end_time, false),
        AuctionState::WithdrawalPending => (
            !outer_locked,
            !auction.locks.is_locked(&LockTag::Step, now),
        ),
        _ => (false, false),
    };
    (can_start || can_step).then_some(PendingSettlement {
        auction_id: auction.config.auction_id,
        state: auction.state,
        can_step,
        can_start,
    })
}

/// Handle a query.
pub fn handle_query(state: &ModuleState, query: AuctionQuery) -> HandlerResult<AuctionQueryResponse> {
    let response = match query {
        AuctionQuery::GetAuction { auction_id } => AuctionQueryResponse::Auction(
            state
                .get_auction(auction_id)
                .map(AuctionSummary::from_auction),
        ),

        AuctionQuery::ListAuctions { offset, limit } => {
            let auctions = state
                .auctions
                .values()
                .skip(offset as usize)
                .take(limit as usize)
                .map(AuctionSummary::from_auction)
                .collect();
            AuctionQueryResponse::AuctionList(auctions)
        }

        AuctionQuery::GetState { auction_id } => {
            AuctionQueryResponse::State(state.get_auction(auction_id).map(|a| a.state))
        }

        AuctionQuery::GetClearing { auction_id } => {
            let auction = state.auction(auction_id)?;
            let clearing = auction.clearing_tick.map(|tick| ClearingView {
                tick,
                price: auction.config.pricing.tick_to_price(tick).ok(),
            });
            AuctionQueryResponse::Clearing(clearing)
        }

        AuctionQuery::PriceToTick { auction_id, price } => {
            let auction = state.auction(auction_id)?;
            AuctionQueryResponse::Tick(Some(auction.config.pricing.price_to_tick(price)?))
        }

        AuctionQuery::TickToPrice { auction_id, tick } => {
            let auction = state.auction(auction_id)?;
            AuctionQueryResponse::Price(Some(auction.config.pricing.tick_to_price(tick)?))
        }

        AuctionQuery::GetBidCount { auction_id, bidder } => {
            AuctionQueryResponse::BidCount(state.auction(auction_id)?.bid_count(&bidder))
        }

        AuctionQuery::GetBid {
            auction_id,
            bidder,
            index,
        } => {
            let auction = state.auction(auction_id)?;
            let bid = match auction.get_bid(&bidder, index) {
                Some(bid) => Some(BidView {
                    tick: bid.tick,
                    price: auction.config.pricing.tick_to_price(bid.tick)?,
                    quantity: bid.quantity,
                    deposit: bid.deposit,
                    settled: bid.settled,
                }),
                None => None,
            };
            AuctionQueryResponse::Bid(bid)
        }

        AuctionQuery::GetLastError {
            auction_id,
            account,
        } => AuctionQueryResponse::LastError(state.auction(auction_id)?.errors.last_error(&account)),

        AuctionQuery::GetErrorCount { auction_id } => {
            AuctionQueryResponse::ErrorCount(state.auction(auction_id)?.errors.len())
        }

        AuctionQuery::IsRunningWithdrawalDecryption { auction_id, now } => {
            AuctionQueryResponse::Running(is_running_withdrawal_decryption(state, auction_id, now)?)
        }

        AuctionQuery::ListPendingSettlement { now } => AuctionQueryResponse::PendingSettlement(
            state
                .auctions
                .values()
                .filter_map(|auction| pending_settlement(auction, now))
                .collect(),
        ),
    };
    Ok(response)
}
