//! Call message types for the auction module.

use auction_fhe::{EncryptedInput, Fhe};
use auction_types::{Address, AuctionState, RequestId};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::handlers::{self, CallContext, DeployParams, HandlerResult, Host};
use crate::state::ModuleState;

/// Call messages for the auction module.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum AuctionCall {
    // === Auction Lifecycle ===
    /// Deploy a new auction; the sender becomes the auctioneer.
    Deploy(DeployParams),

    /// Escrow the supply (auctioneer only).
    DepositAuction { auction_id: u64 },

    /// Submit an encrypted quantity at a cleartext price.
    Bid {
        auction_id: u64,
        price: u64,
        quantity: EncryptedInput,
    },

    /// Cancel before bidding ends (auctioneer only).
    Cancel { auction_id: u64 },

    // === Settlement ===
    /// Start, or restart, the clearing search (anyone).
    StartWithdrawalDecryption { auction_id: u64 },

    /// Request decryption for the next search step (anyone).
    StepWithdrawalDecryption { auction_id: u64 },

    /// Deliver a fulfilled gateway response (relayer).
    DecryptionCallback { request_id: RequestId },

    // === Payouts ===
    /// Pay the auctioneer (anyone).
    PullAuctioneer { auction_id: u64 },

    /// Settle one bid (anyone).
    PullBid {
        auction_id: u64,
        bidder: Address,
        index: u64,
    },

    /// Return the supply of a cancelled auction (anyone).
    RecoverAuctioneer { auction_id: u64 },

    /// Return a bidder's deposit of a cancelled auction (anyone).
    RecoverBidder { auction_id: u64, bidder: Address },
}

/// What a successful call produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    Deployed(u64),
    DecryptionRequested(RequestId),
    BidPlaced(u64),
    State(AuctionState),
    Done,
}

/// Dispatch a call to its handler.
pub fn handle_call<F: Fhe>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    ctx: &CallContext,
    call: AuctionCall,
) -> HandlerResult<CallOutcome> {
    match call {
        AuctionCall::Deploy(params) => {
            handlers::handle_deploy(state, host, ctx, params).map(CallOutcome::Deployed)
        }
        AuctionCall::DepositAuction { auction_id } => {
            handlers::handle_deposit_auction(state, host, ctx, auction_id)
                .map(CallOutcome::DecryptionRequested)
        }
        AuctionCall::Bid {
            auction_id,
            price,
            quantity,
        } => handlers::handle_bid(state, host, ctx, auction_id, price, &quantity)
            .map(CallOutcome::BidPlaced),
        AuctionCall::Cancel { auction_id } => {
            handlers::handle_cancel(state, ctx, auction_id).map(|()| CallOutcome::Done)
        }
        AuctionCall::StartWithdrawalDecryption { auction_id } => {
            handlers::handle_start_withdrawal_decryption(state, host, ctx, auction_id)
                .map(CallOutcome::State)
        }
        AuctionCall::StepWithdrawalDecryption { auction_id } => {
            handlers::handle_step_withdrawal_decryption(state, host, ctx, auction_id)
                .map(CallOutcome::DecryptionRequested)
        }
        AuctionCall::DecryptionCallback { request_id } => {
            handlers::handle_decryption_callback(state, host, ctx, request_id)
                .map(|()| CallOutcome::Done)
        }
        AuctionCall::PullAuctioneer { auction_id } => {
            handlers::handle_pull_auctioneer(state, host, ctx, auction_id)
                .map(|()| CallOutcome::Done)
        }
        AuctionCall::PullBid {
            auction_id,
            bidder,
            index,
        } => handlers::handle_pull_bid(state, host, ctx, auction_id, bidder, index)
            .map(|()| CallOutcome::Done),
        AuctionCall::RecoverAuctioneer { auction_id } => {
            handlers::handle_recover_auctioneer(state, host, ctx, auction_id)
                .map(|()| CallOutcome::Done)
        }
        AuctionCall::RecoverBidder { auction_id, bidder } => {
            handlers::handle_recover_bidder(state, host, ctx, auction_id, bidder)
                .map(|()| CallOutcome::Done)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_fhe::MockFhe;

    #[test]
    fn test_call_borsh_round_trip() {
        let call = AuctionCall::PullBid {
            auction_id: 3,
            bidder: [5u8; 32],
            index: 2,
        };
        let bytes = borsh::to_vec(&call).unwrap();
        let decoded: AuctionCall = borsh::from_slice(&bytes).unwrap();
        assert!(matches!(
            decoded,
            AuctionCall::PullBid {
                auction_id: 3,
                index: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_dispatch_reports_handler_error() {
        let mut state = ModuleState::default();
        let mut host = Host::new(MockFhe::new());
        let ctx = CallContext {
            sender: [1u8; 32],
            block_height: 1,
            timestamp: 10,
        };
        let result = handle_call(
            &mut state,
            &mut host,
            &ctx,
            AuctionCall::Cancel { auction_id: 42 },
        );
        assert_eq!(result, Err(crate::AuctionError::AuctionNotFound(42)));
    }
}
