//! End-to-end integration tests for confidential uniform-price auctions.
//!
//! These tests exercise the full auction lifecycle through `handle_call`:
//! 1. Token setup and auction deployment
//! 2. Supply deposit confirmed by a decryption callback
//! 3. Encrypted bid submission
//! 4. Clearing tick search stepped through the decryption gateway
//! 5. Payouts, refunds and recovery

use auction_fhe::{Decryptor, Fhe, MockFhe};
use auction_module::{
    handle_call, relay_pending_decryptions, AuctionCall, CallContext, CallOutcome, DeployParams,
    HandlerResult, Host, ModuleState, RelayOutcome, SettlementParams,
};
use auction_token::{ConfidentialLedger, ConfidentialToken};
use auction_types::{compute_token_id, Address, AuctionState, TokenId, Width};

/// Upper bound on search rounds for any supported tick domain.
const MAX_ROUNDS: usize = 40;

/// A single-auction world driven through the module's call interface.
pub struct AuctionHarness {
    pub state: ModuleState,
    pub host: Host<MockFhe>,
    pub now: u64,
    pub auction_token: TokenId,
    pub base_token: TokenId,
    pub auctioneer: Address,
    pub auction_id: u64,
}

impl AuctionHarness {
    /// Register both tokens and mint `supply` auction tokens to the auctioneer.
    pub fn new(supply: u64) -> Self {
        let mut host = Host::new(MockFhe::new());
        let auctioneer = [0xA0; 32];
        let auction_token = compute_token_id("AUC");
        let base_token = compute_token_id("USD");

        let mut auc = ConfidentialLedger::new("AUC", Width::U64);
        auc.mint(&mut host.fhe, &auctioneer, supply as u128)
            .expect("mint auction token");
        host.tokens
            .register(auction_token, Box::new(auc))
            .expect("register auction token");
        host.tokens
            .register(base_token, Box::new(ConfidentialLedger::new("USD", Width::U64)))
            .expect("register base token");

        Self {
            state: ModuleState::default(),
            host,
            now: 1_000_000,
            auction_token,
            base_token,
            auctioneer,
            auction_id: 0,
        }
    }

    pub fn ctx(&self, sender: Address) -> CallContext {
        CallContext {
            sender,
            block_height: self.now / 12,
            timestamp: self.now,
        }
    }

    pub fn call(&mut self, sender: Address, call: AuctionCall) -> HandlerResult<CallOutcome> {
        let ctx = self.ctx(sender);
        handle_call(&mut self.state, &mut self.host, &ctx, call)
    }

    pub fn advance(&mut self, seconds: u64) {
        self.now += seconds;
    }

    /// Deploy over `(0, 10_000_000]` with bidding open for 1000 seconds.
    pub fn deploy(&mut self, supply: u64, settlement: Option<SettlementParams>) -> u64 {
        let params = DeployParams {
            auction_token: self.auction_token,
            supply,
            base_token: self.base_token,
            end_time: self.now + 1_000,
            min_price: 0,
            max_price: 10_000_000,
            settlement,
        };
        match self.call(self.auctioneer, AuctionCall::Deploy(params)) {
            Ok(CallOutcome::Deployed(id)) => {
                self.auction_id = id;
                id
            }
            other => panic!("deploy failed: {other:?}"),
        }
    }

    pub fn escrow(&self) -> Address {
        self.auction().config.escrow
    }

    pub fn auction(&self) -> &auction_module::Auction {
        self.state.auction(self.auction_id).expect("auction exists")
    }

    fn approve(&mut self, token: TokenId, owner: Address, amount: u128) {
        let escrow = self.escrow();
        let allowance = self.host.fhe.trivial(amount, Width::U64);
        let ledger = self.host.tokens.get_mut(&token).expect("token");
        ledger
            .approve(&mut self.host.fhe, &owner, &escrow, allowance)
            .expect("approve");
    }

    /// Approve the supply, deposit it and deliver the confirmation.
    pub fn activate(&mut self) {
        let supply = self.auction().config.supply as u128;
        self.approve(self.auction_token, self.auctioneer, supply);
        let outcome = self.call(
            self.auctioneer,
            AuctionCall::DepositAuction {
                auction_id: self.auction_id,
            },
        );
        assert!(matches!(outcome, Ok(CallOutcome::DecryptionRequested(_))));
        self.relay_all();
        assert_eq!(self.auction().state, AuctionState::Active);
    }

    /// Mint `amount` base tokens to `bidder` and approve the escrow for all of it.
    pub fn fund(&mut self, bidder: Address, amount: u128) {
        let ledger = self.host.tokens.get_mut(&self.base_token).expect("token");
        ledger
            .mint(&mut self.host.fhe, &bidder, amount)
            .expect("mint base token");
        self.approve(self.base_token, bidder, amount);
    }

    pub fn bid(&mut self, bidder: Address, price: u64, quantity: u128) -> u64 {
        let input = self.host.fhe.encrypt_input(quantity, Width::U64, &bidder);
        match self.call(
            bidder,
            AuctionCall::Bid {
                auction_id: self.auction_id,
                price,
                quantity: input,
            },
        ) {
            Ok(CallOutcome::BidPlaced(index)) => index,
            other => panic!("bid failed: {other:?}"),
        }
    }

    /// Deliver every pending decryption and require all to be accepted.
    pub fn relay_all(&mut self) -> Vec<RelayOutcome> {
        let ctx = self.ctx([0u8; 32]);
        let outcomes = relay_pending_decryptions(&mut self.state, &mut self.host, &ctx, 0);
        for outcome in &outcomes {
            assert!(outcome.result.is_ok(), "relay rejected: {outcome:?}");
        }
        outcomes
    }

    pub fn start_settlement(&mut self, caller: Address) -> HandlerResult<CallOutcome> {
        self.call(
            caller,
            AuctionCall::StartWithdrawalDecryption {
                auction_id: self.auction_id,
            },
        )
    }

    pub fn step(&mut self, caller: Address) -> HandlerResult<CallOutcome> {
        self.call(
            caller,
            AuctionCall::StepWithdrawalDecryption {
                auction_id: self.auction_id,
            },
        )
    }

    /// Step and relay until the search is over.
    pub fn finish_search(&mut self, caller: Address) -> AuctionState {
        for _ in 0..MAX_ROUNDS {
            if self.auction().state != AuctionState::WithdrawalPending {
                break;
            }
            self.step(caller).expect("step");
            self.relay_all();
        }
        self.auction().state
    }

    /// Close bidding and run the whole clearing search.
    pub fn settle(&mut self) -> AuctionState {
        let keeper = [0xEE; 32];
        self.now = self.now.max(self.auction().config.end_time);
        match self.start_settlement(keeper).expect("start settlement") {
            CallOutcome::State(AuctionState::WithdrawalPending) => self.finish_search(keeper),
            CallOutcome::State(state) => state,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    pub fn pull_bid(&mut self, bidder: Address, index: u64) -> HandlerResult<CallOutcome> {
        self.call(
            [0xEE; 32],
            AuctionCall::PullBid {
                auction_id: self.auction_id,
                bidder,
                index,
            },
        )
    }

    pub fn pull_auctioneer(&mut self) -> HandlerResult<CallOutcome> {
        self.call(
            [0xEE; 32],
            AuctionCall::PullAuctioneer {
                auction_id: self.auction_id,
            },
        )
    }

    /// Plaintext balance, read through the coprocessor.
    pub fn balance(&self, token: TokenId, account: &Address) -> u128 {
        let ledger = self.host.tokens.get(&token).expect("token");
        ledger
            .balance_of(account)
            .map(|b| self.host.fhe.decrypt(&b.handle).expect("decrypt balance"))
            .unwrap_or(0)
    }

    pub fn clearing_tick(&self) -> Option<u32> {
        self.auction().clearing_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_fenwick::SearchFallback;
    use auction_module::{handle_query, AuctionError, AuctionQuery, AuctionQueryResponse, LockTag};
    use auction_types::{AuctionEvent, BidErrorCode};

    const ALICE: Address = [1u8; 32];
    const BOB: Address = [2u8; 32];
    const CAROL: Address = [3u8; 32];
    const FUNDS: u128 = 100_000_000;

    fn funded(supply: u64, settlement: Option<SettlementParams>) -> AuctionHarness {
        let mut h = AuctionHarness::new(supply);
        h.deploy(supply, settlement);
        h.activate();
        for bidder in [ALICE, BOB, CAROL] {
            h.fund(bidder, FUNDS);
        }
        h
    }

    fn claim_all(h: &mut AuctionHarness, bids: &[(Address, u64)]) {
        for (bidder, index) in bids {
            assert_eq!(h.pull_bid(*bidder, *index), Ok(CallOutcome::Done));
        }
        assert_eq!(h.pull_auctioneer(), Ok(CallOutcome::Done));
    }

    #[test]
    fn test_uniform_price_settlement() {
        let mut h = funded(1_000_000, None);

        // ========================================
        // Phase 1: Bidding
        // ========================================
        let a = h.bid(ALICE, 2_000_000, 500_000);
        let b = h.bid(BOB, 8_000_000, 600_000);
        let c = h.bid(CAROL, 10, 1_000_000);

        // Deposits are escrowed at each bid's own tick price.
        assert_eq!(h.balance(h.base_token, &ALICE), FUNDS - 1_000_000);
        assert_eq!(h.balance(h.base_token, &BOB), FUNDS - 4_800_000);

        // ========================================
        // Phase 2: Clearing search
        // ========================================
        assert_eq!(h.settle(), AuctionState::WithdrawalReady);
        assert_eq!(h.clearing_tick(), Some(205));
        let events = h.state.drain_events(h.auction_id);
        assert!(events.contains(&AuctionEvent::SettlementReady { clearing_tick: 205 }));
        assert!(events
            .iter()
            .any(|e| matches!(e, AuctionEvent::StepReady { steps: 8 })));

        match handle_query(
            &h.state,
            AuctionQuery::GetClearing {
                auction_id: h.auction_id,
            },
        ) {
            Ok(AuctionQueryResponse::Clearing(Some(view))) => {
                assert_eq!(view.price, Some(2_000_000))
            }
            other => panic!("unexpected response {other:?}"),
        }

        // ========================================
        // Phase 3: Payouts
        // ========================================
        claim_all(&mut h, &[(ALICE, a), (BOB, b), (CAROL, c)]);

        assert_eq!(h.balance(h.auction_token, &BOB), 600_000);
        assert_eq!(h.balance(h.auction_token, &ALICE), 400_000);
        assert_eq!(h.balance(h.auction_token, &CAROL), 0);

        // Winners pay the clearing price, not their own.
        assert_eq!(h.balance(h.base_token, &BOB), FUNDS - 1_200_000);
        assert_eq!(h.balance(h.base_token, &ALICE), FUNDS - 800_000);
        assert_eq!(h.balance(h.base_token, &CAROL), FUNDS);

        assert_eq!(h.balance(h.auction_token, &h.auctioneer), 0);
        assert_eq!(h.balance(h.base_token, &h.auctioneer), 2_000_000);

        let escrow = h.escrow();
        assert_eq!(h.balance(h.base_token, &escrow), 0);
        assert_eq!(h.balance(h.auction_token, &escrow), 0);
    }

    #[test]
    fn test_tie_at_clearing_tick_is_first_come_first_served() {
        let mut h = funded(1_000_000, None);
        let bid1 = h.bid(ALICE, 8_000_000, 400_000);
        let bid2 = h.bid(BOB, 8_000_000, 500_000);
        let bid3 = h.bid(CAROL, 8_000_000, 800_000);

        assert_eq!(h.settle(), AuctionState::WithdrawalReady);
        assert_eq!(h.clearing_tick(), Some(52));

        claim_all(&mut h, &[(BOB, bid2), (CAROL, bid3), (ALICE, bid1)]);

        assert_eq!(h.balance(h.auction_token, &BOB), 500_000);
        assert_eq!(h.balance(h.auction_token, &CAROL), 500_000);
        assert_eq!(h.balance(h.auction_token, &ALICE), 0);

        assert_eq!(h.balance(h.base_token, &BOB), FUNDS - 4_000_000);
        assert_eq!(h.balance(h.base_token, &CAROL), FUNDS - 4_000_000);
        assert_eq!(h.balance(h.base_token, &ALICE), FUNDS);
        assert_eq!(h.balance(h.base_token, &h.auctioneer), 8_000_000);
    }

    #[test]
    fn test_undersubscribed_auction_returns_unsold_supply() {
        let mut h = funded(1_000_000, None);
        let a = h.bid(ALICE, 8_000_000, 200_000);
        let b = h.bid(BOB, 2_000_000, 100_000);

        // Demand never reaches supply: the lowest inserted tick clears.
        assert_eq!(h.settle(), AuctionState::WithdrawalReady);
        assert_eq!(h.clearing_tick(), Some(205));

        claim_all(&mut h, &[(ALICE, a), (BOB, b)]);
        assert_eq!(h.balance(h.auction_token, &ALICE), 200_000);
        assert_eq!(h.balance(h.auction_token, &BOB), 100_000);
        assert_eq!(h.balance(h.auction_token, &h.auctioneer), 700_000);
        assert_eq!(h.balance(h.base_token, &h.auctioneer), 600_000);
    }

    #[test]
    fn test_not_found_fallback_cancels_and_refunds() {
        let settlement = SettlementParams {
            search_fallback: SearchFallback::NotFound,
            ..SettlementParams::default()
        };
        let mut h = funded(1_000_000, Some(settlement));
        h.bid(ALICE, 8_000_000, 200_000);

        assert_eq!(h.settle(), AuctionState::Cancelled);
        assert_eq!(h.clearing_tick(), Some(0));

        let id = h.auction_id;
        assert_eq!(
            h.call(ALICE, AuctionCall::RecoverBidder { auction_id: id, bidder: ALICE }),
            Ok(CallOutcome::Done)
        );
        assert_eq!(
            h.call(BOB, AuctionCall::RecoverAuctioneer { auction_id: id }),
            Ok(CallOutcome::Done)
        );
        assert_eq!(h.balance(h.base_token, &ALICE), FUNDS);
        assert_eq!(h.balance(h.auction_token, &h.auctioneer), 1_000_000);
    }

    #[test]
    fn test_no_bids_cancels_and_recovers_supply() {
        let mut h = funded(1_000_000, None);
        assert_eq!(h.balance(h.auction_token, &h.auctioneer), 0);

        assert_eq!(h.settle(), AuctionState::Cancelled);
        let id = h.auction_id;
        assert_eq!(
            h.call(CAROL, AuctionCall::RecoverAuctioneer { auction_id: id }),
            Ok(CallOutcome::Done)
        );
        assert_eq!(h.balance(h.auction_token, &h.auctioneer), 1_000_000);

        assert_eq!(
            h.call(CAROL, AuctionCall::RecoverAuctioneer { auction_id: id }),
            Err(AuctionError::AlreadyClaimed)
        );
        assert_eq!(
            h.call(CAROL, AuctionCall::RecoverBidder { auction_id: id, bidder: CAROL }),
            Err(AuctionError::NoDeposit)
        );
    }

    #[test]
    fn test_stale_callback_rejected_after_lock_expiry_retry() {
        let mut h = funded(1_000_000, None);
        h.bid(ALICE, 2_000_000, 500_000);
        h.bid(BOB, 8_000_000, 600_000);
        h.now = h.auction().config.end_time;
        h.start_settlement(CAROL).unwrap();

        let first = match h.step(CAROL) {
            Ok(CallOutcome::DecryptionRequested(id)) => id,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert!(matches!(
            h.step(BOB),
            Err(AuctionError::Locked {
                tag: LockTag::Step,
                ..
            })
        ));

        // The callback never arrives; once the step lock lapses anyone retries.
        let step_timeout = h.auction().config.settlement.step_timeout;
        h.advance(step_timeout);
        let second = match h.step(BOB) {
            Ok(CallOutcome::DecryptionRequested(id)) => id,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_ne!(first, second);

        // The superseded response shows up late and is refused.
        let ctx = h.ctx([0u8; 32]);
        let late = auction_module::deliver_decryption(&mut h.state, &mut h.host, &ctx, first);
        assert!(matches!(late, Err(AuctionError::StaleDecryption(_))));

        h.relay_all();
        assert_eq!(h.finish_search(BOB), AuctionState::WithdrawalReady);
        assert_eq!(h.clearing_tick(), Some(205));
    }

    #[test]
    fn test_stalled_search_can_be_restarted() {
        let mut h = funded(1_000_000, None);
        h.bid(ALICE, 2_000_000, 500_000);
        h.bid(BOB, 8_000_000, 600_000);
        h.now = h.auction().config.end_time;
        h.start_settlement(CAROL).unwrap();

        let stalled = match h.step(CAROL) {
            Ok(CallOutcome::DecryptionRequested(id)) => id,
            other => panic!("unexpected outcome {other:?}"),
        };

        let id = h.auction_id;
        let running = |h: &AuctionHarness| {
            auction_module::handlers::is_running_withdrawal_decryption(&h.state, id, h.now)
                .unwrap()
        };
        assert!(running(&h));
        assert!(matches!(
            h.start_settlement(CAROL),
            Err(AuctionError::Locked {
                tag: LockTag::ComputeSettlement,
                ..
            })
        ));

        h.advance(h.auction().config.settlement.settlement_timeout());
        assert!(!running(&h));
        assert_eq!(
            h.start_settlement(CAROL),
            Ok(CallOutcome::State(AuctionState::WithdrawalPending))
        );
        assert!(h
            .state
            .drain_events(id)
            .contains(&AuctionEvent::SettlementStarted { restart: true }));
        assert!(h.host.gateway.get_state(&stalled).is_none());

        assert_eq!(h.finish_search(CAROL), AuctionState::WithdrawalReady);
        assert_eq!(h.clearing_tick(), Some(205));
        assert_eq!(
            h.start_settlement(CAROL),
            Err(AuctionError::InvalidState {
                expected: AuctionState::Active,
                got: AuctionState::WithdrawalReady,
            })
        );
    }

    #[test]
    fn test_soft_failures_are_indistinguishable() {
        let mut h = funded(1_000_000, None);
        let broke: Address = [9u8; 32];

        let honest = h.bid(ALICE, 2_000_000, 1_000_000);
        let unfunded = h.bid(broke, 8_000_000, 500_000);
        let oversized = h.bid(BOB, 8_000_000, 2_000_000);

        // Every attempt leaves a record and one error log entry.
        assert_eq!((honest, unfunded, oversized), (0, 0, 0));
        assert_eq!(h.auction().errors.len(), 4); // deposit + three bids
        assert!(h.auction().has_bids);

        let code_of = |h: &AuctionHarness, account: &Address| {
            let (_, code) = h.auction().errors.last_error(account).unwrap();
            (
                h.host.fhe.user_decrypt(&code.handle, account),
                h.host.fhe.user_decrypt(&code.handle, &CAROL),
            )
        };
        let (code, foreign) = code_of(&h, &broke);
        assert_eq!(code, Ok(BidErrorCode::DepositTransferFailed.code() as u128));
        assert!(foreign.is_err());
        let (code, _) = code_of(&h, &BOB);
        assert_eq!(code, Ok(BidErrorCode::QuantityExceedsSupply.code() as u128));
        let (code, _) = code_of(&h, &ALICE);
        assert_eq!(code, Ok(BidErrorCode::NoError.code() as u128));

        // Zeroed bids at the better tick do not move the clearing price.
        assert_eq!(h.settle(), AuctionState::WithdrawalReady);
        assert_eq!(h.clearing_tick(), Some(205));

        claim_all(&mut h, &[(ALICE, honest), (broke, unfunded), (BOB, oversized)]);
        assert_eq!(h.balance(h.auction_token, &ALICE), 1_000_000);
        assert_eq!(h.balance(h.auction_token, &BOB), 0);
        assert_eq!(h.balance(h.auction_token, &broke), 0);
        assert_eq!(h.balance(h.base_token, &BOB), FUNDS);
    }

    #[test]
    fn test_search_resumes_from_persisted_state() {
        let mut h = funded(1_000_000, None);
        h.bid(ALICE, 2_000_000, 500_000);
        h.bid(BOB, 8_000_000, 600_000);
        h.now = h.auction().config.end_time;
        h.start_settlement(CAROL).unwrap();
        for _ in 0..3 {
            h.step(CAROL).unwrap();
            h.relay_all();
        }

        // Round-trip the auction through storage between two steps.
        let id = h.auction_id;
        let bytes = borsh::to_vec(h.auction()).unwrap();
        let restored: auction_module::Auction = borsh::from_slice(&bytes).unwrap();
        h.state.insert_auction(restored);

        assert_eq!(h.finish_search(CAROL), AuctionState::WithdrawalReady);
        assert_eq!(h.clearing_tick(), Some(205));
        assert_eq!(h.state.auction(id).unwrap().search.as_ref().unwrap().steps(), 8);
    }

    #[test]
    fn test_claims_are_one_shot() {
        let mut h = funded(1_000_000, None);
        let a = h.bid(ALICE, 8_000_000, 1_000_000);
        assert_eq!(h.settle(), AuctionState::WithdrawalReady);

        assert_eq!(h.pull_bid(ALICE, a), Ok(CallOutcome::Done));
        assert_eq!(h.pull_bid(ALICE, a), Err(AuctionError::AlreadySettled));
        assert_eq!(
            h.pull_bid(ALICE, 5),
            Err(AuctionError::BidIndexOutOfRange { index: 5, count: 1 })
        );
        assert_eq!(h.pull_auctioneer(), Ok(CallOutcome::Done));
        assert_eq!(h.pull_auctioneer(), Err(AuctionError::AlreadyClaimed));
        assert_eq!(h.balance(h.auction_token, &ALICE), 1_000_000);
        assert_eq!(h.balance(h.base_token, &h.auctioneer), 8_000_000);
    }

    #[test]
    fn test_bidding_closes_at_end_time() {
        let mut h = funded(1_000_000, None);
        h.now = h.auction().config.end_time;
        let input = h.host.fhe.encrypt_input(10, Width::U64, &ALICE);
        let id = h.auction_id;
        assert_eq!(
            h.call(
                ALICE,
                AuctionCall::Bid {
                    auction_id: id,
                    price: 2_000_000,
                    quantity: input,
                }
            ),
            Err(AuctionError::BiddingEnded)
        );
        assert_eq!(
            h.call(h.auctioneer, AuctionCall::Cancel { auction_id: id }),
            Err(AuctionError::BiddingEnded)
        );
    }
}
