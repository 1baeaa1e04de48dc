//! Call handlers for the auction module.
//!
//! These functions implement the business logic for each call type. Every
//! handler either fails without touching state (a hard rejection) or runs to
//! completion. Checks on encrypted values never fail a call; they steer
//! oblivious selects and leave an encrypted error code behind instead.

use auction_fenwick::EncryptedFenwick;
use auction_fhe::{Ebool, EncryptedInput, Euint, Fhe};
use auction_token::{ConfidentialToken, TokenRegistry};
use auction_types::{
    compute_auction_address, Address, AuctionEvent, AuctionState, BidErrorCode, RequestId,
    TokenId, Width,
};
use borsh::{BorshDeserialize, BorshSerialize};
use decryption_gateway::DecryptionGateway;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AuctionError;
use crate::error_log::ErrorLog;
use crate::genesis::SettlementParams;
use crate::locks::LockTag;
use crate::pricing::{LinearDiscretization, PriceDiscretization};
use crate::state::{Auction, AuctionConfig, Bid, ModuleState};

/// Context provided by the runtime for each call.
#[derive(Clone, Debug)]
pub struct CallContext {
    /// Sender of the transaction
    pub sender: Address,
    /// Current block height
    pub block_height: u64,
    /// Current timestamp
    pub timestamp: u64,
}

/// Result type for handlers.
pub type HandlerResult<T> = Result<T, AuctionError>;

/// What a decryption callback resumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackKind {
    /// Success bit of the supply deposit
    DepositConfirmation,
    /// Cursor of a non-terminal search step
    SearchStep,
    /// Final answer of the search
    ClearingTick,
}

/// Callback tag stored with every gateway request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuctionCallback {
    pub auction_id: u64,
    pub kind: CallbackKind,
}

/// External collaborators the module calls into.
pub struct Host<F> {
    pub fhe: F,
    pub gateway: DecryptionGateway<AuctionCallback>,
    pub tokens: TokenRegistry,
}

impl<F> Host<F> {
    pub fn new(fhe: F) -> Self {
        Self {
            fhe,
            gateway: DecryptionGateway::new(),
            tokens: TokenRegistry::new(),
        }
    }
}

/// Constructor arguments of an auction; the sender becomes the auctioneer.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct DeployParams {
    pub auction_token: TokenId,
    pub supply: u64,
    pub base_token: TokenId,
    pub end_time: u64,
    pub min_price: u64,
    pub max_price: u64,
    /// Overrides the genesis defaults
    pub settlement: Option<SettlementParams>,
}

fn invalid_config(reason: impl ToString) -> AuctionError {
    AuctionError::InvalidConfig(reason.to_string())
}

/// Bring `value` to `width`, truncating if it is wider.
fn fit(fhe: &mut dyn Fhe, value: Euint, width: Width) -> HandlerResult<Euint> {
    if value.width == width {
        return Ok(value);
    }
    Ok(fhe.cast(value, width)?)
}

fn balance_or_zero(fhe: &mut dyn Fhe, token: &dyn ConfidentialToken, account: &Address) -> Euint {
    match token.balance_of(account) {
        Some(balance) => balance,
        None => fhe.trivial(0, token.amount_width()),
    }
}

/// `ceil(quantity * price / scale)` as a 128-bit ciphertext.
fn cost_rounded_up(
    fhe: &mut dyn Fhe,
    quantity: Euint,
    price: u64,
    scale: u128,
) -> HandlerResult<Euint> {
    let wide = fit(fhe, quantity, Width::U128)?;
    let product = fhe.mul_scalar(wide, price as u128)?;
    let bias = fhe.trivial(scale - 1, Width::U128);
    let biased = fhe.add(product, bias)?;
    Ok(fhe.div_scalar(biased, scale)?)
}

/// `floor(quantity * price / scale)` as a 128-bit ciphertext.
fn cost_rounded_down(
    fhe: &mut dyn Fhe,
    quantity: Euint,
    price: u64,
    scale: u128,
) -> HandlerResult<Euint> {
    let wide = fit(fhe, quantity, Width::U128)?;
    let product = fhe.mul_scalar(wide, price as u128)?;
    Ok(fhe.div_scalar(product, scale)?)
}

/// Pull `amount` from `from` into `escrow` against the escrow's allowance.
///
/// Succeeds only if the token reports success and the escrow balance grew by
/// exactly `amount`.
fn pull_into_escrow(
    fhe: &mut dyn Fhe,
    token: &mut dyn ConfidentialToken,
    escrow: &Address,
    from: &Address,
    amount: Euint,
) -> HandlerResult<Ebool> {
    let amount = fit(fhe, amount, token.amount_width())?;
    let before = balance_or_zero(fhe, token, escrow);
    let reported = token.transfer_from(fhe, escrow, from, escrow, amount)?;
    let after = balance_or_zero(fhe, token, escrow);
    let received = fhe.sub(after, before)?;
    let exact = fhe.cmp_eq(received, amount)?;
    Ok(fhe.and(reported, exact)?)
}

/// Handle Deploy call.
pub fn handle_deploy<F: Fhe>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    ctx: &CallContext,
    params: DeployParams,
) -> HandlerResult<u64> {
    let settlement = params
        .settlement
        .unwrap_or(state.config.default_settlement);
    settlement.validate().map_err(invalid_config)?;
    let domain = settlement.domain().map_err(invalid_config)?;
    let cumulative_width = settlement.cumulative_width().map_err(invalid_config)?;

    if params.supply == 0 {
        return Err(invalid_config("Supply cannot be zero"));
    }
    if params.supply as u128 > settlement.quantity_width.max_value() {
        return Err(invalid_config("Supply exceeds the quantity width"));
    }
    if params.auction_token == params.base_token {
        return Err(invalid_config("Auction and base token must differ"));
    }
    let auction_width = host
        .tokens
        .get(&params.auction_token)
        .map_err(invalid_config)?
        .amount_width();
    host.tokens.get(&params.base_token).map_err(invalid_config)?;
    if params.supply as u128 > auction_width.max_value() {
        return Err(invalid_config("Supply exceeds the auction token width"));
    }

    if params.end_time <= ctx.timestamp {
        return Err(invalid_config("End time must be in the future"));
    }
    if params.end_time - ctx.timestamp < state.config.limits.min_duration {
        return Err(invalid_config("Auction duration below minimum"));
    }

    let pricing = LinearDiscretization::new(params.min_price, params.max_price, domain.max_index())
        .map_err(invalid_config)?;

    let auction_id = state.allocate_auction_id();
    let escrow = compute_auction_address(auction_id);
    let tree = EncryptedFenwick::init(&mut host.fhe, domain, cumulative_width);

    let config = AuctionConfig {
        auction_id,
        auctioneer: ctx.sender,
        escrow,
        auction_token: params.auction_token,
        supply: params.supply,
        base_token: params.base_token,
        end_time: params.end_time,
        pricing,
        settlement,
    };
    state.insert_auction(Auction::new(config, tree));

    info!(
        auction_id,
        auctioneer = hex::encode(ctx.sender),
        supply = params.supply,
        end_time = params.end_time,
        tick_bits = settlement.tick_bits,
        "Deployed auction"
    );
    Ok(auction_id)
}

/// Handle DepositAuction call.
///
/// A retry after the deposit lock expires re-requests the outcome of an
/// unconfirmed pull instead of pulling the supply again.
pub fn handle_deposit_auction<F: Fhe>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    ctx: &CallContext,
    auction_id: u64,
) -> HandlerResult<RequestId> {
    let now = ctx.timestamp;
    let auction = state.auction_mut(auction_id)?;
    if ctx.sender != auction.config.auctioneer {
        return Err(AuctionError::NotAuthorized);
    }
    auction.expect_state(AuctionState::WaitDeposit)?;
    auction.locks.ensure_unlocked(&LockTag::Deposit, now)?;

    let config = auction.config.clone();
    let received = match auction.pending_deposit {
        // The earlier pull's outcome is still unconfirmed; only its
        // decryption is requested again.
        Some(received) => {
            warn!(auction_id, "Re-requesting unconfirmed supply deposit");
            received
        }
        None => {
            let fhe: &mut dyn Fhe = &mut host.fhe;
            let token = host.tokens.get_mut(&config.auction_token)?;
            let amount = fhe.trivial(config.supply as u128, token.amount_width());
            let received = pull_into_escrow(
                fhe,
                token.as_mut(),
                &config.escrow,
                &config.auctioneer,
                amount,
            )?;

            let no_error = ErrorLog::code(fhe, BidErrorCode::NoError);
            let failed = ErrorLog::code(fhe, BidErrorCode::AuctionDepositFailed);
            let code = fhe.select(received, no_error, failed)?;
            let error_index = auction.errors.record(fhe, &config.auctioneer, code)?;
            auction.pending_deposit = Some(received);
            auction.emit(AuctionEvent::ErrorChanged {
                account: config.auctioneer,
                error_index,
            });
            received
        }
    };

    let request_id = host.gateway.request_decryption(
        config.escrow,
        vec![received.handle],
        AuctionCallback {
            auction_id,
            kind: CallbackKind::DepositConfirmation,
        },
        config.settlement.request_timeout(),
        now,
    );
    auction
        .locks
        .start_for(LockTag::Deposit, now, config.settlement.step_timeout)?;
    auction.pending_decryption = Some(request_id);
    auction.emit(AuctionEvent::DepositRequested { request_id });

    info!(
        auction_id,
        request_id = hex::encode(request_id),
        "Requested supply deposit confirmation"
    );
    Ok(request_id)
}

/// Handle Bid call.
///
/// Returns the index of the new bid in the sender's list. A bid that fails
/// validation is still recorded, with zero quantity and zero deposit.
pub fn handle_bid<F: Fhe>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    ctx: &CallContext,
    auction_id: u64,
    price: u64,
    quantity: &EncryptedInput,
) -> HandlerResult<u64> {
    let bidder = ctx.sender;
    let auction = state.auction_mut(auction_id)?;
    auction.expect_state(AuctionState::Active)?;
    if ctx.timestamp >= auction.config.end_time {
        return Err(AuctionError::BiddingEnded);
    }

    let config = auction.config.clone();
    let params = config.settlement;
    let tick = config.pricing.price_to_tick(price)?;
    let tick_price = config.pricing.tick_to_price(tick)?;
    if quantity.width != params.quantity_width {
        return Err(AuctionError::QuantityWidthMismatch {
            expected: params.quantity_width.bits(),
        });
    }

    let fhe: &mut dyn Fhe = &mut host.fhe;
    let requested_quantity = fhe.verify_input(quantity, &bidder)?;
    let base = host.tokens.get_mut(&config.base_token)?;
    let base_width = base.amount_width();

    // Soft validation: nothing below may fail the call.
    let supply = fhe.trivial(config.supply as u128, params.quantity_width);
    let within_supply = fhe.cmp_le(requested_quantity, supply)?;
    let cost = cost_rounded_up(fhe, requested_quantity, tick_price, params.price_scale())?;
    let base_max = fhe.trivial(base_width.max_value(), Width::U128);
    let representable = fhe.cmp_le(cost, base_max)?;
    let valid = fhe.and(within_supply, representable)?;

    let zero_wide = fhe.trivial(0, Width::U128);
    let cost = fhe.select(valid, cost, zero_wide)?;
    let cost = fit(fhe, cost, base_width)?;
    let pulled = pull_into_escrow(fhe, base.as_mut(), &config.escrow, &bidder, cost)?;

    let accepted = fhe.and(valid, pulled)?;
    let zero_quantity = fhe.trivial(0, params.quantity_width);
    let effective_quantity = fhe.select(accepted, requested_quantity, zero_quantity)?;
    let zero_deposit = fhe.trivial(0, base_width);
    let deposit = fhe.select(pulled, cost, zero_deposit)?;

    let no_error = ErrorLog::code(fhe, BidErrorCode::NoError);
    let transfer_failed = ErrorLog::code(fhe, BidErrorCode::DepositTransferFailed);
    let overflow = ErrorLog::code(fhe, BidErrorCode::DepositOverflow);
    let too_large = ErrorLog::code(fhe, BidErrorCode::QuantityExceedsSupply);
    let code = fhe.select(pulled, no_error, transfer_failed)?;
    let code = fhe.select(representable, code, overflow)?;
    let code = fhe.select(within_supply, code, too_large)?;

    auction.tree.update(fhe, tick, effective_quantity)?;

    let cumulative_width = auction.tree.value_width();
    let widened = fit(fhe, effective_quantity, cumulative_width)?;
    let aggregate = match auction.tick_aggregates.get(&tick) {
        Some(current) => fhe.add(*current, widened)?,
        None => widened,
    };
    auction.tick_aggregates.insert(tick, aggregate);

    let total_deposit = match auction.deposits.get(&bidder) {
        Some(current) => fhe.add(*current, deposit)?,
        None => deposit,
    };
    fhe.allow(total_deposit.handle, &bidder)?;
    auction.deposits.insert(bidder, total_deposit);

    fhe.allow(effective_quantity.handle, &bidder)?;
    fhe.allow(deposit.handle, &bidder)?;
    let bids = auction.bids.entry(bidder).or_default();
    let index = bids.len() as u64;
    bids.push(Bid {
        tick,
        quantity: effective_quantity,
        deposit,
        settled: false,
    });
    auction.has_bids = true;

    let error_index = auction.errors.record(fhe, &bidder, code)?;
    auction.emit(AuctionEvent::BidPlaced {
        bidder,
        index,
        tick,
    });
    auction.emit(AuctionEvent::ErrorChanged {
        account: bidder,
        error_index,
    });

    debug!(
        auction_id,
        bidder = hex::encode(bidder),
        index,
        tick,
        "Recorded bid"
    );
    Ok(index)
}

/// Handle Cancel call.
pub fn handle_cancel(
    state: &mut ModuleState,
    ctx: &CallContext,
    auction_id: u64,
) -> HandlerResult<()> {
    let auction = state.auction_mut(auction_id)?;
    if ctx.sender != auction.config.auctioneer {
        return Err(AuctionError::NotAuthorized);
    }
    match auction.state {
        AuctionState::WaitDeposit => {}
        AuctionState::Active if ctx.timestamp < auction.config.end_time => {}
        AuctionState::Active => return Err(AuctionError::BiddingEnded),
        other => {
            return Err(AuctionError::InvalidState {
                expected: AuctionState::Active,
                got: other,
            })
        }
    }

    auction.state = AuctionState::Cancelled;
    auction.pending_decryption = None;
    auction.locks.clear(&LockTag::Deposit);
    auction.emit(AuctionEvent::Cancelled);

    info!(auction_id, "Auction cancelled by auctioneer");
    Ok(())
}

/// Handle StartWithdrawalDecryption call.
///
/// Also restarts a search whose whole-search lock has expired.
pub fn handle_start_withdrawal_decryption<F: Fhe>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    ctx: &CallContext,
    auction_id: u64,
) -> HandlerResult<AuctionState> {
    let now = ctx.timestamp;
    let auction = state.auction_mut(auction_id)?;
    let restart = match auction.state {
        AuctionState::Active if now < auction.config.end_time => {
            return Err(AuctionError::BiddingNotEnded)
        }
        AuctionState::Active => false,
        AuctionState::WithdrawalPending => true,
        other => {
            return Err(AuctionError::InvalidState {
                expected: AuctionState::Active,
                got: other,
            })
        }
    };
    auction
        .locks
        .ensure_unlocked(&LockTag::ComputeSettlement, now)?;

    if !auction.has_bids {
        auction.state = AuctionState::Cancelled;
        auction.emit(AuctionEvent::Cancelled);
        info!(auction_id, "No bids, auction cancelled");
        return Ok(AuctionState::Cancelled);
    }

    if let Some(stale) = auction.pending_decryption.take() {
        host.gateway.drop_request(&stale);
    }
    auction.locks.clear(&LockTag::Step);

    let params = auction.config.settlement;
    let fhe: &mut dyn Fhe = &mut host.fhe;
    let target = fhe.trivial(auction.config.supply as u128, params.quantity_width);
    let mut search = auction
        .tree
        .start_search(fhe, target, params.search_fallback)?;
    // The root needs no decrypted hint.
    search.step(fhe, &auction.tree, 0)?;
    auction.search = Some(search);

    auction.locks.start_for(
        LockTag::ComputeSettlement,
        now,
        params.settlement_timeout(),
    )?;
    auction.state = AuctionState::WithdrawalPending;
    auction.emit(AuctionEvent::SettlementStarted { restart });

    if restart {
        warn!(auction_id, "Restarted stalled settlement search");
    } else {
        info!(auction_id, "Started settlement search");
    }
    Ok(AuctionState::WithdrawalPending)
}

/// Handle StepWithdrawalDecryption call.
pub fn handle_step_withdrawal_decryption<F: Fhe>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    ctx: &CallContext,
    auction_id: u64,
) -> HandlerResult<RequestId> {
    let now = ctx.timestamp;
    let auction = state.auction_mut(auction_id)?;
    auction.expect_state(AuctionState::WithdrawalPending)?;
    auction.locks.ensure_unlocked(&LockTag::Step, now)?;

    let search = auction.search.as_ref().ok_or(AuctionError::SearchNotStarted)?;
    let (handle, kind) = match (search.found_index(), search.current_index()) {
        (Some(found), _) => (found.handle, CallbackKind::ClearingTick),
        (None, Some(cursor)) => (cursor.handle, CallbackKind::SearchStep),
        (None, None) => return Err(AuctionError::SearchNotStarted),
    };

    let params = auction.config.settlement;
    let request_id = host.gateway.request_decryption(
        auction.config.escrow,
        vec![handle],
        AuctionCallback { auction_id, kind },
        params.request_timeout(),
        now,
    );
    auction
        .locks
        .start_for(LockTag::Step, now, params.step_timeout)?;

    if let Some(previous) = auction.pending_decryption.replace(request_id) {
        warn!(
            auction_id,
            superseded = hex::encode(previous),
            "Step timed out, re-requesting"
        );
    }
    let terminal = kind == CallbackKind::ClearingTick;
    auction.emit(AuctionEvent::StepRequested {
        request_id,
        terminal,
    });

    debug!(
        auction_id,
        request_id = hex::encode(request_id),
        terminal,
        "Requested search step decryption"
    );
    Ok(request_id)
}

/// Handle a decryption callback.
///
/// The cleartexts are taken from the gateway, never from the caller, and
/// only the auction's current request is accepted.
pub fn handle_decryption_callback<F: Fhe>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    _ctx: &CallContext,
    request_id: RequestId,
) -> HandlerResult<()> {
    let response = host.gateway.take_response(&request_id)?;
    let AuctionCallback { auction_id, kind } = response.callback;
    let auction = state.auction_mut(auction_id)?;

    if response.requester != auction.config.escrow
        || auction.pending_decryption != Some(request_id)
    {
        warn!(
            auction_id,
            request_id = hex::encode(request_id),
            "Rejected stale decryption callback"
        );
        return Err(AuctionError::StaleDecryption(hex::encode(request_id)));
    }
    let value = match response.cleartexts.as_slice() {
        [value] => *value,
        _ => return Err(AuctionError::MalformedDecryption),
    };

    match kind {
        CallbackKind::DepositConfirmation => {
            auction.expect_state(AuctionState::WaitDeposit)?;
            auction.pending_decryption = None;
            auction.pending_deposit = None;
            auction.locks.clear(&LockTag::Deposit);
            if value == 1 {
                auction.state = AuctionState::Active;
                auction.emit(AuctionEvent::AuctionActivated);
                info!(auction_id, "Supply deposited, auction active");
            } else {
                auction.emit(AuctionEvent::DepositFailed);
                warn!(auction_id, "Supply deposit failed");
            }
        }
        CallbackKind::SearchStep => {
            auction.expect_state(AuctionState::WithdrawalPending)?;
            let hint = u32::try_from(value).map_err(|_| AuctionError::MalformedDecryption)?;
            let fhe: &mut dyn Fhe = &mut host.fhe;
            let search = auction
                .search
                .as_mut()
                .ok_or(AuctionError::SearchNotStarted)?;
            search.step(fhe, &auction.tree, hint)?;
            let steps = search.steps();

            auction.pending_decryption = None;
            auction.locks.clear(&LockTag::Step);
            auction.emit(AuctionEvent::StepReady { steps });
            debug!(auction_id, steps, "Search step applied");
        }
        CallbackKind::ClearingTick => {
            auction.expect_state(AuctionState::WithdrawalPending)?;
            if auction.clearing_tick.is_some() {
                return Err(AuctionError::AlreadySettled);
            }
            let tick = u32::try_from(value).map_err(|_| AuctionError::MalformedDecryption)?;

            auction.pending_decryption = None;
            auction.clearing_tick = Some(tick);
            auction.locks.lock_forever(LockTag::ComputeSettlement);
            auction.locks.lock_forever(LockTag::Step);

            if tick == 0 {
                auction.state = AuctionState::Cancelled;
                auction.emit(AuctionEvent::Cancelled);
                info!(auction_id, "Demand never reached supply, auction cancelled");
            } else {
                auction.state = AuctionState::WithdrawalReady;
                auction.emit(AuctionEvent::SettlementReady {
                    clearing_tick: tick,
                });
                info!(auction_id, clearing_tick = tick, "Clearing tick fixed");
            }
        }
    }
    Ok(())
}

/// Whether a settlement search is in progress and not yet stalled.
pub fn is_running_withdrawal_decryption(
    state: &ModuleState,
    auction_id: u64,
    now: u64,
) -> HandlerResult<bool> {
    let auction = state.auction(auction_id)?;
    Ok(auction.state == AuctionState::WithdrawalPending
        && auction.locks.is_locked(&LockTag::ComputeSettlement, now))
}

fn clearing(auction: &Auction) -> HandlerResult<(u32, u64)> {
    let tick = auction
        .clearing_tick
        .ok_or(AuctionError::SearchNotStarted)?;
    let price = auction.config.pricing.tick_to_price(tick)?;
    Ok((tick, price))
}

/// Handle PullAuctioneer call.
///
/// Sends unsold supply and the proceeds of the sold part to the auctioneer.
pub fn handle_pull_auctioneer<F: Fhe>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    ctx: &CallContext,
    auction_id: u64,
) -> HandlerResult<()> {
    let auction = state.auction_mut(auction_id)?;
    auction.expect_state(AuctionState::WithdrawalReady)?;
    if auction
        .locks
        .is_locked(&LockTag::PullAuctioneer, ctx.timestamp)
    {
        return Err(AuctionError::AlreadyClaimed);
    }
    let (_, clearing_price) = clearing(auction)?;
    auction.locks.lock_forever(LockTag::PullAuctioneer);

    let config = auction.config.clone();
    let fhe: &mut dyn Fhe = &mut host.fhe;
    let cumulative_width = auction.tree.value_width();
    let supply = fhe.trivial(config.supply as u128, cumulative_width);
    let allocated = fhe.minimum(supply, auction.tree.total_value())?;
    let unsold = fhe.sub(supply, allocated)?;
    let proceeds = cost_rounded_down(
        fhe,
        allocated,
        clearing_price,
        config.settlement.price_scale(),
    )?;

    let token = host.tokens.get_mut(&config.auction_token)?;
    let unsold = fit(fhe, unsold, token.amount_width())?;
    token.transfer(fhe, &config.escrow, &config.auctioneer, unsold)?;

    let base = host.tokens.get_mut(&config.base_token)?;
    let proceeds = fit(fhe, proceeds, base.amount_width())?;
    base.transfer(fhe, &config.escrow, &config.auctioneer, proceeds)?;

    auction.emit(AuctionEvent::AuctioneerPaid);
    info!(auction_id, "Auctioneer paid out");
    Ok(())
}

/// Handle PullBid call.
///
/// Anyone may settle any bid; funds always go to the bidder.
pub fn handle_pull_bid<F: Fhe>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    _ctx: &CallContext,
    auction_id: u64,
    bidder: Address,
    index: u64,
) -> HandlerResult<()> {
    let auction = state.auction_mut(auction_id)?;
    auction.expect_state(AuctionState::WithdrawalReady)?;
    let count = auction.bid_count(&bidder);
    if index >= count {
        return Err(AuctionError::BidIndexOutOfRange { index, count });
    }
    let (clearing_tick, clearing_price) = clearing(auction)?;

    let bid = auction
        .bids
        .get_mut(&bidder)
        .and_then(|bids| bids.get_mut(index as usize))
        .ok_or(AuctionError::BidIndexOutOfRange { index, count })?;
    if bid.settled {
        return Err(AuctionError::AlreadySettled);
    }
    bid.settled = true;
    let bid = bid.clone();

    let config = auction.config.clone();
    let scale = config.settlement.price_scale();
    let base_width = host.tokens.get(&config.base_token)?.amount_width();
    let fhe: &mut dyn Fhe = &mut host.fhe;

    // Ticks run opposite to prices: a greater tick is a worse offer.
    let (filled, refund) = if bid.tick > clearing_tick {
        (None, bid.deposit)
    } else if bid.tick < clearing_tick {
        let cost = cost_rounded_up(fhe, bid.quantity, clearing_price, scale)?;
        let cost = fit(fhe, cost, base_width)?;
        (Some(bid.quantity), fhe.sub(bid.deposit, cost)?)
    } else {
        let cumulative_width = auction.tree.value_width();
        let prefix = auction.tree.query(fhe, clearing_tick)?;
        let supply = fhe.trivial(config.supply as u128, cumulative_width);
        let allocated = fhe.minimum(supply, auction.tree.total_value())?;
        let overflow = fhe.sub(prefix, allocated)?;

        let aggregate = match auction.tick_aggregates.get(&clearing_tick) {
            Some(aggregate) => *aggregate,
            None => fhe.trivial(0, cumulative_width),
        };
        let covered = fhe.cmp_le(overflow, aggregate)?;
        let remaining = fhe.sub(aggregate, overflow)?;
        let zero = fhe.trivial(0, cumulative_width);
        let available = fhe.select(covered, remaining, zero)?;
        let wanted = fit(fhe, bid.quantity, cumulative_width)?;
        let fill = fhe.minimum(available, wanted)?;

        let drained = fhe.sub(aggregate, fill)?;
        auction.tick_aggregates.insert(clearing_tick, drained);

        let cost = cost_rounded_up(fhe, fill, clearing_price, scale)?;
        let cost = fit(fhe, cost, base_width)?;
        (Some(fill), fhe.sub(bid.deposit, cost)?)
    };

    if let Some(filled) = filled {
        let token = host.tokens.get_mut(&config.auction_token)?;
        let filled = fit(fhe, filled, token.amount_width())?;
        token.transfer(fhe, &config.escrow, &bidder, filled)?;
    }
    let base = host.tokens.get_mut(&config.base_token)?;
    base.transfer(fhe, &config.escrow, &bidder, refund)?;

    auction.emit(AuctionEvent::BidSettled { bidder, index });
    debug!(
        auction_id,
        bidder = hex::encode(bidder),
        index,
        tick = bid.tick,
        clearing_tick,
        "Settled bid"
    );
    Ok(())
}

/// Handle RecoverAuctioneer call.
pub fn handle_recover_auctioneer<F: Fhe>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    ctx: &CallContext,
    auction_id: u64,
) -> HandlerResult<()> {
    let auction = state.auction_mut(auction_id)?;
    auction.expect_state(AuctionState::Cancelled)?;
    if auction
        .locks
        .is_locked(&LockTag::RecoverAuctioneer, ctx.timestamp)
    {
        return Err(AuctionError::AlreadyClaimed);
    }
    auction.locks.lock_forever(LockTag::RecoverAuctioneer);

    let config = auction.config.clone();
    let fhe: &mut dyn Fhe = &mut host.fhe;
    let token = host.tokens.get_mut(&config.auction_token)?;
    let supply = fhe.trivial(config.supply as u128, token.amount_width());
    token.transfer(fhe, &config.escrow, &config.auctioneer, supply)?;

    auction.emit(AuctionEvent::Recovered {
        account: config.auctioneer,
    });
    info!(auction_id, "Auctioneer recovered escrowed supply");
    Ok(())
}

/// Handle RecoverBidder call.
pub fn handle_recover_bidder<F: Fhe>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    ctx: &CallContext,
    auction_id: u64,
    bidder: Address,
) -> HandlerResult<()> {
    let auction = state.auction_mut(auction_id)?;
    auction.expect_state(AuctionState::Cancelled)?;
    let deposit = *auction
        .deposits
        .get(&bidder)
        .ok_or(AuctionError::NoDeposit)?;
    let tag = LockTag::RecoverBidder(bidder);
    if auction.locks.is_locked(&tag, ctx.timestamp) {
        return Err(AuctionError::AlreadyClaimed);
    }
    auction.locks.lock_forever(tag);

    let config = auction.config.clone();
    let fhe: &mut dyn Fhe = &mut host.fhe;
    let base = host.tokens.get_mut(&config.base_token)?;
    base.transfer(fhe, &config.escrow, &bidder, deposit)?;

    auction.emit(AuctionEvent::Recovered { account: bidder });
    info!(
        auction_id,
        bidder = hex::encode(bidder),
        "Bidder recovered deposit"
    );
    Ok(())
}
