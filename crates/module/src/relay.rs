//! Delivery of gateway responses to the auction module.
//!
//! The gateway only resolves ciphertexts; something still has to carry each
//! response back into [`handle_decryption_callback`]. Tests call these
//! functions directly and the mock chain runs them from a background task.

use auction_fhe::{Decryptor, Fhe};
use auction_types::RequestId;
use tracing::{debug, warn};

use crate::handlers::{handle_decryption_callback, CallContext, HandlerResult, Host};
use crate::state::ModuleState;

/// Result of delivering one request.
#[derive(Clone, Debug)]
pub struct RelayOutcome {
    pub request_id: RequestId,
    pub auction_id: Option<u64>,
    pub result: HandlerResult<()>,
}

/// Fulfil `request_id` and hand the response to the auction.
pub fn deliver_decryption<F: Fhe + Decryptor>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    ctx: &CallContext,
    request_id: RequestId,
) -> HandlerResult<()> {
    host.gateway.fulfill(&request_id, &host.fhe)?;
    handle_decryption_callback(state, host, ctx, request_id)
}

/// Deliver every pending request filed at least `min_age` seconds ago.
///
/// Overdue requests are expired first and never delivered. A failed delivery
/// does not stop the remaining ones.
pub fn relay_pending_decryptions<F: Fhe + Decryptor>(
    state: &mut ModuleState,
    host: &mut Host<F>,
    ctx: &CallContext,
    min_age: u64,
) -> Vec<RelayOutcome> {
    let now = ctx.timestamp;
    for request_id in host.gateway.expire(now) {
        // An expired request can no longer be fulfilled.
        host.gateway.drop_request(&request_id);
    }

    let mut outcomes = Vec::new();
    for request_id in host.gateway.pending_older_than(now, min_age) {
        let auction_id = host
            .gateway
            .get_request(&request_id)
            .map(|request| request.callback.auction_id);
        let result = deliver_decryption(state, host, ctx, request_id);
        match &result {
            Ok(()) => debug!(
                request_id = hex::encode(request_id),
                ?auction_id,
                "Delivered decryption"
            ),
            Err(e) => warn!(
                request_id = hex::encode(request_id),
                ?auction_id,
                error = %e,
                "Decryption delivery rejected"
            ),
        }
        outcomes.push(RelayOutcome {
            request_id,
            auction_id,
            result,
        });
    }
    outcomes
}
