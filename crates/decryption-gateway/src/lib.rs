//! Decryption Gateway
//!
//! Contracts cannot read their own ciphertexts. When a value has to become
//! public, the contract files a request here and carries on; an off-chain
//! relayer later asks the gateway to decrypt the handles and delivers the
//! cleartexts back to the contract through a callback:
//! 1. `request_decryption` registers the handles with an opaque callback tag
//! 2. `fulfill` resolves the handles through the decryption oracle
//! 3. `take_response` hands the cleartexts to the callback handler exactly once
//!
//! Requests may never be answered. `drop_request` loses one on purpose and
//! `expire` retires the ones whose deadline passed.

use std::collections::HashMap;

use auction_fhe::{Decryptor, FheError};
use auction_types::{Address, Handle, RequestId};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while handling decryption requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Unknown decryption request {0}")]
    UnknownRequest(String),

    #[error("Decryption request {request_id} is {state:?}, expected it pending")]
    NotPending {
        request_id: String,
        state: RequestState,
    },

    #[error("Decryption request {0} has not been fulfilled")]
    NotFulfilled(String),

    #[error("Decryption request {0} expired")]
    Expired(String),

    #[error("Decryption failed: {0}")]
    Decryption(#[from] FheError),
}

/// State of a decryption request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting for the relayer
    Pending,
    /// Cleartexts available, callback not yet delivered
    Fulfilled,
    /// Deadline passed before fulfilment
    Expired,
}

/// A single decryption request.
#[derive(Debug, Clone)]
pub struct DecryptionRequest<C> {
    pub request_id: RequestId,
    /// Contract that asked for the decryption
    pub requester: Address,
    pub handles: Vec<Handle>,
    /// Opaque tag telling the requester what to do with the answer
    pub callback: C,
    pub requested_at: u64,
    pub deadline: u64,
    pub state: RequestState,
    cleartexts: Option<Vec<u128>>,
    sequence: u64,
}

/// Cleartexts delivered to a callback handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionResponse<C> {
    pub request_id: RequestId,
    pub requester: Address,
    pub callback: C,
    /// One cleartext per requested handle, in request order
    pub cleartexts: Vec<u128>,
}

/// Registry of outstanding decryption requests.
#[derive(Debug)]
pub struct DecryptionGateway<C> {
    requests: HashMap<RequestId, DecryptionRequest<C>>,
    nonce: u64,
}

impl<C> Default for DecryptionGateway<C> {
    fn default() -> Self {
        Self {
            requests: HashMap::new(),
            nonce: 0,
        }
    }
}

impl<C: Clone> DecryptionGateway<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a request for the public decryption of `handles`.
    ///
    /// The request expires `timeout` seconds after `now`.
    pub fn request_decryption(
        &mut self,
        requester: Address,
        handles: Vec<Handle>,
        callback: C,
        timeout: u64,
        now: u64,
    ) -> RequestId {
        let mut hasher = Sha256::new();
        hasher.update(b"DECRYPTION_REQUEST_V1:");
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(requester);
        for handle in &handles {
            hasher.update(handle.0);
        }
        let request_id: RequestId = hasher.finalize().into();

        info!(
            request_id = hex::encode(request_id),
            requester = hex::encode(requester),
            handles = handles.len(),
            "Started decryption request"
        );

        self.requests.insert(
            request_id,
            DecryptionRequest {
                request_id,
                requester,
                handles,
                callback,
                requested_at: now,
                deadline: now.saturating_add(timeout),
                state: RequestState::Pending,
                cleartexts: None,
                sequence: self.nonce,
            },
        );
        self.nonce += 1;
        request_id
    }

    /// Get the state of a decryption request.
    pub fn get_state(&self, request_id: &RequestId) -> Option<RequestState> {
        self.requests.get(request_id).map(|r| r.state)
    }

    pub fn get_request(&self, request_id: &RequestId) -> Option<&DecryptionRequest<C>> {
        self.requests.get(request_id)
    }

    /// All pending request IDs, oldest first.
    pub fn pending_requests(&self) -> Vec<RequestId> {
        self.pending_where(|_| true)
    }

    /// Pending requests filed at least `delay` seconds before `now`, oldest first.
    pub fn pending_older_than(&self, now: u64, delay: u64) -> Vec<RequestId> {
        self.pending_where(|r| r.requested_at.saturating_add(delay) <= now)
    }

    fn pending_where(&self, filter: impl Fn(&DecryptionRequest<C>) -> bool) -> Vec<RequestId> {
        let mut pending: Vec<&DecryptionRequest<C>> = self
            .requests
            .values()
            .filter(|r| r.state == RequestState::Pending && filter(r))
            .collect();
        pending.sort_by_key(|r| r.sequence);
        pending.into_iter().map(|r| r.request_id).collect()
    }

    /// Resolve every handle of a pending request.
    pub fn fulfill(
        &mut self,
        request_id: &RequestId,
        decryptor: &dyn Decryptor,
    ) -> Result<(), GatewayError> {
        let request = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| GatewayError::UnknownRequest(hex::encode(request_id)))?;

        if request.state != RequestState::Pending {
            return Err(GatewayError::NotPending {
                request_id: hex::encode(request_id),
                state: request.state,
            });
        }

        let cleartexts = request
            .handles
            .iter()
            .map(|handle| decryptor.decrypt(handle))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            request_id = hex::encode(request_id),
            values = cleartexts.len(),
            "Decryption fulfilled"
        );

        request.cleartexts = Some(cleartexts);
        request.state = RequestState::Fulfilled;
        Ok(())
    }

    /// Remove a fulfilled request and return its cleartexts.
    ///
    /// A response can be taken only once; callers cannot supply cleartexts
    /// of their own.
    pub fn take_response(
        &mut self,
        request_id: &RequestId,
    ) -> Result<DecryptionResponse<C>, GatewayError> {
        let state = self
            .get_state(request_id)
            .ok_or_else(|| GatewayError::UnknownRequest(hex::encode(request_id)))?;

        match state {
            RequestState::Pending => Err(GatewayError::NotFulfilled(hex::encode(request_id))),
            RequestState::Expired => {
                self.requests.remove(request_id);
                Err(GatewayError::Expired(hex::encode(request_id)))
            }
            RequestState::Fulfilled => {
                let request = self
                    .requests
                    .remove(request_id)
                    .ok_or_else(|| GatewayError::UnknownRequest(hex::encode(request_id)))?;
                Ok(DecryptionResponse {
                    request_id: request.request_id,
                    requester: request.requester,
                    callback: request.callback,
                    cleartexts: request.cleartexts.unwrap_or_default(),
                })
            }
        }
    }

    /// Forget a request without answering it.
    pub fn drop_request(&mut self, request_id: &RequestId) -> Option<DecryptionRequest<C>> {
        let dropped = self.requests.remove(request_id);
        if dropped.is_some() {
            warn!(request_id = hex::encode(request_id), "Dropped decryption request");
        }
        dropped
    }

    /// Mark every pending request past its deadline as expired.
    pub fn expire(&mut self, now: u64) -> Vec<RequestId> {
        let mut expired = Vec::new();
        for request in self.requests.values_mut() {
            if request.state == RequestState::Pending && request.deadline <= now {
                request.state = RequestState::Expired;
                expired.push(request.request_id);
            }
        }
        for request_id in &expired {
            warn!(request_id = hex::encode(request_id), "Decryption request expired");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_fhe::{Fhe, MockFhe};
    use auction_types::Width;

    const CONTRACT: Address = [7u8; 32];

    fn gateway_with_values(values: &[u128]) -> (MockFhe, DecryptionGateway<&'static str>, RequestId) {
        let mut fhe = MockFhe::new();
        let handles = values
            .iter()
            .map(|v| fhe.trivial(*v, Width::U64).handle)
            .collect();
        let mut gateway = DecryptionGateway::new();
        let id = gateway.request_decryption(CONTRACT, handles, "settle", 60, 1_000);
        (fhe, gateway, id)
    }

    #[test]
    fn test_request_lifecycle() {
        let (fhe, mut gateway, id) = gateway_with_values(&[5, 9]);
        assert_eq!(gateway.get_state(&id), Some(RequestState::Pending));
        assert_eq!(gateway.pending_requests(), vec![id]);

        assert!(matches!(
            gateway.take_response(&id),
            Err(GatewayError::NotFulfilled(_))
        ));

        gateway.fulfill(&id, &fhe).unwrap();
        assert_eq!(gateway.get_state(&id), Some(RequestState::Fulfilled));
        assert!(gateway.pending_requests().is_empty());

        let response = gateway.take_response(&id).unwrap();
        assert_eq!(response.cleartexts, vec![5, 9]);
        assert_eq!(response.callback, "settle");
        assert_eq!(response.requester, CONTRACT);

        assert!(matches!(
            gateway.take_response(&id),
            Err(GatewayError::UnknownRequest(_))
        ));
    }

    #[test]
    fn test_request_ids_are_unique() {
        let mut gateway: DecryptionGateway<u8> = DecryptionGateway::new();
        let a = gateway.request_decryption(CONTRACT, vec![Handle([1; 32])], 0, 10, 0);
        let b = gateway.request_decryption(CONTRACT, vec![Handle([1; 32])], 0, 10, 0);
        assert_ne!(a, b);
        assert_eq!(gateway.pending_requests(), vec![a, b]);
    }

    #[test]
    fn test_fulfill_twice_rejected() {
        let (fhe, mut gateway, id) = gateway_with_values(&[1]);
        gateway.fulfill(&id, &fhe).unwrap();
        assert!(matches!(
            gateway.fulfill(&id, &fhe),
            Err(GatewayError::NotPending {
                state: RequestState::Fulfilled,
                ..
            })
        ));
    }

    #[test]
    fn test_pending_older_than_respects_delay() {
        let (_, gateway, id) = gateway_with_values(&[1]);
        assert!(gateway.pending_older_than(1_004, 5).is_empty());
        assert_eq!(gateway.pending_older_than(1_005, 5), vec![id]);
    }

    #[test]
    fn test_expired_request_cannot_be_fulfilled() {
        let (fhe, mut gateway, id) = gateway_with_values(&[1]);
        assert!(gateway.expire(1_059).is_empty());
        assert_eq!(gateway.expire(1_060), vec![id]);

        assert!(matches!(
            gateway.fulfill(&id, &fhe),
            Err(GatewayError::NotPending {
                state: RequestState::Expired,
                ..
            })
        ));
        assert!(matches!(
            gateway.take_response(&id),
            Err(GatewayError::Expired(_))
        ));
        assert!(gateway.is_empty());
    }

    #[test]
    fn test_dropped_request_is_gone() {
        let (fhe, mut gateway, id) = gateway_with_values(&[1]);
        assert!(gateway.drop_request(&id).is_some());
        assert!(matches!(
            gateway.fulfill(&id, &fhe),
            Err(GatewayError::UnknownRequest(_))
        ));
    }

    #[test]
    fn test_unknown_handle_fails_fulfilment() {
        let fhe = MockFhe::new();
        let mut gateway = DecryptionGateway::new();
        let id = gateway.request_decryption(CONTRACT, vec![Handle([3; 32])], (), 10, 0);
        assert!(matches!(
            gateway.fulfill(&id, &fhe),
            Err(GatewayError::Decryption(FheError::UnknownHandle(_)))
        ));
        assert_eq!(gateway.get_state(&id), Some(RequestState::Pending));
    }
}
