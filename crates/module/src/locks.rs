//! Named time locks.
//!
//! A lock is a tag with an expiry timestamp. It behaves like a mutex whose
//! holder may vanish: once the expiry passes, the next caller may take it
//! over. Permanent locks use `u64::MAX` and never expire.

use std::collections::BTreeMap;

use auction_types::Address;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::AuctionError;

/// Expiry of a lock that never releases.
pub const FOREVER: u64 = u64::MAX;

/// Operations guarded by a lock.
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
pub enum LockTag {
    /// Whole clearing-tick computation
    ComputeSettlement,
    /// One outstanding search step decryption
    Step,
    /// Outstanding supply deposit confirmation
    Deposit,
    PullAuctioneer,
    RecoverAuctioneer,
    RecoverBidder(Address),
}

/// Lock table owned by one auction.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimeLocks {
    expiries: BTreeMap<LockTag, u64>,
}

impl TimeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `tag` is held at `now`.
    pub fn is_locked(&self, tag: &LockTag, now: u64) -> bool {
        self.expiries.get(tag).is_some_and(|expiry| now < *expiry)
    }

    pub fn expiry(&self, tag: &LockTag) -> Option<u64> {
        self.expiries.get(tag).copied()
    }

    /// Reject while `tag` is held; forget it if it has expired.
    pub fn ensure_unlocked(&mut self, tag: &LockTag, now: u64) -> Result<(), AuctionError> {
        match self.expiries.get(tag) {
            Some(expiry) if now < *expiry => Err(AuctionError::Locked {
                tag: *tag,
                until: *expiry,
            }),
            Some(_) => {
                self.expiries.remove(tag);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Take `tag` for `duration` seconds.
    pub fn start_for(&mut self, tag: LockTag, now: u64, duration: u64) -> Result<(), AuctionError> {
        self.ensure_unlocked(&tag, now)?;
        self.expiries.insert(tag, now.saturating_add(duration));
        Ok(())
    }

    /// Hold `tag` permanently, overriding any current expiry.
    pub fn lock_forever(&mut self, tag: LockTag) {
        self.expiries.insert(tag, FOREVER);
    }

    pub fn clear(&mut self, tag: &LockTag) {
        self.expiries.remove(tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_blocks_until_expiry() {
        let mut locks = TimeLocks::new();
        locks.start_for(LockTag::Step, 100, 30).unwrap();

        assert!(locks.is_locked(&LockTag::Step, 129));
        assert_eq!(
            locks.start_for(LockTag::Step, 129, 30),
            Err(AuctionError::Locked {
                tag: LockTag::Step,
                until: 130
            })
        );

        assert!(!locks.is_locked(&LockTag::Step, 130));
        locks.start_for(LockTag::Step, 130, 30).unwrap();
        assert_eq!(locks.expiry(&LockTag::Step), Some(160));
    }

    #[test]
    fn test_expired_lock_removed_when_checked() {
        let mut locks = TimeLocks::new();
        locks.start_for(LockTag::Deposit, 0, 10).unwrap();
        locks.ensure_unlocked(&LockTag::Deposit, 10).unwrap();
        assert_eq!(locks.expiry(&LockTag::Deposit), None);
    }

    #[test]
    fn test_forever_never_expires() {
        let mut locks = TimeLocks::new();
        locks.start_for(LockTag::ComputeSettlement, 0, 5).unwrap();
        locks.lock_forever(LockTag::ComputeSettlement);
        assert!(locks.is_locked(&LockTag::ComputeSettlement, u64::MAX - 1));
        assert!(locks
            .ensure_unlocked(&LockTag::ComputeSettlement, 1 << 60)
            .is_err());
    }

    #[test]
    fn test_tags_are_independent() {
        let mut locks = TimeLocks::new();
        let alice = LockTag::RecoverBidder([1u8; 32]);
        let bob = LockTag::RecoverBidder([2u8; 32]);
        locks.lock_forever(alice);

        assert!(locks.is_locked(&alice, 0));
        assert!(!locks.is_locked(&bob, 0));

        locks.clear(&alice);
        assert!(!locks.is_locked(&alice, 0));
    }
}
