//! Encrypted error log.
//!
//! Soft failures cannot revert without revealing that something went wrong,
//! so they are reported here instead. Every entry is an encrypted `u8`
//! [`BidErrorCode`](auction_types::BidErrorCode) that only the affected
//! account may decrypt. An entry is appended on every call that can soft-fail,
//! whether or not it did, so the log length reveals nothing either.

use std::collections::BTreeMap;

use auction_fhe::{Euint, Fhe, FheResult};
use auction_types::{Address, BidErrorCode, Width};
use borsh::{BorshDeserialize, BorshSerialize};

/// Append-only log of encrypted error codes.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ErrorLog {
    entries: Vec<Euint>,
    last_by_account: BTreeMap<Address, u64>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encrypted constant for `code`, ready to be passed to `select`.
    pub fn code(fhe: &mut dyn Fhe, code: BidErrorCode) -> Euint {
        fhe.trivial(code.code() as u128, Width::U8)
    }

    /// Append `code` for `account` and return its index.
    pub fn record(&mut self, fhe: &mut dyn Fhe, account: &Address, code: Euint) -> FheResult<u64> {
        fhe.allow(code.handle, account)?;
        let index = self.entries.len() as u64;
        self.entries.push(code);
        self.last_by_account.insert(*account, index);
        Ok(index)
    }

    /// Most recent entry recorded for `account`.
    pub fn last_error(&self, account: &Address) -> Option<(u64, Euint)> {
        let index = *self.last_by_account.get(account)?;
        self.error_at(index).map(|code| (index, code))
    }

    pub fn error_at(&self, index: u64) -> Option<Euint> {
        self.entries.get(index as usize).copied()
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
