//! Fenwick tree over cleartext ticks with encrypted slots.

use auction_fhe::{Euint, Fhe};
use auction_types::Width;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::{lsb, TickDomain};
use crate::error::TreeError;
use crate::search::{SearchFallback, SearchIterator};

/// Encrypted cumulative-quantity tree.
///
/// `slots[i]` holds the sum of quantities inserted in `(i - lsb(i), i]`.
/// Slot 0 is never an insertion target and instead accumulates the grand
/// total. Untouched slots are the shared encrypted zero.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EncryptedFenwick {
    domain: TickDomain,
    value_width: Width,
    zero: Euint,
    slots: Vec<Option<Euint>>,
    largest_inserted_index: Euint,
}

impl EncryptedFenwick {
    /// Create an empty tree whose slots are `value_width` wide.
    pub fn init(fhe: &mut dyn Fhe, domain: TickDomain, value_width: Width) -> Self {
        let zero = fhe.trivial(0, value_width);
        let mut slots = vec![None; domain.size() as usize];
        slots[0] = Some(zero);
        Self {
            domain,
            value_width,
            zero,
            slots,
            largest_inserted_index: fhe.trivial(0, domain.index_width()),
        }
    }

    pub fn domain(&self) -> TickDomain {
        self.domain
    }

    pub fn value_width(&self) -> Width {
        self.value_width
    }

    /// Highest tick that ever received a non-zero quantity (encrypted `0` if none).
    pub fn largest_inserted_index(&self) -> Euint {
        self.largest_inserted_index
    }

    pub(crate) fn slot(&self, index: u32) -> Euint {
        self.slots[index as usize].unwrap_or(self.zero)
    }

    /// Bring `value` to the slot width; wider values are rejected.
    pub(crate) fn widen(&self, fhe: &mut dyn Fhe, value: Euint) -> Result<Euint, TreeError> {
        if value.width > self.value_width {
            return Err(TreeError::ValueWidthTooNarrow);
        }
        if value.width == self.value_width {
            return Ok(value);
        }
        Ok(fhe.cast(value, self.value_width)?)
    }

    /// Insert `quantity` at tick `at`.
    ///
    /// The same sequence of encrypted operations runs for every call,
    /// including zero quantities.
    pub fn update(&mut self, fhe: &mut dyn Fhe, at: u32, quantity: Euint) -> Result<(), TreeError> {
        self.domain.check(at)?;
        let quantity = self.widen(fhe, quantity)?;

        let is_real = fhe.cmp_ne(quantity, self.zero)?;
        let at_encrypted = fhe.trivial(at as u128, self.domain.index_width());
        let raised = fhe.maximum(self.largest_inserted_index, at_encrypted)?;
        self.largest_inserted_index = fhe.select(is_real, raised, self.largest_inserted_index)?;

        // Walk towards the root; wrapping past 2^K lands below `at` and ends the walk.
        let mut index = at;
        loop {
            let updated = fhe.add(self.slot(index), quantity)?;
            self.slots[index as usize] = Some(updated);
            let next = self.domain.wrap(index + lsb(index));
            if next < at {
                break;
            }
            index = next;
        }

        let total = fhe.add(self.slot(0), quantity)?;
        self.slots[0] = Some(total);

        trace!(tick = at, "Inserted quantity");
        Ok(())
    }

    /// Encrypted sum of every quantity inserted at ticks `<= at`.
    pub fn query(&self, fhe: &mut dyn Fhe, at: u32) -> Result<Euint, TreeError> {
        self.domain.check(at)?;
        let mut sum = self.zero;
        let mut index = at;
        while index > 0 {
            sum = fhe.add(sum, self.slot(index))?;
            index -= lsb(index);
        }
        Ok(sum)
    }

    /// Encrypted sum of everything ever inserted.
    pub fn total_value(&self) -> Euint {
        self.slot(0)
    }

    /// Begin a rank search for the smallest tick whose prefix sum reaches `target`.
    pub fn start_search(
        &self,
        fhe: &mut dyn Fhe,
        target: Euint,
        fallback: SearchFallback,
    ) -> Result<SearchIterator, TreeError> {
        SearchIterator::start(fhe, self, target, fallback)
    }
}
