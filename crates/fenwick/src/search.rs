//! Resumable rank search over an [`EncryptedFenwick`].
//!
//! Deciding whether to descend left or right needs an encrypted comparison,
//! and the next node to visit is itself encrypted. The caller therefore has
//! to decrypt [`SearchIterator::current_index`] between two steps and feed
//! the plaintext back in as the hint. The iterator holds everything needed
//! to resume, so it can be persisted between calls.

use auction_fhe::{Euint, Fhe};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::lsb;
use crate::error::TreeError;
use crate::tree::EncryptedFenwick;

/// Answer to return when no tick reaches the target.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum SearchFallback {
    /// The highest tick that ever received a non-zero quantity.
    LargestInserted,
    /// The reserved index `0`.
    NotFound,
}

/// Result of one call to [`SearchIterator::step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Descended one level; `current_index` needs decrypting next.
    Advanced,
    /// Reached a leaf; `found_index` holds the answer.
    Found,
    /// The search had already terminated; nothing changed.
    AlreadyFound,
}

/// Persisted state of an in-progress rank search.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SearchIterator {
    rank: Euint,
    current_index: Option<Euint>,
    fallback_index: Euint,
    found_index: Option<Euint>,
    steps: u32,
}

impl SearchIterator {
    pub(crate) fn start(
        fhe: &mut dyn Fhe,
        tree: &EncryptedFenwick,
        target: Euint,
        fallback: SearchFallback,
    ) -> Result<Self, TreeError> {
        let rank = tree.widen(fhe, target)?;
        let fallback_index = match fallback {
            SearchFallback::LargestInserted => tree.largest_inserted_index(),
            SearchFallback::NotFound => fhe.trivial(0, tree.domain().index_width()),
        };
        Ok(Self {
            rank,
            current_index: None,
            fallback_index,
            found_index: None,
            steps: 0,
        })
    }

    /// Remaining target quantity.
    pub fn rank(&self) -> Euint {
        self.rank
    }

    /// Node to visit next; `None` before the first step and after the last.
    pub fn current_index(&self) -> Option<Euint> {
        self.current_index
    }

    pub fn fallback_index(&self) -> Euint {
        self.fallback_index
    }

    /// Final answer, once the search has terminated.
    pub fn found_index(&self) -> Option<Euint> {
        self.found_index
    }

    pub fn is_found(&self) -> bool {
        self.found_index.is_some()
    }

    /// Number of steps taken so far.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Advance the search by one tree level.
    ///
    /// `hint` is the decrypted value of the previous step's `current_index`,
    /// or `0` for the first step, which starts at the root.
    pub fn step(
        &mut self,
        fhe: &mut dyn Fhe,
        tree: &EncryptedFenwick,
        hint: u32,
    ) -> Result<StepOutcome, TreeError> {
        if self.found_index.is_some() {
            return Ok(StepOutcome::AlreadyFound);
        }

        let domain = tree.domain();
        let working = if hint == 0 {
            domain.root()
        } else {
            domain
                .check(hint)
                .map_err(|_| TreeError::InvalidHint { hint })?;
            hint
        };

        let node = tree.slot(working);
        let within = fhe.cmp_le(self.rank, node)?;
        let working_encrypted = fhe.trivial(working as u128, domain.index_width());
        let span = lsb(working);
        self.steps += 1;

        if span == 1 {
            self.found_index = Some(fhe.select(within, working_encrypted, self.fallback_index)?);
            self.current_index = None;
            debug!(steps = self.steps, "Rank search reached a leaf");
            return Ok(StepOutcome::Found);
        }

        self.fallback_index = fhe.select(within, working_encrypted, self.fallback_index)?;
        let remaining = fhe.sub(self.rank, node)?;
        self.rank = fhe.select(within, self.rank, remaining)?;

        let half = span / 2;
        let left = fhe.trivial((working - half) as u128, domain.index_width());
        let right = fhe.trivial((working + half) as u128, domain.index_width());
        self.current_index = Some(fhe.select(within, left, right)?);

        debug!(steps = self.steps, node = working, "Rank search advanced");
        Ok(StepOutcome::Advanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TickDomain;
    use auction_fhe::{Decryptor, MockFhe};
    use auction_types::Width;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Drive a search to completion, decrypting the cursor between steps.
    fn run_search(
        fhe: &mut MockFhe,
        tree: &EncryptedFenwick,
        target: u128,
        fallback: SearchFallback,
    ) -> (u32, u32) {
        let target = fhe.trivial(target, Width::U64);
        let mut iter = tree.start_search(fhe, target, fallback).unwrap();
        let mut hint = 0;
        loop {
            match iter.step(fhe, tree, hint).unwrap() {
                StepOutcome::Advanced => {
                    let cursor = iter.current_index().unwrap();
                    hint = fhe.decrypt(&cursor.handle).unwrap() as u32;
                }
                StepOutcome::Found => break,
                StepOutcome::AlreadyFound => unreachable!(),
            }
        }
        let found = iter.found_index().unwrap();
        (fhe.decrypt(&found.handle).unwrap() as u32, iter.steps())
    }

    fn brute_force(plain: &[u128], target: u128) -> Option<u32> {
        let mut running = 0u128;
        for (i, q) in plain.iter().enumerate().skip(1) {
            running += q;
            if running >= target {
                return Some(i as u32);
            }
        }
        None
    }

    #[test]
    fn test_search_matches_linear_scan() {
        let mut fhe = MockFhe::new();
        let mut rng = StdRng::seed_from_u64(1234);

        for round in 0..30 {
            let bits = [2u8, 4, 6, 8][round % 4];
            let domain = TickDomain::new(bits).unwrap();
            let mut tree = EncryptedFenwick::init(&mut fhe, domain, Width::U128);
            let max = domain.max_index();
            let mut plain = vec![0u128; max as usize + 1];
            let mut largest = 0u32;

            for _ in 0..rng.gen_range(1..20) {
                let at = rng.gen_range(1..=max);
                let q: u64 = if rng.gen_bool(0.2) { 0 } else { rng.gen_range(1..500) };
                let eq = fhe.trivial(q as u128, Width::U64);
                tree.update(&mut fhe, at, eq).unwrap();
                plain[at as usize] += q as u128;
                if q > 0 {
                    largest = largest.max(at);
                }
            }

            let total: u128 = plain.iter().sum();
            for target in [1, total / 3 + 1, total / 2, total, total + 1, total + 1000] {
                let expected = brute_force(&plain, target);

                let (found, steps) = run_search(&mut fhe, &tree, target, SearchFallback::LargestInserted);
                assert_eq!(found, expected.unwrap_or(largest), "target {target} bits {bits}");
                assert_eq!(steps, bits as u32);

                let (found, _) = run_search(&mut fhe, &tree, target, SearchFallback::NotFound);
                assert_eq!(found, expected.unwrap_or(0), "target {target} bits {bits}");
            }
        }
    }

    #[test]
    fn test_terminal_step_is_idempotent() {
        let mut fhe = MockFhe::new();
        let domain = TickDomain::new(1).unwrap();
        let mut tree = EncryptedFenwick::init(&mut fhe, domain, Width::U128);
        let q = fhe.trivial(3, Width::U64);
        tree.update(&mut fhe, 1, q).unwrap();

        let target = fhe.trivial(2, Width::U64);
        let mut iter = tree
            .start_search(&mut fhe, target, SearchFallback::NotFound)
            .unwrap();
        assert_eq!(iter.step(&mut fhe, &tree, 0).unwrap(), StepOutcome::Found);

        let snapshot = iter.clone();
        assert_eq!(
            iter.step(&mut fhe, &tree, 1).unwrap(),
            StepOutcome::AlreadyFound
        );
        assert_eq!(iter, snapshot);
        assert_eq!(fhe.decrypt(&iter.found_index().unwrap().handle).unwrap(), 1);
    }

    #[test]
    fn test_persisted_iterator_resumes() {
        let mut fhe = MockFhe::new();
        let domain = TickDomain::new(8).unwrap();
        let mut tree = EncryptedFenwick::init(&mut fhe, domain, Width::U128);
        for (tick, q) in [(52u32, 600_000u128), (205, 500_000), (255, 1_000_000)] {
            let eq = fhe.trivial(q, Width::U64);
            tree.update(&mut fhe, tick, eq).unwrap();
        }

        let target = fhe.trivial(1_000_000, Width::U64);
        let mut iter = tree
            .start_search(&mut fhe, target, SearchFallback::LargestInserted)
            .unwrap();
        iter.step(&mut fhe, &tree, 0).unwrap();

        let mut hint = fhe.decrypt(&iter.current_index().unwrap().handle).unwrap() as u32;
        while !iter.is_found() {
            // Round-trip the continuation through storage between every step.
            let stored = borsh::to_vec(&iter).unwrap();
            iter = borsh::from_slice(&stored).unwrap();
            iter.step(&mut fhe, &tree, hint).unwrap();
            if let Some(cursor) = iter.current_index() {
                hint = fhe.decrypt(&cursor.handle).unwrap() as u32;
            }
        }

        assert_eq!(fhe.decrypt(&iter.found_index().unwrap().handle).unwrap(), 205);
    }

    #[test]
    fn test_hint_outside_domain_rejected() {
        let mut fhe = MockFhe::new();
        let domain = TickDomain::new(4).unwrap();
        let tree = EncryptedFenwick::init(&mut fhe, domain, Width::U128);
        let target = fhe.trivial(1, Width::U64);
        let mut iter = tree
            .start_search(&mut fhe, target, SearchFallback::NotFound)
            .unwrap();

        assert_eq!(
            iter.step(&mut fhe, &tree, 99),
            Err(TreeError::InvalidHint { hint: 99 })
        );
        assert_eq!(iter.steps(), 0);
    }
}
