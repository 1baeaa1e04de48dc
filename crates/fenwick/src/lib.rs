//! Half-encrypted indexed cumulative structure.
//!
//! A Fenwick (binary indexed) tree whose indices are cleartext price ticks and
//! whose slots hold encrypted cumulative quantities. Two parts:
//!
//! - [`EncryptedFenwick`]: insertion and prefix-sum queries. Every insertion
//!   performs the same encrypted operations whether or not the quantity is
//!   zero, so decoy insertions are indistinguishable from real ones.
//! - [`SearchIterator`]: a binary search for the smallest tick whose prefix
//!   sum reaches a target. Each step needs the decryption of the previous
//!   step's cursor, so the iterator is an explicit, persistable continuation
//!   advanced one step per call.

pub mod domain;
pub mod error;
pub mod search;
pub mod tree;

pub use domain::{lsb, TickDomain};
pub use error::TreeError;
pub use search::{SearchFallback, SearchIterator, StepOutcome};
pub use tree::EncryptedFenwick;
