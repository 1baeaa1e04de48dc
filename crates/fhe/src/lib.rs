//! Encrypted unsigned integers for confidential auctions.
//!
//! Auction state never holds plaintext quantities. Every value is an opaque
//! [`Handle`](auction_types::Handle) into a coprocessor that evaluates
//! homomorphic operations on request:
//!
//! 1. **Operations** ([`Fhe`]): add, sub, scalar mul/div, comparisons and an
//!    oblivious `select`. There is deliberately no way to branch on an
//!    encrypted predicate; conditional logic must go through `select`.
//!
//! 2. **Inputs** ([`EncryptedInput`]): ciphertexts produced client-side and
//!    bound to the submitting account by an input proof.
//!
//! 3. **Decryption** ([`Decryptor`]): only the decryption gateway resolves
//!    handles to plaintext, or an account that was granted access with
//!    [`Fhe::allow`].
//!
//! [`MockFhe`] keeps plaintexts in memory and is used by tests and the mock chain.

pub mod error;
pub mod mock;
pub mod ops;

pub use error::FheError;
pub use mock::MockFhe;
pub use ops::{Decryptor, Ebool, EncryptedInput, Euint, Fhe, FheResult};
