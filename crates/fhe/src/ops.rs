//! Encrypted value types and the operations trait.

use auction_types::{Address, Handle, Width};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::FheError;

/// Result type for encrypted operations.
pub type FheResult<T> = Result<T, FheError>;

/// Encrypted unsigned integer of a fixed width.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Euint {
    pub handle: Handle,
    pub width: Width,
}

/// Encrypted boolean.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Ebool {
    pub handle: Handle,
}

/// Client-side ciphertext submitted with a call.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EncryptedInput {
    /// Ciphertext handle registered with the coprocessor
    pub handle: Handle,
    /// Declared width of the plaintext
    pub width: Width,
    /// Proof binding the ciphertext to the submitting account
    pub proof: [u8; 32],
}

/// Homomorphic operations on encrypted integers.
///
/// Binary operations on operands of different widths promote both to the
/// wider width. Arithmetic wraps modulo `2^bits` of the result width.
pub trait Fhe {
    /// Encrypt a public constant.
    fn trivial(&mut self, value: u128, width: Width) -> Euint;

    /// Encrypt a public boolean constant.
    fn trivial_bool(&mut self, value: bool) -> Ebool;

    /// Validate a client-side ciphertext and its proof for `sender`.
    fn verify_input(&mut self, input: &EncryptedInput, sender: &Address) -> FheResult<Euint>;

    /// Reinterpret at another width, truncating when narrowing.
    fn cast(&mut self, value: Euint, width: Width) -> FheResult<Euint>;

    fn add(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Euint>;

    fn sub(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Euint>;

    fn mul_scalar(&mut self, lhs: Euint, rhs: u128) -> FheResult<Euint>;

    /// Integer division by a public divisor.
    fn div_scalar(&mut self, lhs: Euint, rhs: u128) -> FheResult<Euint>;

    fn cmp_le(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Ebool>;

    fn cmp_eq(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Ebool>;

    fn not(&mut self, value: Ebool) -> FheResult<Ebool>;

    fn and(&mut self, lhs: Ebool, rhs: Ebool) -> FheResult<Ebool>;

    /// Oblivious choice: `if_true` where `cond` holds, else `if_false`.
    fn select(&mut self, cond: Ebool, if_true: Euint, if_false: Euint) -> FheResult<Euint>;

    /// Grant `account` the right to decrypt `handle` for itself.
    fn allow(&mut self, handle: Handle, account: &Address) -> FheResult<()>;

    fn cmp_lt(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Ebool> {
        let ge = self.cmp_le(rhs, lhs)?;
        self.not(ge)
    }

    fn cmp_ne(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Ebool> {
        let eq = self.cmp_eq(lhs, rhs)?;
        self.not(eq)
    }

    fn minimum(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Euint> {
        let lhs_smaller = self.cmp_le(lhs, rhs)?;
        self.select(lhs_smaller, lhs, rhs)
    }

    fn maximum(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Euint> {
        let lhs_smaller = self.cmp_le(lhs, rhs)?;
        self.select(lhs_smaller, rhs, lhs)
    }
}

/// Plaintext oracle.
///
/// Implemented by the coprocessor and consumed only by the decryption
/// gateway and by account-scoped reads. Auction logic never sees it.
pub trait Decryptor {
    /// Decrypt a handle for the gateway. Booleans decode to `0` or `1`.
    fn decrypt(&self, handle: &Handle) -> FheResult<u128>;

    /// Decrypt a handle on behalf of `account`, subject to its access grants.
    fn user_decrypt(&self, handle: &Handle, account: &Address) -> FheResult<u128>;
}
