//! In-memory coprocessor.
//!
//! Plaintexts live in a map keyed by handle. Handles are derived from a
//! counter through SHA-256 so they reveal nothing about the values behind
//! them, matching what an external observer of a real coprocessor sees.

use std::collections::{HashMap, HashSet};

use auction_types::{Address, Handle, Width};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::FheError;
use crate::ops::{Decryptor, Ebool, EncryptedInput, Euint, Fhe, FheResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plain {
    Bool(bool),
    Uint { value: u128, width: Width },
}

/// Plaintext-backed implementation of [`Fhe`] and [`Decryptor`].
///
/// Every ciphertext ever produced stays readable for the life of the
/// coprocessor, intermediates included. Memory grows with the number of
/// operations; nothing is pruned.
#[derive(Debug, Default)]
pub struct MockFhe {
    values: HashMap<Handle, Plain>,
    acl: HashMap<Handle, HashSet<Address>>,
    nonce: u64,
}

impl MockFhe {
    /// Create an empty coprocessor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ciphertexts held.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Encrypt `value` client-side for `owner`, producing a call input.
    pub fn encrypt_input(&mut self, value: u128, width: Width, owner: &Address) -> EncryptedInput {
        let encrypted = self.store_uint(value, width);
        self.grant(encrypted.handle, owner);
        EncryptedInput {
            handle: encrypted.handle,
            width,
            proof: input_proof(&encrypted.handle, width, owner),
        }
    }

    fn fresh_handle(&mut self) -> Handle {
        let mut hasher = Sha256::new();
        hasher.update(b"MOCK_FHE_HANDLE_V1:");
        hasher.update(self.nonce.to_le_bytes());
        self.nonce += 1;
        Handle(hasher.finalize().into())
    }

    fn store_uint(&mut self, value: u128, width: Width) -> Euint {
        let handle = self.fresh_handle();
        self.values.insert(
            handle,
            Plain::Uint {
                value: width.truncate(value),
                width,
            },
        );
        Euint { handle, width }
    }

    fn store_bool(&mut self, value: bool) -> Ebool {
        let handle = self.fresh_handle();
        self.values.insert(handle, Plain::Bool(value));
        Ebool { handle }
    }

    fn load(&self, handle: &Handle) -> FheResult<Plain> {
        self.values
            .get(handle)
            .copied()
            .ok_or_else(|| FheError::UnknownHandle(handle.to_hex()))
    }

    fn uint(&self, value: Euint) -> FheResult<u128> {
        match self.load(&value.handle)? {
            Plain::Uint { value: v, width } if width == value.width => Ok(v),
            _ => Err(FheError::TypeMismatch { expected: "euint" }),
        }
    }

    fn boolean(&self, value: Ebool) -> FheResult<bool> {
        match self.load(&value.handle)? {
            Plain::Bool(b) => Ok(b),
            Plain::Uint { .. } => Err(FheError::TypeMismatch { expected: "ebool" }),
        }
    }

    fn operands(&self, lhs: Euint, rhs: Euint) -> FheResult<(u128, u128, Width)> {
        Ok((self.uint(lhs)?, self.uint(rhs)?, lhs.width.max(rhs.width)))
    }

    fn grant(&mut self, handle: Handle, account: &Address) {
        self.acl.entry(handle).or_default().insert(*account);
    }
}

fn input_proof(handle: &Handle, width: Width, owner: &Address) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"MOCK_FHE_INPUT_V1:");
    hasher.update(handle.0);
    hasher.update([width.bits() as u8]);
    hasher.update(owner);
    hasher.finalize().into()
}

impl Fhe for MockFhe {
    fn trivial(&mut self, value: u128, width: Width) -> Euint {
        self.store_uint(value, width)
    }

    fn trivial_bool(&mut self, value: bool) -> Ebool {
        self.store_bool(value)
    }

    fn verify_input(&mut self, input: &EncryptedInput, sender: &Address) -> FheResult<Euint> {
        if input.proof != input_proof(&input.handle, input.width, sender) {
            return Err(FheError::InvalidInputProof);
        }
        match self.load(&input.handle)? {
            Plain::Uint { width, .. } if width == input.width => Ok(Euint {
                handle: input.handle,
                width,
            }),
            _ => Err(FheError::InputWidthMismatch),
        }
    }

    fn cast(&mut self, value: Euint, width: Width) -> FheResult<Euint> {
        let v = self.uint(value)?;
        Ok(self.store_uint(v, width))
    }

    fn add(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Euint> {
        let (a, b, width) = self.operands(lhs, rhs)?;
        Ok(self.store_uint(a.wrapping_add(b), width))
    }

    fn sub(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Euint> {
        let (a, b, width) = self.operands(lhs, rhs)?;
        Ok(self.store_uint(a.wrapping_sub(b), width))
    }

    fn mul_scalar(&mut self, lhs: Euint, rhs: u128) -> FheResult<Euint> {
        let a = self.uint(lhs)?;
        Ok(self.store_uint(a.wrapping_mul(rhs), lhs.width))
    }

    fn div_scalar(&mut self, lhs: Euint, rhs: u128) -> FheResult<Euint> {
        if rhs == 0 {
            return Err(FheError::DivisionByZero);
        }
        let a = self.uint(lhs)?;
        Ok(self.store_uint(a / rhs, lhs.width))
    }

    fn cmp_le(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Ebool> {
        let (a, b, _) = self.operands(lhs, rhs)?;
        Ok(self.store_bool(a <= b))
    }

    fn cmp_eq(&mut self, lhs: Euint, rhs: Euint) -> FheResult<Ebool> {
        let (a, b, _) = self.operands(lhs, rhs)?;
        Ok(self.store_bool(a == b))
    }

    fn not(&mut self, value: Ebool) -> FheResult<Ebool> {
        let v = self.boolean(value)?;
        Ok(self.store_bool(!v))
    }

    fn and(&mut self, lhs: Ebool, rhs: Ebool) -> FheResult<Ebool> {
        let (a, b) = (self.boolean(lhs)?, self.boolean(rhs)?);
        Ok(self.store_bool(a && b))
    }

    fn select(&mut self, cond: Ebool, if_true: Euint, if_false: Euint) -> FheResult<Euint> {
        let c = self.boolean(cond)?;
        let (a, b, width) = self.operands(if_true, if_false)?;
        Ok(self.store_uint(if c { a } else { b }, width))
    }

    fn allow(&mut self, handle: Handle, account: &Address) -> FheResult<()> {
        self.load(&handle)?;
        trace!(handle = handle.to_hex(), account = hex::encode(account), "Granted access");
        self.grant(handle, account);
        Ok(())
    }
}

impl Decryptor for MockFhe {
    fn decrypt(&self, handle: &Handle) -> FheResult<u128> {
        match self.load(handle)? {
            Plain::Bool(b) => Ok(b as u128),
            Plain::Uint { value, .. } => Ok(value),
        }
    }

    fn user_decrypt(&self, handle: &Handle, account: &Address) -> FheResult<u128> {
        let allowed = self
            .acl
            .get(handle)
            .map(|accounts| accounts.contains(account))
            .unwrap_or(false);
        if !allowed {
            return Err(FheError::AccessDenied);
        }
        self.decrypt(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_arithmetic_wraps_at_width() {
        let mut fhe = MockFhe::new();
        let a = fhe.trivial(250, Width::U8);
        let b = fhe.trivial(10, Width::U8);

        let sum = fhe.add(a, b).unwrap();
        assert_eq!(fhe.decrypt(&sum.handle).unwrap(), 4);

        let diff = fhe.sub(b, a).unwrap();
        assert_eq!(fhe.decrypt(&diff.handle).unwrap(), 16);
    }

    #[test]
    fn test_ciphertexts_are_retained() {
        let mut fhe = MockFhe::new();
        let first = fhe.trivial(7, Width::U32);
        let mut acc = first;
        for _ in 0..10 {
            acc = fhe.add(acc, first).unwrap();
        }
        assert_eq!(fhe.len(), 11);
        assert_eq!(fhe.decrypt(&first.handle).unwrap(), 7);
        assert_eq!(fhe.decrypt(&acc.handle).unwrap(), 77);
    }

    #[test]
    fn test_mixed_widths_promote() {
        let mut fhe = MockFhe::new();
        let small = fhe.trivial(200, Width::U8);
        let wide = fhe.trivial(100, Width::U16);

        let sum = fhe.add(small, wide).unwrap();
        assert_eq!(sum.width, Width::U16);
        assert_eq!(fhe.decrypt(&sum.handle).unwrap(), 300);
    }

    #[test]
    fn test_select_and_comparisons_match_plaintext() {
        let mut fhe = MockFhe::new();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let x: u64 = rng.gen_range(0..1_000);
            let y: u64 = rng.gen_range(0..1_000);
            let ex = fhe.trivial(x as u128, Width::U64);
            let ey = fhe.trivial(y as u128, Width::U64);

            let le = fhe.cmp_le(ex, ey).unwrap();
            let lt = fhe.cmp_lt(ex, ey).unwrap();
            let ne = fhe.cmp_ne(ex, ey).unwrap();
            let min = fhe.minimum(ex, ey).unwrap();
            let max = fhe.maximum(ex, ey).unwrap();

            assert_eq!(fhe.decrypt(&le.handle).unwrap(), (x <= y) as u128);
            assert_eq!(fhe.decrypt(&lt.handle).unwrap(), (x < y) as u128);
            assert_eq!(fhe.decrypt(&ne.handle).unwrap(), (x != y) as u128);
            assert_eq!(fhe.decrypt(&min.handle).unwrap(), x.min(y) as u128);
            assert_eq!(fhe.decrypt(&max.handle).unwrap(), x.max(y) as u128);
        }
    }

    #[test]
    fn test_div_by_zero_rejected() {
        let mut fhe = MockFhe::new();
        let a = fhe.trivial(10, Width::U32);
        assert_eq!(fhe.div_scalar(a, 0), Err(FheError::DivisionByZero));
    }

    #[test]
    fn test_input_proof_bound_to_sender() {
        let mut fhe = MockFhe::new();
        let alice = [1u8; 32];
        let mallory = [2u8; 32];

        let input = fhe.encrypt_input(42, Width::U64, &alice);
        assert!(fhe.verify_input(&input, &alice).is_ok());
        assert_eq!(
            fhe.verify_input(&input, &mallory),
            Err(FheError::InvalidInputProof)
        );
    }

    #[test]
    fn test_user_decrypt_respects_acl() {
        let mut fhe = MockFhe::new();
        let alice = [1u8; 32];
        let bob = [2u8; 32];

        let secret = fhe.trivial(99, Width::U8);
        assert_eq!(
            fhe.user_decrypt(&secret.handle, &alice),
            Err(FheError::AccessDenied)
        );

        fhe.allow(secret.handle, &alice).unwrap();
        assert_eq!(fhe.user_decrypt(&secret.handle, &alice).unwrap(), 99);
        assert_eq!(
            fhe.user_decrypt(&secret.handle, &bob),
            Err(FheError::AccessDenied)
        );
    }

    #[test]
    fn test_type_confusion_rejected() {
        let mut fhe = MockFhe::new();
        let flag = fhe.trivial_bool(true);
        let forged = Euint {
            handle: flag.handle,
            width: Width::U8,
        };
        let one = fhe.trivial(1, Width::U8);
        assert!(matches!(
            fhe.add(forged, one),
            Err(FheError::TypeMismatch { .. })
        ));
    }
}
