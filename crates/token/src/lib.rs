//! Confidential fungible tokens.
//!
//! Balances and allowances are encrypted. Transfers never fail visibly:
//! an insufficient balance or allowance moves zero and reports an encrypted
//! `false`, so observers cannot tell a failed transfer from a successful one.

use std::collections::HashMap;

use auction_fhe::{Ebool, Euint, Fhe, FheError, FheResult};
use auction_types::{Address, TokenId, Width};
use thiserror::Error;
use tracing::debug;

/// Errors raised by the token registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Unknown token {0}")]
    UnknownToken(String),

    #[error("Token {0} already registered")]
    DuplicateToken(String),

    #[error(transparent)]
    Fhe(#[from] FheError),
}

/// Interface the auction expects from a confidential token.
pub trait ConfidentialToken: Send + Sync {
    fn symbol(&self) -> &str;

    /// Width of encrypted amounts; larger values are not representable.
    fn amount_width(&self) -> Width;

    /// Move `amount` from `from` to `to`. Returns whether it happened.
    fn transfer(
        &mut self,
        fhe: &mut dyn Fhe,
        from: &Address,
        to: &Address,
        amount: Euint,
    ) -> FheResult<Ebool>;

    /// Move `amount` from `from` to `to` against `spender`'s allowance.
    fn transfer_from(
        &mut self,
        fhe: &mut dyn Fhe,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Euint,
    ) -> FheResult<Ebool>;

    /// Let `spender` move up to `amount` of `owner`'s balance.
    fn approve(
        &mut self,
        fhe: &mut dyn Fhe,
        owner: &Address,
        spender: &Address,
        amount: Euint,
    ) -> FheResult<()>;

    /// Credit freshly issued tokens to `to`.
    fn mint(&mut self, fhe: &mut dyn Fhe, to: &Address, amount: u128) -> FheResult<()>;

    fn balance_of(&self, account: &Address) -> Option<Euint>;

    fn total_supply(&self) -> Option<Euint>;
}

/// In-memory confidential token.
#[derive(Debug)]
pub struct ConfidentialLedger {
    symbol: String,
    width: Width,
    balances: HashMap<Address, Euint>,
    allowances: HashMap<(Address, Address), Euint>,
    total_supply: Option<Euint>,
}

impl ConfidentialLedger {
    pub fn new(symbol: impl Into<String>, width: Width) -> Self {
        Self {
            symbol: symbol.into(),
            width,
            balances: HashMap::new(),
            allowances: HashMap::new(),
            total_supply: None,
        }
    }

    fn balance_or_zero(&self, fhe: &mut dyn Fhe, account: &Address) -> Euint {
        match self.balances.get(account) {
            Some(balance) => *balance,
            None => fhe.trivial(0, self.width),
        }
    }

    fn fit(&self, fhe: &mut dyn Fhe, amount: Euint) -> FheResult<Euint> {
        if amount.width == self.width {
            Ok(amount)
        } else {
            fhe.cast(amount, self.width)
        }
    }

    fn set_balance(&mut self, fhe: &mut dyn Fhe, account: &Address, balance: Euint) -> FheResult<()> {
        fhe.allow(balance.handle, account)?;
        self.balances.insert(*account, balance);
        Ok(())
    }

    /// Move `amount` if `ok` holds, zero otherwise.
    fn settle(
        &mut self,
        fhe: &mut dyn Fhe,
        from: &Address,
        to: &Address,
        amount: Euint,
        ok: Ebool,
    ) -> FheResult<Euint> {
        let zero = fhe.trivial(0, self.width);
        let moved = fhe.select(ok, amount, zero)?;

        let from_balance = self.balance_or_zero(fhe, from);
        let debited = fhe.sub(from_balance, moved)?;
        self.set_balance(fhe, from, debited)?;

        let to_balance = self.balance_or_zero(fhe, to);
        let credited = fhe.add(to_balance, moved)?;
        self.set_balance(fhe, to, credited)?;
        Ok(moved)
    }
}

impl ConfidentialToken for ConfidentialLedger {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn amount_width(&self) -> Width {
        self.width
    }

    fn transfer(
        &mut self,
        fhe: &mut dyn Fhe,
        from: &Address,
        to: &Address,
        amount: Euint,
    ) -> FheResult<Ebool> {
        let amount = self.fit(fhe, amount)?;
        let balance = self.balance_or_zero(fhe, from);
        let ok = fhe.cmp_le(amount, balance)?;
        self.settle(fhe, from, to, amount, ok)?;
        debug!(token = %self.symbol, from = hex::encode(from), to = hex::encode(to), "Transfer");
        Ok(ok)
    }

    fn transfer_from(
        &mut self,
        fhe: &mut dyn Fhe,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Euint,
    ) -> FheResult<Ebool> {
        let amount = self.fit(fhe, amount)?;
        let allowance = match self.allowances.get(&(*from, *spender)) {
            Some(allowance) => *allowance,
            None => fhe.trivial(0, self.width),
        };
        let balance = self.balance_or_zero(fhe, from);

        let allowed = fhe.cmp_le(amount, allowance)?;
        let funded = fhe.cmp_le(amount, balance)?;
        let ok = fhe.and(allowed, funded)?;

        let moved = self.settle(fhe, from, to, amount, ok)?;
        let remaining = fhe.sub(allowance, moved)?;
        fhe.allow(remaining.handle, from)?;
        fhe.allow(remaining.handle, spender)?;
        self.allowances.insert((*from, *spender), remaining);

        debug!(token = %self.symbol, spender = hex::encode(spender), from = hex::encode(from), "Transfer from allowance");
        Ok(ok)
    }

    fn approve(
        &mut self,
        fhe: &mut dyn Fhe,
        owner: &Address,
        spender: &Address,
        amount: Euint,
    ) -> FheResult<()> {
        let amount = self.fit(fhe, amount)?;
        fhe.allow(amount.handle, owner)?;
        fhe.allow(amount.handle, spender)?;
        self.allowances.insert((*owner, *spender), amount);
        Ok(())
    }

    fn mint(&mut self, fhe: &mut dyn Fhe, to: &Address, amount: u128) -> FheResult<()> {
        let minted = fhe.trivial(amount, self.width);
        let balance = self.balance_or_zero(fhe, to);
        let credited = fhe.add(balance, minted)?;
        self.set_balance(fhe, to, credited)?;

        let supply = match self.total_supply {
            Some(supply) => fhe.add(supply, minted)?,
            None => minted,
        };
        self.total_supply = Some(supply);
        Ok(())
    }

    fn balance_of(&self, account: &Address) -> Option<Euint> {
        self.balances.get(account).copied()
    }

    fn total_supply(&self) -> Option<Euint> {
        self.total_supply
    }
}

/// Tokens known to the host, by identifier.
#[derive(Default)]
pub struct TokenRegistry {
    tokens: HashMap<TokenId, Box<dyn ConfidentialToken>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: TokenId,
        token: Box<dyn ConfidentialToken>,
    ) -> Result<(), TokenError> {
        if self.tokens.contains_key(&id) {
            return Err(TokenError::DuplicateToken(hex::encode(id)));
        }
        self.tokens.insert(id, token);
        Ok(())
    }

    pub fn contains(&self, id: &TokenId) -> bool {
        self.tokens.contains_key(id)
    }

    pub fn get(&self, id: &TokenId) -> Result<&dyn ConfidentialToken, TokenError> {
        self.tokens
            .get(id)
            .map(|token| token.as_ref())
            .ok_or_else(|| TokenError::UnknownToken(hex::encode(id)))
    }

    pub fn get_mut(&mut self, id: &TokenId) -> Result<&mut Box<dyn ConfidentialToken>, TokenError> {
        self.tokens
            .get_mut(id)
            .ok_or_else(|| TokenError::UnknownToken(hex::encode(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_fhe::{Decryptor, MockFhe};

    const ALICE: Address = [1u8; 32];
    const BOB: Address = [2u8; 32];
    const SPENDER: Address = [3u8; 32];

    fn balance(fhe: &MockFhe, token: &ConfidentialLedger, account: &Address) -> u128 {
        token
            .balance_of(account)
            .map(|b| fhe.decrypt(&b.handle).unwrap())
            .unwrap_or(0)
    }

    #[test]
    fn test_transfer_moves_funds() {
        let mut fhe = MockFhe::new();
        let mut token = ConfidentialLedger::new("BASE", Width::U64);
        token.mint(&mut fhe, &ALICE, 1_000).unwrap();

        let amount = fhe.trivial(400, Width::U64);
        let ok = token.transfer(&mut fhe, &ALICE, &BOB, amount).unwrap();

        assert_eq!(fhe.decrypt(&ok.handle).unwrap(), 1);
        assert_eq!(balance(&fhe, &token, &ALICE), 600);
        assert_eq!(balance(&fhe, &token, &BOB), 400);
    }

    #[test]
    fn test_insufficient_balance_moves_nothing() {
        let mut fhe = MockFhe::new();
        let mut token = ConfidentialLedger::new("BASE", Width::U64);
        token.mint(&mut fhe, &ALICE, 100).unwrap();

        let amount = fhe.trivial(101, Width::U64);
        let ok = token.transfer(&mut fhe, &ALICE, &BOB, amount).unwrap();

        assert_eq!(fhe.decrypt(&ok.handle).unwrap(), 0);
        assert_eq!(balance(&fhe, &token, &ALICE), 100);
        assert_eq!(balance(&fhe, &token, &BOB), 0);
    }

    #[test]
    fn test_transfer_from_respects_allowance() {
        let mut fhe = MockFhe::new();
        let mut token = ConfidentialLedger::new("BASE", Width::U64);
        token.mint(&mut fhe, &ALICE, 1_000).unwrap();

        let allowance = fhe.trivial(300, Width::U64);
        token.approve(&mut fhe, &ALICE, &SPENDER, allowance).unwrap();

        let too_much = fhe.trivial(301, Width::U64);
        let ok = token
            .transfer_from(&mut fhe, &SPENDER, &ALICE, &BOB, too_much)
            .unwrap();
        assert_eq!(fhe.decrypt(&ok.handle).unwrap(), 0);
        assert_eq!(balance(&fhe, &token, &BOB), 0);

        let fits = fhe.trivial(300, Width::U64);
        let ok = token
            .transfer_from(&mut fhe, &SPENDER, &ALICE, &BOB, fits)
            .unwrap();
        assert_eq!(fhe.decrypt(&ok.handle).unwrap(), 1);
        assert_eq!(balance(&fhe, &token, &BOB), 300);
        assert_eq!(balance(&fhe, &token, &ALICE), 700);
    }

    #[test]
    fn test_balances_readable_only_by_owner() {
        let mut fhe = MockFhe::new();
        let mut token = ConfidentialLedger::new("BASE", Width::U64);
        token.mint(&mut fhe, &ALICE, 10).unwrap();

        let handle = token.balance_of(&ALICE).unwrap().handle;
        assert_eq!(fhe.user_decrypt(&handle, &ALICE).unwrap(), 10);
        assert!(fhe.user_decrypt(&handle, &BOB).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = TokenRegistry::new();
        let id = [9u8; 32];
        registry
            .register(id, Box::new(ConfidentialLedger::new("AUC", Width::U64)))
            .unwrap();

        assert!(registry.contains(&id));
        assert_eq!(registry.get(&id).unwrap().symbol(), "AUC");
        assert!(matches!(
            registry.register(id, Box::new(ConfidentialLedger::new("DUP", Width::U64))),
            Err(TokenError::DuplicateToken(_))
        ));
        assert!(matches!(
            registry.get(&[0u8; 32]),
            Err(TokenError::UnknownToken(_))
        ));
    }
}
