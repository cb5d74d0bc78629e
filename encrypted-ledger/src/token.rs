//! Confidential token store and the conventional plaintext token leg.

use std::collections::BTreeMap;

use tracing::debug;

use crate::acl::AccessControl;
use crate::coprocessor::Coprocessor;
use crate::errors::{LedgerError, Result};
use crate::types::{Address, EncryptedInput, Handle};

/// Handles produced by one clamped confidential debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampedDebit {
    /// Effective debited amount: the requested amount, or zero when the
    /// balance could not cover it.
    pub actual: Handle,
    /// Balance handle after the debit.
    pub remaining: Handle,
}

/// Truncating debit shared by every confidential spend path. When the
/// balance cannot cover the amount, the effective amount becomes zero;
/// reverting instead would leak the comparison through an observable
/// failure. Callers must treat "effective amount may be less than
/// requested" as normal operation, not a fault.
pub fn clamped_debit(
    copro: &mut Coprocessor,
    balance: Handle,
    amount: Handle,
) -> Result<ClampedDebit> {
    let shortfall = copro.lt(balance, amount)?;
    let zero = copro.trivial_encrypt(0);
    let actual = copro.select(shortfall, zero, amount)?;
    let remaining = copro.sub(balance, actual)?;
    Ok(ClampedDebit { actual, remaining })
}

/// New handles produced by one confidential transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Effective transferred amount (zero when the balance fell short).
    pub actual: Handle,
    pub from_balance: Handle,
    pub to_balance: Handle,
}

/// Confidential-value store: at most one live balance handle per account,
/// replaced atomically by the transaction that produced it.
#[derive(Debug, Clone)]
pub struct EncryptedToken {
    name: String,
    symbol: String,
    contract: Address,
    minter: Address,
    total_supply: u64,
    balances: BTreeMap<Address, Handle>,
}

impl EncryptedToken {
    pub fn new(name: String, symbol: String, minter: Address) -> Self {
        let contract = Address::contract(&format!("encrypted-token:{symbol}"));
        Self {
            name,
            symbol,
            contract,
            minter,
            total_supply: 0,
            balances: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Supply is public; only balances are confidential.
    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    pub fn balance_of(&self, account: Address) -> Option<Handle> {
        self.balances.get(&account).copied()
    }

    fn balance_or_zero(&self, copro: &mut Coprocessor, account: Address) -> Handle {
        match self.balances.get(&account) {
            Some(handle) => *handle,
            None => copro.trivial_encrypt(0),
        }
    }

    fn set_balance(&mut self, acl: &mut AccessControl, account: Address, handle: Handle) {
        acl.allow(handle, account);
        acl.allow(handle, self.contract);
        self.balances.insert(account, handle);
    }

    /// Minter-gated issuance: plaintext amount, confidential balance.
    pub fn mint(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        caller: Address,
        to: Address,
        amount: u64,
    ) -> Result<Handle> {
        if caller != self.minter {
            return Err(LedgerError::AccessDenied);
        }
        let current = self.balance_or_zero(copro, to);
        let minted = copro.trivial_encrypt(amount);
        let next = copro.add(current, minted)?;
        self.total_supply = self.total_supply.wrapping_add(amount);
        self.set_balance(acl, to, next);
        debug!(to = %to.hex(), amount, "confidential balance minted");
        Ok(next)
    }

    /// Confidential transfer of a freshly-encrypted amount. The proof must
    /// bind the ciphertext to this token contract and to `from`.
    pub fn transfer(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        from: Address,
        to: Address,
        input: &EncryptedInput,
    ) -> Result<TransferOutcome> {
        let amount = copro.verify_and_encrypt(input, self.contract, from)?;
        acl.allow(amount, from);
        self.transfer_handle(copro, acl, from, to, amount)
    }

    /// Confidential transfer of an amount handle the sender already holds
    /// access to (escrow moves, refunds). Debits `from` and credits `to`
    /// atomically; an uncovered amount truncates to a zero effective amount.
    pub fn transfer_handle(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        from: Address,
        to: Address,
        amount: Handle,
    ) -> Result<TransferOutcome> {
        acl.require_allowed(amount, from)?;
        let from_balance = self.balance_or_zero(copro, from);
        let debit = clamped_debit(copro, from_balance, amount)?;
        let to_balance_before = self.balance_or_zero(copro, to);
        let to_balance = copro.add(to_balance_before, debit.actual)?;
        self.set_balance(acl, from, debit.remaining);
        self.set_balance(acl, to, to_balance);
        // Both parties may disclose the effective amount.
        acl.allow(debit.actual, from);
        acl.allow(debit.actual, to);
        acl.allow(debit.actual, self.contract);
        Ok(TransferOutcome {
            actual: debit.actual,
            from_balance: debit.remaining,
            to_balance,
        })
    }
}

/// Conventional plaintext token: the external collaborator for the
/// deposit/withdraw legs. Reverts normally on shortfall; nothing here is
/// confidential.
#[derive(Debug, Clone)]
pub struct PlainToken {
    contract: Address,
    symbol: String,
    balances: BTreeMap<Address, u64>,
    allowances: BTreeMap<(Address, Address), u64>,
}

impl PlainToken {
    pub fn new(symbol: &str) -> Self {
        Self {
            contract: Address::contract(&format!("plain-token:{symbol}")),
            symbol: symbol.to_string(),
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn balance_of(&self, account: Address) -> u64 {
        self.balances.get(&account).copied().unwrap_or(0)
    }

    pub fn mint(&mut self, to: Address, amount: u64) {
        let entry = self.balances.entry(to).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub fn transfer(&mut self, from: Address, to: Address, amount: u64) -> Result<()> {
        let from_balance = self.balance_of(from);
        if from_balance < amount {
            return Err(LedgerError::InsufficientPlainBalance);
        }
        self.balances.insert(from, from_balance - amount);
        let entry = self.balances.entry(to).or_insert(0);
        *entry = entry.saturating_add(amount);
        Ok(())
    }

    pub fn approve(&mut self, owner: Address, spender: Address, amount: u64) {
        self.allowances.insert((owner, spender), amount);
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> u64 {
        self.allowances.get(&(owner, spender)).copied().unwrap_or(0)
    }

    pub fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: u64,
    ) -> Result<()> {
        let allowed = self.allowance(from, spender);
        if allowed < amount {
            return Err(LedgerError::InsufficientAllowance);
        }
        self.transfer(from, to, amount)?;
        self.allowances.insert((from, spender), allowed - amount);
        Ok(())
    }
}
