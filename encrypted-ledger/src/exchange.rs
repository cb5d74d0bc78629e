//! Confidential order-book exchange: per-account, per-asset encrypted
//! escrow with plaintext deposit/withdraw legs.
//!
//! Escrow is distinct from general confidential balances so an open order's
//! funds cannot be spent elsewhere. Order status is advisory while open:
//! the ledger cannot branch on an encrypted remaining amount, so the
//! transition to `Filled` waits for an explicit fill-status decryption.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::acl::AccessControl;
use crate::coprocessor::Coprocessor;
use crate::errors::{LedgerError, Result};
use crate::gateway::{DecryptionCallback, DecryptionGateway};
use crate::token::{clamped_debit, PlainToken};
use crate::types::{Address, EncryptedInput, Handle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Filled,
    Retracted,
}

/// One resting order. Price is immutable; the amount handle shrinks only by
/// fills. Open orders stay fillable until retracted or a verified
/// fill-status callback flips them to `Filled`.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: u64,
    pub owner: Address,
    pub side: Side,
    /// Remaining amount.
    pub amount: Handle,
    pub price: Handle,
    pub status: OrderStatus,
    status_request: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Exchange {
    id: u64,
    contract: Address,
    base_asset: Address,
    quote_asset: Address,
    escrow: BTreeMap<(Address, Address), Handle>,
    orders: BTreeMap<u64, Order>,
    next_order_id: u64,
}

impl Exchange {
    pub(crate) fn new(id: u64, base_asset: Address, quote_asset: Address) -> Self {
        Self {
            id,
            contract: Address::contract(&format!("exchange:{id}")),
            base_asset,
            quote_asset,
            escrow: BTreeMap::new(),
            orders: BTreeMap::new(),
            next_order_id: 1,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn base_asset(&self) -> Address {
        self.base_asset
    }

    pub fn quote_asset(&self) -> Address {
        self.quote_asset
    }

    pub fn order(&self, order_id: u64) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    pub fn escrow_of(&self, account: Address, asset: Address) -> Option<Handle> {
        self.escrow.get(&(account, asset)).copied()
    }

    fn require_asset(&self, asset: Address) -> Result<()> {
        if asset == self.base_asset || asset == self.quote_asset {
            Ok(())
        } else {
            Err(LedgerError::UnknownAsset)
        }
    }

    /// Asset an order's escrow is funded from.
    fn funding_asset(&self, side: Side) -> Address {
        match side {
            Side::Buy => self.quote_asset,
            Side::Sell => self.base_asset,
        }
    }

    /// Asset an order receives when filled.
    fn receiving_asset(&self, side: Side) -> Address {
        match side {
            Side::Buy => self.base_asset,
            Side::Sell => self.quote_asset,
        }
    }

    fn escrow_or_zero(
        &self,
        copro: &mut Coprocessor,
        account: Address,
        asset: Address,
    ) -> Handle {
        match self.escrow.get(&(account, asset)) {
            Some(handle) => *handle,
            None => copro.trivial_encrypt(0),
        }
    }

    fn set_escrow(
        &mut self,
        acl: &mut AccessControl,
        account: Address,
        asset: Address,
        handle: Handle,
    ) {
        acl.allow(handle, account);
        acl.allow(handle, self.contract);
        self.escrow.insert((account, asset), handle);
    }

    /// Moves a plaintext amount into confidential escrow. The depositor must
    /// have approved the exchange on the plaintext token.
    pub fn deposit(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        asset_token: &mut PlainToken,
        owner: Address,
        amount: u64,
    ) -> Result<Handle> {
        let asset = asset_token.contract();
        self.require_asset(asset)?;
        asset_token.transfer_from(self.contract, owner, self.contract, amount)?;
        let fresh = copro.trivial_encrypt(amount);
        let current = self.escrow_or_zero(copro, owner, asset);
        let next = copro.add(current, fresh)?;
        self.set_escrow(acl, owner, asset, next);
        debug!(owner = %owner.hex(), amount, "escrow deposit");
        Ok(next)
    }

    /// Records an open order funded from the side's escrow. An amount the
    /// escrow cannot cover truncates to a zero effective amount instead of
    /// failing.
    pub fn create_order(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        owner: Address,
        side: Side,
        amount_input: &EncryptedInput,
        price_input: &EncryptedInput,
    ) -> Result<u64> {
        let amount = copro.verify_and_encrypt(amount_input, self.contract, owner)?;
        let price = copro.verify_and_encrypt(price_input, self.contract, owner)?;
        let asset = self.funding_asset(side);
        let escrow = self.escrow_or_zero(copro, owner, asset);
        let debit = clamped_debit(copro, escrow, amount)?;
        self.set_escrow(acl, owner, asset, debit.remaining);

        let order_id = self.next_order_id;
        self.next_order_id += 1;
        acl.allow(debit.actual, owner);
        acl.allow(debit.actual, self.contract);
        acl.allow(price, owner);
        acl.allow(price, self.contract);
        self.orders.insert(
            order_id,
            Order {
                id: order_id,
                owner,
                side,
                amount: debit.actual,
                price,
                status: OrderStatus::Open,
                status_request: None,
            },
        );
        info!(order = order_id, "order created");
        Ok(order_id)
    }

    /// Matches two open opposite-side orders. The fill quantity is
    /// `min(maker.amount, taker.amount)` computed homomorphically; each
    /// party's opposite-asset escrow grows by the fill.
    pub fn fill_order(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        maker_id: u64,
        taker_id: u64,
    ) -> Result<Handle> {
        if maker_id == taker_id {
            return Err(LedgerError::OrderNotFillable);
        }
        let maker = self
            .orders
            .get(&maker_id)
            .ok_or(LedgerError::UnknownOrder(maker_id))?
            .clone();
        let taker = self
            .orders
            .get(&taker_id)
            .ok_or(LedgerError::UnknownOrder(taker_id))?
            .clone();
        if maker.status != OrderStatus::Open || taker.status != OrderStatus::Open {
            return Err(LedgerError::OrderNotFillable);
        }
        if maker.side == taker.side {
            return Err(LedgerError::OrderNotFillable);
        }

        let taker_smaller = copro.lt(taker.amount, maker.amount)?;
        let fill = copro.select(taker_smaller, taker.amount, maker.amount)?;
        let maker_remaining = copro.sub(maker.amount, fill)?;
        let taker_remaining = copro.sub(taker.amount, fill)?;

        acl.allow(fill, maker.owner);
        acl.allow(fill, taker.owner);
        acl.allow(fill, self.contract);

        for (order, remaining) in [(&maker, maker_remaining), (&taker, taker_remaining)] {
            let asset = self.receiving_asset(order.side);
            let current = self.escrow_or_zero(copro, order.owner, asset);
            let next = copro.add(current, fill)?;
            self.set_escrow(acl, order.owner, asset, next);
            acl.allow(remaining, order.owner);
            acl.allow(remaining, self.contract);
        }
        if let Some(entry) = self.orders.get_mut(&maker_id) {
            entry.amount = maker_remaining;
        }
        if let Some(entry) = self.orders.get_mut(&taker_id) {
            entry.amount = taker_remaining;
        }
        info!(maker = maker_id, taker = taker_id, "orders filled");
        Ok(fill)
    }

    /// Issues (or reuses) the deferred remaining-is-zero check for an order.
    /// The status transition itself waits for the verified callback.
    pub fn request_fill_status(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        gateway: &mut DecryptionGateway,
        order_id: u64,
    ) -> Result<u64> {
        let contract = self.contract;
        let exchange_id = self.id;
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(LedgerError::UnknownOrder(order_id))?;
        if order.status != OrderStatus::Open {
            return Err(LedgerError::OrderNotFillable);
        }
        if let Some(request_id) = order.status_request {
            return Ok(request_id);
        }
        let one = copro.trivial_encrypt(1);
        // remaining < 1 is the only zero-test expressible with strict lt.
        let drained = copro.lt(order.amount, one)?;
        acl.allow(drained, contract);
        let request_id = gateway.request_decryption(
            copro,
            acl,
            contract,
            vec![drained],
            DecryptionCallback::OrderFillStatus {
                exchange_id,
                order_id,
            },
        )?;
        order.status_request = Some(request_id);
        Ok(request_id)
    }

    /// Oracle callback for the fill-status predicate.
    pub(crate) fn resolve_fill_status(&mut self, order_id: u64, plaintexts: &[u64]) -> Result<()> {
        if plaintexts.len() != 1 {
            return Err(LedgerError::MalformedFulfillment);
        }
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(LedgerError::UnknownOrder(order_id))?;
        order.status_request = None;
        if plaintexts[0] != 0 && order.status == OrderStatus::Open {
            order.status = OrderStatus::Filled;
            info!(order = order_id, "order fully filled");
        }
        Ok(())
    }

    /// Owner-only retraction; the remaining escrowed amount returns to the
    /// owner's escrow balance.
    pub fn retract_order(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        caller: Address,
        order_id: u64,
    ) -> Result<()> {
        let order = self
            .orders
            .get(&order_id)
            .ok_or(LedgerError::UnknownOrder(order_id))?
            .clone();
        if order.owner != caller {
            return Err(LedgerError::AccessDenied);
        }
        if order.status != OrderStatus::Open {
            return Err(LedgerError::OrderNotFillable);
        }
        let asset = self.funding_asset(order.side);
        let current = self.escrow_or_zero(copro, order.owner, asset);
        let next = copro.add(current, order.amount)?;
        self.set_escrow(acl, order.owner, asset, next);
        if let Some(entry) = self.orders.get_mut(&order_id) {
            entry.status = OrderStatus::Retracted;
        }
        info!(order = order_id, "order retracted");
        Ok(())
    }

    /// Two-phase plaintext withdrawal. The truncating escrow debit happens
    /// now; the oracle callback pays out the decrypted effective amount, so
    /// the resolve can never pay more than was already debited. A request
    /// exceeding the escrow pays exactly zero.
    pub fn withdraw(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        gateway: &mut DecryptionGateway,
        owner: Address,
        asset: Address,
        amount: u64,
    ) -> Result<u64> {
        self.require_asset(asset)?;
        let requested = copro.trivial_encrypt(amount);
        let escrow = self.escrow_or_zero(copro, owner, asset);
        let debit = clamped_debit(copro, escrow, requested)?;
        acl.allow(debit.actual, self.contract);
        acl.allow(debit.actual, owner);
        let request_id = gateway.request_decryption(
            copro,
            acl,
            self.contract,
            vec![debit.actual],
            DecryptionCallback::ExchangeWithdraw {
                exchange_id: self.id,
                account: owner,
                asset,
            },
        )?;
        self.set_escrow(acl, owner, asset, debit.remaining);
        info!(owner = %owner.hex(), request_id, "withdrawal requested");
        Ok(request_id)
    }

    /// Oracle callback for a withdrawal: pays the plaintext leg.
    pub(crate) fn resolve_withdraw(
        &mut self,
        asset_token: &mut PlainToken,
        account: Address,
        plaintexts: &[u64],
    ) -> Result<()> {
        if plaintexts.len() != 1 {
            return Err(LedgerError::MalformedFulfillment);
        }
        let amount = plaintexts[0];
        if amount > 0 {
            asset_token.transfer(self.contract, account, amount)?;
        }
        debug!(account = %account.hex(), amount, "withdrawal settled");
        Ok(())
    }
}
