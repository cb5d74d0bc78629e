//! Top-level execution state. One `Ledger` value owns every component and
//! serializes all transitions, the way a host chain applies transactions in
//! a total order. Entities live in arena-style maps keyed by stable ids;
//! nothing is reachable through hidden globals.

use std::collections::BTreeMap;

use k256::ecdsa::VerifyingKey;

use crate::acl::AccessControl;
use crate::auction::Auction;
use crate::coprocessor::Coprocessor;
use crate::errors::{LedgerError, Result};
use crate::exchange::{Exchange, Side};
use crate::gateway::{
    DecryptionCallback, DecryptionGateway, DecryptionRequested, KmsVerifier, ReencryptAuth,
    SealedValue,
};
use crate::kms::{KmsSignature, NetworkKey};
use crate::token::{EncryptedToken, PlainToken, TransferOutcome};
use crate::types::{Address, EncryptedInput, Handle};

/// Genesis parameters for one in-process ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub network_seed: [u8; 32],
    pub kms_signers: Vec<VerifyingKey>,
    pub kms_threshold: usize,
    pub token_name: String,
    pub token_symbol: String,
    pub minter: Address,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    timestamp: u64,
    pub coprocessor: Coprocessor,
    pub acl: AccessControl,
    pub gateway: DecryptionGateway,
    pub token: EncryptedToken,
    plain_tokens: BTreeMap<Address, PlainToken>,
    auctions: BTreeMap<u64, Auction>,
    exchanges: BTreeMap<u64, Exchange>,
    next_auction_id: u64,
    next_exchange_id: u64,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Result<Self> {
        let network = NetworkKey::from_seed(config.network_seed)?;
        Ok(Self {
            timestamp: 0,
            coprocessor: Coprocessor::new(network),
            acl: AccessControl::new(),
            gateway: DecryptionGateway::new(KmsVerifier::new(
                config.kms_signers,
                config.kms_threshold,
            )),
            token: EncryptedToken::new(config.token_name, config.token_symbol, config.minter),
            plain_tokens: BTreeMap::new(),
            auctions: BTreeMap::new(),
            exchanges: BTreeMap::new(),
            next_auction_id: 1,
            next_exchange_id: 1,
        })
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Advances the ledger clock.
    pub fn advance_time(&mut self, seconds: u64) {
        self.timestamp = self.timestamp.saturating_add(seconds);
    }

    /// Public half of the network key, for client-side input encryption and
    /// unsealing.
    pub fn network_public(&self) -> VerifyingKey {
        self.coprocessor.network_public()
    }

    // --- plaintext assets ---

    /// Registers a conventional plaintext token and returns its address.
    pub fn register_plain_token(&mut self, symbol: &str) -> Address {
        let token = PlainToken::new(symbol);
        let address = token.contract();
        self.plain_tokens.insert(address, token);
        address
    }

    pub fn plain_token(&self, asset: Address) -> Option<&PlainToken> {
        self.plain_tokens.get(&asset)
    }

    pub fn mint_plain(&mut self, asset: Address, to: Address, amount: u64) -> Result<()> {
        self.plain_tokens
            .get_mut(&asset)
            .ok_or(LedgerError::UnknownAsset)?
            .mint(to, amount);
        Ok(())
    }

    pub fn approve_plain(
        &mut self,
        asset: Address,
        owner: Address,
        spender: Address,
        amount: u64,
    ) -> Result<()> {
        self.plain_tokens
            .get_mut(&asset)
            .ok_or(LedgerError::UnknownAsset)?
            .approve(owner, spender, amount);
        Ok(())
    }

    pub fn plain_balance_of(&self, asset: Address, account: Address) -> Result<u64> {
        Ok(self
            .plain_tokens
            .get(&asset)
            .ok_or(LedgerError::UnknownAsset)?
            .balance_of(account))
    }

    // --- confidential token ---

    pub fn mint(&mut self, caller: Address, to: Address, amount: u64) -> Result<Handle> {
        self.token
            .mint(&mut self.coprocessor, &mut self.acl, caller, to, amount)
    }

    pub fn transfer(
        &mut self,
        from: Address,
        to: Address,
        input: &EncryptedInput,
    ) -> Result<TransferOutcome> {
        self.token
            .transfer(&mut self.coprocessor, &mut self.acl, from, to, input)
    }

    pub fn balance_of(&self, account: Address) -> Option<Handle> {
        self.token.balance_of(account)
    }

    /// Owner-gated ACL delegation.
    pub fn grant_access(
        &mut self,
        handle: Handle,
        caller: Address,
        principal: Address,
    ) -> Result<()> {
        self.acl.grant(handle, caller, principal)
    }

    /// Disclosure path: re-encrypts a handle under the requester's ephemeral
    /// key, gated by the ACL and the signed authorization.
    pub fn reencrypt(
        &self,
        handle: Handle,
        contract: Address,
        requester_public: &VerifyingKey,
        auth: &ReencryptAuth,
    ) -> Result<SealedValue> {
        self.gateway.reencrypt(
            &self.coprocessor,
            &self.acl,
            handle,
            contract,
            requester_public,
            auth,
        )
    }

    // --- auctions ---

    /// Opens a sealed-bid auction ending `duration` seconds from now.
    pub fn open_auction(&mut self, beneficiary: Address, duration: u64) -> u64 {
        let auction_id = self.next_auction_id;
        self.next_auction_id += 1;
        let end_time = self.timestamp.saturating_add(duration);
        self.auctions
            .insert(auction_id, Auction::new(auction_id, beneficiary, end_time));
        auction_id
    }

    pub fn auction(&self, auction_id: u64) -> Option<&Auction> {
        self.auctions.get(&auction_id)
    }

    pub fn bid(
        &mut self,
        auction_id: u64,
        bidder: Address,
        input: &EncryptedInput,
    ) -> Result<Handle> {
        let timestamp = self.timestamp;
        let auction = self
            .auctions
            .get_mut(&auction_id)
            .ok_or(LedgerError::UnknownAuction(auction_id))?;
        auction.bid(
            &mut self.coprocessor,
            &mut self.acl,
            &mut self.token,
            timestamp,
            bidder,
            input,
        )
    }

    pub fn stop_auction(&mut self, auction_id: u64, caller: Address) -> Result<()> {
        self.auctions
            .get_mut(&auction_id)
            .ok_or(LedgerError::UnknownAuction(auction_id))?
            .stop(caller)
    }

    pub fn decrypt_winning_ticket(&mut self, auction_id: u64) -> Result<u64> {
        let timestamp = self.timestamp;
        let auction = self
            .auctions
            .get_mut(&auction_id)
            .ok_or(LedgerError::UnknownAuction(auction_id))?;
        auction.decrypt_winning_ticket(
            &mut self.coprocessor,
            &mut self.acl,
            &mut self.gateway,
            timestamp,
        )
    }

    pub fn auction_end(&mut self, auction_id: u64) -> Result<()> {
        let auction = self
            .auctions
            .get_mut(&auction_id)
            .ok_or(LedgerError::UnknownAuction(auction_id))?;
        auction.finalize(&mut self.coprocessor, &mut self.acl, &mut self.token)
    }

    // --- exchange ---

    /// Opens an order book over two registered plaintext assets.
    pub fn open_exchange(&mut self, base_asset: Address, quote_asset: Address) -> Result<u64> {
        if !self.plain_tokens.contains_key(&base_asset)
            || !self.plain_tokens.contains_key(&quote_asset)
        {
            return Err(LedgerError::UnknownAsset);
        }
        let exchange_id = self.next_exchange_id;
        self.next_exchange_id += 1;
        self.exchanges
            .insert(exchange_id, Exchange::new(exchange_id, base_asset, quote_asset));
        Ok(exchange_id)
    }

    pub fn exchange(&self, exchange_id: u64) -> Option<&Exchange> {
        self.exchanges.get(&exchange_id)
    }

    pub fn deposit(
        &mut self,
        exchange_id: u64,
        owner: Address,
        asset: Address,
        amount: u64,
    ) -> Result<Handle> {
        let exchange = self
            .exchanges
            .get_mut(&exchange_id)
            .ok_or(LedgerError::UnknownExchange(exchange_id))?;
        let asset_token = self
            .plain_tokens
            .get_mut(&asset)
            .ok_or(LedgerError::UnknownAsset)?;
        exchange.deposit(
            &mut self.coprocessor,
            &mut self.acl,
            asset_token,
            owner,
            amount,
        )
    }

    pub fn create_order(
        &mut self,
        exchange_id: u64,
        owner: Address,
        side: Side,
        amount_input: &EncryptedInput,
        price_input: &EncryptedInput,
    ) -> Result<u64> {
        let exchange = self
            .exchanges
            .get_mut(&exchange_id)
            .ok_or(LedgerError::UnknownExchange(exchange_id))?;
        exchange.create_order(
            &mut self.coprocessor,
            &mut self.acl,
            owner,
            side,
            amount_input,
            price_input,
        )
    }

    pub fn fill_order(&mut self, exchange_id: u64, maker_id: u64, taker_id: u64) -> Result<Handle> {
        let exchange = self
            .exchanges
            .get_mut(&exchange_id)
            .ok_or(LedgerError::UnknownExchange(exchange_id))?;
        exchange.fill_order(&mut self.coprocessor, &mut self.acl, maker_id, taker_id)
    }

    pub fn request_fill_status(&mut self, exchange_id: u64, order_id: u64) -> Result<u64> {
        let exchange = self
            .exchanges
            .get_mut(&exchange_id)
            .ok_or(LedgerError::UnknownExchange(exchange_id))?;
        exchange.request_fill_status(
            &mut self.coprocessor,
            &mut self.acl,
            &mut self.gateway,
            order_id,
        )
    }

    pub fn retract_order(
        &mut self,
        exchange_id: u64,
        caller: Address,
        order_id: u64,
    ) -> Result<()> {
        let exchange = self
            .exchanges
            .get_mut(&exchange_id)
            .ok_or(LedgerError::UnknownExchange(exchange_id))?;
        exchange.retract_order(&mut self.coprocessor, &mut self.acl, caller, order_id)
    }

    pub fn withdraw(
        &mut self,
        exchange_id: u64,
        owner: Address,
        asset: Address,
        amount: u64,
    ) -> Result<u64> {
        let exchange = self
            .exchanges
            .get_mut(&exchange_id)
            .ok_or(LedgerError::UnknownExchange(exchange_id))?;
        exchange.withdraw(
            &mut self.coprocessor,
            &mut self.acl,
            &mut self.gateway,
            owner,
            asset,
            amount,
        )
    }

    // --- oracle resolution ---

    /// Verifies a KMS fulfillment and dispatches the callback synchronously
    /// within this call. The callback target is validated before the gateway
    /// marks the request resolved, so a failed dispatch cannot leave a
    /// half-applied result.
    pub fn fulfill_decryption(
        &mut self,
        request_id: u64,
        plaintexts: Vec<u64>,
        signatures: &[KmsSignature],
    ) -> Result<()> {
        let callback = self
            .gateway
            .request(request_id)
            .ok_or(LedgerError::UnknownRequest(request_id))?
            .callback;
        match callback {
            DecryptionCallback::AuctionWinner { auction_id } => {
                if !self.auctions.contains_key(&auction_id) {
                    return Err(LedgerError::UnknownAuction(auction_id));
                }
            }
            DecryptionCallback::OrderFillStatus { exchange_id, .. } => {
                if !self.exchanges.contains_key(&exchange_id) {
                    return Err(LedgerError::UnknownExchange(exchange_id));
                }
            }
            DecryptionCallback::ExchangeWithdraw {
                exchange_id, asset, ..
            } => {
                if !self.exchanges.contains_key(&exchange_id) {
                    return Err(LedgerError::UnknownExchange(exchange_id));
                }
                if !self.plain_tokens.contains_key(&asset) {
                    return Err(LedgerError::UnknownAsset);
                }
            }
        }

        let resolved = self
            .gateway
            .fulfill_decryption(request_id, plaintexts, signatures)?;
        match resolved.callback {
            DecryptionCallback::AuctionWinner { auction_id } => self
                .auctions
                .get_mut(&auction_id)
                .ok_or(LedgerError::UnknownAuction(auction_id))?
                .resolve_winning_ticket(&resolved.plaintexts),
            DecryptionCallback::OrderFillStatus {
                exchange_id,
                order_id,
            } => self
                .exchanges
                .get_mut(&exchange_id)
                .ok_or(LedgerError::UnknownExchange(exchange_id))?
                .resolve_fill_status(order_id, &resolved.plaintexts),
            DecryptionCallback::ExchangeWithdraw {
                exchange_id,
                account,
                asset,
            } => {
                let exchange = self
                    .exchanges
                    .get_mut(&exchange_id)
                    .ok_or(LedgerError::UnknownExchange(exchange_id))?;
                let asset_token = self
                    .plain_tokens
                    .get_mut(&asset)
                    .ok_or(LedgerError::UnknownAsset)?;
                exchange.resolve_withdraw(asset_token, account, &resolved.plaintexts)
            }
        }
    }

    /// Drains pending decryption events for the off-ledger KMS network.
    pub fn take_decryption_events(&mut self) -> Vec<DecryptionRequested> {
        self.gateway.take_events()
    }
}
