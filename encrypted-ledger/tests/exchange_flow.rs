//! Order-book exchange lifecycle: deposit, order, fill, retract, withdraw
//! over confidential escrow.

use encrypted_ledger::client::{self, Wallet};
use encrypted_ledger::crypto::keccak256;
use encrypted_ledger::errors::LedgerError;
use encrypted_ledger::exchange::{OrderStatus, Side};
use encrypted_ledger::kms::{KmsNode, KmsSignature};
use encrypted_ledger::ledger::{Ledger, LedgerConfig};
use encrypted_ledger::types::{Address, Handle};

fn seed(label: &str) -> [u8; 32] {
    keccak256(&[b"exchange-flow-seed", label.as_bytes()])
}

fn wallet(label: &str) -> Wallet {
    Wallet::from_seed(seed(label)).expect("wallet key")
}

struct Harness {
    ledger: Ledger,
    nodes: Vec<KmsNode>,
    exchange_id: u64,
    base: Address,
    quote: Address,
}

fn setup() -> Harness {
    let nodes: Vec<KmsNode> = (0..3)
        .map(|idx| KmsNode::from_seed(idx, seed(&format!("kms-{idx}"))).expect("kms key"))
        .collect();
    let config = LedgerConfig {
        network_seed: seed("network"),
        kms_signers: nodes.iter().map(|node| node.verifying_key()).collect(),
        kms_threshold: 2,
        token_name: "Encrypted".to_string(),
        token_symbol: "ENCR".to_string(),
        minter: wallet("minter").address(),
    };
    let mut ledger = Ledger::new(config).expect("ledger");
    let base = ledger.register_plain_token("BASE");
    let quote = ledger.register_plain_token("QUOTE");
    let exchange_id = ledger.open_exchange(base, quote).expect("exchange");
    Harness {
        ledger,
        nodes,
        exchange_id,
        base,
        quote,
    }
}

impl Harness {
    fn contract(&self) -> Address {
        self.ledger.exchange(self.exchange_id).unwrap().contract()
    }

    fn fund_and_deposit(&mut self, account: Address, asset: Address, amount: u64) {
        let exchange_contract = self.contract();
        self.ledger.mint_plain(asset, account, amount).expect("mint");
        self.ledger
            .approve_plain(asset, account, exchange_contract, amount)
            .expect("approve");
        self.ledger
            .deposit(self.exchange_id, account, asset, amount)
            .expect("deposit");
    }

    fn place_order(&mut self, label: &str, owner: Address, side: Side, amount: u64, price: u64) -> u64 {
        let contract = self.contract();
        let network_public = self.ledger.network_public();
        let amount_input = client::encrypt_input(
            &network_public,
            seed(&format!("{label}-amount")),
            contract,
            owner,
            amount,
        )
        .expect("amount input");
        let price_input = client::encrypt_input(
            &network_public,
            seed(&format!("{label}-price")),
            contract,
            owner,
            price,
        )
        .expect("price input");
        self.ledger
            .create_order(self.exchange_id, owner, side, &amount_input, &price_input)
            .expect("create order")
    }

    fn settle_request(&mut self, request_id: u64) {
        let handles = self
            .ledger
            .gateway
            .request(request_id)
            .expect("request")
            .handles
            .clone();
        let plaintexts: Vec<u64> = handles
            .iter()
            .map(|handle| self.ledger.coprocessor.reveal(*handle).expect("reveal"))
            .collect();
        let signatures: Vec<KmsSignature> = self
            .nodes
            .iter()
            .map(|node| node.sign_result(request_id, &plaintexts))
            .collect();
        self.ledger
            .fulfill_decryption(request_id, plaintexts, &signatures)
            .expect("fulfill");
    }

    fn reveal(&self, handle: Handle) -> u64 {
        self.ledger.coprocessor.reveal(handle).expect("reveal")
    }

    fn escrow(&self, account: Address, asset: Address) -> u64 {
        match self
            .ledger
            .exchange(self.exchange_id)
            .unwrap()
            .escrow_of(account, asset)
        {
            Some(handle) => self.reveal(handle),
            None => 0,
        }
    }

    fn remaining(&self, order_id: u64) -> u64 {
        let order = self
            .ledger
            .exchange(self.exchange_id)
            .unwrap()
            .order(order_id)
            .expect("order")
            .clone();
        self.reveal(order.amount)
    }

    fn status(&self, order_id: u64) -> OrderStatus {
        self.ledger
            .exchange(self.exchange_id)
            .unwrap()
            .order(order_id)
            .expect("order")
            .status
    }
}

#[test]
fn matched_orders_drain_and_credit_opposite_escrow() {
    let mut h = setup();
    let alice = wallet("alice").address();
    let bob = wallet("bob").address();
    let (base, quote) = (h.base, h.quote);
    h.fund_and_deposit(alice, quote, 1000);
    h.fund_and_deposit(bob, base, 1000);

    let buy = h.place_order("buy", alice, Side::Buy, 1000, 1);
    let sell = h.place_order("sell", bob, Side::Sell, 1000, 1);
    h.ledger.fill_order(h.exchange_id, buy, sell).expect("fill");

    assert_eq!(h.remaining(buy), 0);
    assert_eq!(h.remaining(sell), 0);
    assert_eq!(h.escrow(alice, base), 1000);
    assert_eq!(h.escrow(bob, quote), 1000);
    assert_eq!(h.escrow(alice, quote), 0);
    assert_eq!(h.escrow(bob, base), 0);

    // Status only flips once the drained predicate resolves via the oracle.
    assert_eq!(h.status(buy), OrderStatus::Open);
    let request_id = h
        .ledger
        .request_fill_status(h.exchange_id, buy)
        .expect("status request");
    h.settle_request(request_id);
    assert_eq!(h.status(buy), OrderStatus::Filled);
}

#[test]
fn partial_fills_keep_orders_fillable() {
    let mut h = setup();
    let alice = wallet("alice").address();
    let bob = wallet("bob").address();
    h.fund_and_deposit(alice, h.quote, 1000);
    h.fund_and_deposit(bob, h.base, 1000);

    let buy = h.place_order("buy", alice, Side::Buy, 1000, 2);
    let first_sell = h.place_order("sell-1", bob, Side::Sell, 400, 2);
    let fill = h
        .ledger
        .fill_order(h.exchange_id, buy, first_sell)
        .expect("fill");
    assert_eq!(h.reveal(fill), 400);
    assert_eq!(h.remaining(buy), 600);
    assert_eq!(h.remaining(first_sell), 0);

    // An advisory-open order keeps matching until drained.
    let second_sell = h.place_order("sell-2", bob, Side::Sell, 600, 2);
    h.ledger
        .fill_order(h.exchange_id, buy, second_sell)
        .expect("fill");
    assert_eq!(h.remaining(buy), 0);
    assert_eq!(h.escrow(alice, h.base), 1000);
    assert_eq!(h.escrow(bob, h.quote), 1000);
}

#[test]
fn fill_status_of_partial_order_stays_open() {
    let mut h = setup();
    let alice = wallet("alice").address();
    let bob = wallet("bob").address();
    h.fund_and_deposit(alice, h.quote, 1000);
    h.fund_and_deposit(bob, h.base, 400);

    let buy = h.place_order("buy", alice, Side::Buy, 1000, 1);
    let sell = h.place_order("sell", bob, Side::Sell, 400, 1);
    h.ledger.fill_order(h.exchange_id, buy, sell).expect("fill");

    let request_id = h
        .ledger
        .request_fill_status(h.exchange_id, buy)
        .expect("status request");
    // Re-issuing reuses the outstanding request.
    assert_eq!(
        h.ledger.request_fill_status(h.exchange_id, buy),
        Ok(request_id)
    );
    h.settle_request(request_id);
    assert_eq!(h.status(buy), OrderStatus::Open);
}

#[test]
fn retract_returns_escrow_exactly_once() {
    let mut h = setup();
    let alice = wallet("alice").address();
    h.fund_and_deposit(alice, h.quote, 1000);

    let buy = h.place_order("buy", alice, Side::Buy, 500, 3);
    assert_eq!(h.escrow(alice, h.quote), 500);

    h.ledger
        .retract_order(h.exchange_id, alice, buy)
        .expect("retract");
    assert_eq!(h.escrow(alice, h.quote), 1000);
    assert_eq!(h.status(buy), OrderStatus::Retracted);

    // The second retraction fails cleanly and never double-credits.
    assert_eq!(
        h.ledger.retract_order(h.exchange_id, alice, buy),
        Err(LedgerError::OrderNotFillable)
    );
    assert_eq!(h.escrow(alice, h.quote), 1000);
}

#[test]
fn retract_is_owner_only() {
    let mut h = setup();
    let alice = wallet("alice").address();
    let mallory = wallet("mallory").address();
    h.fund_and_deposit(alice, h.quote, 1000);
    let buy = h.place_order("buy", alice, Side::Buy, 500, 3);
    assert_eq!(
        h.ledger.retract_order(h.exchange_id, mallory, buy),
        Err(LedgerError::AccessDenied)
    );
}

#[test]
fn stale_orders_are_not_fillable() {
    let mut h = setup();
    let alice = wallet("alice").address();
    let bob = wallet("bob").address();
    h.fund_and_deposit(alice, h.quote, 1000);
    h.fund_and_deposit(bob, h.base, 1000);

    let buy = h.place_order("buy", alice, Side::Buy, 500, 1);
    let sell = h.place_order("sell", bob, Side::Sell, 500, 1);
    h.ledger
        .retract_order(h.exchange_id, alice, buy)
        .expect("retract");

    assert_eq!(
        h.ledger.fill_order(h.exchange_id, buy, sell),
        Err(LedgerError::OrderNotFillable)
    );

    // Same-side pairs never match either.
    let second_sell = h.place_order("sell-2", bob, Side::Sell, 100, 1);
    assert_eq!(
        h.ledger.fill_order(h.exchange_id, sell, second_sell),
        Err(LedgerError::OrderNotFillable)
    );
    assert_eq!(
        h.ledger.fill_order(h.exchange_id, sell, sell),
        Err(LedgerError::OrderNotFillable)
    );
}

#[test]
fn withdraw_pays_the_plaintext_leg_on_resolution() {
    let mut h = setup();
    let alice = wallet("alice").address();
    h.fund_and_deposit(alice, h.quote, 1000);
    assert_eq!(h.ledger.plain_balance_of(h.quote, alice).unwrap(), 0);

    let request_id = h
        .ledger
        .withdraw(h.exchange_id, alice, h.quote, 400)
        .expect("withdraw");
    // Escrow is debited at request time; the payout waits for the oracle.
    assert_eq!(h.escrow(alice, h.quote), 600);
    assert_eq!(h.ledger.plain_balance_of(h.quote, alice).unwrap(), 0);

    h.settle_request(request_id);
    assert_eq!(h.ledger.plain_balance_of(h.quote, alice).unwrap(), 400);
    assert_eq!(h.escrow(alice, h.quote), 600);
}

#[test]
fn withdraw_exceeding_escrow_pays_zero() {
    let mut h = setup();
    let alice = wallet("alice").address();
    h.fund_and_deposit(alice, h.quote, 1000);

    let request_id = h
        .ledger
        .withdraw(h.exchange_id, alice, h.quote, 5000)
        .expect("withdraw");
    h.settle_request(request_id);

    // Truncation, not failure: the effective amount was zero.
    assert_eq!(h.escrow(alice, h.quote), 1000);
    assert_eq!(h.ledger.plain_balance_of(h.quote, alice).unwrap(), 0);
}

#[test]
fn order_exceeding_escrow_truncates_to_zero() {
    let mut h = setup();
    let alice = wallet("alice").address();
    h.fund_and_deposit(alice, h.quote, 100);

    let buy = h.place_order("buy", alice, Side::Buy, 500, 1);
    assert_eq!(h.remaining(buy), 0);
    assert_eq!(h.escrow(alice, h.quote), 100);
}

#[test]
fn deposit_requires_plaintext_allowance() {
    let mut h = setup();
    let alice = wallet("alice").address();
    h.ledger.mint_plain(h.quote, alice, 1000).expect("mint");
    assert_eq!(
        h.ledger.deposit(h.exchange_id, alice, h.quote, 1000),
        Err(LedgerError::InsufficientAllowance)
    );
}
