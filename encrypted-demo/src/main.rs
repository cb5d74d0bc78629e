//! End-to-end scenario driver: mints and transfers confidential tokens,
//! runs a sealed-bid auction through oracle settlement, then exercises the
//! order-book exchange. Prints `key=value` result lines; values that are
//! confidential on the ledger are disclosed via re-encryption with the
//! owning account's key.

use std::env;

use encrypted_ledger::cli::{env_truthy, parse_bytes32, parse_flag_value, parse_u64, CliResult};
use encrypted_ledger::client::{self, ReencryptionKeypair, Wallet};
use encrypted_ledger::crypto::keccak256;
use encrypted_ledger::exchange::Side;
use encrypted_ledger::kms::{KmsNode, KmsSignature};
use encrypted_ledger::ledger::{Ledger, LedgerConfig};
use encrypted_ledger::types::{Address, EncryptedInput, Handle};

const KMS_NODES: usize = 3;

fn seed(label: &str) -> [u8; 32] {
    keccak256(&[b"demo-seed", label.as_bytes()])
}

fn flag_u64(args: &[String], flag: &str, default: u64) -> CliResult<u64> {
    match parse_flag_value(args, flag) {
        Some(raw) => parse_u64(&raw, flag),
        None => Ok(default),
    }
}

fn encrypted_amount(
    ledger: &Ledger,
    label: &str,
    contract: Address,
    caller: Address,
    value: u64,
) -> CliResult<EncryptedInput> {
    Ok(client::encrypt_input(
        &ledger.network_public(),
        seed(label),
        contract,
        caller,
        value,
    )?)
}

/// Discloses a confidential handle to its owner through the re-encryption
/// path (ephemeral keypair, signed authorization, unseal off-ledger).
fn disclose(
    ledger: &Ledger,
    owner: &Wallet,
    label: &str,
    contract: Address,
    handle: Handle,
) -> CliResult<u64> {
    let keypair = ReencryptionKeypair::from_seed(seed(&format!("{label}-ephemeral")))?;
    let auth = owner.authorize_reencryption(&keypair, contract)?;
    let sealed = ledger.reencrypt(handle, contract, &keypair.public(), &auth)?;
    Ok(keypair.unseal(&ledger.network_public(), handle, sealed))
}

/// The off-ledger KMS leg: observe pending decryption events, jointly
/// decrypt, co-sign, and fulfill each request.
fn pump_oracle(ledger: &mut Ledger, nodes: &[KmsNode]) -> CliResult<()> {
    let events = ledger.take_decryption_events();
    for event in events {
        let plaintexts = event
            .handles
            .iter()
            .map(|handle| ledger.coprocessor.reveal(*handle))
            .collect::<Result<Vec<u64>, _>>()?;
        let signatures: Vec<KmsSignature> = nodes
            .iter()
            .map(|node| node.sign_result(event.request_id, &plaintexts))
            .collect();
        ledger.fulfill_decryption(event.request_id, plaintexts, &signatures)?;
        println!("oracle_resolved_request={}", event.request_id);
    }
    Ok(())
}

fn run(args: &[String]) -> CliResult<()> {
    let mint_amount = flag_u64(args, "--mint", 1000)?;
    let transfer_amount = flag_u64(args, "--transfer", 500)?;
    let bid_alice = flag_u64(args, "--bid-alice", 100)?;
    let bid_bob = flag_u64(args, "--bid-bob", 300)?;
    let bid_carol = flag_u64(args, "--bid-carol", 200)?;
    let auction_duration = flag_u64(args, "--auction-duration", 360)?;
    let deposit_amount = flag_u64(args, "--deposit", 1000)?;
    let withdraw_amount = flag_u64(args, "--withdraw", 250)?;
    let threshold = flag_u64(args, "--kms-threshold", 2)? as usize;
    let network_seed = match parse_flag_value(args, "--network-seed") {
        Some(raw) => parse_bytes32(&raw)?,
        None => seed("network"),
    };

    let nodes = (0..KMS_NODES)
        .map(|idx| KmsNode::from_seed(idx, seed(&format!("kms-{idx}"))))
        .collect::<Result<Vec<_>, _>>()?;

    let admin = Wallet::from_seed(seed("admin"))?;
    let alice = Wallet::from_seed(seed("alice"))?;
    let bob = Wallet::from_seed(seed("bob"))?;
    let carol = Wallet::from_seed(seed("carol"))?;

    let mut ledger = Ledger::new(LedgerConfig {
        network_seed,
        kms_signers: nodes.iter().map(|node| node.verifying_key()).collect(),
        kms_threshold: threshold,
        token_name: "Encrypted".to_string(),
        token_symbol: "ENCR".to_string(),
        minter: admin.address(),
    })?;
    let token_contract = ledger.token.contract();
    println!("token_contract={}", token_contract.hex());
    println!("admin_address={}", admin.address().hex());

    // --- mint + transfer ---

    for (name, wallet) in [("alice", &alice), ("bob", &bob), ("carol", &carol)] {
        let handle = ledger.mint(admin.address(), wallet.address(), mint_amount)?;
        println!("mint_{name}_balance_handle={}", handle.hex());
    }

    let transfer_input = encrypted_amount(
        &ledger,
        "transfer",
        token_contract,
        alice.address(),
        transfer_amount,
    )?;
    let outcome = ledger.transfer(alice.address(), bob.address(), &transfer_input)?;
    println!("transfer_tx=ok");
    println!("transfer_actual_handle={}", outcome.actual.hex());
    let alice_balance = disclose(&ledger, &alice, "alice-balance", token_contract, outcome.from_balance)?;
    let bob_balance = disclose(&ledger, &bob, "bob-balance", token_contract, outcome.to_balance)?;
    println!("alice_balance={alice_balance}");
    println!("bob_balance={bob_balance}");

    // --- sealed-bid auction ---

    let auction_id = ledger.open_auction(admin.address(), auction_duration);
    let auction_contract = ledger.auction(auction_id).unwrap().contract();
    println!("auction_id={auction_id}");

    for (name, wallet, value) in [
        ("alice", &alice, bid_alice),
        ("bob", &bob, bid_bob),
        ("carol", &carol, bid_carol),
    ] {
        let input = encrypted_amount(
            &ledger,
            &format!("bid-{name}"),
            auction_contract,
            wallet.address(),
            value,
        )?;
        ledger.bid(auction_id, wallet.address(), &input)?;
        println!("bid_{name}_tx=ok");
    }

    ledger.advance_time(auction_duration + 1);
    let request_id = ledger.decrypt_winning_ticket(auction_id)?;
    println!("winning_ticket_request={request_id}");
    pump_oracle(&mut ledger, &nodes)?;

    let winner = ledger
        .auction(auction_id)
        .and_then(|auction| auction.winner())
        .ok_or("auction did not resolve a winner")?;
    println!("winner_address={}", winner.bidder.hex());
    println!("winning_amount={}", winner.amount);

    ledger.auction_end(auction_id)?;
    println!("claim_tx=ok");
    let beneficiary_balance = disclose(
        &ledger,
        &admin,
        "beneficiary-balance",
        token_contract,
        ledger.balance_of(admin.address()).ok_or("missing beneficiary balance")?,
    )?;
    println!("beneficiary_balance={beneficiary_balance}");

    // --- order-book exchange ---

    let base = ledger.register_plain_token("BASE");
    let quote = ledger.register_plain_token("QUOTE");
    let exchange_id = ledger.open_exchange(base, quote)?;
    let exchange_contract = ledger.exchange(exchange_id).unwrap().contract();
    println!("exchange_id={exchange_id}");

    ledger.mint_plain(quote, alice.address(), deposit_amount)?;
    ledger.mint_plain(base, bob.address(), deposit_amount)?;
    ledger.approve_plain(quote, alice.address(), exchange_contract, deposit_amount)?;
    ledger.approve_plain(base, bob.address(), exchange_contract, deposit_amount)?;
    ledger.deposit(exchange_id, alice.address(), quote, deposit_amount)?;
    ledger.deposit(exchange_id, bob.address(), base, deposit_amount)?;
    println!("deposit_alice_quote={deposit_amount}");
    println!("deposit_bob_base={deposit_amount}");

    let buy_amount = encrypted_amount(
        &ledger,
        "buy-amount",
        exchange_contract,
        alice.address(),
        deposit_amount,
    )?;
    let buy_price = encrypted_amount(&ledger, "buy-price", exchange_contract, alice.address(), 1)?;
    let buy_id = ledger.create_order(exchange_id, alice.address(), Side::Buy, &buy_amount, &buy_price)?;
    let sell_amount = encrypted_amount(
        &ledger,
        "sell-amount",
        exchange_contract,
        bob.address(),
        deposit_amount,
    )?;
    let sell_price = encrypted_amount(&ledger, "sell-price", exchange_contract, bob.address(), 1)?;
    let sell_id = ledger.create_order(exchange_id, bob.address(), Side::Sell, &sell_amount, &sell_price)?;
    println!("buy_order_id={buy_id}");
    println!("sell_order_id={sell_id}");

    let fill = ledger.fill_order(exchange_id, buy_id, sell_id)?;
    let fill_amount = disclose(&ledger, &alice, "fill", exchange_contract, fill)?;
    println!("fill_amount={fill_amount}");

    let status_request = ledger.request_fill_status(exchange_id, buy_id)?;
    println!("fill_status_request={status_request}");
    pump_oracle(&mut ledger, &nodes)?;
    println!(
        "buy_order_status={:?}",
        ledger.exchange(exchange_id).unwrap().order(buy_id).unwrap().status
    );

    let withdraw_request = ledger.withdraw(exchange_id, bob.address(), quote, withdraw_amount)?;
    println!("withdraw_request={withdraw_request}");
    pump_oracle(&mut ledger, &nodes)?;
    println!(
        "bob_plain_quote_balance={}",
        ledger.plain_balance_of(quote, bob.address())?
    );

    let bob_quote_escrow = ledger
        .exchange(exchange_id)
        .unwrap()
        .escrow_of(bob.address(), quote)
        .ok_or("missing escrow")?;
    let escrow_value = disclose(&ledger, &bob, "bob-escrow", exchange_contract, bob_quote_escrow)?;
    println!("bob_quote_escrow={escrow_value}");

    Ok(())
}

#[tokio::main]
async fn main() {
    if env_truthy("DEMO_TRACE") {
        tracing_subscriber::fmt().init();
    }
    let args: Vec<String> = env::args().collect();
    if let Err(err) = run(&args) {
        eprintln!("demo failed: {err}");
        std::process::exit(1);
    }
}
