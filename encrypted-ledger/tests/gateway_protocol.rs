//! Oracle protocol integrity: quorum verification, exactly-once resolution,
//! replay rejection, and authorization binding.

use encrypted_ledger::client::{self, ReencryptionKeypair, Wallet};
use encrypted_ledger::crypto::keccak256;
use encrypted_ledger::errors::LedgerError;
use encrypted_ledger::gateway::DecryptionCallback;
use encrypted_ledger::kms::{KmsNode, KmsSignature};
use encrypted_ledger::ledger::{Ledger, LedgerConfig};
use encrypted_ledger::types::{Address, Handle};

const NETWORK_SEED_HEX: &str = "47e2f9a481f2d2c8fd0714f1f5f5d4b2ec0e05a8d1e3ac92c5f2b8ee61c0a7b3";

fn seed(label: &str) -> [u8; 32] {
    keccak256(&[b"gateway-protocol-seed", label.as_bytes()])
}

fn network_seed() -> [u8; 32] {
    let decoded = hex::decode(NETWORK_SEED_HEX).expect("network seed hex");
    decoded.try_into().expect("32-byte network seed")
}

fn wallet(label: &str) -> Wallet {
    Wallet::from_seed(seed(label)).expect("wallet key")
}

fn setup() -> (Ledger, Vec<KmsNode>, Address) {
    let nodes: Vec<KmsNode> = (0..3)
        .map(|idx| KmsNode::from_seed(idx, seed(&format!("kms-{idx}"))).expect("kms key"))
        .collect();
    let minter = wallet("minter").address();
    let config = LedgerConfig {
        network_seed: network_seed(),
        kms_signers: nodes.iter().map(|node| node.verifying_key()).collect(),
        kms_threshold: 2,
        token_name: "Encrypted".to_string(),
        token_symbol: "ENCR".to_string(),
        minter,
    };
    (Ledger::new(config).expect("ledger"), nodes, minter)
}

/// Opens an auction with one sealed bid and returns the pending request id.
fn auction_with_pending_request(
    ledger: &mut Ledger,
    minter: Address,
    bid_value: u64,
) -> (u64, u64) {
    let bidder = wallet("bidder").address();
    ledger.mint(minter, bidder, 1000).expect("mint");
    let auction_id = ledger.open_auction(wallet("beneficiary").address(), 600);
    let contract = ledger.auction(auction_id).unwrap().contract();
    let input = client::encrypt_input(
        &ledger.network_public(),
        seed("bid-input"),
        contract,
        bidder,
        bid_value,
    )
    .expect("encrypted input");
    ledger.bid(auction_id, bidder, &input).expect("bid");
    ledger.advance_time(601);
    let request_id = ledger.decrypt_winning_ticket(auction_id).expect("request");
    (auction_id, request_id)
}

fn revealed_plaintexts(ledger: &Ledger, request_id: u64) -> Vec<u64> {
    let handles = ledger.gateway.request(request_id).expect("request").handles.clone();
    handles
        .iter()
        .map(|handle| ledger.coprocessor.reveal(*handle).expect("reveal"))
        .collect()
}

fn quorum_signatures(nodes: &[KmsNode], request_id: u64, plaintexts: &[u64]) -> Vec<KmsSignature> {
    nodes
        .iter()
        .map(|node| node.sign_result(request_id, plaintexts))
        .collect()
}

#[test]
fn fulfillment_below_threshold_is_rejected() {
    let (mut ledger, nodes, minter) = setup();
    let (auction_id, request_id) = auction_with_pending_request(&mut ledger, minter, 777);

    let plaintexts = revealed_plaintexts(&ledger, request_id);
    let one_signature = vec![nodes[0].sign_result(request_id, &plaintexts)];
    assert_eq!(
        ledger.fulfill_decryption(request_id, plaintexts, &one_signature),
        Err(LedgerError::SignatureThresholdNotMet { got: 1, need: 2 })
    );
    // The request stays pending and the auction remains unresolved.
    assert!(!ledger.gateway.request(request_id).unwrap().resolved);
    assert!(!ledger.auction(auction_id).unwrap().is_resolved());
}

#[test]
fn quorum_resolves_exactly_once_and_replays_are_rejected() {
    let (mut ledger, nodes, minter) = setup();
    let (auction_id, request_id) = auction_with_pending_request(&mut ledger, minter, 777);

    let plaintexts = revealed_plaintexts(&ledger, request_id);
    let signatures = quorum_signatures(&nodes, request_id, &plaintexts);
    ledger
        .fulfill_decryption(request_id, plaintexts.clone(), &signatures)
        .expect("fulfill");
    let request = ledger.gateway.request(request_id).unwrap();
    assert!(request.resolved);
    assert_eq!(request.signers.len(), 3);
    assert_eq!(
        ledger.auction(auction_id).unwrap().winner().unwrap().amount,
        777
    );

    // A replay, even with valid signatures, must not re-drive settlement.
    assert_eq!(
        ledger.fulfill_decryption(request_id, plaintexts, &signatures),
        Err(LedgerError::AlreadyResolved(request_id))
    );
}

#[test]
fn signatures_over_different_plaintexts_do_not_count() {
    let (mut ledger, nodes, minter) = setup();
    let (_auction_id, request_id) = auction_with_pending_request(&mut ledger, minter, 777);

    let honest = revealed_plaintexts(&ledger, request_id);
    let signatures = quorum_signatures(&nodes, request_id, &honest);
    let mut forged = honest.clone();
    forged[0] = 999_999;
    assert_eq!(
        ledger.fulfill_decryption(request_id, forged, &signatures),
        Err(LedgerError::SignatureThresholdNotMet { got: 0, need: 2 })
    );
}

#[test]
fn duplicate_signers_never_reach_quorum() {
    let (mut ledger, nodes, minter) = setup();
    let (_auction_id, request_id) = auction_with_pending_request(&mut ledger, minter, 777);

    let plaintexts = revealed_plaintexts(&ledger, request_id);
    let duplicated = vec![
        nodes[0].sign_result(request_id, &plaintexts),
        nodes[0].sign_result(request_id, &plaintexts),
    ];
    assert_eq!(
        ledger.fulfill_decryption(request_id, plaintexts, &duplicated),
        Err(LedgerError::SignatureThresholdNotMet { got: 1, need: 2 })
    );
}

#[test]
fn fulfillment_with_wrong_plaintext_count_is_rejected() {
    let (mut ledger, nodes, minter) = setup();
    let (_auction_id, request_id) = auction_with_pending_request(&mut ledger, minter, 777);

    // The winning-ticket request carries two handles; one plaintext is
    // malformed regardless of signatures.
    let truncated = vec![777u64];
    let signatures = quorum_signatures(&nodes, request_id, &truncated);
    assert_eq!(
        ledger.fulfill_decryption(request_id, truncated, &signatures),
        Err(LedgerError::MalformedFulfillment)
    );
}

#[test]
fn request_ids_are_never_reused() {
    let (mut ledger, _nodes, minter) = setup();
    let bidder = wallet("bidder").address();
    ledger.mint(minter, bidder, 1000).expect("mint");

    let mut request_ids = Vec::new();
    for round in 0..3u64 {
        let auction_id = ledger.open_auction(wallet("beneficiary").address(), 10);
        let contract = ledger.auction(auction_id).unwrap().contract();
        let input = client::encrypt_input(
            &ledger.network_public(),
            seed(&format!("bid-{round}")),
            contract,
            bidder,
            100 + round,
        )
        .expect("encrypted input");
        ledger.bid(auction_id, bidder, &input).expect("bid");
        ledger.advance_time(11);
        request_ids.push(ledger.decrypt_winning_ticket(auction_id).expect("request"));
    }
    assert!(request_ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn request_decryption_rejects_unknown_handles() {
    let (mut ledger, _nodes, minter) = setup();
    let fabricated = Handle([0x42u8; 32]);
    let result = ledger.gateway.request_decryption(
        &ledger.coprocessor,
        &ledger.acl,
        minter,
        vec![fabricated],
        DecryptionCallback::AuctionWinner { auction_id: 1 },
    );
    assert_eq!(result, Err(LedgerError::HandleUnknown));
}

#[test]
fn gateway_emits_one_event_per_request() {
    let (mut ledger, _nodes, minter) = setup();
    let (_auction_id, request_id) = auction_with_pending_request(&mut ledger, minter, 500);

    let events = ledger.take_decryption_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].request_id, request_id);
    assert_eq!(events[0].handles.len(), 2);
    // Drained feed stays empty until the next request.
    assert!(ledger.take_decryption_events().is_empty());
}

#[test]
fn encrypted_input_round_trips_through_the_oracle() {
    let (mut ledger, nodes, minter) = setup();
    let (auction_id, request_id) = auction_with_pending_request(&mut ledger, minter, 777);

    let plaintexts = revealed_plaintexts(&ledger, request_id);
    let signatures = quorum_signatures(&nodes, request_id, &plaintexts);
    ledger
        .fulfill_decryption(request_id, plaintexts, &signatures)
        .expect("fulfill");

    // The single sealed bid decrypts bit-for-bit to the encrypted value.
    assert_eq!(
        ledger.auction(auction_id).unwrap().winner().unwrap().amount,
        777
    );
}

#[test]
fn reencrypt_authorization_is_bound_to_one_contract() {
    let (mut ledger, _nodes, minter) = setup();
    let alice_wallet = wallet("alice");
    let alice = alice_wallet.address();
    ledger.mint(minter, alice, 55).expect("mint");
    let balance = ledger.balance_of(alice).unwrap();

    let keypair = ReencryptionKeypair::from_seed(seed("alice-ephemeral")).expect("keypair");
    let token_contract = ledger.token.contract();
    let other_contract = Address::contract("somewhere-else");

    // Authorization signed for a different contract recovers a different
    // principal, which is not on the handle ACL.
    let misbound = alice_wallet
        .authorize_reencryption(&keypair, other_contract)
        .expect("auth");
    assert_eq!(
        ledger.reencrypt(balance, token_contract, &keypair.public(), &misbound),
        Err(LedgerError::AccessDenied)
    );

    let bound = alice_wallet
        .authorize_reencryption(&keypair, token_contract)
        .expect("auth");
    assert!(ledger
        .reencrypt(balance, token_contract, &keypair.public(), &bound)
        .is_ok());
}
