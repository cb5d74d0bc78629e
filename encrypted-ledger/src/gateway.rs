//! Decryption oracle protocol: the asynchronous request/fulfill two-phase
//! flow, plus the synchronous re-encryption path.
//!
//! A request and its fulfillment are separate transactions with arbitrary
//! delay and interleaving in between; nothing assumes FIFO ordering across
//! request ids, and a `Pending` request has no built-in cancel or timeout.

use std::collections::{BTreeMap, BTreeSet};

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use tracing::{debug, info};

use crate::acl::AccessControl;
use crate::coprocessor::Coprocessor;
use crate::crypto;
use crate::errors::{LedgerError, Result};
use crate::kms::KmsSignature;
use crate::types::{Address, Handle};

/// Destination an oracle result is routed to once quorum is verified.
/// Stored as data, never as a closure: the resolving party is an external
/// actor that may act arbitrarily later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionCallback {
    AuctionWinner {
        auction_id: u64,
    },
    OrderFillStatus {
        exchange_id: u64,
        order_id: u64,
    },
    ExchangeWithdraw {
        exchange_id: u64,
        account: Address,
        asset: Address,
    },
}

/// One oracle request. `Pending -> Resolved` exactly once; request ids are
/// never reused.
#[derive(Debug, Clone)]
pub struct DecryptionRequest {
    pub request_id: u64,
    pub handles: Vec<Handle>,
    pub requester: Address,
    pub callback: DecryptionCallback,
    pub resolved: bool,
    pub plaintexts: Vec<u64>,
    /// Signer indices whose signatures carried the resolving quorum.
    pub signers: Vec<usize>,
}

/// Event consumed by the off-ledger KMS network.
#[derive(Debug, Clone)]
pub struct DecryptionRequested {
    pub request_id: u64,
    pub handles: Vec<Handle>,
}

/// Verified plaintexts plus their routing, handed back to the ledger for
/// synchronous dispatch within the fulfilling transaction.
#[derive(Debug, Clone)]
pub struct ResolvedDecryption {
    pub request_id: u64,
    pub callback: DecryptionCallback,
    pub plaintexts: Vec<u64>,
}

/// Registered KMS signer set and the quorum rule.
#[derive(Debug, Clone)]
pub struct KmsVerifier {
    signers: Vec<VerifyingKey>,
    threshold: usize,
}

impl KmsVerifier {
    pub fn new(signers: Vec<VerifyingKey>, threshold: usize) -> Self {
        Self { signers, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Counts distinct registered signers with a valid signature over the
    /// digest; duplicates and unknown signer indices never add weight.
    /// Returns the accepted signer set on success.
    pub fn verify_quorum(
        &self,
        digest: [u8; 32],
        signatures: &[KmsSignature],
    ) -> Result<Vec<usize>> {
        let mut accepted = BTreeSet::new();
        for candidate in signatures {
            let Some(key) = self.signers.get(candidate.signer_index) else {
                continue;
            };
            if accepted.contains(&candidate.signer_index) {
                continue;
            }
            if crypto::verify_signature(key, digest, &candidate.signature) {
                accepted.insert(candidate.signer_index);
            }
        }
        if accepted.len() >= self.threshold {
            Ok(accepted.into_iter().collect())
        } else {
            Err(LedgerError::SignatureThresholdNotMet {
                got: accepted.len(),
                need: self.threshold,
            })
        }
    }
}

/// Recoverable account signature over the structured
/// (public key, contract) authorization message.
#[derive(Debug, Clone)]
pub struct ReencryptAuth {
    pub signature: Signature,
    pub recovery_id: RecoveryId,
}

/// Sealed re-encryption response; only the holder of the matching ephemeral
/// secret can unmask it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedValue(pub [u8; 8]);

#[derive(Debug, Clone)]
pub struct DecryptionGateway {
    requests: BTreeMap<u64, DecryptionRequest>,
    next_request_id: u64,
    verifier: KmsVerifier,
    events: Vec<DecryptionRequested>,
}

impl DecryptionGateway {
    pub fn new(verifier: KmsVerifier) -> Self {
        Self {
            requests: BTreeMap::new(),
            next_request_id: 1,
            verifier,
            events: Vec::new(),
        }
    }

    pub fn request(&self, request_id: u64) -> Option<&DecryptionRequest> {
        self.requests.get(&request_id)
    }

    /// Drains the pending event feed (the off-ledger network's view).
    pub fn take_events(&mut self) -> Vec<DecryptionRequested> {
        std::mem::take(&mut self.events)
    }

    /// Opens a `Pending` request after checking that every handle exists and
    /// that the requester may disclose each one.
    pub fn request_decryption(
        &mut self,
        copro: &Coprocessor,
        acl: &AccessControl,
        requester: Address,
        handles: Vec<Handle>,
        callback: DecryptionCallback,
    ) -> Result<u64> {
        for handle in &handles {
            if !copro.contains(*handle) {
                return Err(LedgerError::HandleUnknown);
            }
            acl.require_allowed(*handle, requester)?;
        }
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.events.push(DecryptionRequested {
            request_id,
            handles: handles.clone(),
        });
        self.requests.insert(
            request_id,
            DecryptionRequest {
                request_id,
                handles,
                requester,
                callback,
                resolved: false,
                plaintexts: Vec::new(),
                signers: Vec::new(),
            },
        );
        info!(request_id, "decryption requested");
        Ok(request_id)
    }

    /// Resolves a `Pending` request. Replays are rejected outright: a second
    /// fulfillment could swap results after settlement logic already ran.
    pub fn fulfill_decryption(
        &mut self,
        request_id: u64,
        plaintexts: Vec<u64>,
        signatures: &[KmsSignature],
    ) -> Result<ResolvedDecryption> {
        {
            let request = self
                .requests
                .get(&request_id)
                .ok_or(LedgerError::UnknownRequest(request_id))?;
            if request.resolved {
                return Err(LedgerError::AlreadyResolved(request_id));
            }
            if plaintexts.len() != request.handles.len() {
                return Err(LedgerError::MalformedFulfillment);
            }
        }
        let digest = crypto::result_digest(request_id, &plaintexts);
        let quorum = self.verifier.verify_quorum(digest, signatures)?;
        let request = self
            .requests
            .get_mut(&request_id)
            .ok_or(LedgerError::UnknownRequest(request_id))?;
        request.resolved = true;
        request.plaintexts = plaintexts.clone();
        request.signers = quorum;
        info!(request_id, "decryption resolved");
        Ok(ResolvedDecryption {
            request_id,
            callback: request.callback,
            plaintexts,
        })
    }

    /// Synchronous re-encryption: no plaintext touches the ledger; the value
    /// is sealed under the requester's ephemeral key. Gated by the handle
    /// ACL and by possession of the account key, with the authorization
    /// bound to one contract so a stolen request cannot be replayed against
    /// another.
    pub fn reencrypt(
        &self,
        copro: &Coprocessor,
        acl: &AccessControl,
        handle: Handle,
        contract: Address,
        requester_public: &VerifyingKey,
        auth: &ReencryptAuth,
    ) -> Result<SealedValue> {
        if !copro.contains(handle) {
            return Err(LedgerError::HandleUnknown);
        }
        let digest = crypto::reencrypt_auth_digest(requester_public, contract);
        let account = crypto::recover_address(digest, &auth.signature, auth.recovery_id)?;
        acl.require_allowed(handle, account)?;
        let sealed = copro.seal(handle, requester_public)?;
        debug!(handle = %handle.hex(), account = %account.hex(), "handle re-encrypted");
        Ok(SealedValue(sealed))
    }
}
