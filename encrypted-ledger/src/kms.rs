//! Key material and the signing side of the threshold KMS network.

use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};

use crate::crypto;
use crate::errors::Result;
use crate::types::Handle;

/// The network master key. In production it is secret-shared across the KMS
/// nodes; this in-process model holds it as one secp256k1 scalar. Clients
/// encrypt inputs against its public half; the coprocessor and gateway hold
/// the secret half.
#[derive(Debug, Clone)]
pub struct NetworkKey {
    secret: SigningKey,
}

impl NetworkKey {
    pub fn from_seed(seed: [u8; 32]) -> Result<Self> {
        Ok(Self {
            secret: crypto::key_from_seed(seed)?,
        })
    }

    pub fn public(&self) -> VerifyingKey {
        *self.secret.verifying_key()
    }

    /// Unmasks a freshly-encrypted client input.
    pub(crate) fn open_input(&self, ephemeral: &VerifyingKey, masked: [u8; 8]) -> u64 {
        let shared = crypto::shared_secret(&self.secret, ephemeral);
        crypto::unmask_value(masked, crypto::input_pad(shared))
    }

    /// Seals a plaintext under the requester's ephemeral key
    /// (re-encryption).
    pub(crate) fn seal(&self, requester: &VerifyingKey, handle: Handle, value: u64) -> [u8; 8] {
        let shared = crypto::shared_secret(&self.secret, requester);
        crypto::mask_value(value, crypto::seal_pad(shared, handle))
    }
}

/// One signature contributed toward a decryption-result quorum.
#[derive(Debug, Clone)]
pub struct KmsSignature {
    pub signer_index: usize,
    pub signature: Signature,
}

/// Signing side of one KMS node. Nodes observe `DecryptionRequested` events
/// off-ledger, decrypt independently, and co-sign the result digest.
#[derive(Debug, Clone)]
pub struct KmsNode {
    index: usize,
    key: SigningKey,
}

impl KmsNode {
    pub fn from_seed(index: usize, seed: [u8; 32]) -> Result<Self> {
        Ok(Self {
            index,
            key: crypto::key_from_seed(seed)?,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.key.verifying_key()
    }

    /// Signs the canonical result digest for `(request_id, plaintexts)`.
    pub fn sign_result(&self, request_id: u64, plaintexts: &[u64]) -> KmsSignature {
        let digest = crypto::result_digest(request_id, plaintexts);
        KmsSignature {
            signer_index: self.index,
            signature: self.key.sign(&digest),
        }
    }
}
