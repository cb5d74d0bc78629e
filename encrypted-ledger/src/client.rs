//! Client-side SDK: account wallets, encrypted-input construction, and the
//! requester half of re-encryption. Private keys never cross into ledger
//! state.

use k256::ecdsa::{SigningKey, VerifyingKey};

use crate::crypto;
use crate::errors::{LedgerError, Result};
use crate::gateway::{ReencryptAuth, SealedValue};
use crate::types::{Address, EncryptedInput, Handle};

/// An account keypair used for re-encryption authorization.
#[derive(Debug, Clone)]
pub struct Wallet {
    key: SigningKey,
}

impl Wallet {
    pub fn from_seed(seed: [u8; 32]) -> Result<Self> {
        Ok(Self {
            key: crypto::key_from_seed(seed)?,
        })
    }

    pub fn address(&self) -> Address {
        crypto::address_from_key(self.key.verifying_key())
    }

    /// Signs the structured authorization binding an ephemeral public key to
    /// one contract.
    pub fn authorize_reencryption(
        &self,
        keypair: &ReencryptionKeypair,
        contract: Address,
    ) -> Result<ReencryptAuth> {
        let digest = crypto::reencrypt_auth_digest(&keypair.public(), contract);
        let (signature, recovery_id) = self
            .key
            .sign_recoverable(&digest)
            .map_err(|_| LedgerError::InvalidKey)?;
        Ok(ReencryptAuth {
            signature,
            recovery_id,
        })
    }
}

/// Ephemeral keypair a requester generates per re-encryption session.
#[derive(Debug, Clone)]
pub struct ReencryptionKeypair {
    secret: SigningKey,
}

impl ReencryptionKeypair {
    pub fn from_seed(seed: [u8; 32]) -> Result<Self> {
        Ok(Self {
            secret: crypto::key_from_seed(seed)?,
        })
    }

    pub fn public(&self) -> VerifyingKey {
        *self.secret.verifying_key()
    }

    /// Requester half of the re-encryption math: unmask a sealed value with
    /// the shared secret against the network key.
    pub fn unseal(
        &self,
        network_public: &VerifyingKey,
        handle: Handle,
        sealed: SealedValue,
    ) -> u64 {
        let shared = crypto::shared_secret(&self.secret, network_public);
        crypto::unmask_value(sealed.0, crypto::seal_pad(shared, handle))
    }
}

/// Builds a freshly-encrypted input bound to one (contract, caller) pair.
/// Submitting the result to any other contract or from any other caller
/// fails proof validation at the coprocessor.
pub fn encrypt_input(
    network_public: &VerifyingKey,
    ephemeral_seed: [u8; 32],
    contract: Address,
    caller: Address,
    value: u64,
) -> Result<EncryptedInput> {
    let ephemeral = crypto::key_from_seed(ephemeral_seed)?;
    let shared = crypto::shared_secret(&ephemeral, network_public);
    let masked = crypto::mask_value(value, crypto::input_pad(shared));
    let mut ciphertext = [0u8; 41];
    ciphertext[..33].copy_from_slice(&crypto::compress_key(ephemeral.verifying_key()));
    ciphertext[33..].copy_from_slice(&masked);
    let proof = crypto::input_proof_digest(&ciphertext, contract, caller);
    Ok(EncryptedInput { ciphertext, proof })
}
