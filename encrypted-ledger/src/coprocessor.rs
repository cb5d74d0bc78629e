//! Symbolic homomorphic executor. Handles reference entries in a ciphertext
//! arena; every operation derives its result handle deterministically from
//! the operand handles, so the same inputs always name the same result.
//!
//! The arena stands in for the ciphertext material a real coprocessor would
//! hold. Ledger logic only ever sees handles; plaintext leaves the arena
//! through exactly two doors, both owned by the KMS side: `reveal` (joint
//! threshold decryption) and `seal` (re-encryption under a requester key).

use std::collections::BTreeMap;

use k256::ecdsa::VerifyingKey;

use crate::crypto;
use crate::errors::{LedgerError, Result};
use crate::kms::NetworkKey;
use crate::types::{Address, EncryptedInput, Handle, HandleType};

#[derive(Debug, Clone)]
pub struct Coprocessor {
    network: NetworkKey,
    ciphertexts: BTreeMap<Handle, u64>,
}

impl Coprocessor {
    pub fn new(network: NetworkKey) -> Self {
        Self {
            network,
            ciphertexts: BTreeMap::new(),
        }
    }

    /// Public half of the network key clients encrypt inputs against.
    pub fn network_public(&self) -> VerifyingKey {
        self.network.public()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.ciphertexts.contains_key(&handle)
    }

    fn insert(&mut self, handle: Handle, value: u64) -> Handle {
        self.ciphertexts.insert(handle, value);
        handle
    }

    fn value_of(&self, handle: Handle, expected: HandleType) -> Result<u64> {
        if handle.type_tag() != Some(expected) {
            return Err(LedgerError::HandleTypeMismatch);
        }
        self.ciphertexts
            .get(&handle)
            .copied()
            .ok_or(LedgerError::HandleUnknown)
    }

    /// Admits a plaintext constant into the arena ("trivial" encryption).
    pub fn trivial_encrypt(&mut self, value: u64) -> Handle {
        let handle = Handle::derive(
            b"TRIVIAL",
            &[&crypto::uint256_from_u64(value)],
            HandleType::Uint64,
        );
        self.insert(handle, value)
    }

    /// Validates a client input proof and admits the ciphertext. Fails with
    /// `ProofInvalid` when the proof does not bind this exact
    /// (ciphertext, contract, caller) triple, which blocks cross-contract
    /// replay of encrypted inputs.
    pub fn verify_and_encrypt(
        &mut self,
        input: &EncryptedInput,
        contract: Address,
        caller: Address,
    ) -> Result<Handle> {
        let expected = crypto::input_proof_digest(&input.ciphertext, contract, caller);
        if expected != input.proof {
            return Err(LedgerError::ProofInvalid);
        }
        let ephemeral = crypto::decompress_key(&input.ciphertext[..33])
            .map_err(|_| LedgerError::ProofInvalid)?;
        let mut masked = [0u8; 8];
        masked.copy_from_slice(&input.ciphertext[33..]);
        let value = self.network.open_input(&ephemeral, masked);
        let handle = Handle::derive(
            b"INPUT",
            &[&input.ciphertext, &contract.0, &caller.0],
            HandleType::Uint64,
        );
        Ok(self.insert(handle, value))
    }

    /// Homomorphic wrapping addition over euint64 handles.
    pub fn add(&mut self, lhs: Handle, rhs: Handle) -> Result<Handle> {
        let a = self.value_of(lhs, HandleType::Uint64)?;
        let b = self.value_of(rhs, HandleType::Uint64)?;
        let handle = Handle::derive(b"ADD", &[&lhs.0, &rhs.0], HandleType::Uint64);
        Ok(self.insert(handle, a.wrapping_add(b)))
    }

    /// Homomorphic wrapping subtraction over euint64 handles.
    pub fn sub(&mut self, lhs: Handle, rhs: Handle) -> Result<Handle> {
        let a = self.value_of(lhs, HandleType::Uint64)?;
        let b = self.value_of(rhs, HandleType::Uint64)?;
        let handle = Handle::derive(b"SUB", &[&lhs.0, &rhs.0], HandleType::Uint64);
        Ok(self.insert(handle, a.wrapping_sub(b)))
    }

    /// Strict `lhs < rhs`, yielding an ebool handle.
    pub fn lt(&mut self, lhs: Handle, rhs: Handle) -> Result<Handle> {
        let a = self.value_of(lhs, HandleType::Uint64)?;
        let b = self.value_of(rhs, HandleType::Uint64)?;
        let handle = Handle::derive(b"LT", &[&lhs.0, &rhs.0], HandleType::Bool);
        Ok(self.insert(handle, u64::from(a < b)))
    }

    /// `select(cond, then, else)`: the only branching construct available
    /// over encrypted data.
    pub fn select(
        &mut self,
        condition: Handle,
        then_value: Handle,
        else_value: Handle,
    ) -> Result<Handle> {
        let cond = self.value_of(condition, HandleType::Bool)?;
        let branch_type = then_value
            .type_tag()
            .ok_or(LedgerError::HandleTypeMismatch)?;
        if else_value.type_tag() != Some(branch_type) {
            return Err(LedgerError::HandleTypeMismatch);
        }
        let a = self.value_of(then_value, branch_type)?;
        let b = self.value_of(else_value, branch_type)?;
        let handle = Handle::derive(
            b"SELECT",
            &[&condition.0, &then_value.0, &else_value.0],
            branch_type,
        );
        Ok(self.insert(handle, if cond != 0 { a } else { b }))
    }

    /// Joint decryption as performed by the threshold KMS network. Ledger
    /// logic must never branch on this; disclosure goes through the gateway.
    pub fn reveal(&self, handle: Handle) -> Result<u64> {
        self.ciphertexts
            .get(&handle)
            .copied()
            .ok_or(LedgerError::HandleUnknown)
    }

    /// Re-encryption math for the gateway: seal the plaintext under the
    /// requester's ephemeral key without surfacing it on the ledger.
    pub(crate) fn seal(&self, handle: Handle, requester: &VerifyingKey) -> Result<[u8; 8]> {
        let value = self.reveal(handle)?;
        Ok(self.network.seal(requester, handle, value))
    }
}
