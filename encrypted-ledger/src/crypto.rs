//! Derivation and signature rules shared by the client SDK, the coprocessor,
//! and the KMS network. Every digest and pad below is consensus: both sides
//! of each boundary must compute the same bytes.

use k256::ecdh::diffie_hellman;
use k256::ecdsa::signature::Verifier;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

use crate::errors::{LedgerError, Result};
use crate::types::{Address, Handle};

/// Computes `keccak256` over concatenated byte slices, equivalent to
/// `abi.encodePacked(...)`.
pub fn keccak256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Encodes a Rust `u64` into `uint256` big-endian bytes.
pub fn uint256_from_u64(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

/// Interprets a 32-byte seed as a secp256k1 secret scalar.
pub fn key_from_seed(seed: [u8; 32]) -> Result<SigningKey> {
    SigningKey::from_slice(&seed).map_err(|_| LedgerError::InvalidKey)
}

/// Account address: `keccak256(uncompressed_point)[12..]`.
pub fn address_from_key(key: &VerifyingKey) -> Address {
    let point = key.as_affine().to_encoded_point(false);
    let digest = keccak256(&[&point.as_bytes()[1..]]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address(out)
}

/// SEC1 compressed encoding (33 bytes), used wherever a public key is hashed
/// or embedded in a ciphertext.
pub fn compress_key(key: &VerifyingKey) -> [u8; 33] {
    let point = key.as_affine().to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(point.as_bytes());
    out
}

pub fn decompress_key(bytes: &[u8]) -> Result<VerifyingKey> {
    VerifyingKey::from_sec1_bytes(bytes).map_err(|_| LedgerError::InvalidKey)
}

/// Raw ECDH shared secret between one side's scalar and the peer's point.
/// Both directions derive the same 32 bytes.
pub fn shared_secret(secret: &SigningKey, peer: &VerifyingKey) -> [u8; 32] {
    let shared = diffie_hellman(secret.as_nonzero_scalar(), peer.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes().as_slice());
    out
}

fn pad8(digest: [u8; 32]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Pad masking a freshly-encrypted client input. Domain `"IN"` separates
/// input masking from re-encryption sealing.
pub fn input_pad(shared: [u8; 32]) -> [u8; 8] {
    pad8(keccak256(&[b"IN", &shared]))
}

/// Pad sealing a re-encryption response. Bound to the handle so one
/// authorization cannot unmask a different ciphertext.
pub fn seal_pad(shared: [u8; 32], handle: Handle) -> [u8; 8] {
    pad8(keccak256(&[b"SEAL", &shared, &handle.0]))
}

pub fn mask_value(value: u64, pad: [u8; 8]) -> [u8; 8] {
    (value ^ u64::from_be_bytes(pad)).to_be_bytes()
}

pub fn unmask_value(masked: [u8; 8], pad: [u8; 8]) -> u64 {
    u64::from_be_bytes(masked) ^ u64::from_be_bytes(pad)
}

/// Proof digest binding an input ciphertext to exactly one
/// (contract, caller) pair.
pub fn input_proof_digest(ciphertext: &[u8], contract: Address, caller: Address) -> [u8; 32] {
    keccak256(&[b"INPUT_PROOF", ciphertext, &contract.0, &caller.0])
}

/// Digest the KMS nodes co-sign over one decryption result.
pub fn result_digest(request_id: u64, plaintexts: &[u64]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"DECRYPTION_RESULT");
    hasher.update(uint256_from_u64(request_id));
    for value in plaintexts {
        hasher.update(uint256_from_u64(*value));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Structured message an account signs to authorize re-encryption of its
/// handles under an ephemeral public key, bound to one contract.
pub fn reencrypt_auth_digest(public_key: &VerifyingKey, contract: Address) -> [u8; 32] {
    keccak256(&[b"REENCRYPT_AUTH", &compress_key(public_key), &contract.0])
}

/// Verifies one ECDSA signature over a digest.
pub fn verify_signature(key: &VerifyingKey, digest: [u8; 32], signature: &Signature) -> bool {
    key.verify(&digest, signature).is_ok()
}

/// Recovers the signing account address from a recoverable signature.
pub fn recover_address(
    digest: [u8; 32],
    signature: &Signature,
    recovery_id: RecoveryId,
) -> Result<Address> {
    let key = VerifyingKey::recover_from_msg(&digest, signature, recovery_id)
        .map_err(|_| LedgerError::InvalidKey)?;
    Ok(address_from_key(&key))
}
