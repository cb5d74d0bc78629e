//! Core identifiers shared by every component.

use crate::crypto::keccak256;

/// 20-byte principal id for accounts and component contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Deterministic pseudo-address for an in-process component contract.
    pub fn contract(name: &str) -> Address {
        let digest = keccak256(&[b"CONTRACT", name.as_bytes()]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    pub fn hex(&self) -> String {
        hex_prefixed(&self.0)
    }
}

/// Ciphertext type tags; numeric values match the executor's type ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleType {
    Bool = 0,
    Uint64 = 5,
}

/// Opaque 32-byte reference to a ciphertext, not the ciphertext itself.
/// The final byte carries the type tag. Handles are immutable; operations
/// produce new handles and never rewrite one in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub [u8; 32]);

impl Handle {
    /// Derives a handle from an operation tag and packed parts. Identical
    /// inputs always derive the identical handle.
    pub fn derive(tag: &[u8], parts: &[&[u8]], handle_type: HandleType) -> Handle {
        let mut all: Vec<&[u8]> = Vec::with_capacity(parts.len() + 2);
        all.push(b"HANDLE");
        all.push(tag);
        all.extend_from_slice(parts);
        let mut out = keccak256(&all);
        out[31] = handle_type as u8;
        Handle(out)
    }

    pub fn type_tag(&self) -> Option<HandleType> {
        match self.0[31] {
            0 => Some(HandleType::Bool),
            5 => Some(HandleType::Uint64),
            _ => None,
        }
    }

    pub fn hex(&self) -> String {
        hex_prefixed(&self.0)
    }
}

/// Freshly-encrypted client input: the ephemeral public key (33 bytes)
/// followed by the masked value (8 bytes), plus the proof binding the
/// ciphertext to one (contract, caller) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInput {
    pub ciphertext: [u8; 41],
    pub proof: [u8; 32],
}

/// Lowercase `0x`-prefixed hex of arbitrary bytes.
pub fn hex_prefixed(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
