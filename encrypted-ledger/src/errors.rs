//! Error taxonomy. Every variant is fatal to the operation returning it and
//! leaves no partial effects behind. Truncating confidential subtraction is
//! deliberately not represented here: clamping an uncovered debit to zero is
//! information hiding, not a fault.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, LedgerError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("input proof does not bind the ciphertext to this contract and caller")]
    ProofInvalid,
    #[error("principal is not authorized for this handle")]
    AccessDenied,
    #[error("handle was never created by the coprocessor")]
    HandleUnknown,
    #[error("valid signatures {got} below required threshold {need}")]
    SignatureThresholdNotMet { got: usize, need: usize },
    #[error("decryption request {0} is already resolved")]
    AlreadyResolved(u64),
    #[error("bidding is closed")]
    AuctionClosed,
    #[error("auction is still open for bidding")]
    AuctionNotEnded,
    #[error("winning ticket is not decrypted yet")]
    NotYetResolved,
    #[error("auction already finalized")]
    AlreadyFinalized,
    #[error("order cannot be filled in its current state")]
    OrderNotFillable,
    #[error("operand handle types do not match the operation")]
    HandleTypeMismatch,
    #[error("byte material does not decode to a valid secp256k1 key")]
    InvalidKey,
    #[error("unknown decryption request {0}")]
    UnknownRequest(u64),
    #[error("unknown auction {0}")]
    UnknownAuction(u64),
    #[error("unknown order {0}")]
    UnknownOrder(u64),
    #[error("unknown exchange {0}")]
    UnknownExchange(u64),
    #[error("asset is not registered with this component")]
    UnknownAsset,
    #[error("fulfillment plaintext count does not match the request")]
    MalformedFulfillment,
    #[error("insufficient plaintext balance")]
    InsufficientPlainBalance,
    #[error("insufficient plaintext allowance")]
    InsufficientAllowance,
}
