//! Sealed-bid auction over confidential bid amounts.
//!
//! Lifecycle: open bidding, optional beneficiary early stop, winning-ticket
//! decryption through the oracle, then settlement that pays the beneficiary
//! and releases losing escrow.

use tracing::info;

use crate::acl::AccessControl;
use crate::coprocessor::Coprocessor;
use crate::errors::{LedgerError, Result};
use crate::gateway::{DecryptionCallback, DecryptionGateway};
use crate::token::EncryptedToken;
use crate::types::{Address, EncryptedInput, Handle};

#[derive(Debug, Clone, Copy)]
struct BidEntry {
    bidder: Address,
    /// Escrowed effective amount handle (post-truncation).
    amount: Handle,
}

/// Resolved winning ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Winner {
    pub bidder: Address,
    pub amount: u64,
}

/// One sealed-bid auction. Bid entries keep first-submission order; the
/// strict `lt` fold therefore awards ties to the earliest bidder.
#[derive(Debug, Clone)]
pub struct Auction {
    id: u64,
    contract: Address,
    beneficiary: Address,
    end_time: u64,
    stopped: bool,
    bids: Vec<BidEntry>,
    winning_amount: Option<Handle>,
    winning_index: Option<Handle>,
    request_id: Option<u64>,
    resolved: bool,
    winner: Option<Winner>,
    finalized: bool,
}

impl Auction {
    pub(crate) fn new(id: u64, beneficiary: Address, end_time: u64) -> Self {
        Self {
            id,
            contract: Address::contract(&format!("auction:{id}")),
            beneficiary,
            end_time,
            stopped: false,
            bids: Vec::new(),
            winning_amount: None,
            winning_index: None,
            request_id: None,
            resolved: false,
            winner: None,
            finalized: false,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn beneficiary(&self) -> Address {
        self.beneficiary
    }

    pub fn end_time(&self) -> u64 {
        self.end_time
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn bidder_count(&self) -> usize {
        self.bids.len()
    }

    pub fn bid_of(&self, bidder: Address) -> Option<Handle> {
        self.bids
            .iter()
            .find(|entry| entry.bidder == bidder)
            .map(|entry| entry.amount)
    }

    pub fn winning_ticket(&self) -> Option<Handle> {
        self.winning_amount
    }

    pub fn request_id(&self) -> Option<u64> {
        self.request_id
    }

    pub fn winner(&self) -> Option<Winner> {
        self.winner
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn bidding_open(&self, now: u64) -> bool {
        !self.stopped && now < self.end_time
    }

    /// Places or replaces the caller's sealed bid and escrows the effective
    /// amount (truncating debit). A replacement refunds the previous escrow
    /// first and keeps the original submission position.
    pub fn bid(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        token: &mut EncryptedToken,
        now: u64,
        bidder: Address,
        input: &EncryptedInput,
    ) -> Result<Handle> {
        if !self.bidding_open(now) {
            return Err(LedgerError::AuctionClosed);
        }
        let amount = copro.verify_and_encrypt(input, self.contract, bidder)?;
        acl.allow(amount, bidder);
        acl.allow(amount, self.contract);

        let previous = self.bids.iter().position(|entry| entry.bidder == bidder);
        if let Some(position) = previous {
            let prior = self.bids[position].amount;
            token.transfer_handle(copro, acl, self.contract, bidder, prior)?;
            let escrow = token.transfer_handle(copro, acl, bidder, self.contract, amount)?;
            self.bids[position].amount = escrow.actual;
            Ok(escrow.actual)
        } else {
            let escrow = token.transfer_handle(copro, acl, bidder, self.contract, amount)?;
            self.bids.push(BidEntry {
                bidder,
                amount: escrow.actual,
            });
            Ok(escrow.actual)
        }
    }

    /// Beneficiary-only early stop.
    pub fn stop(&mut self, caller: Address) -> Result<()> {
        if caller != self.beneficiary {
            return Err(LedgerError::AccessDenied);
        }
        self.stopped = true;
        info!(auction = self.id, "bidding stopped early");
        Ok(())
    }

    /// Folds the maximum bid (and its bidder index) homomorphically and asks
    /// the oracle to decrypt both in one request. Re-issuing before
    /// resolution returns the outstanding request instead of opening a
    /// second one.
    pub fn decrypt_winning_ticket(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        gateway: &mut DecryptionGateway,
        now: u64,
    ) -> Result<u64> {
        if self.bidding_open(now) {
            return Err(LedgerError::AuctionNotEnded);
        }
        if let Some(request_id) = self.request_id {
            if self.resolved {
                return Err(LedgerError::AlreadyResolved(request_id));
            }
            return Ok(request_id);
        }

        // Left-to-right strict fold; equal bids keep the earlier entry.
        let mut best_amount = copro.trivial_encrypt(0);
        let mut best_index = copro.trivial_encrypt(0);
        for (index, entry) in self.bids.iter().enumerate() {
            let beats = copro.lt(best_amount, entry.amount)?;
            let candidate = copro.trivial_encrypt(index as u64);
            best_amount = copro.select(beats, entry.amount, best_amount)?;
            best_index = copro.select(beats, candidate, best_index)?;
        }
        acl.allow(best_amount, self.contract);
        acl.allow(best_index, self.contract);

        let request_id = gateway.request_decryption(
            copro,
            acl,
            self.contract,
            vec![best_amount, best_index],
            DecryptionCallback::AuctionWinner {
                auction_id: self.id,
            },
        )?;
        self.winning_amount = Some(best_amount);
        self.winning_index = Some(best_index);
        self.request_id = Some(request_id);
        info!(
            auction = self.id,
            request_id, "winning ticket decryption requested"
        );
        Ok(request_id)
    }

    /// Oracle callback: records the winning plaintexts. With no bids, the
    /// ticket resolves to zero and no winner.
    pub(crate) fn resolve_winning_ticket(&mut self, plaintexts: &[u64]) -> Result<()> {
        if plaintexts.len() != 2 {
            return Err(LedgerError::MalformedFulfillment);
        }
        let amount = plaintexts[0];
        let index = plaintexts[1] as usize;
        self.winner = self.bids.get(index).map(|entry| Winner {
            bidder: entry.bidder,
            amount,
        });
        self.resolved = true;
        info!(auction = self.id, amount, "winning ticket resolved");
        Ok(())
    }

    /// Settlement: the winning escrow goes to the beneficiary, every other
    /// escrow returns to its bidder.
    pub fn finalize(
        &mut self,
        copro: &mut Coprocessor,
        acl: &mut AccessControl,
        token: &mut EncryptedToken,
    ) -> Result<()> {
        if !self.resolved {
            return Err(LedgerError::NotYetResolved);
        }
        if self.finalized {
            return Err(LedgerError::AlreadyFinalized);
        }
        let winner = self.winner.map(|winner| winner.bidder);
        for entry in &self.bids {
            let target = if Some(entry.bidder) == winner {
                self.beneficiary
            } else {
                entry.bidder
            };
            token.transfer_handle(copro, acl, self.contract, target, entry.amount)?;
        }
        self.finalized = true;
        info!(auction = self.id, "auction finalized");
        Ok(())
    }
}
