//! Per-handle access control: the explicit set of principals permitted to
//! request plaintext disclosure of a handle. Checked on every disclosure
//! entry point, never inferred from call context.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{LedgerError, Result};
use crate::types::{Address, Handle};

#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    allowed: BTreeMap<Handle, BTreeSet<Address>>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `principal` permanent access to `handle`.
    pub fn allow(&mut self, handle: Handle, principal: Address) {
        self.allowed.entry(handle).or_default().insert(principal);
    }

    pub fn is_allowed(&self, handle: Handle, principal: Address) -> bool {
        self.allowed
            .get(&handle)
            .is_some_and(|principals| principals.contains(&principal))
    }

    pub fn require_allowed(&self, handle: Handle, principal: Address) -> Result<()> {
        if self.is_allowed(handle, principal) {
            Ok(())
        } else {
            Err(LedgerError::AccessDenied)
        }
    }

    /// Delegation: `caller` must already hold access before extending it.
    pub fn grant(&mut self, handle: Handle, caller: Address, principal: Address) -> Result<()> {
        self.require_allowed(handle, caller)?;
        self.allow(handle, principal);
        Ok(())
    }
}
