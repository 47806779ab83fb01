use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{BalanceContext, Result, SuperTokenError};
use crate::registry::AgreementId;
use crate::value::{FixedPointValue, Timestamp};

pub type AccountId = String;

/// Settled ("static") funds of one account.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LedgerEntry {
    pub settled_balance: FixedPointValue,
    pub settled_at: Timestamp,
}

impl LedgerEntry {
    pub fn credit(&mut self, amount: FixedPointValue) -> Result<()> {
        self.settled_balance = self.settled_balance.checked_add(amount)?;
        Ok(())
    }

    pub fn debit(
        &mut self,
        account: &AccountId,
        amount: FixedPointValue,
        context: BalanceContext,
    ) -> Result<()> {
        if self.settled_balance < amount {
            return Err(SuperTokenError::InsufficientBalance {
                context,
                account: account.clone(),
                available: self.settled_balance,
                required: amount,
            });
        }
        self.settled_balance = self.settled_balance.checked_sub(amount)?;
        Ok(())
    }
}

/// Source of truth for settled balances.
///
/// Accounts come into existence on first write and are never removed. Entries
/// are only replaced wholesale by the token after a settlement plan passed
/// all of its checks, so a failing operation never leaves a half-written
/// entry behind.
#[derive(Clone, Debug, Default)]
pub struct AccountLedger {
    entries: BTreeMap<AccountId, LedgerEntry>,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry of `account`, or the zero entry for an untouched account.
    pub fn entry(&self, account: &AccountId) -> LedgerEntry {
        self.entries.get(account).copied().unwrap_or_default()
    }

    pub fn settled_balance(&self, account: &AccountId) -> FixedPointValue {
        self.entry(account).settled_balance
    }

    pub fn settled_at(&self, account: &AccountId) -> Timestamp {
        self.entry(account).settled_at
    }

    /// Rejects `at` if it lies before the account's last settlement.
    pub fn ensure_not_before(&self, account: &AccountId, at: Timestamp) -> Result<()> {
        let settled_at = self.settled_at(account);
        if at < settled_at {
            return Err(SuperTokenError::InvalidTimestamp {
                account: account.clone(),
                at,
                settled_at,
            });
        }
        Ok(())
    }

    pub(crate) fn commit(&mut self, account: &AccountId, entry: LedgerEntry) {
        debug_assert!(entry.settled_at >= self.settled_at(account));
        self.entries.insert(account.clone(), entry);
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountId> {
        self.entries.keys()
    }

    pub fn entries(&self) -> &BTreeMap<AccountId, LedgerEntry> {
        &self.entries
    }
}

/// SHA-256 Merkle root over settled entries, registry memberships and the raw
/// agreement state. Two tokens with equal roots hold the same books.
pub fn compute_state_root(
    entries: &BTreeMap<AccountId, LedgerEntry>,
    memberships: &BTreeMap<AccountId, Vec<AgreementId>>,
    agreement_states: &BTreeMap<(AgreementId, AccountId), Vec<u8>>,
    agreement_data: &BTreeMap<(AgreementId, String), Vec<u8>>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for (account, entry) in entries {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hash_str(&mut hasher, account);
        hasher.update(entry.settled_balance.to_le_bytes());
        hasher.update(entry.settled_at.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (account, agreements) in memberships {
        let mut hasher = Sha256::new();
        hasher.update(b"member");
        hash_str(&mut hasher, account);
        for agreement in agreements {
            hash_str(&mut hasher, agreement.as_str());
        }
        leaves.push(hasher.finalize().into());
    }
    for ((agreement, account), state) in agreement_states {
        let mut hasher = Sha256::new();
        hasher.update(b"state");
        hash_str(&mut hasher, agreement.as_str());
        hash_str(&mut hasher, account);
        hasher.update(state);
        leaves.push(hasher.finalize().into());
    }
    for ((agreement, key), data) in agreement_data {
        let mut hasher = Sha256::new();
        hasher.update(b"data");
        hash_str(&mut hasher, agreement.as_str());
        hash_str(&mut hasher, key);
        hasher.update(data);
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn hash_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"supertoken-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
