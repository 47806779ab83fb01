use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ledger::AccountId;

/// Identifier of an agreement module, analogous to a contract address.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgreementId(String);

impl AgreementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgreementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgreementId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Which agreements currently hold live state for each account.
///
/// Lists keep registration order and never contain duplicates. Accounts whose
/// list becomes empty are dropped so that iteration only visits accounts
/// with at least one active agreement.
#[derive(Clone, Debug, Default)]
pub struct AgreementRegistry {
    memberships: BTreeMap<AccountId, Vec<AgreementId>>,
}

impl AgreementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the membership was new.
    pub fn add_membership(&mut self, account: &AccountId, agreement: &AgreementId) -> bool {
        let list = self.memberships.entry(account.clone()).or_default();
        if list.contains(agreement) {
            return false;
        }
        list.push(agreement.clone());
        true
    }

    /// Returns `true` if a membership was removed.
    pub fn remove_membership(&mut self, account: &AccountId, agreement: &AgreementId) -> bool {
        let Some(list) = self.memberships.get_mut(account) else {
            return false;
        };
        let before = list.len();
        list.retain(|existing| existing != agreement);
        let removed = list.len() != before;
        if list.is_empty() {
            self.memberships.remove(account);
        }
        removed
    }

    pub fn list_memberships(&self, account: &AccountId) -> &[AgreementId] {
        self.memberships
            .get(account)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_member(&self, account: &AccountId, agreement: &AgreementId) -> bool {
        self.list_memberships(account).contains(agreement)
    }

    pub fn memberships(&self) -> &BTreeMap<AccountId, Vec<AgreementId>> {
        &self.memberships
    }
}
