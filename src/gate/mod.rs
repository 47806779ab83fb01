//! Authorization of writes to agreement-owned state.
//!
//! Agreement state lives in an [`AgreementStateStore`] held by the token. The
//! store's write methods demand an [`AgreementGrant`], and the only public way
//! to obtain one is [`AccessGate::authorize`], which succeeds when the caller
//! is the registered agreement that owns the slice being written.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SuperTokenError};
use crate::ledger::AccountId;
use crate::registry::AgreementId;

/// Identity of whoever is invoking an operation, as vouched for by the host.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Caller {
    Account(AccountId),
    Agreement(AgreementId),
}

impl Caller {
    pub fn account(id: impl Into<AccountId>) -> Self {
        Caller::Account(id.into())
    }

    pub fn agreement(id: &AgreementId) -> Self {
        Caller::Agreement(id.clone())
    }

    pub fn is_account(&self, account: &AccountId) -> bool {
        matches!(self, Caller::Account(id) if id == account)
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Account(id) => write!(f, "account:{id}"),
            Caller::Agreement(id) => write!(f, "agreement:{id}"),
        }
    }
}

/// Proof that the holder may write `agreement`'s slice of the store.
#[derive(Debug)]
pub struct AgreementGrant {
    agreement: AgreementId,
}

impl AgreementGrant {
    /// Used by the token when it folds settled state back on a module's behalf.
    pub(crate) fn for_settlement(agreement: &AgreementId) -> Self {
        Self {
            agreement: agreement.clone(),
        }
    }

    pub fn agreement(&self) -> &AgreementId {
        &self.agreement
    }
}

#[derive(Clone, Debug, Default)]
pub struct AccessGate {
    registered: BTreeSet<AgreementId>,
}

impl AccessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agreement: &AgreementId) -> Result<()> {
        if !self.registered.insert(agreement.clone()) {
            return Err(SuperTokenError::DuplicateAgreement {
                agreement: agreement.clone(),
            });
        }
        Ok(())
    }

    pub fn is_registered(&self, agreement: &AgreementId) -> bool {
        self.registered.contains(agreement)
    }

    /// Grants write access to `owner`'s state iff `caller` is `owner` itself
    /// and `owner` is registered with the token.
    pub fn authorize(&self, caller: &Caller, owner: &AgreementId) -> Result<AgreementGrant> {
        match caller {
            Caller::Agreement(id) if id == owner && self.is_registered(owner) => {
                Ok(AgreementGrant {
                    agreement: owner.clone(),
                })
            }
            _ => {
                warn!(caller = %caller, owner = %owner, "rejected agreement state access");
                Err(SuperTokenError::UnauthorizedAgreementAccess {
                    caller: caller.clone(),
                    owner: owner.clone(),
                })
            }
        }
    }
}

/// Opaque per-agreement storage: one blob per `(agreement, account)` and a
/// keyed blob space per agreement for data that is not tied to one account.
#[derive(Clone, Debug, Default)]
pub struct AgreementStateStore {
    account_states: BTreeMap<(AgreementId, AccountId), Vec<u8>>,
    data: BTreeMap<(AgreementId, String), Vec<u8>>,
}

impl AgreementStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_state(&self, agreement: &AgreementId, account: &AccountId) -> Option<&[u8]> {
        self.account_states
            .get(&(agreement.clone(), account.clone()))
            .map(Vec::as_slice)
    }

    pub fn data(&self, agreement: &AgreementId, key: &str) -> Option<&[u8]> {
        self.data
            .get(&(agreement.clone(), key.to_string()))
            .map(Vec::as_slice)
    }

    /// All data entries owned by `agreement`, in key order.
    pub fn data_of<'a>(
        &'a self,
        agreement: &'a AgreementId,
    ) -> impl Iterator<Item = (&'a str, &'a [u8])> + 'a {
        self.data
            .iter()
            .filter(move |((owner, _), _)| owner == agreement)
            .map(|((_, key), value)| (key.as_str(), value.as_slice()))
    }

    /// `None` clears the slot.
    pub fn put_account_state(
        &mut self,
        grant: &AgreementGrant,
        account: &AccountId,
        state: Option<Vec<u8>>,
    ) {
        let slot = (grant.agreement.clone(), account.clone());
        match state {
            Some(state) => {
                self.account_states.insert(slot, state);
            }
            None => {
                self.account_states.remove(&slot);
            }
        }
    }

    pub fn put_data(&mut self, grant: &AgreementGrant, key: &str, data: Option<Vec<u8>>) {
        let slot = (grant.agreement.clone(), key.to_string());
        match data {
            Some(data) => {
                self.data.insert(slot, data);
            }
            None => {
                self.data.remove(&slot);
            }
        }
    }

    pub fn account_states(&self) -> &BTreeMap<(AgreementId, AccountId), Vec<u8>> {
        &self.account_states
    }

    pub fn all_data(&self) -> &BTreeMap<(AgreementId, String), Vec<u8>> {
        &self.data
    }
}
