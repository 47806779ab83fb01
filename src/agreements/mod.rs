//! Pluggable providers of time-dependent balance state.
//!
//! An agreement owns one slice of the token's [`AgreementStateStore`] and
//! answers two questions about the per-account blob it keeps there: how much
//! the balance has drifted since the blob's reference point, and what the blob
//! looks like once that drift has been folded into the ledger. The token
//! aggregates over every agreement an account is a member of without knowing
//! what any of them do.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::gate::AgreementStateStore;
use crate::ledger::AccountId;
use crate::registry::AgreementId;
use crate::token::TokenEvent;
use crate::value::{FixedPointValue, Timestamp};

pub mod flow;

pub use flow::{FlowAccountState, FlowAgreement, FlowState, FLOW_AGREEMENT_ID};

pub trait Agreement: Send + Sync {
    fn id(&self) -> &AgreementId;

    /// Signed balance change `state` has accrued for `account` by `as_of`.
    /// Must not depend on anything but its arguments.
    fn dynamic_delta(
        &self,
        account: &AccountId,
        state: &[u8],
        as_of: Timestamp,
    ) -> Result<FixedPointValue>;

    /// `state` with its reference point moved to `at`, after the delta up to
    /// `at` has been credited to the ledger.
    fn settled_state(&self, account: &AccountId, state: &[u8], at: Timestamp) -> Result<Vec<u8>>;

    /// Whether `state` keeps the account in this agreement's membership set.
    fn is_active(&self, state: &[u8]) -> Result<bool>;
}

/// Read access handed to an agreement while it prepares a state change.
///
/// Account states are shown as they will be after the pending settlement,
/// so the agreement always builds on top of a zero accrued delta.
pub struct AgreementView<'a> {
    agreement: &'a AgreementId,
    at: Timestamp,
    store: &'a AgreementStateStore,
    settled: BTreeMap<AccountId, &'a [u8]>,
}

impl<'a> AgreementView<'a> {
    pub(crate) fn new(
        agreement: &'a AgreementId,
        at: Timestamp,
        store: &'a AgreementStateStore,
        settled: BTreeMap<AccountId, &'a [u8]>,
    ) -> Self {
        Self {
            agreement,
            at,
            store,
            settled,
        }
    }

    pub fn agreement(&self) -> &AgreementId {
        self.agreement
    }

    pub fn at(&self) -> Timestamp {
        self.at
    }

    pub fn account_state(&self, account: &AccountId) -> Option<&[u8]> {
        self.settled
            .get(account)
            .copied()
            .or_else(|| self.store.account_state(self.agreement, account))
    }

    pub fn data(&self, key: &str) -> Option<&[u8]> {
        self.store.data(self.agreement, key)
    }
}

/// Writes an agreement wants applied atomically with the settlement that
/// preceded it. `None` clears a slot.
#[derive(Debug, Default)]
pub struct AgreementUpdate {
    pub account_states: Vec<(AccountId, Option<Vec<u8>>)>,
    pub data: Vec<(String, Option<Vec<u8>>)>,
    pub events: Vec<TokenEvent>,
}

impl AgreementUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_state(mut self, account: &AccountId, state: Option<Vec<u8>>) -> Self {
        self.account_states.push((account.clone(), state));
        self
    }

    pub fn data(mut self, key: impl Into<String>, data: Option<Vec<u8>>) -> Self {
        self.data.push((key.into(), data));
        self
    }

    pub fn event(mut self, event: TokenEvent) -> Self {
        self.events.push(event);
        self
    }
}
