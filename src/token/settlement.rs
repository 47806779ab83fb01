use tracing::debug;

use crate::error::Result;
use crate::gate::AgreementGrant;
use crate::ledger::{AccountId, LedgerEntry};
use crate::registry::AgreementId;
use crate::token::SuperToken;
use crate::value::{FixedPointValue, Timestamp};

/// Everything settling one account at one instant would write.
///
/// Plans are computed from committed state only and may be adjusted (debit,
/// credit) before they are committed; committing cannot fail.
#[derive(Clone, Debug)]
pub(crate) struct AccountSettlement {
    pub account: AccountId,
    pub at: Timestamp,
    pub entry: LedgerEntry,
    pub delta: FixedPointValue,
    pub states: Vec<(AgreementId, Vec<u8>)>,
}

impl SuperToken {
    pub(crate) fn plan_settlement(
        &self,
        account: &AccountId,
        at: Timestamp,
    ) -> Result<AccountSettlement> {
        self.ledger.ensure_not_before(account, at)?;

        let mut delta = FixedPointValue::ZERO;
        let mut states = Vec::new();
        for agreement_id in self.registry.list_memberships(account) {
            let agreement = self.agreement(agreement_id)?;
            let Some(state) = self.store.account_state(agreement_id, account) else {
                continue;
            };
            delta = delta.checked_add(agreement.dynamic_delta(account, state, at)?)?;
            states.push((
                agreement_id.clone(),
                agreement.settled_state(account, state, at)?,
            ));
        }

        let mut entry = self.ledger.entry(account);
        entry.settled_balance = entry.settled_balance.checked_add(delta)?;
        entry.settled_at = at;
        Ok(AccountSettlement {
            account: account.clone(),
            at,
            entry,
            delta,
            states,
        })
    }

    /// Plans for each distinct account in `accounts`, in order.
    pub(crate) fn plan_settlements(
        &self,
        accounts: &[&AccountId],
        at: Timestamp,
    ) -> Result<Vec<AccountSettlement>> {
        let mut plans: Vec<AccountSettlement> = Vec::with_capacity(accounts.len());
        for account in accounts {
            if plans.iter().any(|plan| &plan.account == *account) {
                continue;
            }
            plans.push(self.plan_settlement(account, at)?);
        }
        Ok(plans)
    }

    pub(crate) fn commit_settlement(&mut self, settlement: AccountSettlement) {
        for (agreement, state) in settlement.states {
            let grant = AgreementGrant::for_settlement(&agreement);
            self.store
                .put_account_state(&grant, &settlement.account, Some(state));
        }
        if !settlement.delta.is_zero() {
            debug!(
                account = %settlement.account,
                at = settlement.at,
                delta = %settlement.delta,
                balance = %settlement.entry.settled_balance,
                "settled"
            );
        }
        self.ledger.commit(&settlement.account, settlement.entry);
    }
}
