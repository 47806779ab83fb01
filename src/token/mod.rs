//! The SuperToken: settled ledger, agreement registry and access gate behind
//! one ERC20-style surface.
//!
//! Every mutating method follows the same shape: plan the settlement of the
//! accounts it touches, check the mutation against the planned (settled)
//! balances, and only then commit. Any error leaves the token untouched.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agreements::{Agreement, AgreementUpdate, AgreementView, FlowAgreement};
use crate::config::TokenConfig;
use crate::error::{BalanceContext, Result, SuperTokenError};
use crate::gate::{AccessGate, AgreementStateStore, Caller};
use crate::ledger::{compute_state_root, AccountId, AccountLedger, LedgerEntry};
use crate::registry::{AgreementId, AgreementRegistry};
use crate::underlying::UnderlyingToken;
use crate::value::{FixedPointValue, Timestamp, DECIMALS};

mod settlement;

pub(crate) use settlement::AccountSettlement;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenEvent {
    Upgraded {
        account: AccountId,
        amount: FixedPointValue,
        at: Timestamp,
    },
    Downgraded {
        account: AccountId,
        amount: FixedPointValue,
        at: Timestamp,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: FixedPointValue,
        at: Timestamp,
    },
    Approval {
        owner: AccountId,
        spender: AccountId,
        amount: FixedPointValue,
    },
    AgreementAccountStateUpdated {
        agreement: AgreementId,
        account: AccountId,
        at: Timestamp,
    },
    FlowUpdated {
        agreement: AgreementId,
        sender: AccountId,
        receiver: AccountId,
        flow_rate: FixedPointValue,
        at: Timestamp,
    },
}

/// Consistent copy of the books at one logical point.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub name: String,
    pub symbol: String,
    pub total_supply: FixedPointValue,
    pub accounts: BTreeMap<AccountId, LedgerEntry>,
    pub memberships: BTreeMap<AccountId, Vec<AgreementId>>,
    pub event_count: usize,
    #[serde(with = "hex::serde")]
    pub state_root: [u8; 32],
}

pub struct SuperToken {
    config: TokenConfig,
    ledger: AccountLedger,
    registry: AgreementRegistry,
    gate: AccessGate,
    store: AgreementStateStore,
    agreements: BTreeMap<AgreementId, Box<dyn Agreement>>,
    allowances: BTreeMap<(AccountId, AccountId), FixedPointValue>,
    total_credited: FixedPointValue,
    total_debited: FixedPointValue,
    events: Vec<TokenEvent>,
}

impl SuperToken {
    /// Fails unless the config uses the fixed 18 decimals of [`FixedPointValue`].
    pub fn new(config: TokenConfig) -> Result<Self> {
        if config.decimals != DECIMALS {
            return Err(SuperTokenError::UnsupportedDecimals {
                decimals: config.decimals,
            });
        }
        Ok(Self {
            config,
            ledger: AccountLedger::new(),
            registry: AgreementRegistry::new(),
            gate: AccessGate::new(),
            store: AgreementStateStore::new(),
            agreements: BTreeMap::new(),
            allowances: BTreeMap::new(),
            total_credited: FixedPointValue::ZERO,
            total_debited: FixedPointValue::ZERO,
            events: Vec::new(),
        })
    }

    /// A token with the default [`FlowAgreement`] registered.
    pub fn with_flow_agreement(config: TokenConfig) -> Result<(Self, FlowAgreement)> {
        let mut token = Self::new(config)?;
        let flow = FlowAgreement::default();
        token.register_agreement(Box::new(flow.clone()))?;
        Ok((token, flow))
    }

    pub fn register_agreement(&mut self, agreement: Box<dyn Agreement>) -> Result<()> {
        let id = agreement.id().clone();
        self.gate.register(&id)?;
        info!(agreement = %id, "agreement registered");
        self.agreements.insert(id, agreement);
        Ok(())
    }

    pub(crate) fn agreement(&self, id: &AgreementId) -> Result<&dyn Agreement> {
        self.agreements
            .get(id)
            .map(|agreement| agreement.as_ref())
            .ok_or_else(|| SuperTokenError::UnknownAgreement {
                agreement: id.clone(),
            })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.config.decimals
    }

    /// Everything ever credited minus everything ever debited.
    pub fn total_supply(&self) -> Result<FixedPointValue> {
        self.total_credited.checked_sub(self.total_debited)
    }

    pub fn events(&self) -> &[TokenEvent] {
        &self.events
    }

    pub fn settled_entry(&self, account: &AccountId) -> LedgerEntry {
        self.ledger.entry(account)
    }

    /// Every account the token has seen, whether settled or only streaming.
    pub fn accounts(&self) -> BTreeSet<AccountId> {
        self.ledger
            .accounts()
            .chain(self.registry.memberships().keys())
            .cloned()
            .collect()
    }

    pub fn get_account_active_agreements(&self, account: &AccountId) -> &[AgreementId] {
        self.registry.list_memberships(account)
    }

    pub fn agreement_account_state(
        &self,
        agreement: &AgreementId,
        account: &AccountId,
    ) -> Option<&[u8]> {
        self.store.account_state(agreement, account)
    }

    pub fn agreement_data(&self, agreement: &AgreementId, key: &str) -> Option<&[u8]> {
        self.store.data(agreement, key)
    }

    pub fn agreement_data_of<'a>(
        &'a self,
        agreement: &'a AgreementId,
    ) -> impl Iterator<Item = (&'a str, &'a [u8])> + 'a {
        self.store.data_of(agreement)
    }

    /// Settled balance plus every live agreement delta at `at`. Read-only.
    pub fn realtime_balance_of(
        &self,
        account: &AccountId,
        at: Timestamp,
    ) -> Result<FixedPointValue> {
        Ok(self.plan_settlement(account, at)?.entry.settled_balance)
    }

    pub fn balance_of(&self, account: &AccountId, at: Timestamp) -> Result<FixedPointValue> {
        self.realtime_balance_of(account, at)
    }

    /// Folds all accrued agreement deltas into the settled balance. Returns
    /// the delta folded; a second call at the same `at` folds zero.
    pub fn settle(&mut self, account: &AccountId, at: Timestamp) -> Result<FixedPointValue> {
        let plan = self.plan_settlement(account, at)?;
        let delta = plan.delta;
        self.commit_settlement(plan);
        Ok(delta)
    }

    /// Settles both accounts and moves `amount` of settled funds.
    pub fn move_balance(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: FixedPointValue,
        at: Timestamp,
        context: BalanceContext,
    ) -> Result<()> {
        ensure_non_negative(amount)?;
        let mut debit = self.plan_settlement(from, at)?;
        debit.entry.debit(from, amount, context)?;
        if from == to {
            debit.entry.credit(amount)?;
            self.commit_settlement(debit);
            return Ok(());
        }
        let mut credit = self.plan_settlement(to, at)?;
        credit.entry.credit(amount)?;
        self.commit_settlement(debit);
        self.commit_settlement(credit);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: FixedPointValue,
        at: Timestamp,
    ) -> Result<()> {
        self.move_balance(from, to, amount, at, BalanceContext::Transfer)?;
        info!(from = %from, to = %to, amount = %amount, at, "transfer");
        self.events.push(TokenEvent::Transfer {
            from: from.clone(),
            to: to.clone(),
            amount,
            at,
        });
        Ok(())
    }

    pub fn approve(
        &mut self,
        owner: &AccountId,
        spender: &AccountId,
        amount: FixedPointValue,
    ) -> Result<()> {
        ensure_non_negative(amount)?;
        if amount.is_zero() {
            self.allowances.remove(&(owner.clone(), spender.clone()));
        } else {
            self.allowances
                .insert((owner.clone(), spender.clone()), amount);
        }
        self.events.push(TokenEvent::Approval {
            owner: owner.clone(),
            spender: spender.clone(),
            amount,
        });
        Ok(())
    }

    pub fn allowance(&self, owner: &AccountId, spender: &AccountId) -> FixedPointValue {
        self.allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Moves `from`'s funds on behalf of `spender`, consuming allowance.
    /// The balance is checked before the allowance.
    pub fn transfer_from(
        &mut self,
        spender: &AccountId,
        from: &AccountId,
        to: &AccountId,
        amount: FixedPointValue,
        at: Timestamp,
    ) -> Result<()> {
        ensure_non_negative(amount)?;
        let available = self.realtime_balance_of(from, at)?;
        if available < amount {
            return Err(SuperTokenError::InsufficientBalance {
                context: BalanceContext::Transfer,
                account: from.clone(),
                available,
                required: amount,
            });
        }
        let allowance = self.allowance(from, spender);
        if allowance < amount {
            return Err(SuperTokenError::InsufficientAllowance {
                owner: from.clone(),
                spender: spender.clone(),
                allowance,
                required: amount,
            });
        }
        let remaining = allowance.checked_sub(amount)?;
        self.transfer(from, to, amount, at)?;
        if remaining.is_zero() {
            self.allowances.remove(&(from.clone(), spender.clone()));
        } else {
            self.allowances
                .insert((from.clone(), spender.clone()), remaining);
        }
        Ok(())
    }

    fn plan_credit(
        &self,
        account: &AccountId,
        amount: FixedPointValue,
        at: Timestamp,
    ) -> Result<(AccountSettlement, FixedPointValue)> {
        ensure_non_negative(amount)?;
        let mut plan = self.plan_settlement(account, at)?;
        plan.entry.credit(amount)?;
        let total = self.total_credited.checked_add(amount)?;
        Ok((plan, total))
    }

    fn plan_debit(
        &self,
        account: &AccountId,
        amount: FixedPointValue,
        at: Timestamp,
        context: BalanceContext,
    ) -> Result<(AccountSettlement, FixedPointValue)> {
        ensure_non_negative(amount)?;
        let mut plan = self.plan_settlement(account, at)?;
        plan.entry.debit(account, amount, context)?;
        let total = self.total_debited.checked_add(amount)?;
        Ok((plan, total))
    }

    /// Mints settled funds; the supply grows by `amount`.
    pub fn credit(
        &mut self,
        account: &AccountId,
        amount: FixedPointValue,
        at: Timestamp,
    ) -> Result<()> {
        let (plan, total) = self.plan_credit(account, amount, at)?;
        self.commit_settlement(plan);
        self.total_credited = total;
        Ok(())
    }

    /// Burns settled funds; the supply shrinks by `amount`.
    pub fn debit(
        &mut self,
        account: &AccountId,
        amount: FixedPointValue,
        at: Timestamp,
    ) -> Result<()> {
        let (plan, total) = self.plan_debit(account, amount, at, BalanceContext::Debit)?;
        self.commit_settlement(plan);
        self.total_debited = total;
        Ok(())
    }

    /// Wraps `amount` of the underlying held by `account` 1:1.
    pub fn upgrade(
        &mut self,
        account: &AccountId,
        amount: FixedPointValue,
        at: Timestamp,
        underlying: &mut dyn UnderlyingToken,
    ) -> Result<()> {
        self.ensure_not_custody(account)?;
        let (plan, total) = self.plan_credit(account, amount, at)?;
        underlying.transfer(account, &self.config.custody_account, amount)?;
        self.commit_settlement(plan);
        self.total_credited = total;
        info!(account = %account, amount = %amount, at, "upgrade");
        self.events.push(TokenEvent::Upgraded {
            account: account.clone(),
            amount,
            at,
        });
        Ok(())
    }

    /// Unwraps `amount` back into the underlying.
    pub fn downgrade(
        &mut self,
        account: &AccountId,
        amount: FixedPointValue,
        at: Timestamp,
        underlying: &mut dyn UnderlyingToken,
    ) -> Result<()> {
        self.ensure_not_custody(account)?;
        let (plan, total) = self.plan_debit(account, amount, at, BalanceContext::Downgrade)?;
        underlying.transfer(&self.config.custody_account, account, amount)?;
        self.commit_settlement(plan);
        self.total_debited = total;
        info!(account = %account, amount = %amount, at, "downgrade");
        self.events.push(TokenEvent::Downgraded {
            account: account.clone(),
            amount,
            at,
        });
        Ok(())
    }

    /// The underlying treats a transfer to itself as a no-op, which would mint
    /// or burn supply without moving reserves.
    fn ensure_not_custody(&self, account: &AccountId) -> Result<()> {
        if account == &self.config.custody_account {
            return Err(SuperTokenError::CustodyAccount {
                account: account.clone(),
            });
        }
        Ok(())
    }

    /// Settles `accounts` at `at`, lets `owner` compute its writes against the
    /// settled view, and commits both together.
    ///
    /// `caller` must be `owner` itself (see [`AccessGate::authorize`]), and the
    /// update may only write account state for accounts in `accounts`.
    /// Registry membership follows the written state: an account is a member
    /// of `owner` exactly when `owner` reports its new state as active.
    pub fn apply_agreement_update<F>(
        &mut self,
        caller: &Caller,
        owner: &AgreementId,
        accounts: &[&AccountId],
        at: Timestamp,
        build: F,
    ) -> Result<()>
    where
        F: FnOnce(&AgreementView<'_>) -> Result<AgreementUpdate>,
    {
        let grant = self.gate.authorize(caller, owner)?;
        let settlements = self.plan_settlements(accounts, at)?;

        let (update, memberships) = {
            let agreement = self.agreement(owner)?;
            let settled = settlements
                .iter()
                .flat_map(|plan| {
                    plan.states
                        .iter()
                        .filter(|(id, _)| id == owner)
                        .map(move |(_, state)| (plan.account.clone(), state.as_slice()))
                })
                .collect();
            let view = AgreementView::new(owner, at, &self.store, settled);
            let update = build(&view)?;

            let mut memberships = Vec::with_capacity(update.account_states.len());
            for (account, state) in &update.account_states {
                if !accounts.contains(&account) {
                    return Err(SuperTokenError::InvariantViolation {
                        detail: format!("{owner} wrote state of unsettled account {account}"),
                    });
                }
                let active = match state {
                    Some(state) => agreement.is_active(state)?,
                    None => false,
                };
                memberships.push((account.clone(), active));
            }
            (update, memberships)
        };

        for plan in settlements {
            self.commit_settlement(plan);
        }
        for (account, state) in update.account_states {
            self.store.put_account_state(&grant, &account, state);
            self.events.push(TokenEvent::AgreementAccountStateUpdated {
                agreement: owner.clone(),
                account,
                at,
            });
        }
        for (account, active) in memberships {
            if active {
                self.registry.add_membership(&account, owner);
            } else {
                self.registry.remove_membership(&account, owner);
            }
        }
        for (key, data) in update.data {
            self.store.put_data(&grant, &key, data);
        }
        self.events.extend(update.events);
        Ok(())
    }

    /// Raw write of `owner`'s state for one account, settling it first.
    pub fn update_agreement_account_state(
        &mut self,
        caller: &Caller,
        owner: &AgreementId,
        account: &AccountId,
        state: Option<Vec<u8>>,
        at: Timestamp,
    ) -> Result<()> {
        self.apply_agreement_update(caller, owner, &[account], at, |_| {
            Ok(AgreementUpdate::new().account_state(account, state))
        })
    }

    /// Raw write into `owner`'s keyed data space.
    pub fn update_agreement_data(
        &mut self,
        caller: &Caller,
        owner: &AgreementId,
        key: &str,
        data: Option<Vec<u8>>,
    ) -> Result<()> {
        let grant = self.gate.authorize(caller, owner)?;
        self.store.put_data(&grant, key, data);
        Ok(())
    }

    /// Checks that real-time balances add up to the supply and that the
    /// registry matches the agreements' own view of which accounts they
    /// affect.
    pub fn validate_system(&self, at: Timestamp) -> Result<()> {
        let mut sum = FixedPointValue::ZERO;
        for account in self.accounts() {
            sum = sum.checked_add(self.realtime_balance_of(&account, at)?)?;
        }
        let supply = self.total_supply()?;
        if sum != supply {
            return Err(SuperTokenError::InvariantViolation {
                detail: format!("real-time balances sum to {sum}, supply is {supply}"),
            });
        }

        for ((agreement_id, account), state) in self.store.account_states() {
            let active = self.agreement(agreement_id)?.is_active(state)?;
            if active != self.registry.is_member(account, agreement_id) {
                return Err(SuperTokenError::InvariantViolation {
                    detail: format!("membership of {account} in {agreement_id} is stale"),
                });
            }
        }
        for (account, agreements) in self.registry.memberships() {
            for agreement_id in agreements {
                if self.store.account_state(agreement_id, account).is_none() {
                    return Err(SuperTokenError::InvariantViolation {
                        detail: format!("{account} is a member of {agreement_id} without state"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Checks that the custody account backs the supply 1:1.
    pub fn validate_reserves(&self, underlying: &dyn UnderlyingToken) -> Result<()> {
        let held = underlying.balance_of(&self.config.custody_account);
        let supply = self.total_supply()?;
        if held != supply {
            return Err(SuperTokenError::InvariantViolation {
                detail: format!("custody holds {held}, supply is {supply}"),
            });
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        Ok(LedgerSnapshot {
            name: self.config.name.clone(),
            symbol: self.config.symbol.clone(),
            total_supply: self.total_supply()?,
            accounts: self.ledger.entries().clone(),
            memberships: self.registry.memberships().clone(),
            event_count: self.events.len(),
            state_root: compute_state_root(
                self.ledger.entries(),
                self.registry.memberships(),
                self.store.account_states(),
                self.store.all_data(),
            ),
        })
    }
}

fn ensure_non_negative(amount: FixedPointValue) -> Result<()> {
    if amount.is_negative() {
        return Err(SuperTokenError::InvalidAmount { amount });
    }
    Ok(())
}
