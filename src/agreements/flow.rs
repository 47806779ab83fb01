//! Constant-rate streaming between two accounts.
//!
//! Per `(sender, receiver)` pair the agreement keeps a [`FlowState`] in its
//! data space; per account it keeps a [`FlowAccountState`] holding the net
//! rate (incoming minus outgoing) and the reference point of the last
//! settlement. The account's dynamic delta is `net_flow_rate * elapsed`,
//! which equals the sum of `±flow_rate * elapsed` over its flows because
//! every flow touching the account is re-based whenever the account settles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::agreements::{Agreement, AgreementUpdate, AgreementView};
use crate::error::{Result, SuperTokenError};
use crate::gate::Caller;
use crate::ledger::AccountId;
use crate::registry::AgreementId;
use crate::token::{SuperToken, TokenEvent};
use crate::value::{FixedPointValue, Timestamp};

pub const FLOW_AGREEMENT_ID: &str = "flow-agreement";

const ACCOUNT_STATE_LEN: usize = 16 + 8 + 4;

/// Per-account view of all flows touching the account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowAccountState {
    pub net_flow_rate: FixedPointValue,
    pub settled_at: Timestamp,
    pub active_flows: u32,
}

impl FlowAccountState {
    fn fresh(at: Timestamp) -> Self {
        Self {
            net_flow_rate: FixedPointValue::ZERO,
            settled_at: at,
            active_flows: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ACCOUNT_STATE_LEN);
        out.extend_from_slice(&self.net_flow_rate.to_le_bytes());
        out.extend_from_slice(&self.settled_at.to_le_bytes());
        out.extend_from_slice(&self.active_flows.to_le_bytes());
        out
    }

    pub fn decode(agreement: &AgreementId, bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(agreement, bytes);
        let state = Self {
            net_flow_rate: reader.value()?,
            settled_at: reader.u64()?,
            active_flows: reader.u32()?,
        };
        reader.finish()?;
        Ok(state)
    }

    fn delta(&self, account: &AccountId, as_of: Timestamp) -> Result<FixedPointValue> {
        let elapsed = as_of
            .checked_sub(self.settled_at)
            .ok_or_else(|| SuperTokenError::InvalidTimestamp {
                account: account.clone(),
                at: as_of,
                settled_at: self.settled_at,
            })?;
        self.net_flow_rate.checked_mul_elapsed(elapsed)
    }
}

/// One stream. Absent flows behave as `flow_rate == 0`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowState {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub flow_rate: FixedPointValue,
    pub last_settled_at: Timestamp,
}

impl FlowState {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 8 + 8 + self.sender.len() + self.receiver.len());
        out.extend_from_slice(&self.flow_rate.to_le_bytes());
        out.extend_from_slice(&self.last_settled_at.to_le_bytes());
        for party in [&self.sender, &self.receiver] {
            out.extend_from_slice(&(party.len() as u32).to_le_bytes());
            out.extend_from_slice(party.as_bytes());
        }
        out
    }

    pub fn decode(agreement: &AgreementId, bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(agreement, bytes);
        let flow_rate = reader.value()?;
        let last_settled_at = reader.u64()?;
        let sender = reader.string()?;
        let receiver = reader.string()?;
        reader.finish()?;
        Ok(Self {
            sender,
            receiver,
            flow_rate,
            last_settled_at,
        })
    }

    /// Amount streamed since the flow was last (re)installed.
    pub fn streamed_since_update(&self, as_of: Timestamp) -> Result<FixedPointValue> {
        let elapsed = as_of
            .checked_sub(self.last_settled_at)
            .ok_or_else(|| SuperTokenError::InvalidTimestamp {
                account: self.sender.clone(),
                at: as_of,
                settled_at: self.last_settled_at,
            })?;
        self.flow_rate.checked_mul_elapsed(elapsed)
    }
}

/// Data-space key of the `(sender, receiver)` flow.
pub fn flow_key(sender: &AccountId, receiver: &AccountId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"flow");
    for party in [sender, receiver] {
        hasher.update((party.len() as u64).to_le_bytes());
        hasher.update(party.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Clone, Debug)]
pub struct FlowAgreement {
    id: AgreementId,
}

impl Default for FlowAgreement {
    fn default() -> Self {
        Self::new(AgreementId::from(FLOW_AGREEMENT_ID))
    }
}

impl FlowAgreement {
    pub fn new(id: AgreementId) -> Self {
        Self { id }
    }

    /// Identity the agreement presents to the token's access gate.
    pub fn caller(&self) -> Caller {
        Caller::agreement(&self.id)
    }

    /// Creates, changes or (with a zero rate) removes the sender's flow to
    /// `receiver`. Only the sender may do this.
    pub fn update_flow(
        &self,
        token: &mut SuperToken,
        caller: &Caller,
        sender: &AccountId,
        receiver: &AccountId,
        flow_rate: FixedPointValue,
        at: Timestamp,
    ) -> Result<()> {
        if flow_rate.is_negative() {
            return Err(SuperTokenError::InvalidFlowRate { rate: flow_rate });
        }
        if !caller.is_account(sender) {
            return Err(SuperTokenError::UnauthorizedFlowOperator {
                caller: caller.clone(),
                sender: sender.clone(),
                receiver: receiver.clone(),
            });
        }
        self.change_flow(token, sender, receiver, flow_rate, at)
    }

    /// Stops the flow; either party may do this. Deleting an absent flow
    /// still settles both accounts.
    pub fn delete_flow(
        &self,
        token: &mut SuperToken,
        caller: &Caller,
        sender: &AccountId,
        receiver: &AccountId,
        at: Timestamp,
    ) -> Result<()> {
        if !caller.is_account(sender) && !caller.is_account(receiver) {
            return Err(SuperTokenError::UnauthorizedFlowOperator {
                caller: caller.clone(),
                sender: sender.clone(),
                receiver: receiver.clone(),
            });
        }
        self.change_flow(token, sender, receiver, FixedPointValue::ZERO, at)
    }

    fn change_flow(
        &self,
        token: &mut SuperToken,
        sender: &AccountId,
        receiver: &AccountId,
        flow_rate: FixedPointValue,
        at: Timestamp,
    ) -> Result<()> {
        token.apply_agreement_update(&self.caller(), &self.id, &[sender, receiver], at, |view| {
            self.plan_flow_change(view, sender, receiver, flow_rate)
        })?;
        info!(
            agreement = %self.id,
            sender = %sender,
            receiver = %receiver,
            flow_rate = %flow_rate,
            at,
            "flow updated"
        );
        Ok(())
    }

    fn plan_flow_change(
        &self,
        view: &AgreementView<'_>,
        sender: &AccountId,
        receiver: &AccountId,
        flow_rate: FixedPointValue,
    ) -> Result<AgreementUpdate> {
        let at = view.at();
        let key = flow_key(sender, receiver);
        let old_rate = match view.data(&key) {
            Some(bytes) => FlowState::decode(&self.id, bytes)?.flow_rate,
            None => FixedPointValue::ZERO,
        };
        let diff = flow_rate.checked_sub(old_rate)?;
        let was_active = old_rate.is_positive();
        let is_active = flow_rate.is_positive();

        // Sender and receiver may be the same account; apply both legs in turn.
        let mut states: BTreeMap<AccountId, FlowAccountState> = BTreeMap::new();
        for (account, change) in [(sender, diff.checked_neg()?), (receiver, diff)] {
            let current = match states.get(account) {
                Some(state) => *state,
                None => match view.account_state(account) {
                    Some(bytes) => FlowAccountState::decode(&self.id, bytes)?,
                    None => FlowAccountState::fresh(at),
                },
            };
            let active_flows = match (was_active, is_active) {
                (false, true) => current
                    .active_flows
                    .checked_add(1)
                    .ok_or(SuperTokenError::Overflow { op: "add" })?,
                (true, false) => current.active_flows.saturating_sub(1),
                _ => current.active_flows,
            };
            states.insert(
                account.clone(),
                FlowAccountState {
                    net_flow_rate: current.net_flow_rate.checked_add(change)?,
                    settled_at: at,
                    active_flows,
                },
            );
        }

        let mut update = AgreementUpdate::new();
        for (account, state) in &states {
            let encoded = (state.active_flows > 0).then(|| state.encode());
            update = update.account_state(account, encoded);
        }
        let flow = is_active.then(|| {
            FlowState {
                sender: sender.clone(),
                receiver: receiver.clone(),
                flow_rate,
                last_settled_at: at,
            }
            .encode()
        });
        Ok(update.data(key, flow).event(TokenEvent::FlowUpdated {
            agreement: self.id.clone(),
            sender: sender.clone(),
            receiver: receiver.clone(),
            flow_rate,
            at,
        }))
    }

    pub fn get_flow(
        &self,
        token: &SuperToken,
        sender: &AccountId,
        receiver: &AccountId,
    ) -> Result<Option<FlowState>> {
        token
            .agreement_data(&self.id, &flow_key(sender, receiver))
            .map(|bytes| FlowState::decode(&self.id, bytes))
            .transpose()
    }

    pub fn flows(&self, token: &SuperToken) -> Result<Vec<FlowState>> {
        token
            .agreement_data_of(&self.id)
            .map(|(_, bytes)| FlowState::decode(&self.id, bytes))
            .collect()
    }

    pub fn account_state(
        &self,
        token: &SuperToken,
        account: &AccountId,
    ) -> Result<Option<FlowAccountState>> {
        token
            .agreement_account_state(&self.id, account)
            .map(|bytes| FlowAccountState::decode(&self.id, bytes))
            .transpose()
    }

    /// Incoming minus outgoing rate of `account`.
    pub fn net_flow_rate(
        &self,
        token: &SuperToken,
        account: &AccountId,
    ) -> Result<FixedPointValue> {
        Ok(self
            .account_state(token, account)?
            .map(|state| state.net_flow_rate)
            .unwrap_or_default())
    }

    /// Live delta of `account` at `as_of` as this agreement sees it.
    pub fn dynamic_delta_of(
        &self,
        token: &SuperToken,
        account: &AccountId,
        as_of: Timestamp,
    ) -> Result<FixedPointValue> {
        match self.account_state(token, account)? {
            Some(state) => state.delta(account, as_of),
            None => Ok(FixedPointValue::ZERO),
        }
    }
}

impl Agreement for FlowAgreement {
    fn id(&self) -> &AgreementId {
        &self.id
    }

    fn dynamic_delta(
        &self,
        account: &AccountId,
        state: &[u8],
        as_of: Timestamp,
    ) -> Result<FixedPointValue> {
        FlowAccountState::decode(&self.id, state)?.delta(account, as_of)
    }

    fn settled_state(&self, account: &AccountId, state: &[u8], at: Timestamp) -> Result<Vec<u8>> {
        let mut state = FlowAccountState::decode(&self.id, state)?;
        if at < state.settled_at {
            return Err(SuperTokenError::InvalidTimestamp {
                account: account.clone(),
                at,
                settled_at: state.settled_at,
            });
        }
        state.settled_at = at;
        Ok(state.encode())
    }

    fn is_active(&self, state: &[u8]) -> Result<bool> {
        Ok(FlowAccountState::decode(&self.id, state)?.active_flows > 0)
    }
}

struct ByteReader<'a> {
    agreement: &'a AgreementId,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(agreement: &'a AgreementId, bytes: &'a [u8]) -> Self {
        Self {
            agreement,
            bytes,
            pos: 0,
        }
    }

    fn malformed(&self) -> SuperTokenError {
        SuperTokenError::MalformedAgreementState {
            agreement: self.agreement.clone(),
            len: self.bytes.len(),
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos.checked_add(N).ok_or_else(|| self.malformed())?;
        let chunk = self.bytes.get(self.pos..end).ok_or_else(|| self.malformed())?;
        self.pos = end;
        chunk.try_into().map_err(|_| self.malformed())
    }

    fn value(&mut self) -> Result<FixedPointValue> {
        Ok(FixedPointValue::from_le_bytes(self.take::<16>()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take::<8>()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take::<4>()?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let end = self.pos.checked_add(len).ok_or_else(|| self.malformed())?;
        let raw = self.bytes.get(self.pos..end).ok_or_else(|| self.malformed())?;
        self.pos = end;
        String::from_utf8(raw.to_vec()).map_err(|_| self.malformed())
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(self.malformed());
        }
        Ok(())
    }
}
