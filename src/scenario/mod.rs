use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agreements::{FlowAgreement, FlowState};
use crate::config::TokenConfig;
use crate::error::Result;
use crate::gate::Caller;
use crate::ledger::AccountId;
use crate::registry::AgreementId;
use crate::token::{SuperToken, TokenEvent};
use crate::underlying::{ReserveToken, UnderlyingToken};
use crate::value::{FixedPointValue, Timestamp};

/// One step of a script; the acting account is the caller.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TokenOperation {
    Upgrade {
        account: AccountId,
        amount: FixedPointValue,
        at: Timestamp,
    },
    Downgrade {
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
    Approve {
        owner: AccountId,
        spender: AccountId,
        amount: FixedPointValue,
    },
    TransferFrom {
        spender: AccountId,
        from: AccountId,
        to: AccountId,
        amount: FixedPointValue,
        at: Timestamp,
    },
    UpdateFlow {
        sender: AccountId,
        receiver: AccountId,
        flow_rate: FixedPointValue,
        at: Timestamp,
    },
    /// `caller` defaults to the sender.
    DeleteFlow {
        #[serde(default)]
        caller: Option<AccountId>,
        sender: AccountId,
        receiver: AccountId,
        at: Timestamp,
    },
    Settle {
        account: AccountId,
        at: Timestamp,
    },
}

impl TokenOperation {
    pub fn at(&self) -> Option<Timestamp> {
        match self {
            TokenOperation::Upgrade { at, .. }
            | TokenOperation::Downgrade { at, .. }
            | TokenOperation::Transfer { at, .. }
            | TokenOperation::TransferFrom { at, .. }
            | TokenOperation::UpdateFlow { at, .. }
            | TokenOperation::DeleteFlow { at, .. }
            | TokenOperation::Settle { at, .. } => Some(*at),
            TokenOperation::Approve { .. } => None,
        }
    }

    pub fn apply(
        &self,
        token: &mut SuperToken,
        flow: &FlowAgreement,
        underlying: &mut dyn UnderlyingToken,
    ) -> Result<()> {
        match self {
            TokenOperation::Upgrade {
                account,
                amount,
                at,
            } => token.upgrade(account, *amount, *at, underlying),
            TokenOperation::Downgrade {
                account,
                amount,
                at,
            } => token.downgrade(account, *amount, *at, underlying),
            TokenOperation::Transfer {
                from,
                to,
                amount,
                at,
            } => token.transfer(from, to, *amount, *at),
            TokenOperation::Approve {
                owner,
                spender,
                amount,
            } => token.approve(owner, spender, *amount),
            TokenOperation::TransferFrom {
                spender,
                from,
                to,
                amount,
                at,
            } => token.transfer_from(spender, from, to, *amount, *at),
            TokenOperation::UpdateFlow {
                sender,
                receiver,
                flow_rate,
                at,
            } => flow.update_flow(
                token,
                &Caller::account(sender.clone()),
                sender,
                receiver,
                *flow_rate,
                *at,
            ),
            TokenOperation::DeleteFlow {
                caller,
                sender,
                receiver,
                at,
            } => {
                let caller = Caller::account(caller.as_ref().unwrap_or(sender).clone());
                flow.delete_flow(token, &caller, sender, receiver, *at)
            }
            TokenOperation::Settle { account, at } => token.settle(account, *at).map(|_| ()),
        }
    }
}

/// A token configuration, starting underlying balances and a script.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scenario {
    #[serde(default)]
    pub config: TokenConfig,
    #[serde(default)]
    pub underlying_balances: BTreeMap<AccountId, FixedPointValue>,
    #[serde(default)]
    pub operations: Vec<TokenOperation>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplayFailure {
    pub index: usize,
    pub reason: String,
    pub error: String,
}

pub struct Replay {
    pub token: SuperToken,
    pub flow: FlowAgreement,
    pub underlying: ReserveToken,
    pub applied: usize,
    pub failure: Option<ReplayFailure>,
    /// Latest timestamp named by an applied operation.
    pub last_at: Timestamp,
}

impl Scenario {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Runs the script against a fresh token, stopping at the first
    /// rejected operation. Only setup problems, such as an unsupported
    /// config or a bad starting balance, are returned as errors.
    pub fn replay(&self) -> Result<Replay> {
        let (mut token, flow) = SuperToken::with_flow_agreement(self.config.clone())?;
        let mut underlying = ReserveToken::new();
        for (account, amount) in &self.underlying_balances {
            underlying.mint(account, *amount)?;
        }

        let mut applied = 0;
        let mut failure = None;
        let mut last_at = 0;
        for (index, operation) in self.operations.iter().enumerate() {
            match operation.apply(&mut token, &flow, &mut underlying) {
                Ok(()) => {
                    applied += 1;
                    if let Some(at) = operation.at() {
                        last_at = last_at.max(at);
                    }
                    debug!(index, ?operation, "operation applied");
                }
                Err(err) => {
                    warn!(index, reason = err.reason(), error = %err, "operation rejected");
                    failure = Some(ReplayFailure {
                        index,
                        reason: err.reason().to_string(),
                        error: err.to_string(),
                    });
                    break;
                }
            }
        }

        Ok(Replay {
            token,
            flow,
            underlying,
            applied,
            failure,
            last_at,
        })
    }
}

/// What the CLI prints after a replay.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioReport {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub custody_account: AccountId,
    pub at: Timestamp,
    pub applied: usize,
    pub failure: Option<ReplayFailure>,
    pub total_supply: FixedPointValue,
    pub balances: BTreeMap<AccountId, FixedPointValue>,
    pub underlying: BTreeMap<AccountId, FixedPointValue>,
    pub active_agreements: BTreeMap<AccountId, Vec<AgreementId>>,
    pub flows: Vec<FlowState>,
    pub events: Vec<TokenEvent>,
    pub state_root: String,
    pub violation: Option<String>,
}

impl Replay {
    /// Both system invariants at `at`: conservation and 1:1 reserves.
    pub fn validate(&self, at: Timestamp) -> Result<()> {
        self.token.validate_system(at)?;
        self.token.validate_reserves(&self.underlying)
    }

    /// Balances are evaluated at `at`, or at the last operation's time.
    pub fn report(&self, at: Option<Timestamp>) -> Result<ScenarioReport> {
        let at = at.unwrap_or(self.last_at);
        let mut balances = BTreeMap::new();
        let mut active_agreements = BTreeMap::new();
        for account in self.token.accounts() {
            balances.insert(account.clone(), self.token.realtime_balance_of(&account, at)?);
            let agreements = self.token.get_account_active_agreements(&account);
            if !agreements.is_empty() {
                active_agreements.insert(account, agreements.to_vec());
            }
        }
        let snapshot = self.token.snapshot()?;
        let config = self.token.config();
        Ok(ScenarioReport {
            name: config.name.clone(),
            symbol: config.symbol.clone(),
            decimals: config.decimals,
            custody_account: config.custody_account.clone(),
            at,
            applied: self.applied,
            failure: self.failure.clone(),
            total_supply: self.token.total_supply()?,
            balances,
            underlying: self.underlying.balances().clone(),
            active_agreements,
            flows: self.flow.flows(&self.token)?,
            events: self.token.events().to_vec(),
            state_root: hex::encode(snapshot.state_root),
            violation: self.validate(at).err().map(|err| err.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SuperTokenError;

    const SCRIPT: &str = r#"{
        "config": { "name": "SuperTestToken", "symbol": "STT" },
        "underlying_balances": { "alice": 10, "bob": "0.5" },
        "operations": [
            { "op": "upgrade", "account": "alice", "amount": 2, "at": 0 },
            { "op": "update_flow", "sender": "alice", "receiver": "bob",
              "flow_rate": "1", "at": 0 },
            { "op": "transfer", "from": "bob", "to": "carol", "amount": 2, "at": 2 },
            { "op": "delete_flow", "caller": "bob", "sender": "alice", "receiver": "bob", "at": 2 }
        ]
    }"#;

    fn tokens(n: i64) -> FixedPointValue {
        FixedPointValue::from_tokens(n)
    }

    #[test]
    fn script_replays_to_expected_balances() {
        let scenario = Scenario::from_json(SCRIPT).unwrap();
        assert_eq!(scenario.operations.len(), 4);
        let replay = scenario.replay().unwrap();
        assert_eq!(replay.applied, 4);
        assert!(replay.failure.is_none());

        let report = replay.report(None).unwrap();
        assert_eq!(report.at, 2);
        assert_eq!(report.symbol, "STT");
        assert_eq!(report.custody_account, "supertoken");
        assert_eq!(report.balances["alice"], FixedPointValue::ZERO);
        assert_eq!(report.balances["bob"], FixedPointValue::ZERO);
        assert_eq!(report.balances["carol"], tokens(2));
        assert_eq!(report.total_supply, tokens(2));
        assert!(report.flows.is_empty());
        assert!(report.active_agreements.is_empty());
        assert_eq!(report.violation, None);
        assert_eq!(report.state_root.len(), 64);
    }

    #[test]
    fn replay_stops_at_first_rejection() {
        let scenario = Scenario {
            operations: vec![
                TokenOperation::Upgrade {
                    account: "alice".into(),
                    amount: tokens(1),
                    at: 0,
                },
                TokenOperation::Transfer {
                    from: "alice".into(),
                    to: "bob".into(),
                    amount: tokens(1),
                    at: 1,
                },
            ],
            ..Scenario::default()
        };
        let replay = scenario.replay().unwrap();
        assert_eq!(replay.applied, 0);
        let failure = replay.failure.clone().unwrap();
        assert_eq!(failure.index, 0);
        assert_eq!(failure.reason, "ERC20: transfer amount exceeds balance");
        assert_eq!(replay.report(None).unwrap().violation, None);
    }

    #[test]
    fn embedded_config_must_use_eighteen_decimals() {
        let scenario = Scenario::from_json(r#"{"config":{"decimals":6},"operations":[]}"#).unwrap();
        assert!(matches!(
            scenario.replay().err(),
            Some(SuperTokenError::UnsupportedDecimals { decimals: 6 })
        ));
    }

    #[test]
    fn operations_serialize_with_op_tag() {
        let op = TokenOperation::Settle {
            account: "alice".into(),
            at: 7,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "settle");
        assert_eq!(json["at"], 7);
        assert_eq!(op.at(), Some(7));
    }
}
