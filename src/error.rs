use thiserror::Error;

use crate::gate::Caller;
use crate::ledger::AccountId;
use crate::registry::AgreementId;
use crate::underlying::UnderlyingError;
use crate::value::{FixedPointValue, Timestamp};

pub type Result<T> = std::result::Result<T, SuperTokenError>;

/// Which public operation asked for the funds; selects the reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceContext {
    Transfer,
    Downgrade,
    Debit,
}

impl BalanceContext {
    pub fn reason(self) -> &'static str {
        match self {
            BalanceContext::Transfer => "transfer amount exceeds balance",
            BalanceContext::Downgrade => "SuperToken: downgrade amount exceeds balance",
            BalanceContext::Debit => "SuperToken: debit amount exceeds balance",
        }
    }
}

/// Canonical error type of the token and its agreements.
///
/// A returned error always means the operation left no trace: ledger
/// entries, agreement state and registry memberships are exactly as they
/// were before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SuperTokenError {
    /// Settled funds (after settlement) do not cover a debit or transfer.
    #[error("{}: account {account} holds {available}, needs {required}", .context.reason())]
    InsufficientBalance {
        context: BalanceContext,
        account: AccountId,
        available: FixedPointValue,
        required: FixedPointValue,
    },

    /// Agreement-owned state was written by someone other than its owner.
    #[error("SuperToken: unauthorized agreement storage access (caller {caller}, owner {owner})")]
    UnauthorizedAgreementAccess { caller: Caller, owner: AgreementId },

    /// A query or settlement reached back before the last settlement.
    #[error("SuperToken: timestamp {at} precedes last settlement {settled_at} of {account}")]
    InvalidTimestamp {
        account: AccountId,
        at: Timestamp,
        settled_at: Timestamp,
    },

    #[error("SuperToken: negative amount {amount}")]
    InvalidAmount { amount: FixedPointValue },

    #[error(
        "SuperToken: transfer amount exceeds allowance \
         ({owner} allows {spender} {allowance}, needs {required})"
    )]
    InsufficientAllowance {
        owner: AccountId,
        spender: AccountId,
        allowance: FixedPointValue,
        required: FixedPointValue,
    },

    #[error("FlowAgreement: negative flow rate {rate}")]
    InvalidFlowRate { rate: FixedPointValue },

    /// Only a flow's parties may operate it.
    #[error("FlowAgreement: {caller} may not operate flow {sender} -> {receiver}")]
    UnauthorizedFlowOperator {
        caller: Caller,
        sender: AccountId,
        receiver: AccountId,
    },

    /// The custody account holds the reserves and cannot wrap or unwrap them.
    #[error("SuperToken: custody account {account} cannot upgrade or downgrade")]
    CustodyAccount { account: AccountId },

    #[error("SuperToken: unsupported decimals {decimals}; only 18 is supported")]
    UnsupportedDecimals { decimals: u8 },

    #[error("SuperToken: unknown agreement {agreement}")]
    UnknownAgreement { agreement: AgreementId },

    #[error("SuperToken: agreement {agreement} already registered")]
    DuplicateAgreement { agreement: AgreementId },

    #[error("SuperToken: malformed state of agreement {agreement} ({len} bytes)")]
    MalformedAgreementState { agreement: AgreementId, len: usize },

    #[error("SuperToken: arithmetic overflow in {op}")]
    Overflow { op: &'static str },

    #[error(transparent)]
    Underlying(#[from] UnderlyingError),

    /// `validate_system` found the books out of balance.
    #[error("SuperToken: invariant violated: {detail}")]
    InvariantViolation { detail: String },
}

impl SuperTokenError {
    /// Stable, caller-visible reason string.
    pub fn reason(&self) -> &'static str {
        match self {
            SuperTokenError::InsufficientBalance { context, .. } => context.reason(),
            SuperTokenError::UnauthorizedAgreementAccess { .. } => {
                "SuperToken: unauthorized agreement storage access"
            }
            SuperTokenError::InvalidTimestamp { .. } => {
                "SuperToken: timestamp precedes last settlement"
            }
            SuperTokenError::InvalidAmount { .. } => "SuperToken: negative amount",
            SuperTokenError::InsufficientAllowance { .. } => {
                "SuperToken: transfer amount exceeds allowance"
            }
            SuperTokenError::InvalidFlowRate { .. } => "FlowAgreement: negative flow rate",
            SuperTokenError::UnauthorizedFlowOperator { .. } => {
                "FlowAgreement: unauthorized flow operator"
            }
            SuperTokenError::CustodyAccount { .. } => "SuperToken: custody account",
            SuperTokenError::UnsupportedDecimals { .. } => "SuperToken: unsupported decimals",
            SuperTokenError::UnknownAgreement { .. } => "SuperToken: unknown agreement",
            SuperTokenError::DuplicateAgreement { .. } => {
                "SuperToken: agreement already registered"
            }
            SuperTokenError::MalformedAgreementState { .. } => {
                "SuperToken: malformed agreement state"
            }
            SuperTokenError::Overflow { .. } => "SuperToken: arithmetic overflow",
            SuperTokenError::Underlying(err) => err.reason(),
            SuperTokenError::InvariantViolation { .. } => "SuperToken: invariant violated",
        }
    }
}
