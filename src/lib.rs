//! Continuous-balance token ledger.
//!
//! A [`SuperToken`] keeps a settled balance per account and lets pluggable
//! [`Agreement`]s make balances drift over time. The built-in
//! [`FlowAgreement`] streams value between two accounts at a constant
//! per-second rate. Balances are never ticked forward by a timer: every
//! query and every mutation names the instant it applies to, and accrued
//! drift is folded into the settled balance ("settlement") only when funds
//! actually move.
//!
//! * [`value`]: overflow-checked 18-decimal fixed-point amounts.
//! * [`ledger`]: settled balances and the state digest.
//! * [`registry`]: which agreements are live for which account.
//! * [`gate`]: who may write agreement-owned state.
//! * [`agreements`]: the agreement trait and the flow agreement.
//! * [`token`]: settlement, real-time balances and the ERC20-style surface.
//! * [`underlying`]: the reserve asset behind upgrade/downgrade.
//! * [`scenario`]: replayable operation scripts.
//! * [`config`]: token metadata and custody settings.

pub mod agreements;
pub mod config;
pub mod gate;
pub mod ledger;
pub mod registry;
pub mod scenario;
pub mod token;
pub mod underlying;
pub mod value;

mod error;

pub use agreements::{Agreement, AgreementUpdate, AgreementView, FlowAgreement, FlowState};
pub use config::TokenConfig;
pub use error::{BalanceContext, Result, SuperTokenError};
pub use gate::Caller;
pub use ledger::{AccountId, LedgerEntry};
pub use registry::AgreementId;
pub use token::{LedgerSnapshot, SuperToken, TokenEvent};
pub use underlying::{ReserveToken, UnderlyingToken};
pub use value::{FixedPointValue, Timestamp, WAD};
