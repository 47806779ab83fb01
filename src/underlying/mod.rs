//! The reserve asset that upgrades wrap and downgrades release.
//!
//! The token only needs a custodial transfer primitive from it, expressed by
//! [`UnderlyingToken`]. [`ReserveToken`] is the in-memory implementation used
//! by the scenario runner and the tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::AccountId;
use crate::value::FixedPointValue;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnderlyingError {
    #[error("ERC20: transfer amount exceeds balance ({account} has {available}, needs {required})")]
    InsufficientBalance {
        account: AccountId,
        available: FixedPointValue,
        required: FixedPointValue,
    },
    #[error("ERC20: negative amount {amount}")]
    InvalidAmount { amount: FixedPointValue },
    #[error("ERC20: balance overflow")]
    Overflow,
}

impl UnderlyingError {
    pub fn reason(&self) -> &'static str {
        match self {
            UnderlyingError::InsufficientBalance { .. } => "ERC20: transfer amount exceeds balance",
            UnderlyingError::InvalidAmount { .. } => "ERC20: negative amount",
            UnderlyingError::Overflow => "ERC20: balance overflow",
        }
    }
}

pub trait UnderlyingToken {
    fn balance_of(&self, account: &AccountId) -> FixedPointValue;

    /// Moves `amount` from `from` to `to`, or fails without effect.
    fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: FixedPointValue,
    ) -> Result<(), UnderlyingError>;
}

/// Plain balance-map ERC20 stand-in.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReserveToken {
    balances: BTreeMap<AccountId, FixedPointValue>,
}

impl ReserveToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisions test funds out of thin air.
    pub fn mint(
        &mut self,
        account: &AccountId,
        amount: FixedPointValue,
    ) -> Result<(), UnderlyingError> {
        if amount.is_negative() {
            return Err(UnderlyingError::InvalidAmount { amount });
        }
        let balance = self.balances.entry(account.clone()).or_default();
        *balance = balance
            .checked_add(amount)
            .map_err(|_| UnderlyingError::Overflow)?;
        Ok(())
    }

    pub fn balances(&self) -> &BTreeMap<AccountId, FixedPointValue> {
        &self.balances
    }
}

impl UnderlyingToken for ReserveToken {
    fn balance_of(&self, account: &AccountId) -> FixedPointValue {
        self.balances.get(account).copied().unwrap_or_default()
    }

    fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: FixedPointValue,
    ) -> Result<(), UnderlyingError> {
        if amount.is_negative() {
            return Err(UnderlyingError::InvalidAmount { amount });
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(UnderlyingError::InsufficientBalance {
                account: from.clone(),
                available,
                required: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .map_err(|_| UnderlyingError::Overflow)?;
        let debited = available
            .checked_sub(amount)
            .map_err(|_| UnderlyingError::Overflow)?;
        self.balances.insert(from.clone(), debited);
        self.balances.insert(to.clone(), credited);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_moves_funds_or_fails_cleanly() {
        let alice = "alice".to_string();
        let vault = "vault".to_string();
        let mut reserve = ReserveToken::new();
        reserve.mint(&alice, FixedPointValue::from_tokens(5)).unwrap();

        reserve
            .transfer(&alice, &vault, FixedPointValue::from_tokens(2))
            .unwrap();
        assert_eq!(reserve.balance_of(&alice), FixedPointValue::from_tokens(3));
        assert_eq!(reserve.balance_of(&vault), FixedPointValue::from_tokens(2));

        let err = reserve
            .transfer(&alice, &vault, FixedPointValue::from_tokens(4))
            .unwrap_err();
        assert_eq!(err.reason(), "ERC20: transfer amount exceeds balance");
        assert_eq!(reserve.balance_of(&alice), FixedPointValue::from_tokens(3));
    }
}
