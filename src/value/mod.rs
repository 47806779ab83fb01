//! Signed fixed-point token quantities.
//!
//! Every amount, balance and flow rate in the ledger is a [`FixedPointValue`]:
//! an `i128` count of base units where `10^18` base units make one whole
//! token. Arithmetic is checked and reports overflow as
//! [`SuperTokenError::Overflow`]; nothing is ever rounded.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SuperTokenError};

/// Seconds since an arbitrary epoch supplied by the caller.
pub type Timestamp = u64;

pub const DECIMALS: u8 = 18;
/// Base units per whole token.
pub const WAD: i128 = 1_000_000_000_000_000_000;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ParseFixedPointError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount {0:?}")]
    InvalidDigit(String),
    #[error("amount {0:?} has more than 18 fractional digits")]
    TooPrecise(String),
    #[error("amount {0:?} does not fit in 128 bits")]
    Overflow(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedPointValue(i128);

impl FixedPointValue {
    pub const ZERO: Self = Self(0);

    /// Wraps a raw count of base units.
    pub const fn from_wad(units: i128) -> Self {
        Self(units)
    }

    /// Whole tokens; `i64 * 10^18` always fits in an `i128`.
    pub const fn from_tokens(tokens: i64) -> Self {
        Self(tokens as i128 * WAD)
    }

    pub const fn wad(self) -> i128 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(SuperTokenError::Overflow { op: "add" })
    }

    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(SuperTokenError::Overflow { op: "sub" })
    }

    pub fn checked_neg(self) -> Result<Self> {
        self.0
            .checked_neg()
            .map(Self)
            .ok_or(SuperTokenError::Overflow { op: "neg" })
    }

    /// Amount accrued by a per-second rate over `elapsed` seconds.
    pub fn checked_mul_elapsed(self, elapsed: u64) -> Result<Self> {
        self.0
            .checked_mul(i128::from(elapsed))
            .map(Self)
            .ok_or(SuperTokenError::Overflow { op: "mul" })
    }

    pub fn to_le_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self(i128::from_le_bytes(bytes))
    }
}

impl fmt::Display for FixedPointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let unit = WAD as u128;
        let whole = magnitude / unit;
        let frac = magnitude % unit;
        if frac == 0 {
            return write!(f, "{sign}{whole}");
        }
        let digits = format!("{frac:018}");
        write!(f, "{sign}{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl FromStr for FixedPointValue {
    type Err = ParseFixedPointError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let raw = raw.trim();
        let (negative, body) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (whole, frac) = body.split_once('.').unwrap_or((body, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(ParseFixedPointError::Empty);
        }
        let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !digits_only(whole) || !digits_only(frac) {
            return Err(ParseFixedPointError::InvalidDigit(raw.to_string()));
        }
        if frac.len() > DECIMALS as usize {
            return Err(ParseFixedPointError::TooPrecise(raw.to_string()));
        }

        let overflow = || ParseFixedPointError::Overflow(raw.to_string());
        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<i128>().map_err(|_| overflow())?
        };
        let frac_units = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<18}").parse::<i128>().map_err(|_| overflow())?
        };
        let magnitude = whole_units
            .checked_mul(WAD)
            .and_then(|units| units.checked_add(frac_units))
            .ok_or_else(overflow)?;
        Ok(Self(if negative { -magnitude } else { magnitude }))
    }
}

impl Serialize for FixedPointValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FixedPointValue {
    /// Accepts a decimal string (`"1.5"`) or an integer count of whole tokens.
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum AmountInput {
            String(String),
            Tokens(i64),
        }

        match AmountInput::deserialize(deserializer)? {
            AmountInput::String(raw) => raw.parse().map_err(D::Error::custom),
            AmountInput::Tokens(tokens) => Ok(Self::from_tokens(tokens)),
        }
    }
}
