use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The two balances every wallet carries
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Shinies,
    Muns,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Shinies, Currency::Muns];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Shinies => "shinies",
            Currency::Muns => "muns",
        }
    }

    /// Exact-name lookup used by local adjustments. Unlike `FromStr` this does
    /// not fold case, so "Shinies" is rejected.
    pub fn from_kind(kind: &str) -> Result<Self, Error> {
        match kind {
            "shinies" => Ok(Currency::Shinies),
            "muns" => Ok(Currency::Muns),
            _ => Err(Error::InvalidCurrencyKind(kind.to_string())),
        }
    }
}

impl FromStr for Currency {
    type Err = Error;

    /// Case-insensitive lookup used by transfers
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shinies" => Ok(Currency::Shinies),
            "muns" => Ok(Currency::Muns),
            _ => Err(Error::UnknownCurrency(s.to_string())),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of both balances of a wallet
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub shinies: i64,
    pub muns: i64,
}

impl Balance {
    pub fn get(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Shinies => self.shinies,
            Currency::Muns => self.muns,
        }
    }
}
