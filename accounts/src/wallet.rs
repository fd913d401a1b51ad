use serde::{Deserialize, Serialize};

use super::error::{Error, Result};
use super::types::{Balance, Currency};

/// Two independent currency balances held for one owner.
///
/// Balances are signed and have no floor: a wallet may be spent into the
/// negative. Arithmetic is checked, so an adjustment that would overflow is
/// rejected and leaves the wallet untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub owner: String,
    pub shinies: i64,
    pub muns: i64,
}

/// Transfer request as handed over by a web layer. The amount is kept as raw
/// JSON so that non-integer input can be rejected with `InvalidAmount`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub to: String,
    pub amount: serde_json::Value,
    pub currency: String,
}

/// Accepts JSON integers only. Floats, strings and booleans are rejected.
pub fn parse_amount(value: &serde_json::Value) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| Error::InvalidAmount(value.to_string()))
}

impl Wallet {
    /// Creates an empty wallet for `owner`
    pub fn new(owner: impl Into<String>) -> Self {
        Wallet {
            owner: owner.into(),
            shinies: 0,
            muns: 0,
        }
    }

    pub fn balance(&self) -> Balance {
        Balance {
            shinies: self.shinies,
            muns: self.muns,
        }
    }

    fn slot_mut(&mut self, currency: Currency) -> &mut i64 {
        match currency {
            Currency::Shinies => &mut self.shinies,
            Currency::Muns => &mut self.muns,
        }
    }

    fn checked(&self, currency: Currency, amount: i64) -> Result<i64> {
        self.balance()
            .get(currency)
            .checked_add(amount)
            .ok_or_else(|| Error::BalanceOverflow {
                owner: self.owner.clone(),
            })
    }

    /// Adds `amount` (may be negative) to the given balance and returns the new value
    pub fn adjust(&mut self, amount: i64, currency: Currency) -> Result<i64> {
        let updated = self.checked(currency, amount)?;
        *self.slot_mut(currency) = updated;
        Ok(updated)
    }

    /// Same as `adjust` but takes the currency by its exact name
    pub fn adjust_named(&mut self, amount: i64, currency: &str) -> Result<i64> {
        self.adjust(amount, Currency::from_kind(currency)?)
    }

    /// Moves `amount` from this wallet to `to`. Both new balances are computed
    /// before either side is written, so a failed transfer changes nothing.
    /// The caller is responsible for persisting both wallets.
    pub fn send(&mut self, to: &mut Wallet, amount: i64, currency: Currency) -> Result<()> {
        if to.owner == self.owner {
            return Err(Error::InvalidTarget(to.owner.clone()));
        }

        let debit = amount
            .checked_neg()
            .ok_or_else(|| Error::BalanceOverflow {
                owner: self.owner.clone(),
            })?;
        let sender_balance = self.checked(currency, debit)?;
        let receiver_balance = to.checked(currency, amount)?;

        *self.slot_mut(currency) = sender_balance;
        *to.slot_mut(currency) = receiver_balance;

        tracing::debug!(
            "Moved {} {} from {} to {}",
            amount,
            currency,
            self.owner,
            to.owner
        );
        Ok(())
    }

    /// Transfer entry point taking the currency by name, case-insensitively
    pub fn transfer(&mut self, to: &mut Wallet, amount: i64, currency: &str) -> Result<()> {
        let currency: Currency = currency.parse()?;
        self.send(to, amount, currency)
    }
}
