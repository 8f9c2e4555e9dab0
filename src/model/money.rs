use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An amount of money in integer minor units of a currency.
///
/// The currency is an ISO-4217-like code or a digital-asset ticker, always
/// stored alongside the amount. There is no floating-point money anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Money {
    /// Integer minor units (cents, satoshi, ...).
    pub amount: i64,
    /// Uppercase currency code, e.g. "EUR" or "USDT".
    pub currency: String,
}

impl Money {
    pub fn new(amount: i64, currency: impl Into<String>) -> Self {
        Money {
            amount,
            currency: normalize_currency(currency.into()),
        }
    }
}

pub fn normalize_currency(code: impl AsRef<str>) -> String {
    code.as_ref().trim().to_ascii_uppercase()
}

/// Convert an amount across currencies at an explicit rate, flooring toward
/// zero. Rates are only ever applied here so rounding is uniform.
pub fn convert_amount(amount: i64, rate: f64) -> i64 {
    ((amount as f64) * rate).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_floors() {
        assert_eq!(convert_amount(100, 1.5), 150);
        assert_eq!(convert_amount(101, 0.333), 33);
        assert_eq!(convert_amount(0, 2.0), 0);
    }

    #[test]
    fn currency_normalized() {
        assert_eq!(Money::new(5, " eur ").currency, "EUR");
    }
}
