use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ISO-4217 currencies the ledger knows how to scale between major and minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ngn,
    Ghs,
    Kes,
    Zar,
    Usd,
    Eur,
    Gbp,
    Jpy,
}

impl Currency {
    /// Number of decimal places in the currency's minor unit (kobo, cents, ...).
    pub fn exponent(self) -> u32 {
        match self {
            Currency::Jpy => 0,
            _ => 2,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Currency::Ngn => "NGN",
            Currency::Ghs => "GHS",
            Currency::Kes => "KES",
            Currency::Zar => "ZAR",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Jpy => "JPY",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NGN" => Ok(Currency::Ngn),
            "GHS" => Ok(Currency::Ghs),
            "KES" => Ok(Currency::Kes),
            "ZAR" => Ok(Currency::Zar),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            "JPY" => Ok(Currency::Jpy),
            other => Err(PaymentError::ValidationError(format!(
                "Unsupported currency: {}",
                other
            ))),
        }
    }
}

/// Represents a positive monetary amount in major currency units.
///
/// Payments and refunds are always created through this type so that a zero or
/// negative amount never reaches a gateway.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Converts a major-unit amount into the gateway's integer minor units.
///
/// The decimal is rescaled, never multiplied through a float, so the mantissa
/// after rescaling is exactly the minor-unit count. Amounts carrying more
/// precision than the currency allows are rejected instead of rounded.
pub fn to_minor_units(amount: Decimal, currency: Currency) -> Result<i64> {
    let exponent = currency.exponent();
    let normalized = amount.normalize();
    if normalized.scale() > exponent {
        return Err(PaymentError::ValidationError(format!(
            "{} has more precision than {} allows",
            amount, currency
        )));
    }

    let mut scaled = normalized;
    scaled.rescale(exponent);
    i64::try_from(scaled.mantissa()).map_err(|_| {
        PaymentError::ValidationError(format!("{} is out of range for {}", amount, currency))
    })
}

/// Converts the gateway's integer minor units back into a major-unit decimal.
pub fn from_minor_units(minor: i64, currency: Currency) -> Decimal {
    Decimal::new(minor, currency.exponent())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(PaymentError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[test]
    fn test_naira_to_kobo() {
        assert_eq!(to_minor_units(dec!(82000), Currency::Ngn).unwrap(), 8_200_000);
        assert_eq!(to_minor_units(dec!(0.01), Currency::Ngn).unwrap(), 1);
        assert_eq!(to_minor_units(dec!(19.990), Currency::Usd).unwrap(), 1999);
    }

    #[test]
    fn test_zero_decimal_currency() {
        assert_eq!(to_minor_units(dec!(1500), Currency::Jpy).unwrap(), 1500);
        assert!(matches!(
            to_minor_units(dec!(1500.5), Currency::Jpy),
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[test]
    fn test_excess_precision_rejected() {
        assert!(matches!(
            to_minor_units(dec!(10.005), Currency::Ngn),
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[test]
    fn test_from_minor_units() {
        assert_eq!(from_minor_units(8_200_000, Currency::Ngn), dec!(82000));
        assert_eq!(from_minor_units(5, Currency::Usd), dec!(0.05));
        assert_eq!(from_minor_units(700, Currency::Jpy), dec!(700));
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!("ngn".parse::<Currency>().unwrap(), Currency::Ngn);
        assert!("XYZ".parse::<Currency>().is_err());
        assert_eq!(serde_json::to_string(&Currency::Kes).unwrap(), "\"KES\"");
    }
}
