use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

/// Number of decimal places carried by an [`Amount`]. Ledger columns are DECIMAL(18,4).
pub const AMOUNT_SCALE: u32 = 4;
const SCALE_FACTOR: i64 = 10_i64.pow(AMOUNT_SCALE);

//--------------------------------------       Amount        ---------------------------------------------------------
/// A fixed-point monetary value, stored as an integer number of 1/10,000ths of the currency unit.
///
/// Positions and transfer amounts are always handled in this form so that no floating point arithmetic ever touches
/// the ledger.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Amount(i64);

op!(binary Amount, Add, add);
op!(binary Amount, Sub, sub);
op!(inplace Amount, AddAssign, add_assign);
op!(inplace Amount, SubAssign, sub_assign);
op!(unary Amount, Neg, neg);

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Value cannot be represented as an amount: {0}")]
pub struct AmountConversionError(String);

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<u64> for Amount {
    type Error = AmountConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(AmountConversionError(format!("Value {value} is too large to convert to an amount")))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl FromStr for Amount {
    type Err = AmountConversionError;

    /// Parses the decimal string form used on the wire, e.g. `"100"`, `"-12.5"` or `"0.0001"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(AmountConversionError(s.to_string()));
        }
        if frac.len() > AMOUNT_SCALE as usize {
            return Err(AmountConversionError(format!("{s} has more than {AMOUNT_SCALE} decimal places")));
        }
        let all_digits = |v: &str| v.chars().all(|c| c.is_ascii_digit());
        if !all_digits(whole) || !all_digits(frac) {
            return Err(AmountConversionError(s.to_string()));
        }
        let whole = match whole {
            "" => 0,
            w => w.parse::<i64>().map_err(|e| AmountConversionError(e.to_string()))?,
        };
        let padded = format!("{frac:0<width$}", width = AMOUNT_SCALE as usize);
        let frac = padded.parse::<i64>().map_err(|e| AmountConversionError(e.to_string()))?;
        let value = whole
            .checked_mul(SCALE_FACTOR)
            .and_then(|v| v.checked_add(frac))
            .ok_or_else(|| AmountConversionError(format!("{s} overflows")))?;
        Ok(Self(if negative { -value } else { value }))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let factor = SCALE_FACTOR as u64;
        write!(f, "{sign}{}.{:04}", abs / factor, abs % factor)
    }
}

impl Amount {
    pub fn value(&self) -> i64 {
        self.0
    }

    /// Creates an amount from a whole number of currency units.
    pub fn from_units(units: i64) -> Self {
        Self(units * SCALE_FACTOR)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_and_display() {
        assert_eq!("100".parse::<Amount>().unwrap(), Amount::from_units(100));
        assert_eq!("12.5".parse::<Amount>().unwrap(), Amount::from(125_000));
        assert_eq!("-0.0001".parse::<Amount>().unwrap(), Amount::from(-1));
        assert_eq!(".25".parse::<Amount>().unwrap(), Amount::from(2_500));
        assert_eq!(Amount::from(125_000).to_string(), "12.5000");
        assert_eq!(Amount::from(-1).to_string(), "-0.0001");
    }

    #[test]
    fn rejects_bad_input() {
        assert!("1.23456".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
        assert!("".parse::<Amount>().is_err());
        assert!("1.2.3".parse::<Amount>().is_err());
    }

    #[test]
    fn arithmetic() {
        let mut a = Amount::from_units(10);
        a -= Amount::from_units(3);
        a += Amount::from(5_000);
        assert_eq!(a.to_string(), "7.5000");
        let total: Amount = vec![Amount::from(1), Amount::from(2)].into_iter().sum();
        assert_eq!(total, Amount::from(3));
        assert_eq!(-Amount::from(3), Amount::from(-3));
    }

    #[test]
    fn serializes_as_minor_units() {
        let amount = Amount::from_units(2);
        assert_eq!(serde_json::to_string(&amount).unwrap(), "20000");
        assert_eq!(serde_json::from_str::<Amount>("-15").unwrap(), Amount::from(-15));
    }
}
