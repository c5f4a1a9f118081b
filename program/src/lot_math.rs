//! Conversions between on-chain integer lot counts and decimal prices and sizes.
//!
//! All arithmetic goes through [`Decimal`] with checked operations, so repeated
//! conversions never drift the way binary floating point does.
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{ObResult, OrderBookError};

/// The largest token decimals value accepted by the conversions.
pub const MAX_DECIMALS: u8 = 18;

/// Returns `10^decimals` as an integer multiplier.
pub fn base_token_multiplier(decimals: u8) -> ObResult<u64> {
    if decimals > MAX_DECIMALS {
        return Err(OrderBookError::InvalidDecimals(decimals));
    }
    Ok(10u64.pow(decimals as u32))
}

fn pow10(decimals: u8) -> ObResult<Decimal> {
    base_token_multiplier(decimals).map(Decimal::from)
}

fn checked_mul(a: Decimal, b: Decimal) -> ObResult<Decimal> {
    a.checked_mul(b).ok_or(OrderBookError::NumericalOverflow)
}

fn checked_div(a: Decimal, b: Decimal) -> ObResult<Decimal> {
    a.checked_div(b).ok_or(OrderBookError::NumericalOverflow)
}

fn non_zero(lot_size: u64) -> ObResult<Decimal> {
    if lot_size == 0 {
        return Err(OrderBookError::InvalidLotSize);
    }
    Ok(Decimal::from(lot_size))
}

fn ceil_to_lots(lots: Decimal) -> ObResult<u64> {
    lots.ceil()
        .to_u64()
        .ok_or(OrderBookError::NumericalOverflow)
}

/// `price_lots * quote_lot_size * 10^base_decimals / (base_lot_size * 10^quote_decimals)`
pub fn price_lots_to_decimal(
    price_lots: u64,
    base_decimals: u8,
    quote_decimals: u8,
    base_lot_size: u64,
    quote_lot_size: u64,
) -> ObResult<Decimal> {
    let numerator = checked_mul(
        checked_mul(Decimal::from(price_lots), non_zero(quote_lot_size)?)?,
        pow10(base_decimals)?,
    )?;
    let denominator = checked_mul(non_zero(base_lot_size)?, pow10(quote_decimals)?)?;
    Ok(checked_div(numerator, denominator)?.normalize())
}

/// Inverse of [`price_lots_to_decimal`], rounded up so that a limit order built
/// from the result is never priced below the requested decimal price.
pub fn decimal_to_price_lots(
    price: Decimal,
    quote_decimals: u8,
    base_lot_size: u64,
    base_decimals: u8,
    quote_lot_size: u64,
) -> ObResult<u64> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(OrderBookError::NegativeValue);
    }
    let numerator = checked_mul(
        checked_mul(price, non_zero(base_lot_size)?)?,
        pow10(quote_decimals)?,
    )?;
    let denominator = checked_mul(non_zero(quote_lot_size)?, pow10(base_decimals)?)?;
    ceil_to_lots(checked_div(numerator, denominator)?)
}

/// `size_lots * base_lot_size / base_token_multiplier`
pub fn base_lots_to_decimal(
    size_lots: u64,
    base_lot_size: u64,
    base_token_multiplier: u64,
) -> ObResult<Decimal> {
    let native = checked_mul(Decimal::from(size_lots), non_zero(base_lot_size)?)?;
    if base_token_multiplier == 0 {
        return Err(OrderBookError::NumericalOverflow);
    }
    Ok(checked_div(native, Decimal::from(base_token_multiplier))?.normalize())
}

/// `ceil(round(size * 10^base_decimals) / base_lot_size)`
pub fn decimal_to_base_lots(size: Decimal, base_decimals: u8, base_lot_size: u64) -> ObResult<u64> {
    if size.is_sign_negative() && !size.is_zero() {
        return Err(OrderBookError::NegativeValue);
    }
    let native = checked_mul(size, pow10(base_decimals)?)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    ceil_to_lots(checked_div(native, non_zero(base_lot_size)?)?)
}

/// Per-market decimals and lot sizes. These are not stored in the slab and have
/// to be supplied by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketLots {
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
}

impl MarketLots {
    pub fn validate(&self) -> ObResult {
        if self.base_lot_size == 0 || self.quote_lot_size == 0 {
            return Err(OrderBookError::InvalidLotSize);
        }
        base_token_multiplier(self.base_decimals)?;
        base_token_multiplier(self.quote_decimals)?;
        Ok(())
    }

    pub fn price_to_decimal(&self, price_lots: u64) -> ObResult<Decimal> {
        price_lots_to_decimal(
            price_lots,
            self.base_decimals,
            self.quote_decimals,
            self.base_lot_size,
            self.quote_lot_size,
        )
    }

    pub fn price_to_lots(&self, price: Decimal) -> ObResult<u64> {
        decimal_to_price_lots(
            price,
            self.quote_decimals,
            self.base_lot_size,
            self.base_decimals,
            self.quote_lot_size,
        )
    }

    pub fn size_to_decimal(&self, size_lots: u64) -> ObResult<Decimal> {
        base_lots_to_decimal(
            size_lots,
            self.base_lot_size,
            base_token_multiplier(self.base_decimals)?,
        )
    }

    pub fn size_to_lots(&self, size: Decimal) -> ObResult<u64> {
        decimal_to_base_lots(size, self.base_decimals, self.base_lot_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn price_with_equal_decimals_is_identity() {
        assert_eq!(price_lots_to_decimal(100, 6, 6, 1, 1).unwrap(), dec("100"));
    }

    #[test]
    fn price_applies_lot_sizes_and_decimals() {
        // SOL/USDC style market: 9 base decimals, 6 quote decimals
        let price = price_lots_to_decimal(23_450, 9, 6, 100_000_000, 100).unwrap();
        assert_eq!(price, dec("23.45"));
        assert_eq!(
            decimal_to_price_lots(dec("23.45"), 6, 100_000_000, 9, 100).unwrap(),
            23_450
        );
    }

    #[test]
    fn price_to_lots_rounds_up() {
        // 0.1234 quote per base with one lot worth 0.001
        assert_eq!(decimal_to_price_lots(dec("0.1234"), 3, 1, 0, 1).unwrap(), 124);
        assert_eq!(decimal_to_price_lots(dec("0.123"), 3, 1, 0, 1).unwrap(), 123);
    }

    #[test]
    fn size_conversions() {
        assert_eq!(
            base_lots_to_decimal(25, 100_000, base_token_multiplier(6).unwrap()).unwrap(),
            dec("2.5")
        );
        assert_eq!(decimal_to_base_lots(dec("2.5"), 6, 100_000).unwrap(), 25);
        // 2.50001 rounds up to the next full lot
        assert_eq!(decimal_to_base_lots(dec("2.50001"), 6, 100_000).unwrap(), 26);
        // sub-native precision is rounded before the lot division
        assert_eq!(decimal_to_base_lots(dec("0.0000004"), 6, 1).unwrap(), 0);
        assert_eq!(decimal_to_base_lots(dec("0.0000005"), 6, 1).unwrap(), 1);
    }

    #[test]
    fn invalid_inputs() {
        assert!(matches!(
            price_lots_to_decimal(1, 6, 6, 0, 1),
            Err(OrderBookError::InvalidLotSize)
        ));
        assert!(matches!(
            price_lots_to_decimal(1, 19, 6, 1, 1),
            Err(OrderBookError::InvalidDecimals(19))
        ));
        assert!(matches!(
            decimal_to_base_lots(dec("-1"), 6, 1),
            Err(OrderBookError::NegativeValue)
        ));
        assert!(matches!(
            price_lots_to_decimal(u64::MAX, 18, 0, 1, u64::MAX),
            Err(OrderBookError::NumericalOverflow)
        ));
    }

    #[test]
    fn price_round_trip_within_one_lot() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..2_000 {
            let lots = MarketLots {
                base_decimals: rng.gen_range(0..=9),
                quote_decimals: rng.gen_range(0..=9),
                base_lot_size: rng.gen_range(1..=1_000_000),
                quote_lot_size: rng.gen_range(1..=1_000_000),
            };
            let price_lots = rng.gen_range(0..=1_000_000_000_000u64);
            let price = lots.price_to_decimal(price_lots).unwrap();
            let back = lots.price_to_lots(price).unwrap();
            assert!(
                back >= price_lots && back - price_lots <= 1,
                "{:?} {} -> {} -> {}",
                lots,
                price_lots,
                price,
                back
            );
        }
    }

    #[test]
    fn market_lots_validation() {
        let mut lots = MarketLots {
            base_decimals: 9,
            quote_decimals: 6,
            base_lot_size: 100_000_000,
            quote_lot_size: 100,
        };
        assert!(lots.validate().is_ok());
        lots.quote_lot_size = 0;
        assert!(matches!(lots.validate(), Err(OrderBookError::InvalidLotSize)));
    }
}
