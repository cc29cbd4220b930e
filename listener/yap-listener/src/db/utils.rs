//! Common database conversion utilities
//!
//! Onchain values are 256-bit unsigned integers; they are stored as
//! arbitrary-precision numerics and must never round-trip through a float.

use alloy_primitives::U256;
use bigdecimal::{
    BigDecimal, ToPrimitive,
    num_bigint::{BigInt, Sign},
};

use crate::db::error::DbError;

/// Convert a `U256` to a `BigDecimal`
pub fn u256_to_bigdecimal(value: U256) -> BigDecimal {
    let bigint = BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>());
    BigDecimal::from(bigint)
}

/// Convert a `BigDecimal` to a `U256`
pub fn bigdecimal_to_u256(value: &BigDecimal) -> Result<U256, DbError> {
    let (bigint, scale) = value.clone().with_scale(0).into_bigint_and_scale();
    debug_assert_eq!(scale, 0, "scale must be zero after rescaling");

    let (sign, bytes) = bigint.to_bytes_be();
    if sign == Sign::Minus {
        return Err(DbError::conversion("negative value cannot convert to U256"));
    }
    if bytes.len() > 32 {
        return Err(DbError::conversion("value exceeds 256 bits"));
    }

    Ok(U256::from_be_slice(&bytes))
}

/// Convert a block number to a `BigDecimal`
pub fn block_to_bigdecimal(block: u64) -> BigDecimal {
    BigDecimal::from(block)
}

/// Convert a `BigDecimal` to a block number
pub fn bigdecimal_to_block(value: &BigDecimal) -> Result<u64, DbError> {
    value.to_u64().ok_or(DbError::conversion("block number does not fit in u64"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// U256 values round-trip through BigDecimal, including the maximum
    #[test]
    fn test_u256_roundtrip() {
        for value in [U256::ZERO, U256::from(12345u64), U256::MAX] {
            let bigdecimal = u256_to_bigdecimal(value);
            assert_eq!(bigdecimal_to_u256(&bigdecimal).unwrap(), value);
        }
    }

    /// Negative numerics are rejected rather than wrapped
    #[test]
    fn test_negative_rejected() {
        let negative = BigDecimal::from(-1);
        assert!(bigdecimal_to_u256(&negative).is_err());
    }

    /// Block numbers round-trip through BigDecimal
    #[test]
    fn test_block_roundtrip() {
        let block = 18_000_000u64;
        assert_eq!(bigdecimal_to_block(&block_to_bigdecimal(block)).unwrap(), block);
    }
}
