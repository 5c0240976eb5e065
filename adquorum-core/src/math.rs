//! Integer helpers for proportional splits
//!
//! Stakes and rewards are 18-decimal u128 amounts, so `a * b` in a pro-rata
//! computation can exceed 128 bits. `mul_div` keeps the full 256-bit product.

use crate::Amount;
use primitive_types::U256;

/// floor(a * b / c), or `None` if `c == 0` or the quotient overflows
pub fn mul_div(a: Amount, b: Amount, c: Amount) -> Option<Amount> {
    if c == 0 {
        return None;
    }
    let quotient = U256::from(a) * U256::from(b) / U256::from(c);
    if quotient > U256::from(u128::MAX) {
        return None;
    }
    Some(quotient.as_u128())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_small_values() {
        assert_eq!(mul_div(10, 20, 3), Some(66));
        assert_eq!(mul_div(1, 1, 0), None);
    }

    #[test]
    fn test_wide_product() {
        let big = u128::MAX / 3;
        assert_eq!(mul_div(big, 6, 6), Some(big));
        assert_eq!(mul_div(u128::MAX, u128::MAX, u128::MAX), Some(u128::MAX));
        assert_eq!(mul_div(u128::MAX, 2, 1), None);
    }

    proptest! {
        #[test]
        fn prop_matches_narrow_arithmetic(a in any::<u64>(), b in any::<u64>(), c in 1..u64::MAX) {
            let expected = (a as u128) * (b as u128) / (c as u128);
            prop_assert_eq!(mul_div(a as u128, b as u128, c as u128), Some(expected));
        }

        #[test]
        fn prop_dividing_by_larger_factor_yields_smaller(a in 1..u128::MAX, b in 1..u128::MAX) {
            prop_assert_eq!(mul_div(a, b, a.max(b)), Some(a.min(b)));
        }
    }
}
