//! Per-token list prices (USD).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) cost per token for a Gemini model.
pub fn gemini_cost(model: &str) -> (Decimal, Decimal) {
    if model.contains("pro") {
        (dec!(0.00000125), dec!(0.00001))
    } else if model.contains("flash-lite") {
        (dec!(0.000000075), dec!(0.0000003))
    } else {
        (dec!(0.0000001), dec!(0.0000004))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_is_the_default_tier() {
        assert_eq!(gemini_cost("gemini-2.0-flash"), (dec!(0.0000001), dec!(0.0000004)));
        assert_eq!(gemini_cost("something-new"), gemini_cost("gemini-2.0-flash"));
    }

    #[test]
    fn pro_and_lite_have_their_own_rates() {
        assert!(gemini_cost("gemini-2.5-pro").1 > gemini_cost("gemini-2.0-flash").1);
        assert!(gemini_cost("gemini-2.0-flash-lite").0 < gemini_cost("gemini-2.0-flash").0);
    }
}
