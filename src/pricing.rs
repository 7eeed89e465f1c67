//! Stay pricing. Pure functions, no storage access.
//!
//! Amounts are whole currency units. Rounding happens at each derivation
//! step (half away from zero), never once at the end, so a quote computed
//! here matches a quote recomputed later from the same stored inputs.

use crate::model::Money;

/// Flat tax rate applied to the stay subtotal.
pub const TAX_RATE: f64 = 0.15;

/// Priced breakdown for one room over one stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub price_per_night: Money,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

/// Discounted nightly rate, rounded to a whole unit.
pub fn nightly_rate(base_price: Money, discount_percent: u32) -> Money {
    let factor = 1.0 - discount_percent as f64 / 100.0;
    (base_price as f64 * factor).round() as Money
}

/// Tax on a subtotal, rounded to a whole unit.
pub fn tax_on(subtotal: Money) -> Money {
    (subtotal as f64 * TAX_RATE).round() as Money
}

/// Full quote: discounted rate, then subtotal over the nights, then tax.
pub fn quote(base_price: Money, discount_percent: u32, nights: i64) -> Quote {
    let price_per_night = nightly_rate(base_price, discount_percent);
    let subtotal = price_per_night * nights;
    let tax = tax_on(subtotal);
    Quote {
        price_per_night,
        subtotal,
        tax,
        total: subtotal + tax,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_quote() {
        // base 200, 15% discount, 3 nights
        let q = quote(200, 15, 3);
        assert_eq!(q.price_per_night, 170);
        assert_eq!(q.subtotal, 510);
        assert_eq!(q.tax, 77); // 76.5 rounds up
        assert_eq!(q.total, 587);
    }

    #[test]
    fn zero_discount() {
        let q = quote(100, 0, 2);
        assert_eq!(q.price_per_night, 100);
        assert_eq!(q.subtotal, 200);
        assert_eq!(q.tax, 30);
        assert_eq!(q.total, 230);
    }

    #[test]
    fn rate_rounds_per_step() {
        // 99 * 0.85 = 84.15 -> 84, then the subtotal builds on the rounded rate
        assert_eq!(nightly_rate(99, 15), 84);
        let q = quote(99, 15, 4);
        assert_eq!(q.subtotal, 336);
        assert_eq!(q.tax, 50); // 50.4 rounds down
        assert_eq!(q.total, 386);
    }

    #[test]
    fn tax_half_rounds_away_from_zero() {
        assert_eq!(tax_on(510), 77);
        assert_eq!(tax_on(10), 2); // 1.5 -> 2
        assert_eq!(tax_on(0), 0);
    }
}
