//! Price of a booking from its length and the venue's hourly rate.

use serde::Serialize;

use crate::model::Money;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceQuote {
    pub rate_per_hour: Money,
    pub duration_hours: f64,
    pub amount: Money,
}

impl PriceQuote {
    /// Amount with `,` thousands separators. Surfaces with their own locale
    /// rules should format `amount` themselves.
    pub fn formatted(&self) -> String {
        group_thousands(self.amount)
    }
}

/// `duration_hours * rate_per_hour`, rounded to whole units. Non-positive or
/// non-finite inputs price at zero so partially filled forms can preview.
pub fn price(duration_hours: f64, rate_per_hour: Money) -> PriceQuote {
    let amount = if duration_hours.is_finite() && duration_hours > 0.0 && rate_per_hour > 0 {
        (duration_hours * rate_per_hour as f64).round() as Money
    } else {
        0
    };
    PriceQuote {
        rate_per_hour,
        duration_hours,
        amount,
    }
}

pub fn group_thousands(amount: Money) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
