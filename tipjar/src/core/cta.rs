//! Suggested contribution range for the site-wide call to action.
//!
//! Participants who have not yet said whether they support the platform
//! get a suggested weekly range scaled to how much they give.

use serde::Serialize;

/// Suggested weekly contribution, formatted as dollar amounts (`"1.00"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestedRange {
    pub low: String,
    pub high: String,
}

/// (minimum weekly usage in dollars, low cents, high cents), highest first.
const TIERS: &[(i64, i64, i64)] = &[
    // Above $500/wk we suggest 2%.
    (5000, 10_000, 100_000),
    (500, 1_000, 10_000),
    // From $20 to $499 we suggest 5%.
    (100, 500, 2_500),
    (20, 100, 500),
    // Below $20 we suggest 10%.
    (5, 50, 200),
    (0, 10, 100),
];

/// Pick the suggested range for a participant's weekly usage (in cents).
pub fn suggested_range(usage_cents: i64) -> SuggestedRange {
    let (_, low, high) = TIERS
        .iter()
        .copied()
        .find(|(min_dollars, _, _)| usage_cents >= min_dollars * 100)
        .unwrap_or((0, 10, 100));
    SuggestedRange {
        low: format_cents(low),
        high: format_cents(high),
    }
}

/// Format cents as a dollar amount with two decimals.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(dollars: i64) -> (String, String) {
        let r = suggested_range(dollars * 100);
        (r.low, r.high)
    }

    #[test]
    fn tiers_follow_weekly_usage() {
        assert_eq!(range(6000), ("100.00".into(), "1000.00".into()));
        assert_eq!(range(5000), ("100.00".into(), "1000.00".into()));
        assert_eq!(range(4999), ("10.00".into(), "100.00".into()));
        assert_eq!(range(100), ("5.00".into(), "25.00".into()));
        assert_eq!(range(20), ("1.00".into(), "5.00".into()));
        assert_eq!(range(5), ("0.50".into(), "2.00".into()));
        assert_eq!(range(0), ("0.10".into(), "1.00".into()));
    }

    #[test]
    fn negative_usage_gets_lowest_tier() {
        let r = suggested_range(-1);
        assert_eq!(r.low, "0.10");
        assert_eq!(r.high, "1.00");
    }

    #[test]
    fn format_cents_pads() {
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(123_456), "1234.56");
        assert_eq!(format_cents(-250), "-2.50");
    }
}
