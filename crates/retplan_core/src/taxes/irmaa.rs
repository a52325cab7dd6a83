//! IRMAA: Medicare Part B/D income-related surcharges.
//!
//! Brackets key off MAGI from two years earlier; the caller owns that
//! lookback and passes the historical MAGI in. Thresholds use the 2025
//! schedule and project at 2% per year beyond it.

use crate::model::params::FilingStatus;
use crate::taxes::federal::projection_factor;

/// Per-person IRMAA determination for one year.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IrmaaResult {
    pub bracket_index: usize,
    pub monthly_part_b_surcharge: f64,
    pub monthly_part_d_surcharge: f64,
}

impl IrmaaResult {
    /// Annual surcharge for one enrollee.
    #[must_use]
    pub fn annual_per_person(&self) -> f64 {
        12.0 * (self.monthly_part_b_surcharge + self.monthly_part_d_surcharge)
    }
}

/// 2025 single-filer MAGI thresholds with monthly Part B / Part D
/// surcharges. Married thresholds are doubled except the top tier.
const BRACKETS_2025: [(f64, f64, f64); 6] = [
    (0.0, 0.0, 0.0),
    (106_000.0, 74.00, 13.70),
    (133_000.0, 185.00, 35.30),
    (167_000.0, 295.90, 57.00),
    (200_000.0, 406.90, 78.60),
    (500_000.0, 443.90, 85.80),
];

const MARRIED_TOP_TIER: f64 = 750_000.0;

/// Determine the IRMAA surcharge for one Medicare enrollee given the
/// household MAGI from two years prior. Enrollment below 65 never incurs a
/// surcharge.
#[must_use]
pub fn irmaa_surcharge(
    magi_two_years_prior: f64,
    filing: FilingStatus,
    year: i32,
    age: u8,
) -> IrmaaResult {
    if age < 65 || magi_two_years_prior <= 0.0 {
        return IrmaaResult::default();
    }
    let factor = projection_factor(year);
    let mut result = IrmaaResult::default();
    for (index, (threshold, part_b, part_d)) in BRACKETS_2025.iter().enumerate() {
        let mut threshold = match filing {
            FilingStatus::Married => {
                if index == 5 {
                    MARRIED_TOP_TIER
                } else {
                    threshold * 2.0
                }
            }
            _ => *threshold,
        };
        threshold *= factor;
        if magi_two_years_prior > threshold || index == 0 {
            result = IrmaaResult {
                bracket_index: index,
                monthly_part_b_surcharge: *part_b,
                monthly_part_d_surcharge: *part_d,
            };
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn below_first_threshold_no_surcharge() {
        let r = irmaa_surcharge(100_000.0, FilingStatus::Single, 2025, 67);
        assert_eq!(r.bracket_index, 0);
        assert_eq!(r.annual_per_person(), 0.0);
    }

    #[test]
    fn first_tier_single() {
        let r = irmaa_surcharge(110_000.0, FilingStatus::Single, 2025, 67);
        assert_eq!(r.bracket_index, 1);
        assert_relative_eq!(r.annual_per_person(), 12.0 * (74.00 + 13.70));
    }

    #[test]
    fn married_thresholds_double() {
        // 110k is over the single first threshold but under the married one.
        let r = irmaa_surcharge(110_000.0, FilingStatus::Married, 2025, 70);
        assert_eq!(r.bracket_index, 0);
        let r = irmaa_surcharge(220_000.0, FilingStatus::Married, 2025, 70);
        assert_eq!(r.bracket_index, 1);
    }

    #[test]
    fn top_tier_married_is_750k() {
        let r = irmaa_surcharge(760_000.0, FilingStatus::Married, 2025, 72);
        assert_eq!(r.bracket_index, 5);
        assert_relative_eq!(r.monthly_part_b_surcharge, 443.90);
    }

    #[test]
    fn under_65_never_pays() {
        let r = irmaa_surcharge(1_000_000.0, FilingStatus::Single, 2025, 64);
        assert_eq!(r.annual_per_person(), 0.0);
    }
}
