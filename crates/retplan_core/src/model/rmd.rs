//! Required Minimum Distribution tables and SECURE 2.0 start ages.

/// IRS Uniform Lifetime Table (2022 revision), age -> divisor.
const UNIFORM_LIFETIME: [(u8, f64); 49] = [
    (72, 27.4),
    (73, 26.5),
    (74, 25.5),
    (75, 24.6),
    (76, 23.7),
    (77, 22.9),
    (78, 22.0),
    (79, 21.1),
    (80, 20.2),
    (81, 19.4),
    (82, 18.5),
    (83, 17.7),
    (84, 16.8),
    (85, 16.0),
    (86, 15.2),
    (87, 14.4),
    (88, 13.7),
    (89, 12.9),
    (90, 12.2),
    (91, 11.5),
    (92, 10.8),
    (93, 10.1),
    (94, 9.5),
    (95, 8.9),
    (96, 8.4),
    (97, 7.8),
    (98, 7.3),
    (99, 6.8),
    (100, 6.4),
    (101, 6.0),
    (102, 5.6),
    (103, 5.2),
    (104, 4.9),
    (105, 4.6),
    (106, 4.3),
    (107, 4.1),
    (108, 3.9),
    (109, 3.7),
    (110, 3.5),
    (111, 3.4),
    (112, 3.3),
    (113, 3.1),
    (114, 3.0),
    (115, 2.9),
    (116, 2.8),
    (117, 2.7),
    (118, 2.5),
    (119, 2.3),
    (120, 2.0),
];

/// Joint Life and Last Survivor divisors for a spouse exactly 11 years
/// younger (IRS Pub 590-B Table II diagonal). The table applies when the
/// sole beneficiary spouse is more than 10 years younger; wider gaps add
/// 0.4 per extra year, capped at +4.0.
const JOINT_LIFE_GAP_11: [(u8, f64); 29] = [
    (72, 28.6),
    (73, 27.7),
    (74, 26.8),
    (75, 25.9),
    (76, 25.0),
    (77, 24.1),
    (78, 23.2),
    (79, 22.4),
    (80, 21.5),
    (81, 20.7),
    (82, 19.8),
    (83, 19.0),
    (84, 18.2),
    (85, 17.4),
    (86, 16.6),
    (87, 15.8),
    (88, 15.1),
    (89, 14.3),
    (90, 13.6),
    (91, 12.9),
    (92, 12.2),
    (93, 11.6),
    (94, 10.9),
    (95, 10.3),
    (96, 9.7),
    (97, 9.2),
    (98, 8.6),
    (99, 8.1),
    (100, 7.6),
];

/// RMD start age under SECURE 2.0. There is no age-74 tier: the statute
/// jumps from 73 (born 1951-1959) straight to 75 (born 1960 or later).
#[must_use]
pub fn rmd_start_age(birth_year: i32) -> u8 {
    if birth_year < 1951 {
        72
    } else if birth_year <= 1959 {
        73
    } else {
        75
    }
}

/// Uniform Lifetime divisor for an owner age, if the age is in the table.
#[must_use]
pub fn uniform_lifetime_divisor(age: u8) -> Option<f64> {
    UNIFORM_LIFETIME
        .iter()
        .find(|(a, _)| *a == age)
        .map(|(_, d)| *d)
}

/// Joint Life divisor for an owner whose sole-beneficiary spouse is more
/// than 10 years younger. Returns `None` when the gap is 10 or less (the
/// Uniform Lifetime table applies) or the age is out of range.
#[must_use]
pub fn joint_life_divisor(age: u8, spouse_age: u8) -> Option<f64> {
    let gap = i32::from(age) - i32::from(spouse_age);
    if gap <= 10 {
        return None;
    }
    let base = JOINT_LIFE_GAP_11
        .iter()
        .find(|(a, _)| *a == age)
        .map(|(_, d)| *d)?;
    let extra = (f64::from((gap - 11).min(10) as u8)) * 0.4;
    Some(base + extra.min(4.0))
}

/// Required minimum distribution for one owner's tax-deferred balance.
///
/// Zero before the owner's SECURE 2.0 start age. The Joint Life divisor is
/// substituted when the spouse is more than 10 years younger, which always
/// yields a smaller required distribution.
#[must_use]
pub fn required_minimum_distribution(
    tax_deferred_balance: f64,
    age: u8,
    spouse_age: Option<u8>,
    birth_year: i32,
) -> f64 {
    if age < rmd_start_age(birth_year) || tax_deferred_balance <= 0.0 {
        return 0.0;
    }
    let age = age.min(120);
    let divisor = spouse_age
        .and_then(|s| joint_life_divisor(age, s))
        .or_else(|| uniform_lifetime_divisor(age))
        .unwrap_or(2.0);
    tax_deferred_balance / divisor
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn secure_2_start_ages() {
        assert_eq!(rmd_start_age(1950), 72);
        assert_eq!(rmd_start_age(1951), 73);
        assert_eq!(rmd_start_age(1959), 73);
        assert_eq!(rmd_start_age(1960), 75);
        assert_eq!(rmd_start_age(1975), 75);
        // The statute has no age-74 tier anywhere.
        for birth_year in 1900..2010 {
            assert_ne!(rmd_start_age(birth_year), 74, "born {birth_year}");
        }
    }

    #[test]
    fn born_1952_first_rmd_at_73() {
        assert_relative_eq!(required_minimum_distribution(500_000.0, 72, None, 1952), 0.0);
        assert_relative_eq!(
            required_minimum_distribution(500_000.0, 73, None, 1952),
            500_000.0 / 26.5,
        );
    }

    #[test]
    fn joint_life_divisor_used_for_much_younger_spouse() {
        // Age 85 with a spouse 11 years younger: Joint Life divisor beats
        // the Uniform Lifetime 16.0.
        let joint = joint_life_divisor(85, 74).expect("gap > 10 must resolve");
        assert!(joint > 16.0);

        let rmd_joint = required_minimum_distribution(500_000.0, 85, Some(74), 1940);
        let rmd_uniform = required_minimum_distribution(500_000.0, 85, Some(80), 1940);
        assert!(rmd_joint < rmd_uniform);
        assert_relative_eq!(rmd_uniform, 500_000.0 / 16.0);
    }

    #[test]
    fn gap_of_ten_or_less_uses_uniform_table() {
        assert!(joint_life_divisor(80, 70).is_none());
        assert!(joint_life_divisor(80, 69).is_some());
    }
}
