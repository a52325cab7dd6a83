//! Mortality and longevity sampling.
//!
//! Three layers: a stochastic life-expectancy sampler used to size the
//! planning horizon, an annual survival draw against an SSA-style period
//! table, and the survivor transitions applied when one spouse dies.

use crate::model::params::HealthStatus;
use crate::rng::ScenarioRng;

/// SSA-style period table: annual probability of death, ages 50..=120.
/// Smoothed unisex rates; health multipliers are applied on top.
const BASE_MORTALITY: [f64; 71] = [
    0.0031, 0.0034, 0.0037, 0.0040, 0.0044, // 50-54
    0.0048, 0.0052, 0.0057, 0.0062, 0.0068, // 55-59
    0.0074, 0.0081, 0.0088, 0.0096, 0.0105, // 60-64
    0.0115, 0.0126, 0.0137, 0.0150, 0.0164, // 65-69
    0.0179, 0.0196, 0.0214, 0.0234, 0.0256, // 70-74
    0.0280, 0.0306, 0.0335, 0.0367, 0.0401, // 75-79
    0.0439, 0.0481, 0.0527, 0.0577, 0.0632, // 80-84
    0.0693, 0.0759, 0.0832, 0.0911, 0.0999, // 85-89
    0.1095, 0.1200, 0.1315, 0.1441, 0.1580, // 90-94
    0.1732, 0.1899, 0.2081, 0.2281, 0.2501, // 95-99
    0.2742, 0.3005, 0.3294, 0.3611, 0.3959, // 100-104
    0.4340, 0.4758, 0.5216, 0.5718, 0.6268, // 105-109
    0.6871, 0.7533, 0.8258, 0.9053, 0.9500, // 110-114
    0.9600, 0.9700, 0.9800, 0.9900, 0.9950, // 115-119
    1.0000, // 120
];

/// Annual probability of death for an age and health status, capped at 1.
#[must_use]
pub fn annual_mortality(age: u8, health: HealthStatus) -> f64 {
    let base = if age < 50 {
        // Below the table, taper toward a small constant hazard.
        0.002
    } else {
        let idx = usize::from(age.min(120) - 50);
        BASE_MORTALITY[idx]
    };
    (base * health.mortality_multiplier()).min(1.0)
}

/// Draw whether a person survives the year.
pub fn survives_year<R: ScenarioRng + ?Sized>(
    age: u8,
    health: HealthStatus,
    rng: &mut R,
) -> bool {
    rng.next_uniform() >= annual_mortality(age, health)
}

/// Map a uniform onto the three-bucket life-expectancy distribution around
/// `base`: 25% early (base-8..base-3), 50% median (base-2..base+2), 25%
/// longevity (base+3..base+7), clamped to [max(current_age+1, 70), 105].
#[must_use]
pub fn life_expectancy_from_uniform(u: f64, base: u8, current_age: u8) -> u8 {
    let base = f64::from(base);
    let sampled = if u < 0.25 {
        // Early bucket: spread the first quartile across base-8..base-3.
        base - 8.0 + (u / 0.25) * 5.0
    } else if u < 0.75 {
        base - 2.0 + ((u - 0.25) / 0.50) * 4.0
    } else {
        base + 3.0 + ((u - 0.75) / 0.25) * 4.0
    };
    let floor = f64::from(current_age.saturating_add(1)).max(70.0);
    sampled.round().clamp(floor, 105.0) as u8
}

/// Stochastic life expectancy for a single person.
pub fn sample_life_expectancy<R: ScenarioRng + ?Sized>(
    base: u8,
    current_age: u8,
    rng: &mut R,
) -> u8 {
    life_expectancy_from_uniform(rng.next_uniform(), base, current_age)
}

/// Correlated life expectancies for a couple. Two uniforms are correlated
/// at 0.4 through a Gaussian copula before mapping through the bucket
/// distribution; shared household effects (diet, wealth, locale) make
/// spousal longevity positively dependent.
pub fn sample_couple_life_expectancy<R: ScenarioRng + ?Sized>(
    base_user: u8,
    current_age_user: u8,
    base_spouse: u8,
    current_age_spouse: u8,
    rng: &mut R,
) -> (u8, u8) {
    const RHO: f64 = 0.4;
    let z1 = rng.normal();
    let z2 = RHO * z1 + (1.0 - RHO * RHO).sqrt() * rng.normal();
    let u1 = crate::stats::normal_cdf(z1);
    let u2 = crate::stats::normal_cdf(z2);
    (
        life_expectancy_from_uniform(u1, base_user, current_age_user),
        life_expectancy_from_uniform(u2, base_spouse, current_age_spouse),
    )
}

/// Expense fraction retained by a surviving spouse.
pub const SURVIVOR_EXPENSE_FRACTION: f64 = 0.75;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Xorshift32;

    #[test]
    fn mortality_is_monotone_in_age() {
        for age in 50..120 {
            assert!(
                annual_mortality(age + 1, HealthStatus::Good)
                    >= annual_mortality(age, HealthStatus::Good),
                "age {age}"
            );
        }
        assert_eq!(annual_mortality(120, HealthStatus::Good), 1.0);
        assert_eq!(annual_mortality(120, HealthStatus::Poor), 1.0);
    }

    #[test]
    fn health_multipliers_order_hazards() {
        let age = 75;
        let excellent = annual_mortality(age, HealthStatus::Excellent);
        let good = annual_mortality(age, HealthStatus::Good);
        let fair = annual_mortality(age, HealthStatus::Fair);
        let poor = annual_mortality(age, HealthStatus::Poor);
        assert!(excellent < good && good < fair && fair < poor);
        assert!((excellent / good - 0.7).abs() < 1e-12);
        assert!((poor / good - 2.2).abs() < 1e-12);
    }

    #[test]
    fn life_expectancy_buckets() {
        // Below the first quartile boundary lands in the early bucket.
        let early = life_expectancy_from_uniform(0.10, 85, 60);
        assert!((77..=82).contains(&early));
        let median = life_expectancy_from_uniform(0.50, 85, 60);
        assert!((83..=87).contains(&median));
        let longevity = life_expectancy_from_uniform(0.90, 85, 60);
        assert!((88..=92).contains(&longevity));
    }

    #[test]
    fn life_expectancy_clamped_to_bounds() {
        // A young base with an early draw clamps to 70.
        assert_eq!(life_expectancy_from_uniform(0.0, 70, 40), 70);
        // Never above 105.
        assert_eq!(life_expectancy_from_uniform(0.999, 104, 60), 105);
        // Never below current age + 1.
        assert!(life_expectancy_from_uniform(0.0, 85, 84) >= 85);
    }

    #[test]
    fn couple_draws_are_positively_correlated() {
        let mut rng = Xorshift32::new(808);
        let n = 20_000;
        let mut xs = Vec::with_capacity(n);
        let mut ys = Vec::with_capacity(n);
        for _ in 0..n {
            let (a, b) = sample_couple_life_expectancy(85, 60, 87, 58, &mut rng);
            xs.push(f64::from(a));
            ys.push(f64::from(b));
        }
        let mean_x = xs.iter().sum::<f64>() / n as f64;
        let mean_y = ys.iter().sum::<f64>() / n as f64;
        let mut cov = 0.0;
        let mut var_x = 0.0;
        let mut var_y = 0.0;
        for i in 0..n {
            cov += (xs[i] - mean_x) * (ys[i] - mean_y);
            var_x += (xs[i] - mean_x).powi(2);
            var_y += (ys[i] - mean_y).powi(2);
        }
        let correlation = cov / (var_x.sqrt() * var_y.sqrt());
        assert!(
            (0.25..=0.55).contains(&correlation),
            "observed correlation {correlation}"
        );
    }

    #[test]
    fn survival_rate_tracks_table() {
        let mut rng = Xorshift32::new(606);
        let n = 50_000;
        let deaths = (0..n)
            .filter(|_| !survives_year(80, HealthStatus::Good, &mut rng))
            .count();
        let observed = deaths as f64 / n as f64;
        let expected = annual_mortality(80, HealthStatus::Good);
        assert!((observed - expected).abs() < 0.005);
    }
}
