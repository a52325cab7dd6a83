//! Long-term-care episode modelling.
//!
//! At most one primary episode per person per scenario, generated up front
//! on a derived sub-stream so LTC draws never perturb market draws. Costs
//! inflate only within the episode at an LTC-specific rate; insurance pays
//! after the elimination period.

use rand::RngCore;
use rand_distr::{Distribution, LogNormal};

use crate::model::params::{CareType, LtcInsurancePolicy};
use crate::rng::ScenarioRng;

/// Age-banded annual probability of first LTC onset. Calibrated so the
/// lifetime probability through a typical horizon lands near 35-40%.
#[must_use]
pub fn annual_onset_probability(age: u8) -> f64 {
    match age {
        0..=64 => 0.0,
        65..=74 => 0.010,
        75..=84 => 0.022,
        _ => 0.040,
    }
}

/// National-average base daily cost before care-type and regional factors.
const NATIONAL_MEAN_DAILY_COST: f64 = 165.0;

/// Simplified LTC used by the fixed-horizon-93 mortality mode.
pub const SIMPLE_LTC_ANNUAL_COST: f64 = 75_000.0;
pub const SIMPLE_LTC_PROBABILITY: f64 = 0.40;
pub const SIMPLE_LTC_ONSET_AGE: u8 = 91;
pub const SIMPLE_LTC_DURATION_YEARS: u8 = 2;

#[must_use]
pub fn care_type_cost_multiplier(care_type: CareType) -> f64 {
    match care_type {
        CareType::Home => 0.65,
        CareType::Assisted => 0.85,
        CareType::Nursing => 1.70,
        CareType::Memory => 1.90,
    }
}

/// Fraction of non-healthcare living expenses displaced by care.
#[must_use]
pub fn care_replacement_fraction(care_type: CareType) -> f64 {
    match care_type {
        CareType::Home => 0.15,
        CareType::Assisted => 0.40,
        CareType::Nursing => 0.60,
        CareType::Memory => 0.60,
    }
}

/// Regional cost factor by state of residence.
#[must_use]
pub fn regional_cost_factor(state: &str) -> f64 {
    match state {
        "AK" | "HI" => 1.45,
        "NY" | "MA" | "CT" | "NJ" => 1.30,
        "CA" | "WA" | "OR" => 1.25,
        "IL" | "CO" | "MN" | "VT" | "NH" => 1.10,
        "TX" | "AZ" | "NC" | "GA" | "NV" => 0.95,
        "MO" | "AL" | "MS" | "AR" | "OK" | "LA" => 0.85,
        _ => 1.0,
    }
}

/// One person's pre-modelled LTC episode for a scenario.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LtcEpisode {
    pub has_episode: bool,
    pub onset_age: Option<u8>,
    pub duration_years: f64,
    pub care_type: Option<CareType>,
    pub base_annual_cost: f64,
    /// Episode-local inflation rate, drawn in [3%, 4.5%].
    pub ltc_inflation: f64,
}

impl LtcEpisode {
    #[must_use]
    pub fn none() -> Self {
        Self {
            has_episode: false,
            onset_age: None,
            duration_years: 0.0,
            care_type: None,
            base_annual_cost: 0.0,
            ltc_inflation: 0.0,
        }
    }

    /// Whether the episode is active at `age` (onset inclusive, partial
    /// final year counts).
    #[must_use]
    pub fn is_active(&self, age: u8) -> bool {
        match self.onset_age {
            Some(onset) => {
                let elapsed = f64::from(age) - f64::from(onset);
                elapsed >= 0.0 && elapsed < self.duration_years.ceil()
            }
            None => false,
        }
    }

    /// Gross annual cost at `age`, inflated only within the episode. The
    /// final partial year is prorated.
    #[must_use]
    pub fn annual_cost(&self, age: u8) -> f64 {
        let Some(onset) = self.onset_age else {
            return 0.0;
        };
        if !self.is_active(age) {
            return 0.0;
        }
        let year_in_episode = f64::from(age) - f64::from(onset);
        let remaining = self.duration_years - year_in_episode;
        let fraction = remaining.min(1.0);
        self.base_annual_cost * (1.0 + self.ltc_inflation).powf(year_in_episode) * fraction
    }

    /// Undiscounted total of the episode's gross costs.
    #[must_use]
    pub fn total_lifetime_cost(&self) -> f64 {
        let Some(onset) = self.onset_age else {
            return 0.0;
        };
        let mut total = 0.0;
        let years = self.duration_years.ceil() as u8;
        for offset in 0..years {
            total += self.annual_cost(onset + offset);
        }
        total
    }
}

/// Sample the care type: home 55%, assisted 30%, nursing 15%; the extended
/// mix carves 5% memory care out of home care.
fn sample_care_type<R: ScenarioRng + ?Sized>(rng: &mut R, include_memory: bool) -> CareType {
    let u = rng.next_uniform();
    if include_memory {
        if u < 0.50 {
            CareType::Home
        } else if u < 0.80 {
            CareType::Assisted
        } else if u < 0.95 {
            CareType::Nursing
        } else {
            CareType::Memory
        }
    } else if u < 0.55 {
        CareType::Home
    } else if u < 0.85 {
        CareType::Assisted
    } else {
        CareType::Nursing
    }
}

/// Generate a person's episode (or none) for the whole scenario.
///
/// `rng` is a derived sub-stream; it must also be a `RngCore` so the
/// log-normal duration can be sampled through `rand_distr`.
pub fn generate_episode<R: ScenarioRng + RngCore>(
    current_age: u8,
    horizon_age: u8,
    state: &str,
    include_memory: bool,
    rng: &mut R,
) -> LtcEpisode {
    let mut onset = None;
    let start = current_age.max(65);
    for age in start..=horizon_age {
        if rng.next_uniform() < annual_onset_probability(age) {
            onset = Some(age);
            break;
        }
    }
    let Some(onset_age) = onset else {
        return LtcEpisode::none();
    };

    let care_type = sample_care_type(rng, include_memory);

    // Arithmetic mean ~2y, sd ~1.5y in log-normal parameters.
    let duration = LogNormal::<f64>::new(0.470, 0.668)
        .map(|d| d.sample(rng))
        .unwrap_or(2.0)
        .clamp(0.5, 5.0);

    let daily = NATIONAL_MEAN_DAILY_COST * rng.uniform(0.85, 1.15);
    let base_annual_cost =
        daily * 365.0 * care_type_cost_multiplier(care_type) * regional_cost_factor(state);

    LtcEpisode {
        has_episode: true,
        onset_age: Some(onset_age),
        duration_years: duration,
        care_type: Some(care_type),
        base_annual_cost,
        ltc_inflation: rng.uniform(0.03, 0.045),
    }
}

/// Insurance benefit against one episode year. Returns the covered amount
/// (never more than the gross cost).
#[must_use]
pub fn insurance_benefit(
    policy: &LtcInsurancePolicy,
    episode: &LtcEpisode,
    age: u8,
    years_since_policy_start: f64,
    gross_cost: f64,
) -> f64 {
    let Some(onset) = episode.onset_age else {
        return 0.0;
    };
    if gross_cost <= 0.0 || age < onset {
        return 0.0;
    }

    // Elimination period: days into the episode before benefits begin.
    let days_into_episode = (f64::from(age) - f64::from(onset)) * 365.0;
    if days_into_episode + 365.0 <= f64::from(policy.elimination_period_days) {
        return 0.0;
    }
    let covered_fraction = if days_into_episode >= f64::from(policy.elimination_period_days) {
        1.0
    } else {
        (days_into_episode + 365.0 - f64::from(policy.elimination_period_days)) / 365.0
    };

    let mut daily_benefit = policy.daily_benefit;
    if policy.inflation_rider {
        daily_benefit *= 1.03_f64.powf(years_since_policy_start.max(0.0));
    }
    (daily_benefit * 365.0 * covered_fraction).min(gross_cost)
}

/// Premiums are paid while no claim is active, stopping at 85.
#[must_use]
pub fn premium_due(policy: &LtcInsurancePolicy, episode: &LtcEpisode, age: u8) -> f64 {
    let claimed = episode.onset_age.is_some_and(|onset| age >= onset);
    if age >= 85 || claimed {
        0.0
    } else {
        policy.annual_premium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Xorshift32;

    #[test]
    fn lifetime_probability_in_band() {
        let mut rng = Xorshift32::new(7171);
        let n = 20_000;
        let with_episode = (0..n)
            .filter(|_| generate_episode(65, 90, "TX", false, &mut rng).has_episode)
            .count();
        let rate = with_episode as f64 / n as f64;
        assert!(
            (0.30..=0.45).contains(&rate),
            "lifetime LTC rate {rate} outside band"
        );
    }

    #[test]
    fn durations_are_clamped() {
        let mut rng = Xorshift32::new(99);
        for salt in 0..500u32 {
            let mut sub = rng.derive("ltc", salt);
            let episode = generate_episode(65, 100, "CA", true, &mut sub);
            if episode.has_episode {
                assert!((0.5..=5.0).contains(&episode.duration_years));
            }
        }
    }

    #[test]
    fn cost_inflates_only_within_episode() {
        let episode = LtcEpisode {
            has_episode: true,
            onset_age: Some(80),
            duration_years: 3.0,
            care_type: Some(CareType::Nursing),
            base_annual_cost: 100_000.0,
            ltc_inflation: 0.04,
        };
        assert_eq!(episode.annual_cost(79), 0.0);
        assert_eq!(episode.annual_cost(80), 100_000.0);
        assert!((episode.annual_cost(81) - 104_000.0).abs() < 1e-9);
        assert_eq!(episode.annual_cost(83), 0.0);
    }

    #[test]
    fn partial_final_year_is_prorated() {
        let episode = LtcEpisode {
            has_episode: true,
            onset_age: Some(80),
            duration_years: 1.5,
            care_type: Some(CareType::Home),
            base_annual_cost: 80_000.0,
            ltc_inflation: 0.03,
        };
        assert_eq!(episode.annual_cost(80), 80_000.0);
        let second = episode.annual_cost(81);
        assert!((second - 80_000.0 * 1.03 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn benefit_waits_for_elimination_period() {
        let policy = LtcInsurancePolicy {
            daily_benefit: 200.0,
            elimination_period_days: 90,
            inflation_rider: false,
            annual_premium: 3_000.0,
        };
        let episode = LtcEpisode {
            has_episode: true,
            onset_age: Some(82),
            duration_years: 2.0,
            care_type: Some(CareType::Assisted),
            base_annual_cost: 90_000.0,
            ltc_inflation: 0.035,
        };
        // First year: 90 of 365 days eliminated.
        let first = insurance_benefit(&policy, &episode, 82, 10.0, 90_000.0);
        let expected = 200.0 * 365.0 * (275.0 / 365.0);
        assert!((first - expected).abs() < 1e-6);
        // Second year fully covered, capped by the gross cost.
        let second = insurance_benefit(&policy, &episode, 83, 11.0, 60_000.0);
        assert_eq!(second, 60_000.0);
    }

    #[test]
    fn premiums_stop_at_claim_or_85() {
        let policy = LtcInsurancePolicy {
            daily_benefit: 150.0,
            elimination_period_days: 60,
            inflation_rider: true,
            annual_premium: 2_500.0,
        };
        let none = LtcEpisode::none();
        assert_eq!(premium_due(&policy, &none, 70), 2_500.0);
        assert_eq!(premium_due(&policy, &none, 85), 0.0);

        let episode = LtcEpisode {
            has_episode: true,
            onset_age: Some(78),
            duration_years: 2.0,
            care_type: Some(CareType::Home),
            base_annual_cost: 50_000.0,
            ltc_inflation: 0.03,
        };
        assert_eq!(premium_due(&policy, &episode, 77), 2_500.0);
        assert_eq!(premium_due(&policy, &episode, 78), 0.0);
    }
}
