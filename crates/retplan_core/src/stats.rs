//! Streaming and exact statistics used by the batch aggregation layer.

use serde::{Deserialize, Serialize};

/// Five-point percentile summary, generic so it can hold scalars or series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileSeries<T> {
    pub p10: T,
    pub p25: T,
    pub p50: T,
    pub p75: T,
    pub p90: T,
}

/// Linear-interpolated percentile of a pre-sorted slice.
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let len = sorted.len();
    if len == 0 {
        return 0.0;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[len - 1];
    }

    let index = p * (len - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    let weight = index.fract();

    if lower == upper {
        return sorted[lower];
    }
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Sort a copy of `values` and take the standard five percentiles.
#[must_use]
pub fn summarize(values: &[f64]) -> PercentileSeries<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    PercentileSeries {
        p10: percentile(&sorted, 0.10),
        p25: percentile(&sorted, 0.25),
        p50: percentile(&sorted, 0.50),
        p75: percentile(&sorted, 0.75),
        p90: percentile(&sorted, 0.90),
    }
}

/// Welford accumulator for count/mean/variance without storing samples.
#[derive(Debug, Clone, Default)]
pub struct StreamingStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl StreamingStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    #[must_use]
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// P-Square online quantile estimator (Jain & Chlamtac 1985): five markers
/// tracking one target quantile without storing observations.
#[derive(Debug, Clone)]
pub struct PSquare {
    p: f64,
    heights: [f64; 5],
    positions: [f64; 5],
    desired: [f64; 5],
    increments: [f64; 5],
    count: usize,
    initial: Vec<f64>,
}

impl PSquare {
    #[must_use]
    pub fn new(p: f64) -> Self {
        Self {
            p,
            heights: [0.0; 5],
            positions: [1.0, 2.0, 3.0, 4.0, 5.0],
            desired: [1.0, 1.0 + 2.0 * p, 1.0 + 4.0 * p, 3.0 + 2.0 * p, 5.0],
            increments: [0.0, p / 2.0, p, (1.0 + p) / 2.0, 1.0],
            count: 0,
            initial: Vec::with_capacity(5),
        }
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count <= 5 {
            self.initial.push(value);
            if self.count == 5 {
                self.initial
                    .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                for (slot, v) in self.heights.iter_mut().zip(self.initial.iter()) {
                    *slot = *v;
                }
            }
            return;
        }

        // Locate the cell and bump end markers when the observation falls
        // outside the current range.
        let k = if value < self.heights[0] {
            self.heights[0] = value;
            0
        } else if value >= self.heights[4] {
            self.heights[4] = value;
            3
        } else {
            let mut cell = 0;
            for i in 0..4 {
                if value >= self.heights[i] && value < self.heights[i + 1] {
                    cell = i;
                    break;
                }
            }
            cell
        };

        for pos in self.positions.iter_mut().skip(k + 1) {
            *pos += 1.0;
        }
        for (d, inc) in self.desired.iter_mut().zip(self.increments.iter()) {
            *d += inc;
        }

        // Adjust interior markers with the parabolic formula, falling back to
        // linear when the parabolic estimate would leave the bracket.
        for i in 1..4 {
            let delta = self.desired[i] - self.positions[i];
            let step_up = self.positions[i + 1] - self.positions[i] > 1.0;
            let step_down = self.positions[i - 1] - self.positions[i] < -1.0;
            if (delta >= 1.0 && step_up) || (delta <= -1.0 && step_down) {
                let d = delta.signum();
                let parabolic = self.parabolic(i, d);
                if self.heights[i - 1] < parabolic && parabolic < self.heights[i + 1] {
                    self.heights[i] = parabolic;
                } else {
                    self.heights[i] = self.linear(i, d);
                }
                self.positions[i] += d;
            }
        }
    }

    fn parabolic(&self, i: usize, d: f64) -> f64 {
        let q = &self.heights;
        let n = &self.positions;
        q[i] + d / (n[i + 1] - n[i - 1])
            * ((n[i] - n[i - 1] + d) * (q[i + 1] - q[i]) / (n[i + 1] - n[i])
                + (n[i + 1] - n[i] - d) * (q[i] - q[i - 1]) / (n[i] - n[i - 1]))
    }

    fn linear(&self, i: usize, d: f64) -> f64 {
        let j = if d > 0.0 { i + 1 } else { i - 1 };
        self.heights[i]
            + d * (self.heights[j] - self.heights[i]) / (self.positions[j] - self.positions[i])
    }

    /// Current estimate of the target quantile.
    #[must_use]
    pub fn estimate(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        if self.count <= 5 {
            let mut sorted = self.initial.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            return percentile(&sorted, self.p);
        }
        self.heights[2]
    }
}

/// Streaming estimator for the engine's five reporting percentiles. Used
/// when keeping every ending balance in memory is not an option; the exact
/// sorted array remains the source of truth when both are maintained.
#[derive(Debug, Clone)]
pub struct StreamingPercentiles {
    estimators: [PSquare; 5],
}

impl Default for StreamingPercentiles {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingPercentiles {
    #[must_use]
    pub fn new() -> Self {
        Self {
            estimators: [
                PSquare::new(0.10),
                PSquare::new(0.25),
                PSquare::new(0.50),
                PSquare::new(0.75),
                PSquare::new(0.90),
            ],
        }
    }

    pub fn push(&mut self, value: f64) {
        for est in &mut self.estimators {
            est.push(value);
        }
    }

    #[must_use]
    pub fn estimates(&self) -> PercentileSeries<f64> {
        PercentileSeries {
            p10: self.estimators[0].estimate(),
            p25: self.estimators[1].estimate(),
            p50: self.estimators[2].estimate(),
            p75: self.estimators[3].estimate(),
            p90: self.estimators[4].estimate(),
        }
    }
}

/// Conditional value at risk: mean of the worst `1 - level` tail of a
/// pre-sorted (ascending) sample.
#[must_use]
pub fn cvar(sorted: &[f64], level: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let tail = (((1.0 - level) * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[..tail].iter().sum::<f64>() / tail as f64
}

/// Maximum peak-to-trough decline of a balance trajectory, as a fraction.
#[must_use]
pub fn max_drawdown(trajectory: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &value in trajectory {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst
}

/// Ulcer index: root-mean-square of percentage drawdowns along the path.
#[must_use]
pub fn ulcer_index(trajectory: &[f64]) -> f64 {
    if trajectory.is_empty() {
        return 0.0;
    }
    let mut peak = f64::NEG_INFINITY;
    let mut sum_sq = 0.0;
    for &value in trajectory {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = 100.0 * (peak - value) / peak;
            sum_sq += dd * dd;
        }
    }
    (sum_sq / trajectory.len() as f64).sqrt()
}

/// Standard normal CDF via the Abramowitz & Stegun 7.1.26 erf polynomial.
#[must_use]
pub fn normal_cdf(x: f64) -> f64 {
    let y = x.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + 0.327_591_1 * y);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let erf = 1.0 - poly * (-y * y).exp();
    if x >= 0.0 { 0.5 * (1.0 + erf) } else { 0.5 * (1.0 - erf) }
}

/// Inverse standard normal CDF (Acklam's rational approximation), used to
/// map stratified uniforms onto normals for Latin-Hypercube rows.
#[must_use]
pub fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -39.696_830_286_653_76,
        220.946_098_424_520_8,
        -275.928_510_446_968_7,
        138.357_751_867_269_2,
        -30.664_798_066_147_16,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -54.476_098_798_224_06,
        161.585_836_858_040_9,
        -155.698_979_859_886_6,
        66.801_311_887_719_72,
        -13.280_681_552_885_72,
    ];
    const C: [f64; 6] = [
        -0.007_784_894_002_430_293,
        -0.322_396_458_041_136_5,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        0.007_784_695_709_041_462,
        0.322_467_129_070_039_9,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    let p = p.clamp(1e-12, 1.0 - 1e-12);

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn percentile_interpolates() {
        let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_relative_eq!(percentile(&sorted, 0.5), 30.0);
        assert_relative_eq!(percentile(&sorted, 0.25), 20.0);
        assert_relative_eq!(percentile(&sorted, 0.0), 10.0);
        assert_relative_eq!(percentile(&sorted, 1.0), 50.0);
    }

    #[test]
    fn streaming_stats_matches_direct() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut stats = StreamingStats::default();
        for v in values {
            stats.push(v);
        }
        assert_relative_eq!(stats.mean(), 3.5);
        assert_relative_eq!(stats.variance(), 35.0 / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn psquare_tracks_median_of_uniform_stream() {
        use crate::rng::{ScenarioRng, Xorshift32};
        let mut rng = Xorshift32::new(17);
        let mut est = PSquare::new(0.5);
        for _ in 0..50_000 {
            est.push(rng.next_uniform());
        }
        assert!((est.estimate() - 0.5).abs() < 0.01);
    }

    #[test]
    fn streaming_percentiles_agree_with_exact() {
        use crate::rng::{ScenarioRng, Xorshift32};
        let mut rng = Xorshift32::new(31);
        let values: Vec<f64> = (0..20_000).map(|_| rng.normal()).collect();
        let mut streaming = StreamingPercentiles::new();
        for &v in &values {
            streaming.push(v);
        }
        let exact = summarize(&values);
        let approx = streaming.estimates();
        assert!((exact.p10 - approx.p10).abs() < 0.05);
        assert!((exact.p50 - approx.p50).abs() < 0.05);
        assert!((exact.p90 - approx.p90).abs() < 0.05);
    }

    #[test]
    fn cvar_is_tail_mean() {
        let sorted = [-100.0, -50.0, 0.0, 50.0, 100.0, 150.0, 200.0, 250.0, 300.0, 350.0];
        // 5% tail of 10 samples is the single worst observation.
        assert_relative_eq!(cvar(&sorted, 0.95), -100.0);
        // 20% tail averages the worst two.
        assert_relative_eq!(cvar(&sorted, 0.80), -75.0);
    }

    #[test]
    fn drawdown_and_ulcer() {
        let path = [100.0, 120.0, 90.0, 110.0, 80.0];
        assert_relative_eq!(max_drawdown(&path), (120.0 - 80.0) / 120.0);
        assert!(ulcer_index(&path) > 0.0);
        assert_relative_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn inverse_cdf_round_trips_through_cdf() {
        for p in [0.01, 0.1, 0.25, 0.5, 0.75, 0.9, 0.99] {
            let z = inverse_normal_cdf(p);
            assert!((normal_cdf(z) - p).abs() < 1e-4, "p = {p}");
        }
        assert_relative_eq!(inverse_normal_cdf(0.5), 0.0, epsilon = 1e-9);
    }
}
