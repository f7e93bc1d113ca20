//! Synthetic trace generation
//!
//! Produces the interval and sample rows that [`FragmentSequence`]
//! constructors consume, mirroring the cost patterns used to drive
//! cost-awareness experiments: stable, volatile, diurnal and spike pricing,
//! plus a sinusoidal carbon-intensity curve. Generators take an explicit
//! RNG so seeded runs are reproducible.

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::fragment::{BoundaryPolicy, FragmentSequence};

const HOUR_MS: i64 = 3_600_000;

/// Shape of a synthetic cost trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostPattern {
    /// Small variations, -10% to +10% of base.
    Stable,
    /// Large variations, -40% to +40% of base.
    Volatile,
    /// Higher cost during business hours (8:00-18:00).
    Diurnal,
    /// 10% chance of a 3x price spike per record.
    Spike,
}

/// Generator for per-host cost traces.
pub struct CostTraceGenerator {
    pattern: CostPattern,
    base_cost: f64,
    /// Per-host multiplier so hosts get different but similar patterns.
    variation_factor: f64,
}

impl CostTraceGenerator {
    pub fn new(pattern: CostPattern, base_cost: f64) -> Self {
        CostTraceGenerator {
            pattern,
            base_cost,
            variation_factor: 1.0,
        }
    }

    pub fn with_variation(mut self, variation_factor: f64) -> Self {
        self.variation_factor = variation_factor;
        self
    }

    /// Generate `num_records` contiguous interval rows covering
    /// `[start_ms, end_ms)`.
    pub fn generate(
        &self,
        start_ms: i64,
        end_ms: i64,
        num_records: usize,
        rng: &mut StdRng,
    ) -> Vec<(i64, i64, f64)> {
        let span = end_ms - start_ms;
        let base = self.base_cost * self.variation_factor;
        let floor = self.base_cost * 0.1;

        (0..num_records)
            .map(|i| {
                let record_start = start_ms + span * i as i64 / num_records as i64;
                let record_end = start_ms + span * (i + 1) as i64 / num_records as i64;

                let cost = match self.pattern {
                    CostPattern::Stable => base + rng.gen_range(-0.1 * base..0.1 * base),
                    CostPattern::Volatile => base + rng.gen_range(-0.4 * base..0.4 * base),
                    CostPattern::Diurnal => {
                        let hour = (record_start / HOUR_MS).rem_euclid(24);
                        if (8..=18).contains(&hour) {
                            base * 1.5 + rng.gen_range(-0.2 * base..0.2 * base)
                        } else {
                            base * 0.7 + rng.gen_range(-0.1 * base..0.1 * base)
                        }
                    }
                    CostPattern::Spike => {
                        if rng.gen_range(0.0..1.0) < 0.1 {
                            base * 3.0 + rng.gen_range(-0.2 * base..0.2 * base)
                        } else {
                            base + rng.gen_range(-0.1 * base..0.1 * base)
                        }
                    }
                };

                (record_start, record_end, cost.max(floor))
            })
            .collect()
    }

    /// Convenience: generate rows and build the shared sequence in one go.
    pub fn generate_sequence(
        &self,
        start_ms: i64,
        end_ms: i64,
        num_records: usize,
        rng: &mut StdRng,
    ) -> FragmentSequence {
        let rows = self.generate(start_ms, end_ms, num_records, rng);
        FragmentSequence::from_intervals(rows, BoundaryPolicy::Extend)
            .expect("generator emits at least one row")
    }
}

/// Generate `(timestamp, value)` carbon-intensity samples: a daily sinusoid
/// around `mean_intensity` (gCO2/kWh) with Gaussian noise.
pub fn carbon_samples(
    start_ms: i64,
    end_ms: i64,
    interval_ms: i64,
    mean_intensity: f64,
    rng: &mut StdRng,
) -> Vec<(i64, f64)> {
    let noise = Normal::new(0.0, mean_intensity * 0.05).expect("valid sigma");
    let mut samples = Vec::new();
    let mut t = start_ms;
    while t < end_ms {
        let phase = 2.0 * std::f64::consts::PI * (t % (24 * HOUR_MS)) as f64 / (24 * HOUR_MS) as f64;
        let value = mean_intensity * (1.0 + 0.3 * phase.sin()) + noise.sample(rng);
        samples.push((t, value.max(0.0)));
        t += interval_ms;
    }
    samples
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_records_are_contiguous() {
        let generator = CostTraceGenerator::new(CostPattern::Stable, 500.0);
        let rows = generator.generate(0, 48 * HOUR_MS, 100, &mut rng());

        assert_eq!(rows.len(), 100);
        assert_eq!(rows[0].0, 0);
        assert_eq!(rows.last().unwrap().1, 48 * HOUR_MS);
        for pair in rows.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn test_stable_pattern_stays_near_base() {
        let generator = CostTraceGenerator::new(CostPattern::Stable, 500.0);
        let rows = generator.generate(0, 24 * HOUR_MS, 50, &mut rng());

        for &(_, _, cost) in &rows {
            assert!(cost >= 450.0 && cost <= 550.0);
        }
    }

    #[test]
    fn test_diurnal_pattern_splits_day_and_night() {
        let generator = CostTraceGenerator::new(CostPattern::Diurnal, 500.0);
        // Hourly records over one day
        let rows = generator.generate(0, 24 * HOUR_MS, 24, &mut rng());

        let noon = rows[12].2;
        let midnight = rows[0].2;
        assert!(noon > midnight, "business hours cost more than night");
    }

    #[test]
    fn test_costs_never_below_floor() {
        let generator =
            CostTraceGenerator::new(CostPattern::Volatile, 500.0).with_variation(0.8);
        let rows = generator.generate(0, 24 * HOUR_MS, 200, &mut rng());
        for &(_, _, cost) in &rows {
            assert!(cost >= 50.0);
        }
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let generator = CostTraceGenerator::new(CostPattern::Spike, 500.0);
        let a = generator.generate(0, 24 * HOUR_MS, 100, &mut rng());
        let b = generator.generate(0, 24 * HOUR_MS, 100, &mut rng());
        assert_eq!(a, b);
    }

    #[test]
    fn test_generated_sequence_covers_horizon() {
        let generator = CostTraceGenerator::new(CostPattern::Stable, 500.0);
        let seq = generator.generate_sequence(0, 24 * HOUR_MS, 48, &mut rng());

        // Extended boundaries: any queried instant resolves
        assert!(seq.value_at(-1).is_some());
        assert!(seq.value_at(23 * HOUR_MS).is_some());
        assert!(seq.value_at(100 * HOUR_MS).is_some());
    }

    #[test]
    fn test_carbon_samples_sorted_and_positive() {
        let samples = carbon_samples(0, 24 * HOUR_MS, 15 * 60 * 1000, 300.0, &mut rng());

        assert_eq!(samples.len(), 96);
        for pair in samples.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
        for &(_, value) in &samples {
            assert!(value >= 0.0);
        }
    }
}
