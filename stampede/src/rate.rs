//! Arrival schedules for open-model phases.
//!
//! A generator describes a non-homogeneous arrival process by its
//! instantaneous rate `r(t)`, linear between `initial` and `target` over the
//! ramp duration and constant at `target` afterwards. With the cumulative
//! intensity `Λ(t) = ∫ r`, arrival `k` fires at `Λ⁻¹(k)`. Poisson variants
//! replace the integer `k` with a running sum of `Exp(1)` draws, which is
//! inverse-CDF sampling of the same time-varying process.
//!
//! Fire times are nanoseconds since the owning phase started. Every call
//! returns a value strictly greater than the previous one (by at least 1 ns)
//! unless the schedule saturated at `u64::MAX`, meaning no further arrivals.

use std::time::Duration;

use stampede_core::SeededRandom;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Linear rate function in users per second.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RateFunction {
    initial: f64,
    target: f64,
    /// Ramp length in seconds; zero means the rate is `target` from the start.
    duration: f64,
}

impl RateFunction {
    fn new(initial: f64, target: f64, duration: Duration) -> Self {
        let duration = duration.as_secs_f64();
        let target = target.max(0.0);
        // A zero-length ramp is a constant rate at the target.
        let initial = if duration > 0.0 { initial.max(0.0) } else { target };
        Self {
            initial,
            target,
            duration,
        }
    }

    /// `Λ(D)`: expected arrivals during the ramp.
    fn ramp_arrivals(&self) -> f64 {
        (self.initial + self.target) * self.duration / 2.0
    }

    /// Time in seconds at which the cumulative intensity reaches `arrivals`.
    ///
    /// Returns infinity when the rate has decayed to zero before that point.
    fn inverse(&self, arrivals: f64) -> f64 {
        if arrivals <= 0.0 {
            return 0.0;
        }
        let ramp = self.ramp_arrivals();
        if arrivals <= ramp {
            let a = self.initial;
            let slope = (self.target - a) / self.duration;
            // Rationalized root of a·t + slope·t²/2 = k. Stable for slope → 0.
            let root = (a * a + 2.0 * slope * arrivals).max(0.0).sqrt();
            let denominator = a + root;
            if denominator <= 0.0 {
                f64::INFINITY
            } else {
                2.0 * arrivals / denominator
            }
        } else if self.target > 0.0 {
            self.duration + (arrivals - ramp) / self.target
        } else {
            f64::INFINITY
        }
    }
}

/// Produces the fire times of an open-model phase.
#[derive(Debug, Clone)]
pub struct RateGenerator {
    function: RateFunction,
    random: Option<SeededRandom>,
    /// Cumulative intensity consumed so far.
    intensity: f64,
    fired: u64,
    last_fire_ns: Option<u64>,
}

impl RateGenerator {
    fn with_function(function: RateFunction, random: Option<SeededRandom>) -> Self {
        Self {
            function,
            random,
            intensity: 0.0,
            fired: 0,
            last_fire_ns: None,
        }
    }

    /// Fixed period of `1e9 / users_per_sec` nanoseconds, first arrival at 0.
    pub fn constant(users_per_sec: f64) -> Self {
        Self::ramp(users_per_sec, users_per_sec, Duration::ZERO)
    }

    /// Exponential inter-arrival times with mean `1 / users_per_sec`.
    pub fn poisson_constant(users_per_sec: f64, random: SeededRandom) -> Self {
        Self::poisson_ramp(users_per_sec, users_per_sec, Duration::ZERO, random)
    }

    /// Rate moving linearly from `initial` to `target` over `duration`, then
    /// holding at `target`.
    pub fn ramp(initial: f64, target: f64, duration: Duration) -> Self {
        Self::with_function(RateFunction::new(initial, target, duration), None)
    }

    /// Poisson process following the same rate curve as [`ramp`](Self::ramp).
    pub fn poisson_ramp(
        initial: f64,
        target: f64,
        duration: Duration,
        random: SeededRandom,
    ) -> Self {
        Self::with_function(RateFunction::new(initial, target, duration), Some(random))
    }

    /// Next fire time in nanoseconds since the phase start.
    pub fn next_fire_time_ns(&mut self) -> u64 {
        let seconds = self.function.inverse(self.intensity);
        let computed = to_nanos(seconds);
        let fire = match self.last_fire_ns {
            Some(last) => computed.max(last.saturating_add(1)),
            None => computed,
        };

        self.intensity += match self.random.as_mut() {
            Some(random) => random.exponential(),
            None => 1.0,
        };
        self.fired += 1;
        self.last_fire_ns = Some(fire);
        fire
    }

    /// Number of fire times handed out so far.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// The most recent fire time, if any.
    pub fn last_fire_time_ns(&self) -> Option<u64> {
        self.last_fire_ns
    }

    /// Highest instantaneous rate of the schedule, in users per second.
    pub fn peak_rate(&self) -> f64 {
        self.function.initial.max(self.function.target)
    }
}

fn to_nanos(seconds: f64) -> u64 {
    let nanos = (seconds * NANOS_PER_SEC).round();
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        u64::MAX
    } else if nanos <= 0.0 {
        0
    } else {
        nanos as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fires_before(generator: &mut RateGenerator, limit_ns: u64) -> usize {
        let mut count = 0;
        while generator.next_fire_time_ns() < limit_ns {
            count += 1;
        }
        count
    }

    fn assert_strictly_increasing(generator: &mut RateGenerator, calls: usize) {
        let mut previous = generator.next_fire_time_ns();
        for _ in 1..calls {
            let next = generator.next_fire_time_ns();
            assert!(
                next > previous || next == u64::MAX,
                "fire time went from {previous} to {next}"
            );
            previous = next;
        }
    }

    #[test]
    fn test_constant_period() {
        let mut generator = RateGenerator::constant(4.0);
        let fires: Vec<u64> = (0..4).map(|_| generator.next_fire_time_ns()).collect();
        assert_eq!(fires, vec![0, 250_000_000, 500_000_000, 750_000_000]);
        assert_eq!(generator.fired(), 4);
        assert_eq!(generator.last_fire_time_ns(), Some(750_000_000));
    }

    #[test]
    fn test_constant_count_in_one_second() {
        let mut generator = RateGenerator::constant(100.0);
        let count = fires_before(&mut generator, 1_000_000_000);
        assert!((99..=101).contains(&count), "got {count} fires");
    }

    #[test]
    fn test_ramp_with_equal_ends_matches_constant() {
        let mut ramp = RateGenerator::ramp(20.0, 20.0, Duration::from_secs(3));
        let mut constant = RateGenerator::constant(20.0);
        for _ in 0..100 {
            let a = ramp.next_fire_time_ns() as i64;
            let b = constant.next_fire_time_ns() as i64;
            assert!((a - b).abs() <= 1, "{a} vs {b}");
        }
    }

    #[test]
    fn test_ramp_up_accelerates() {
        // 0 -> 100 users/s over 10 s: Λ(10) = 500 arrivals.
        let mut generator = RateGenerator::ramp(0.0, 100.0, Duration::from_secs(10));
        let fires: Vec<u64> = (0..=500).map(|_| generator.next_fire_time_ns()).collect();

        // Λ(t) = 5 t², so arrival 500 lands exactly at the end of the ramp.
        let last = fires[500] as f64 / NANOS_PER_SEC;
        assert!((last - 10.0).abs() < 1e-6, "arrival 500 at {last}");

        let early_gap = fires[2] - fires[1];
        let late_gap = fires[500] - fires[499];
        assert!(early_gap > late_gap);

        // After the ramp, arrivals are spaced by the target period.
        let next = generator.next_fire_time_ns();
        assert!((next - fires[500]).abs_diff(10_000_000) <= 1);
    }

    #[test]
    fn test_ramp_down_to_zero_saturates() {
        // 10 -> 0 users/s over 2 s: only 10 arrivals ever fit.
        let mut generator = RateGenerator::ramp(10.0, 0.0, Duration::from_secs(2));
        let fires: Vec<u64> = (0..12).map(|_| generator.next_fire_time_ns()).collect();
        assert!(fires[10] <= 2_000_000_000);
        assert_eq!(fires[11], u64::MAX);
        assert_eq!(generator.next_fire_time_ns(), u64::MAX);
    }

    #[test]
    fn test_generators_are_monotonic() {
        assert_strictly_increasing(&mut RateGenerator::constant(1_000_000.0), 1000);
        assert_strictly_increasing(&mut RateGenerator::constant(3e10), 1000);
        assert_strictly_increasing(
            &mut RateGenerator::ramp(1.0, 500.0, Duration::from_secs(1)),
            1000,
        );
        assert_strictly_increasing(
            &mut RateGenerator::ramp(500.0, 1.0, Duration::from_secs(1)),
            1000,
        );
        assert_strictly_increasing(
            &mut RateGenerator::poisson_constant(50.0, SeededRandom::new(1)),
            1000,
        );
        assert_strictly_increasing(
            &mut RateGenerator::poisson_ramp(
                5.0,
                50.0,
                Duration::from_secs(2),
                SeededRandom::new(2),
            ),
            1000,
        );
    }

    #[test]
    fn test_poisson_mean_rate() {
        let mut generator = RateGenerator::poisson_constant(100.0, SeededRandom::new(99));
        let count = fires_before(&mut generator, 100 * 1_000_000_000);
        // 10_000 expected arrivals, standard deviation 100.
        assert!((9_500..=10_500).contains(&count), "got {count} fires");
    }

    #[test]
    fn test_poisson_is_reproducible() {
        let mut a = RateGenerator::poisson_constant(10.0, SeededRandom::new(5));
        let mut b = RateGenerator::poisson_constant(10.0, SeededRandom::new(5));
        for _ in 0..50 {
            assert_eq!(a.next_fire_time_ns(), b.next_fire_time_ns());
        }
    }

    #[test]
    fn test_zero_rate_never_fires_after_first() {
        let mut generator = RateGenerator::constant(0.0);
        assert_eq!(generator.next_fire_time_ns(), 0);
        assert_eq!(generator.next_fire_time_ns(), u64::MAX);
        assert_eq!(generator.peak_rate(), 0.0);
    }
}
