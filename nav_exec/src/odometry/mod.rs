//! # Odometry estimator
//!
//! Converts the raw wrapping wheel encoder counters into travelled distances.
//! The counters wrap at [`ENCODER_MODULUS`]; as long as the estimator is
//! updated faster than half a wrap period the shortest-difference rule
//! recovers the true tick delta in either direction of travel.

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Modulus of the raw encoder counters. Counters hold values in
/// `0..ENCODER_MODULUS` and one full wrap is one wheel revolution.
pub const ENCODER_MODULUS: u32 = 10_000;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Signed distances travelled by each wheel since the previous update, cm.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DistanceDelta {
    pub left_cm: f64,
    pub right_cm: f64,
}

/// Per-wheel travelled distance estimator.
pub struct OdometryEstimator {
    /// Distance covered by one full encoder wrap, cm.
    distance_per_rev_cm: f64,

    /// Raw counter values at the previous update.
    last_left: u32,
    last_right: u32,

    /// False until the first update after a step reset has seeded the
    /// baseline. The seeding update produces a zero delta.
    seeded: bool,

    /// Absolute distance accumulated since the last step reset, cm.
    step_left_cm: f64,
    step_right_cm: f64,

    /// Absolute distance accumulated over the estimator's lifetime, cm.
    /// Display and archive only, never used for step judgement.
    total_left_cm: f64,
    total_right_cm: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl OdometryEstimator {
    pub fn new(distance_per_rev_cm: f64) -> Self {
        Self {
            distance_per_rev_cm,
            last_left: 0,
            last_right: 0,
            seeded: false,
            step_left_cm: 0.0,
            step_right_cm: 0.0,
            total_left_cm: 0.0,
            total_right_cm: 0.0,
        }
    }

    /// Feed the current raw counter values and get the signed distance delta
    /// since the previous update.
    ///
    /// The first update after construction or [`reset_step`] seeds the
    /// baseline and returns a zero delta, so counter motion that happened
    /// while no step was active is never attributed to the new step.
    ///
    /// [`reset_step`]: OdometryEstimator::reset_step
    pub fn update(&mut self, left_ticks: u32, right_ticks: u32) -> DistanceDelta {
        if !self.seeded {
            self.last_left = left_ticks;
            self.last_right = right_ticks;
            self.seeded = true;
            return DistanceDelta::default();
        }

        let left_delta = wrap_delta(left_ticks, self.last_left);
        let right_delta = wrap_delta(right_ticks, self.last_right);
        self.last_left = left_ticks;
        self.last_right = right_ticks;

        let tick_cm = self.distance_per_rev_cm / ENCODER_MODULUS as f64;
        let delta = DistanceDelta {
            left_cm: left_delta as f64 * tick_cm,
            right_cm: right_delta as f64 * tick_cm,
        };

        self.step_left_cm += delta.left_cm.abs();
        self.step_right_cm += delta.right_cm.abs();
        self.total_left_cm += delta.left_cm.abs();
        self.total_right_cm += delta.right_cm.abs();

        delta
    }

    /// Zero the per-step accumulators and drop the counter baseline.
    ///
    /// The lifetime accumulators are unaffected.
    pub fn reset_step(&mut self) {
        self.step_left_cm = 0.0;
        self.step_right_cm = 0.0;
        self.seeded = false;
    }

    /// Absolute left wheel travel since the last step reset, cm.
    pub fn step_left_cm(&self) -> f64 {
        self.step_left_cm
    }

    /// Absolute right wheel travel since the last step reset, cm.
    pub fn step_right_cm(&self) -> f64 {
        self.step_right_cm
    }

    /// Lifetime absolute left wheel travel, cm.
    pub fn total_left_cm(&self) -> f64 {
        self.total_left_cm
    }

    /// Lifetime absolute right wheel travel, cm.
    pub fn total_right_cm(&self) -> f64 {
        self.total_right_cm
    }
}

/// Shortest signed tick difference between two raw counter values.
///
/// Differences larger than half the modulus are interpreted as a wrap in the
/// opposite direction.
fn wrap_delta(current: u32, previous: u32) -> i32 {
    let mut diff = current as i64 - previous as i64;

    if diff > (ENCODER_MODULUS / 2) as i64 {
        diff -= ENCODER_MODULUS as i64;
    } else if diff < -((ENCODER_MODULUS / 2) as i64) {
        diff += ENCODER_MODULUS as i64;
    }

    diff as i32
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_delta_no_wrap() {
        assert_eq!(wrap_delta(105, 100), 5);
        assert_eq!(wrap_delta(100, 105), -5);
        assert_eq!(wrap_delta(100, 100), 0);
    }

    #[test]
    fn test_wrap_delta_forward_wrap() {
        // 9990 -> 5 is 15 ticks forward through the wrap.
        assert_eq!(wrap_delta(5, 9990), 15);
    }

    #[test]
    fn test_wrap_delta_reverse_wrap() {
        // 5 -> 9990 is 15 ticks backward through the wrap.
        assert_eq!(wrap_delta(9990, 5), -15);
    }

    #[test]
    fn test_first_update_seeds_baseline() {
        let mut odo = OdometryEstimator::new(50.0);
        let delta = odo.update(4321, 1234);
        assert_eq!(delta, DistanceDelta::default());
        assert_eq!(odo.step_left_cm(), 0.0);
    }

    #[test]
    fn test_distance_accumulation_across_wrap() {
        // 50 cm per 10 000 ticks gives 0.005 cm per tick.
        let mut odo = OdometryEstimator::new(50.0);
        odo.update(9900, 9900);

        for i in 1..=4u32 {
            odo.update((9900 + i * 100) % ENCODER_MODULUS, (9900 + i * 100) % ENCODER_MODULUS);
        }

        // 400 ticks of forward travel on each wheel.
        assert!((odo.step_left_cm() - 2.0).abs() < 1e-9);
        assert!((odo.step_right_cm() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_reverse_travel_accumulates_positive() {
        let mut odo = OdometryEstimator::new(50.0);
        odo.update(100, 100);
        let delta = odo.update(50, 50);

        assert!(delta.left_cm < 0.0);
        assert!(odo.step_left_cm() > 0.0);
    }

    #[test]
    fn test_reset_step_reseeds_baseline() {
        let mut odo = OdometryEstimator::new(50.0);
        odo.update(0, 0);
        odo.update(1000, 1000);
        assert!(odo.step_left_cm() > 0.0);

        odo.reset_step();
        assert_eq!(odo.step_left_cm(), 0.0);

        // Counter motion between steps must not leak into the new step.
        let delta = odo.update(5000, 5000);
        assert_eq!(delta, DistanceDelta::default());
        assert_eq!(odo.step_left_cm(), 0.0);

        odo.update(5200, 5200);
        assert!((odo.step_left_cm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_lifetime_totals_survive_reset() {
        let mut odo = OdometryEstimator::new(50.0);
        odo.update(0, 0);
        odo.update(1000, 1000);
        odo.reset_step();

        assert!((odo.total_left_cm() - 5.0).abs() < 1e-9);
    }
}
