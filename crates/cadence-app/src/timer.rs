//! Frame timing with variable or fixed time steps.

use std::time::{Duration, Instant};

/// Timer ticks per second (100 ns resolution).
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Deltas above this are clamped, e.g. after a debugger pause.
const MAX_DELTA_TICKS: u64 = TICKS_PER_SECOND / 10;

/// Fixed steps within this distance of the target snap to it (1/4 ms).
const SNAP_TICKS: u64 = TICKS_PER_SECOND / 4000;

#[allow(clippy::cast_precision_loss)]
pub fn ticks_to_seconds(ticks: u64) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn seconds_to_ticks(seconds: f64) -> u64 {
    (seconds * TICKS_PER_SECOND as f64) as u64
}

fn duration_to_ticks(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos() / 100).unwrap_or(u64::MAX)
}

/// Drives `update` once per frame, or a whole number of times per frame at
/// a fixed rate.
#[derive(Debug, Clone)]
pub struct StepTimer {
    last_time: Instant,

    elapsed_ticks: u64,
    total_ticks: u64,
    left_over_ticks: u64,

    frame_count: u32,
    frames_per_second: u32,
    frames_this_second: u32,
    second_counter: u64,

    fixed_time_step: bool,
    target_elapsed_ticks: u64,
}

impl Default for StepTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl StepTimer {
    pub fn new() -> Self {
        Self {
            last_time: Instant::now(),
            elapsed_ticks: 0,
            total_ticks: 0,
            left_over_ticks: 0,
            frame_count: 0,
            frames_per_second: 0,
            frames_this_second: 0,
            second_counter: 0,
            fixed_time_step: false,
            // 60 updates per second
            target_elapsed_ticks: TICKS_PER_SECOND / 60,
        }
    }

    /// Ticks of the last update.
    pub const fn elapsed_ticks(&self) -> u64 {
        self.elapsed_ticks
    }

    pub fn elapsed_seconds(&self) -> f64 {
        ticks_to_seconds(self.elapsed_ticks)
    }

    pub const fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    pub fn total_seconds(&self) -> f64 {
        ticks_to_seconds(self.total_ticks)
    }

    /// Number of updates since start.
    pub const fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub const fn frames_per_second(&self) -> u32 {
        self.frames_per_second
    }

    pub const fn is_fixed_time_step(&self) -> bool {
        self.fixed_time_step
    }

    pub fn set_fixed_time_step(&mut self, fixed: bool) {
        self.fixed_time_step = fixed;
    }

    pub fn set_target_elapsed_ticks(&mut self, ticks: u64) {
        self.target_elapsed_ticks = ticks;
    }

    pub fn set_target_elapsed_seconds(&mut self, seconds: f64) {
        self.target_elapsed_ticks = seconds_to_ticks(seconds);
    }

    /// Restart timing after an intentional stall (e.g. a blocking load), so
    /// the fixed-step logic doesn't try to catch up.
    pub fn reset_elapsed_time(&mut self) {
        self.last_time = Instant::now();
        self.left_over_ticks = 0;
        self.frames_per_second = 0;
        self.frames_this_second = 0;
        self.second_counter = 0;
    }

    /// Advance by the wall-clock time since the previous tick.
    pub fn tick<F: FnMut(&Self)>(&mut self, update: F) {
        let now = Instant::now();
        let delta = now.saturating_duration_since(self.last_time);
        self.last_time = now;
        self.advance(duration_to_ticks(delta), update);
    }

    /// Advance by `delta_ticks`.
    pub fn advance<F: FnMut(&Self)>(&mut self, delta_ticks: u64, mut update: F) {
        self.second_counter += delta_ticks;
        let mut delta = delta_ticks.min(MAX_DELTA_TICKS);

        let last_frame_count = self.frame_count;

        if self.fixed_time_step && self.target_elapsed_ticks > 0 {
            if delta.abs_diff(self.target_elapsed_ticks) < SNAP_TICKS {
                delta = self.target_elapsed_ticks;
            }

            self.left_over_ticks += delta;

            while self.left_over_ticks >= self.target_elapsed_ticks {
                self.elapsed_ticks = self.target_elapsed_ticks;
                self.total_ticks += self.target_elapsed_ticks;
                self.left_over_ticks -= self.target_elapsed_ticks;
                self.frame_count = self.frame_count.wrapping_add(1);

                update(self);
            }
        } else {
            self.elapsed_ticks = delta;
            self.total_ticks += delta;
            self.left_over_ticks = 0;
            self.frame_count = self.frame_count.wrapping_add(1);

            update(self);
        }

        if self.frame_count != last_frame_count {
            self.frames_this_second += 1;
        }

        if self.second_counter >= TICKS_PER_SECOND {
            self.frames_per_second = self.frames_this_second;
            self.frames_this_second = 0;
            self.second_counter %= TICKS_PER_SECOND;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn variable_step_runs_update_once() {
        let mut timer = StepTimer::new();
        let mut calls = 0;
        timer.advance(TICKS_PER_SECOND / 100, |_| calls += 1);

        assert_eq!(calls, 1);
        assert_eq!(timer.frame_count(), 1);
        assert_relative_eq!(timer.elapsed_seconds(), 0.01);
    }

    #[test]
    fn delta_is_clamped_to_a_tenth_of_a_second() {
        let mut timer = StepTimer::new();
        timer.advance(5 * TICKS_PER_SECOND, |_| {});

        assert_eq!(timer.elapsed_ticks(), TICKS_PER_SECOND / 10);
        assert_relative_eq!(timer.total_seconds(), 0.1);
    }

    #[test]
    fn fixed_step_snaps_near_target() {
        let mut timer = StepTimer::new();
        timer.set_fixed_time_step(true);
        timer.set_target_elapsed_ticks(TICKS_PER_SECOND / 60);

        // 59.94 Hz frame, 100 µs longer than the target
        let mut calls = 0;
        timer.advance(TICKS_PER_SECOND / 60 + 1_000, |_| calls += 1);

        assert_eq!(calls, 1);
        assert_eq!(timer.total_ticks(), TICKS_PER_SECOND / 60);
    }

    #[test]
    fn fixed_step_catches_up_and_carries_remainder() {
        let mut timer = StepTimer::new();
        timer.set_fixed_time_step(true);
        timer.set_target_elapsed_seconds(0.01);

        let mut elapsed = Vec::new();
        timer.advance(seconds_to_ticks(0.035), |t| elapsed.push(t.elapsed_ticks()));

        assert_eq!(elapsed, vec![seconds_to_ticks(0.01); 3]);
        assert_eq!(timer.frame_count(), 3);

        // The 5 ms remainder plus 5 ms completes one more step.
        let mut calls = 0;
        timer.advance(seconds_to_ticks(0.005), |_| calls += 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn fixed_step_may_skip_update() {
        let mut timer = StepTimer::new();
        timer.set_fixed_time_step(true);
        timer.set_target_elapsed_seconds(0.05);

        let mut calls = 0;
        timer.advance(seconds_to_ticks(0.01), |_| calls += 1);
        assert_eq!(calls, 0);
        assert_eq!(timer.frame_count(), 0);
    }

    #[test]
    fn frames_per_second_updates_each_second() {
        let mut timer = StepTimer::new();
        for _ in 0..9 {
            timer.advance(TICKS_PER_SECOND / 10, |_| {});
        }
        assert_eq!(timer.frames_per_second(), 0);

        timer.advance(TICKS_PER_SECOND / 10, |_| {});
        assert_eq!(timer.frames_per_second(), 10);
    }
}
