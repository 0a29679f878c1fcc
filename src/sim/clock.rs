use crate::model::units::{TIMESLOT_SECONDS, timeslot_from_seconds};

/// A simulation clock counting seconds over a half-open interval.
///
/// # Examples
///
/// ```
/// use ev_charge_sim::sim::clock::Clock;
///
/// let mut clock = Clock::new(898, 901);
/// let mut seconds = Vec::new();
///
/// clock.run(|t| seconds.push(t));
/// assert_eq!(seconds, vec![898, 899, 900]);
/// ```
#[derive(Debug, Clone)]
pub struct Clock {
    /// Next second to hand out
    current: i64,
    /// First second past the end
    end: i64,
}

impl Clock {
    /// Creates a clock running from `start` (inclusive) to `end` (exclusive).
    pub fn new(start: i64, end: i64) -> Self {
        Self { current: start, end }
    }

    /// Advances the clock by one second.
    ///
    /// # Returns
    ///
    /// * `Some(t)` - The second before advancing
    /// * `None` - If the clock has reached its end
    pub fn tick(&mut self) -> Option<i64> {
        if self.current < self.end {
            let t = self.current;
            self.current += 1;
            Some(t)
        } else {
            None
        }
    }

    /// Runs a function for each remaining second.
    pub fn run(&mut self, mut f: impl FnMut(i64)) {
        while let Some(t) = self.tick() {
            f(t);
        }
    }

    /// Timeslot the next tick falls in.
    pub fn timeslot(&self) -> usize {
        timeslot_from_seconds(self.current)
    }

    pub fn remaining(&self) -> i64 {
        (self.end - self.current).max(0)
    }

    /// True if `t` is the last second of its timeslot.
    pub fn is_timeslot_end(t: i64) -> bool {
        (t + 1) % TIMESLOT_SECONDS == 0
    }
}
