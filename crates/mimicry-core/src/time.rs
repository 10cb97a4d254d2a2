use serde::{Deserialize, Serialize};

/// Seconds on the authoritative clock since the round started.
pub type SimTime = f64;

/// Authoritative clock. Time advances only through explicit ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimClock {
    now: SimTime,
    tick: u32,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Advance by `dt` seconds. Non-finite or negative steps are ignored.
    pub fn advance(&mut self, dt: f32) -> SimTime {
        if dt.is_finite() && dt > 0.0 {
            self.now += f64::from(dt);
            self.tick = self.tick.wrapping_add(1);
        }
        self.now
    }
}
