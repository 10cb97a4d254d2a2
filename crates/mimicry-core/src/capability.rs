use serde::{Deserialize, Serialize};

use crate::time::SimTime;

/// Cooldown gate shared by weapons, items, and skills.
///
/// Activation logic lives elsewhere; every activation must pass
/// [`CapabilitySlot::can_use`] and then call [`CapabilitySlot::mark_used`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySlot {
    pub next_ready_time: SimTime,
    pub cooldown_duration: SimTime,
}

impl CapabilitySlot {
    /// A slot that is ready immediately.
    pub fn new(cooldown_duration: SimTime) -> Self {
        Self {
            next_ready_time: 0.0,
            cooldown_duration: cooldown_duration.max(0.0),
        }
    }

    pub fn can_use(&self, now: SimTime) -> bool {
        now >= self.next_ready_time
    }

    pub fn mark_used(&mut self, now: SimTime) {
        self.next_ready_time = now + self.cooldown_duration;
    }

    /// Remaining cooldown as a fraction: 1 right after use, 0 once ready.
    pub fn cooldown_ratio(&self, now: SimTime) -> f32 {
        if self.cooldown_duration <= 0.0 {
            return 0.0;
        }
        ((self.next_ready_time - now) / self.cooldown_duration).clamp(0.0, 1.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fresh_slot_is_ready() {
        let slot = CapabilitySlot::new(2.0);
        assert!(slot.can_use(0.0));
        assert_eq!(slot.cooldown_ratio(0.0), 0.0);
    }

    #[test]
    fn used_slot_blocks_until_cooldown_elapses() {
        let mut slot = CapabilitySlot::new(2.0);
        slot.mark_used(10.0);
        assert!(!slot.can_use(10.0));
        assert!(!slot.can_use(11.999));
        assert!(slot.can_use(12.0));
    }

    #[test]
    fn zero_cooldown_never_blocks() {
        let mut slot = CapabilitySlot::new(0.0);
        slot.mark_used(5.0);
        assert!(slot.can_use(5.0));
        assert_eq!(slot.cooldown_ratio(5.0), 0.0);
    }

    #[test]
    fn negative_cooldown_is_clamped() {
        let slot = CapabilitySlot::new(-3.0);
        assert_eq!(slot.cooldown_duration, 0.0);
    }

    proptest! {
        #[test]
        fn gate_and_ratio_follow_cooldown(
            cooldown in 0.05f64..30.0,
            used_at in 0.0f64..1000.0,
            frac in 0.0f64..1.0,
        ) {
            let mut slot = CapabilitySlot::new(cooldown);
            slot.mark_used(used_at);

            prop_assert!(!slot.can_use(used_at));
            prop_assert!((slot.cooldown_ratio(used_at) - 1.0).abs() < 1e-6);

            let mid = used_at + cooldown * frac * 0.999;
            prop_assert!(!slot.can_use(mid));
            let later = used_at + cooldown * (frac * 0.999 + 0.0005);
            prop_assert!(slot.cooldown_ratio(later) <= slot.cooldown_ratio(mid) + 1e-6);

            prop_assert!(slot.can_use(used_at + cooldown));
            prop_assert_eq!(slot.cooldown_ratio(used_at + cooldown), 0.0);
        }
    }
}
