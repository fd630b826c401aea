//! The epsilon (debounce) function and the interval-based "forward the
//! most recent value" timer.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// A debounce filter, owned by an [`super::EventCell`] or a subscription.
/// `interval_ms = None` stands in for the wire configuration's `-1`
/// ("never interval-forward") sentinel.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DebounceFilter {
    pub on_change: bool,
    pub on_change_resets_interval: bool,
    pub interval_ms: Option<u64>,
    pub ignore: BTreeMap<usize, u8>,
    pub send_current_value_after: bool,
}

impl DebounceFilter {
    pub fn from_config(config: &crate::config::DebounceConfig) -> Self {
        Self {
            on_change: config.on_change,
            on_change_resets_interval: config.on_change_resets_interval,
            interval_ms: config.interval_ms,
            ignore: config.ignore.clone(),
            send_current_value_after: config.send_current_value_after,
        }
    }

    /// Byte-wise comparison honoring the `ignore` mask, including the
    /// differing-length rule.
    fn changed(&self, old: &[u8], new: &[u8]) -> bool {
        let common = old.len().min(new.len());
        for k in 0..common {
            let mask = self.ignore.get(&k).copied().unwrap_or(0);
            if old[k] & !mask != new[k] & !mask {
                return true;
            }
        }
        if old.len() == new.len() {
            return false;
        }
        // Lengths differ: "changed" unless every differing trailing byte is
        // fully masked by `ignore` (mask == 0xFF).
        let (shorter, longer) = if old.len() < new.len() { (old, new) } else { (new, old) };
        for k in shorter.len()..longer.len() {
            let mask = self.ignore.get(&k).copied().unwrap_or(0);
            if mask != 0xFF {
                return true;
            }
        }
        false
    }

    /// The full forwarding decision: whether `new` should be forwarded right now,
    /// given the previous payload (if any), the last time a value was
    /// forwarded, and the current time.
    pub fn should_forward(
        &self,
        old: Option<&[u8]>,
        new: &[u8],
        last_forwarded: Option<Instant>,
        now: Instant,
    ) -> Decision {
        let changed = match old {
            Some(old) => self.changed(old, new),
            None => true,
        };

        let suppressed_by_on_change = self.on_change && !changed;

        let elapsed = match (self.interval_ms, last_forwarded) {
            (Some(interval_ms), Some(last)) => now.duration_since(last) >= Duration::from_millis(interval_ms),
            (Some(_), None) => true,
            (None, _) => false,
        };

        let forward = if suppressed_by_on_change {
            elapsed
        } else {
            changed || elapsed
        };

        let resets_interval_timer = !self.on_change_resets_interval || changed || last_forwarded.is_none();

        Decision {
            forward,
            resets_interval_timer: forward && resets_interval_timer,
        }
    }
}

/// A filter with no suppression at all: every `set_payload` call forwards.
pub fn unfiltered() -> DebounceFilter {
    DebounceFilter {
        on_change: false,
        on_change_resets_interval: false,
        interval_ms: None,
        ignore: BTreeMap::new(),
        send_current_value_after: false,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub forward: bool,
    pub resets_interval_timer: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_filter_always_forwards() {
        let filter = unfiltered();
        let now = Instant::now();
        let decision = filter.should_forward(Some(&[1, 2, 3]), &[1, 2, 3], Some(now), now);
        assert!(decision.forward);
    }

    #[test]
    fn ignore_mask_suppresses_masked_byte_change() {
        // Scenario 3: on_change=true, interval=never, ignore={0: 0xFF}
        let mut ignore = BTreeMap::new();
        ignore.insert(0, 0xFFu8);
        let filter = DebounceFilter {
            on_change: true,
            on_change_resets_interval: false,
            interval_ms: None,
            ignore,
            send_current_value_after: false,
        };
        let now = Instant::now();
        let d1 = filter.should_forward(Some(&[0xAA, 0x01]), &[0xBB, 0x01], Some(now), now);
        assert!(!d1.forward, "byte 0 ignored, byte 1 equal -> suppressed");

        let d2 = filter.should_forward(Some(&[0xBB, 0x01]), &[0xCC, 0x02], Some(now), now);
        assert!(d2.forward, "byte 1 differs -> forwarded");
    }

    #[test]
    fn interval_based_forwarding() {
        // Scenario 4: on_change=false, interval_ms=100
        let filter = DebounceFilter {
            on_change: false,
            on_change_resets_interval: false,
            interval_ms: Some(100),
            ignore: BTreeMap::new(),
            send_current_value_after: false,
        };
        let t0 = Instant::now();
        // First call: no last_forwarded yet -> elapsed is true, so forwards.
        let d0 = filter.should_forward(None, &[1], None, t0);
        assert!(d0.forward);

        let t10 = t0 + Duration::from_millis(10);
        let d10 = filter.should_forward(Some(&[1]), &[2], Some(t0), t10);
        assert!(!d10.forward, "within interval and on_change=false -> suppressed");

        let t50 = t0 + Duration::from_millis(50);
        let d50 = filter.should_forward(Some(&[2]), &[3], Some(t0), t50);
        assert!(!d50.forward);

        let t100 = t0 + Duration::from_millis(100);
        let d100 = filter.should_forward(Some(&[3]), &[3], Some(t0), t100);
        assert!(d100.forward, "interval elapsed -> timer-driven forward");
    }

    #[test]
    fn differing_length_with_partial_mask_still_changed() {
        let mut ignore = BTreeMap::new();
        ignore.insert(2, 0x0Fu8); // not a full mask
        let filter = DebounceFilter {
            on_change: true,
            on_change_resets_interval: false,
            interval_ms: None,
            ignore,
            send_current_value_after: false,
        };
        let now = Instant::now();
        let decision = filter.should_forward(Some(&[1, 2]), &[1, 2, 9], Some(now), now);
        assert!(decision.forward);
    }
}
