// ── Classic Bluetooth detection ──
//
// Classic devices do not advertise continuously, so a single negative
// inquiry does not mean the device is gone. The tracker remembers the
// last positive detect per MAC and keeps answering "present" for a
// configured window afterwards.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hearth_core::MacAddress;
use tracing::debug;

use crate::error::BleError;

/// Contract the external classic HCI driver fulfils. `detect` runs a
/// targeted inquiry for one address; `scan` runs a general inquiry and
/// returns discovered addresses with their names.
#[async_trait]
pub trait ClassicProbe: Send + Sync + 'static {
    async fn detect(&self, adapter: &str, mac: MacAddress) -> Result<bool, BleError>;

    async fn scan(&self, adapter: &str) -> Result<HashMap<MacAddress, String>, BleError>;
}

/// Probe for deployments without a classic driver: detects nothing.
pub struct NullProbe;

#[async_trait]
impl ClassicProbe for NullProbe {
    async fn detect(&self, _adapter: &str, _mac: MacAddress) -> Result<bool, BleError> {
        Ok(false)
    }

    async fn scan(&self, _adapter: &str) -> Result<HashMap<MacAddress, String>, BleError> {
        Ok(HashMap::new())
    }
}

// ── AvailabilityTracker ─────────────────────────────────────────────

/// Map of last positive detects with the artificial-availability rule.
pub(crate) struct AvailabilityTracker {
    window: Duration,
    seen: Mutex<HashMap<MacAddress, Instant>>,
}

impl AvailabilityTracker {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Combine the driver's answer with the recorded history.
    pub(crate) fn judge(&self, mac: MacAddress, detected: bool) -> bool {
        self.judge_at(mac, detected, Instant::now())
    }

    fn judge_at(&self, mac: MacAddress, detected: bool, now: Instant) -> bool {
        let mut seen = self.seen.lock().expect("classic lock poisoned");

        let Some(last_positive) = seen.get_mut(&mac) else {
            if detected {
                seen.insert(mac, now);
            }
            return detected;
        };

        if detected {
            *last_positive = now;
            return true;
        }

        let elapsed = now.saturating_duration_since(*last_positive);
        if elapsed <= self.window {
            debug!(
                %mac,
                elapsed_secs = elapsed.as_secs(),
                "missing classic device declared available from recent detect"
            );
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        MacAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66])
    }

    #[test]
    fn never_seen_device_passes_driver_answer_through() {
        let tracker = AvailabilityTracker::new(Duration::from_secs(30));
        let now = Instant::now();

        assert!(!tracker.judge_at(mac(), false, now));
        assert!(tracker.judge_at(mac(), true, now));
    }

    #[test]
    fn negative_detect_inside_window_is_still_available() {
        let tracker = AvailabilityTracker::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert!(tracker.judge_at(mac(), true, t0));
        assert!(tracker.judge_at(mac(), false, t0 + Duration::from_secs(10)));
        assert!(!tracker.judge_at(mac(), false, t0 + Duration::from_secs(40)));
    }

    #[test]
    fn positive_detect_refreshes_the_window() {
        let tracker = AvailabilityTracker::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert!(tracker.judge_at(mac(), true, t0));
        assert!(tracker.judge_at(mac(), true, t0 + Duration::from_secs(25)));
        // 50s after t0 but only 25s after the refresh.
        assert!(tracker.judge_at(mac(), false, t0 + Duration::from_secs(50)));
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let tracker = AvailabilityTracker::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert!(tracker.judge_at(mac(), true, t0));
        assert!(tracker.judge_at(mac(), false, t0 + Duration::from_secs(30)));
        assert!(!tracker.judge_at(
            mac(),
            false,
            t0 + Duration::from_secs(30) + Duration::from_millis(1)
        ));
    }
}
