//! Jittered delivery cadence.
//!
//! Each session draws a cadence slot `c` in `[1, period]` (seconds). A
//! non-urgent batch is due while the clock is within `tolerance` of a slot
//! center `c + k * period`. Because slots are drawn client-side and the
//! acceptance window is symmetric, delivery times across players spread out
//! instead of piling up on exact multiples of the period.

use rand::Rng;
use serde::Serialize;

use crate::config::{duration_millis, SyncConfig};
use crate::error::{Error, Result};
use crate::models::BatchPayload;

/// One acceptance window around a slot center (Unix ms)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CadenceWindow {
    pub center: i64,
    pub opens_at: i64,
    pub closes_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCadenceManager {
    slot: u32,
    period_ms: i64,
    tolerance_ms: i64,
}

impl BatchCadenceManager {
    /// Build a manager for an explicit slot.
    pub fn new(slot: u32, config: &SyncConfig) -> Result<Self> {
        let slot_count = config.slot_count();
        if !(1..=slot_count).contains(&slot) {
            return Err(Error::InvalidInput(format!(
                "cadence slot {slot} outside [1, {slot_count}]"
            )));
        }
        Ok(Self {
            slot,
            period_ms: duration_millis(config.cadence_period).max(1),
            tolerance_ms: duration_millis(config.cadence_tolerance),
        })
    }

    /// Draw a uniformly random slot for a new session.
    pub fn for_new_session(config: &SyncConfig) -> Self {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(config: &SyncConfig, rng: &mut R) -> Self {
        let slot = rng.gen_range(1..=config.slot_count().max(1));
        Self {
            slot,
            period_ms: duration_millis(config.cadence_period).max(1),
            tolerance_ms: duration_millis(config.cadence_tolerance),
        }
    }

    pub const fn slot(&self) -> u32 {
        self.slot
    }

    /// Urgent batches are always due; others only inside a cadence window.
    pub fn is_batch_due_for_delivery(&self, batch: &BatchPayload, now_ms: i64) -> bool {
        batch.urgent || self.is_window_open(now_ms)
    }

    pub fn is_window_open(&self, now_ms: i64) -> bool {
        self.distance_to_slot_center(now_ms) <= self.tolerance_ms
    }

    /// Earliest time at or after `now_ms` at which the window is open.
    pub fn next_window_opening(&self, now_ms: i64) -> i64 {
        if self.is_window_open(now_ms) {
            return now_ms;
        }
        let offset = self.offset_past_center(now_ms);
        let next_center = now_ms + (self.period_ms - offset);
        next_center - self.tolerance_ms
    }

    /// The `count` windows that are open at, or open after, `from_ms`.
    pub fn cadence_windows(&self, from_ms: i64, count: usize) -> Vec<CadenceWindow> {
        let previous_center = from_ms - self.offset_past_center(from_ms);
        let mut center = if from_ms <= previous_center + self.tolerance_ms {
            previous_center
        } else {
            previous_center + self.period_ms
        };

        let mut windows = Vec::with_capacity(count);
        for _ in 0..count {
            windows.push(CadenceWindow {
                center,
                opens_at: center - self.tolerance_ms,
                closes_at: center + self.tolerance_ms,
            });
            center += self.period_ms;
        }
        windows
    }

    fn slot_offset_ms(&self) -> i64 {
        i64::from(self.slot) * 1_000
    }

    /// Milliseconds elapsed since the most recent slot center.
    fn offset_past_center(&self, now_ms: i64) -> i64 {
        (now_ms - self.slot_offset_ms()).rem_euclid(self.period_ms)
    }

    fn distance_to_slot_center(&self, now_ms: i64) -> i64 {
        let offset = self.offset_past_center(now_ms);
        offset.min(self.period_ms - offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlayerId, SaveBatch, WeightClass};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn payload(urgent: bool) -> BatchPayload {
        let weight = if urgent {
            WeightClass::Critical
        } else {
            WeightClass::Slim
        };
        SaveBatch::new(PlayerId::new("p1"), 1, weight, 0).finalize(0)
    }

    fn manager(slot: u32) -> BatchCadenceManager {
        BatchCadenceManager::new(slot, &SyncConfig::default()).unwrap()
    }

    #[test]
    fn slot_three_window_examples() {
        let cadence = manager(3);
        let batch = payload(false);
        assert!(cadence.is_batch_due_for_delivery(&batch, 5_000));
        assert!(cadence.is_batch_due_for_delivery(&batch, 0));
        assert!(cadence.is_batch_due_for_delivery(&batch, 11_000));
        assert!(cadence.is_batch_due_for_delivery(&batch, 19_000));
        assert!(!cadence.is_batch_due_for_delivery(&batch, 20_000));
        assert!(!cadence.is_batch_due_for_delivery(&batch, 8_000));
    }

    #[test]
    fn urgent_batches_are_always_due() {
        let cadence = manager(3);
        let batch = payload(true);
        for now in (0..60_000).step_by(250) {
            assert!(cadence.is_batch_due_for_delivery(&batch, now));
        }
    }

    #[test]
    fn non_urgent_due_only_near_slot_boundaries() {
        let batch = payload(false);
        for slot in 1..=12 {
            let cadence = manager(slot);
            for now in (-30_000_i64..90_000).step_by(125) {
                let offset = (now - i64::from(slot) * 1_000).rem_euclid(12_000);
                let distance = offset.min(12_000 - offset);
                assert_eq!(
                    cadence.is_batch_due_for_delivery(&batch, now),
                    distance <= 4_000,
                    "slot {slot} at {now}"
                );
            }
        }
    }

    #[test]
    fn rejects_out_of_range_slots() {
        let config = SyncConfig::default();
        assert!(BatchCadenceManager::new(0, &config).is_err());
        assert!(BatchCadenceManager::new(13, &config).is_err());
        assert!(BatchCadenceManager::new(12, &config).is_ok());
    }

    #[test]
    fn random_slots_stay_in_range() {
        let config = SyncConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let slot = BatchCadenceManager::with_rng(&config, &mut rng).slot();
            assert!((1..=12).contains(&slot));
        }
    }

    #[test]
    fn next_window_opening_and_listing() {
        let cadence = manager(3);
        assert_eq!(cadence.next_window_opening(5_000), 5_000);
        assert_eq!(cadence.next_window_opening(8_000), 11_000);
        assert_eq!(cadence.next_window_opening(20_000), 23_000);

        let windows = cadence.cadence_windows(8_000, 2);
        assert_eq!(
            windows,
            vec![
                CadenceWindow {
                    center: 15_000,
                    opens_at: 11_000,
                    closes_at: 19_000,
                },
                CadenceWindow {
                    center: 27_000,
                    opens_at: 23_000,
                    closes_at: 31_000,
                },
            ]
        );
        assert_eq!(cadence.cadence_windows(5_000, 1)[0].center, 3_000);
    }
}
