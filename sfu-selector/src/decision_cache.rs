/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Sliding-window cache of per-frame forwarding decisions.
//!
//! Chain integrity and decodability checks both need to know what happened
//! to earlier frames. The cache answers that for a bounded window behind the
//! highest decided frame; a decision, once written, is stable until the
//! window slides past it.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SelectorError};

/// The recorded fate of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorDecision {
    /// Inside the window, but no decision recorded.
    Unknown,
    Forwarded,
    Dropped,
}

/// Ring of per-frame decisions indexed by extended frame number.
///
/// Capacity is `size` slots; frames more than `size - margin` behind the
/// highest decided frame are reported as too old even though their slot has
/// not been overwritten yet. The margin keeps a freshly advanced window from
/// flapping between usable and too-old for frames near the trailing edge.
#[derive(Debug)]
pub struct SelectorDecisionCache {
    slots: Vec<SelectorDecision>,
    margin: u64,
    highest: u64,
    initialized: bool,
}

impl SelectorDecisionCache {
    #[must_use]
    pub fn new(size: usize, margin: usize) -> Self {
        debug_assert!(margin < size);
        Self {
            slots: vec![SelectorDecision::Unknown; size],
            margin: margin as u64,
            highest: 0,
            initialized: false,
        }
    }

    /// Record that `efn` was forwarded.
    pub fn add_forwarded(&mut self, efn: u64) -> Result<()> {
        self.add(efn, SelectorDecision::Forwarded)
    }

    /// Record that `efn` was dropped.
    pub fn add_dropped(&mut self, efn: u64) -> Result<()> {
        self.add(efn, SelectorDecision::Dropped)
    }

    /// Look up the decision for `efn`.
    ///
    /// Frames ahead of the window or inside it without a recorded decision
    /// read as [`SelectorDecision::Unknown`]; frames behind it fail with
    /// [`SelectorError::DecisionTooOld`].
    pub fn get_decision(&self, efn: u64) -> Result<SelectorDecision> {
        if !self.initialized || efn > self.highest {
            return Ok(SelectorDecision::Unknown);
        }
        if self.is_too_old(efn) {
            return Err(SelectorError::DecisionTooOld(efn));
        }
        Ok(self.slots[self.slot(efn)])
    }

    /// Highest frame number a decision was recorded for.
    #[must_use]
    pub fn highest(&self) -> u64 {
        self.highest
    }

    fn add(&mut self, efn: u64, decision: SelectorDecision) -> Result<()> {
        if !self.initialized {
            self.highest = efn;
            self.initialized = true;
            let slot = self.slot(efn);
            self.slots[slot] = decision;
            return Ok(());
        }

        if efn > self.highest {
            self.advance_to(efn);
            let slot = self.slot(efn);
            self.slots[slot] = decision;
            return Ok(());
        }

        if self.is_too_old(efn) {
            return Err(SelectorError::DecisionTooOld(efn));
        }

        let slot = self.slot(efn);
        match self.slots[slot] {
            SelectorDecision::Unknown => {
                self.slots[slot] = decision;
                Ok(())
            }
            existing if existing == decision => Ok(()),
            existing => {
                // first write wins; decisions must stay stable
                debug!("decision conflict for frame {efn}: {existing:?} stands over {decision:?}");
                Err(SelectorError::DecisionConflict { efn, existing })
            }
        }
    }

    /// Slide the window forward, clearing every slot it rolls over.
    fn advance_to(&mut self, efn: u64) {
        let gap = efn - self.highest;
        if gap >= self.slots.len() as u64 {
            self.slots.fill(SelectorDecision::Unknown);
        } else {
            for stale in (self.highest + 1)..=efn {
                let slot = self.slot(stale);
                self.slots[slot] = SelectorDecision::Unknown;
            }
        }
        self.highest = efn;
    }

    fn is_too_old(&self, efn: u64) -> bool {
        let floor = (self.highest + self.margin).saturating_sub(self.slots.len() as u64);
        efn < floor
    }

    fn slot(&self, efn: u64) -> usize {
        (efn % self.slots.len() as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_before_any_decision() {
        let cache = SelectorDecisionCache::new(256, 80);
        assert_eq!(cache.get_decision(1000), Ok(SelectorDecision::Unknown));
    }

    #[test]
    fn test_decision_is_stable() {
        let mut cache = SelectorDecisionCache::new(256, 80);
        cache.add_forwarded(100).unwrap();
        assert_eq!(cache.get_decision(100), Ok(SelectorDecision::Forwarded));

        // the opposite kind is rejected, the stored decision stands
        assert_eq!(
            cache.add_dropped(100),
            Err(SelectorError::DecisionConflict {
                efn: 100,
                existing: SelectorDecision::Forwarded,
            })
        );
        assert_eq!(cache.get_decision(100), Ok(SelectorDecision::Forwarded));

        // re-adding the same kind is idempotent
        cache.add_forwarded(100).unwrap();
        assert_eq!(cache.get_decision(100), Ok(SelectorDecision::Forwarded));
    }

    #[test]
    fn test_future_frames_read_unknown() {
        let mut cache = SelectorDecisionCache::new(256, 80);
        cache.add_forwarded(100).unwrap();
        assert_eq!(cache.get_decision(101), Ok(SelectorDecision::Unknown));
    }

    #[test]
    fn test_window_slides_and_evicts() {
        let mut cache = SelectorDecisionCache::new(256, 80);
        cache.add_dropped(100).unwrap();
        cache.add_forwarded(100 + 255).unwrap();

        // 100 is still inside the ring but behind the margin
        assert_eq!(
            cache.get_decision(100),
            Err(SelectorError::DecisionTooOld(100))
        );
        // and a late write can no longer take effect
        assert_eq!(
            cache.add_forwarded(100),
            Err(SelectorError::DecisionTooOld(100))
        );
    }

    #[test]
    fn test_margin_bounds() {
        let mut cache = SelectorDecisionCache::new(256, 80);
        cache.add_forwarded(1000).unwrap();

        // window floor is highest - (size - margin)
        let floor = 1000 - (256 - 80);
        assert!(cache.get_decision(floor as u64).is_ok());
        assert_eq!(
            cache.get_decision(floor as u64 - 1),
            Err(SelectorError::DecisionTooOld(floor as u64 - 1))
        );
    }

    #[test]
    fn test_large_jump_clears_ring() {
        let mut cache = SelectorDecisionCache::new(256, 80);
        cache.add_forwarded(100).unwrap();
        cache.add_forwarded(100_000).unwrap();

        // the stale entry's slot was recycled, not resurrected
        assert_eq!(
            cache.get_decision(100_000 - 100),
            Ok(SelectorDecision::Unknown)
        );
        assert_eq!(cache.get_decision(100_000), Ok(SelectorDecision::Forwarded));
    }

    #[test]
    fn test_intermediate_frames_unknown_after_advance() {
        let mut cache = SelectorDecisionCache::new(256, 80);
        cache.add_forwarded(10).unwrap();
        cache.add_forwarded(20).unwrap();
        for efn in 11..20 {
            assert_eq!(cache.get_decision(efn), Ok(SelectorDecision::Unknown));
        }
    }
}
