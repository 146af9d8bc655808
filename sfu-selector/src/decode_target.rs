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

//! One decode target of the current dependency structure.

use sfu_types::{Dti, FrameDependencies, VideoLayer};

use crate::error::{Result, SelectorError};
use crate::frame_chain::FrameChain;

/// The outcome of inspecting one frame against a decode target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInspection {
    pub dti: Dti,
    /// Whether the target itself is currently usable: active and, when a
    /// chain protects it, that chain unbroken.
    pub target_valid: bool,
}

/// A decode target with its protecting chain referenced by index into the
/// selector's chain arena. Chains and targets are rebuilt together on every
/// structure update, so the index can never dangle.
#[derive(Debug)]
pub struct DecodeTarget {
    target: usize,
    layer: VideoLayer,
    chain: Option<usize>,
    active: bool,
    last_valid: bool,
}

impl DecodeTarget {
    #[must_use]
    pub fn new(target: usize, layer: VideoLayer, chain: Option<usize>) -> Self {
        Self {
            target,
            layer,
            chain,
            // an attached structure implies all targets active until a
            // bitmask says otherwise
            active: true,
            last_valid: false,
        }
    }

    #[must_use]
    pub fn target(&self) -> usize {
        self.target
    }

    #[must_use]
    pub fn layer(&self) -> VideoLayer {
        self.layer
    }

    #[must_use]
    pub fn chain(&self) -> Option<usize> {
        self.chain
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.active
    }

    /// Verdict of the most recent [`on_frame`](Self::on_frame) inspection.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.last_valid
    }

    pub fn update_active(&mut self, bitmask: u32) {
        self.active = self.target < 32 && (bitmask >> self.target) & 1 == 1;
    }

    /// Inspect one frame: extract this target's DTI and compute validity.
    ///
    /// `chain` must be the chain this target references, resolved by the
    /// caller from its arena.
    pub fn on_frame(
        &mut self,
        fd: &FrameDependencies,
        chain: Option<&FrameChain>,
    ) -> Result<FrameInspection> {
        let dti = fd
            .decode_target_indications
            .get(self.target)
            .copied()
            .ok_or(SelectorError::DtiExtractionFailed {
                target: self.target,
                available: fd.decode_target_indications.len(),
            })?;

        let target_valid = self.active && chain.map_or(true, |c| !c.broken());
        self.last_valid = target_valid;
        Ok(FrameInspection { dti, target_valid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision_cache::SelectorDecisionCache;

    fn deps(dtis: Vec<Dti>) -> FrameDependencies {
        FrameDependencies {
            spatial_id: 0,
            temporal_id: 0,
            frame_diffs: vec![],
            decode_target_indications: dtis,
            chain_diffs: vec![0],
        }
    }

    #[test]
    fn test_dti_extraction() {
        let mut dt = DecodeTarget::new(1, VideoLayer::new(0, 1), None);
        let inspection = dt
            .on_frame(&deps(vec![Dti::Required, Dti::Switch]), None)
            .unwrap();
        assert_eq!(inspection.dti, Dti::Switch);
        assert!(inspection.target_valid);
        assert!(dt.valid());
    }

    #[test]
    fn test_missing_dti_fails() {
        let mut dt = DecodeTarget::new(3, VideoLayer::new(1, 0), None);
        let err = dt.on_frame(&deps(vec![Dti::Required]), None).unwrap_err();
        assert_eq!(
            err,
            SelectorError::DtiExtractionFailed {
                target: 3,
                available: 1,
            }
        );
    }

    #[test]
    fn test_update_active_from_bitmask() {
        let mut dt = DecodeTarget::new(2, VideoLayer::new(1, 0), None);
        assert!(dt.active());
        dt.update_active(0b011);
        assert!(!dt.active());
        dt.update_active(0b100);
        assert!(dt.active());
    }

    #[test]
    fn test_inactive_target_is_invalid() {
        let mut dt = DecodeTarget::new(0, VideoLayer::new(0, 0), None);
        dt.update_active(0);
        let inspection = dt.on_frame(&deps(vec![Dti::Required]), None).unwrap();
        assert!(!inspection.target_valid);
    }

    #[test]
    fn test_broken_chain_invalidates_target() {
        let decisions = SelectorDecisionCache::new(256, 80);
        let mut chain = FrameChain::new(0);
        let mut dt = DecodeTarget::new(0, VideoLayer::new(0, 0), Some(0));

        // chain starts unanchored, so the target is invalid
        let inspection = dt
            .on_frame(&deps(vec![Dti::Required]), Some(&chain))
            .unwrap();
        assert!(!inspection.target_valid);

        chain.on_frame(100, &deps(vec![Dti::Required]), &decisions);
        let inspection = dt
            .on_frame(&deps(vec![Dti::Required]), Some(&chain))
            .unwrap();
        assert!(inspection.target_valid);
    }
}
