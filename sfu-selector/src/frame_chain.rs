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

//! Integrity tracking for a single dependency chain.
//!
//! Every frame carries, per chain, the delta to the previous frame in that
//! chain. Following those deltas tells the forwarder whether a decode target
//! protected by the chain is still decodable. The check is tolerant: an
//! out-of-order or still-unknown predecessor does not break the chain, only
//! one the decision cache knows was dropped (or has already forgotten).

use log::debug;

use sfu_types::FrameDependencies;

use crate::decision_cache::{SelectorDecision, SelectorDecisionCache};

/// State of one chain from the dependency structure.
///
/// `broken` is sticky: once the chain is known to have a hole, only a frame
/// that restarts the chain (`chain_diff == 0`, i.e. a keyframe or recovery
/// frame) clears it.
#[derive(Debug)]
pub struct FrameChain {
    chain_index: usize,
    prev_frame_in_chain: Option<u64>,
    active: bool,
    broken: bool,
    updating_active: bool,
    active_accumulator: bool,
}

impl FrameChain {
    #[must_use]
    pub fn new(chain_index: usize) -> Self {
        Self {
            chain_index,
            prev_frame_in_chain: None,
            // not anchored until a chain restart is seen
            broken: true,
            active: true,
            updating_active: false,
            active_accumulator: false,
        }
    }

    #[must_use]
    pub fn chain_index(&self) -> usize {
        self.chain_index
    }

    #[must_use]
    pub fn broken(&self) -> bool {
        self.broken
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.active
    }

    /// Feed one frame's chain information.
    pub fn on_frame(&mut self, efn: u64, fd: &FrameDependencies, decisions: &SelectorDecisionCache) {
        if !self.active {
            return;
        }

        let Some(&chain_diff) = fd.chain_diffs.get(self.chain_index) else {
            debug!(
                "frame {efn} carries {} chain diffs, chain {} not present",
                fd.chain_diffs.len(),
                self.chain_index
            );
            return;
        };

        if chain_diff == 0 {
            // the frame (re)starts the chain
            self.broken = false;
            self.prev_frame_in_chain = Some(efn);
            return;
        }

        if self.broken {
            return;
        }

        let declared_prev = efn.saturating_sub(u64::from(chain_diff));
        let matches_tracked = self.prev_frame_in_chain == Some(declared_prev);
        if !matches_tracked {
            // The declared predecessor is not the last chain frame we saw;
            // it is fine as long as we know it went downstream.
            match decisions.get_decision(declared_prev) {
                Ok(SelectorDecision::Forwarded) | Ok(SelectorDecision::Unknown) => {}
                Ok(SelectorDecision::Dropped) => {
                    debug!(
                        "chain {} broken: frame {efn} depends on dropped frame {declared_prev}",
                        self.chain_index
                    );
                    self.broken = true;
                    return;
                }
                Err(err) => {
                    debug!(
                        "chain {} broken: predecessor of frame {efn} unavailable: {err}",
                        self.chain_index
                    );
                    self.broken = true;
                    return;
                }
            }
        }

        // Track the newest known chain member; late frames must not move it
        // backwards.
        if self
            .prev_frame_in_chain
            .map_or(true, |prev| declared_prev > prev)
        {
            self.prev_frame_in_chain = Some(declared_prev);
        }
    }

    /// Start a round of active-flag recomputation across decode targets.
    ///
    /// Between `begin_update_active` and [`end_update_active`](Self::end_update_active),
    /// each protecting decode target reports its own activity via
    /// [`update_active`](Self::update_active); the chain is active when any
    /// of them is.
    pub fn begin_update_active(&mut self) {
        self.updating_active = true;
        self.active_accumulator = false;
    }

    pub fn update_active(&mut self, target_active: bool) {
        if self.updating_active {
            self.active_accumulator |= target_active;
        }
    }

    pub fn end_update_active(&mut self) {
        if !self.updating_active {
            return;
        }
        self.updating_active = false;

        let was_active = self.active;
        self.active = self.active_accumulator;
        if self.active && !was_active {
            // The chain was not being followed while inactive; require a
            // restart before trusting it again.
            debug!("chain {} reactivated, waiting for restart", self.chain_index);
            self.broken = true;
            self.prev_frame_in_chain = None;
        }
    }
}
