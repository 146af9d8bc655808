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

//! Layer selection driven by the AV1 Dependency Descriptor.
//!
//! Per packet, the selector walks the stream's decode targets from the
//! highest layer down, picks the first one that is active, chain-intact and
//! at or below the subscriber's target, and checks that every frame the
//! current frame references actually went downstream. Decisions are recorded
//! per frame so that later packets of the same frame, and later frames
//! referencing it, see a stable verdict.

use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::RwLock;

use sfu_types::{
    active_decode_target_bitmask, marshal_dependency_descriptor, DecodeTargetLayer, Dti,
    ExtPacket, FrameDependencyStructure, VideoLayer,
};

use crate::config::SelectorConfig;
use crate::decision_cache::{SelectorDecision, SelectorDecisionCache};
use crate::decode_target::DecodeTarget;
use crate::error::SelectorError;
use crate::frame_chain::FrameChain;
use crate::selector::{Base, SelectorResult, SelectorStats, VideoLayerSelector};

enum TargetScan {
    Chosen { layer: VideoLayer, dti: Dti },
    NoTarget,
    Failed(SelectorError),
}

/// Selector for streams carrying dependency descriptors.
///
/// `select` and `rollback` run on the track's packet pipeline; `check_sync`
/// may run on a control thread, which is why the decode target slice sits
/// behind a read-write lock. Chains, the decision cache and the layer state
/// are only ever touched from the selection path.
pub struct DependencyDescriptorSelector {
    base: Base,
    config: SelectorConfig,
    decisions: SelectorDecisionCache,
    structure: Option<Arc<FrameDependencyStructure>>,
    chains: Vec<FrameChain>,
    decode_targets: RwLock<Vec<DecodeTarget>>,
    active_decode_targets_bitmask: Option<u32>,
    previous_active_bitmask: Option<u32>,
    packets_selected: u64,
    packets_dropped: u64,
    layer_switches: u64,
}

impl DependencyDescriptorSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_and_config(Base::new(), SelectorConfig::default())
    }

    #[must_use]
    pub fn with_config(config: SelectorConfig) -> Self {
        Self::with_base_and_config(Base::new(), config)
    }

    /// Build from a predecessor selector's layer state, e.g. when a stream
    /// starts emitting descriptors mid-call.
    #[must_use]
    pub fn with_base(base: Base) -> Self {
        Self::with_base_and_config(base, SelectorConfig::default())
    }

    fn with_base_and_config(base: Base, config: SelectorConfig) -> Self {
        let decisions =
            SelectorDecisionCache::new(config.decision_cache_size, config.decision_cache_margin);
        Self {
            base,
            config,
            decisions,
            structure: None,
            chains: Vec::new(),
            decode_targets: RwLock::new(Vec::new()),
            active_decode_targets_bitmask: None,
            previous_active_bitmask: None,
            packets_selected: 0,
            packets_dropped: 0,
            layer_switches: 0,
        }
    }

    /// Forwarding counters, for diagnostics.
    #[must_use]
    pub fn stats(&self) -> SelectorStats {
        SelectorStats {
            packets_selected: self.packets_selected,
            packets_dropped: self.packets_dropped,
            layer_switches: self.layer_switches,
            current_layer: self.base.current_layer(),
        }
    }

    fn update_dependency_structure(
        &mut self,
        structure: Arc<FrameDependencyStructure>,
        decode_targets: &[DecodeTargetLayer],
    ) {
        self.chains = (0..structure.num_chains).map(FrameChain::new).collect();

        let mut targets = Vec::with_capacity(decode_targets.len());
        for dt in decode_targets {
            let chain = if structure.num_chains > 0 {
                match structure
                    .decode_target_protected_by_chain
                    .get(dt.target)
                    .copied()
                {
                    Some(index) if index < structure.num_chains => Some(index),
                    Some(index) => {
                        error!(
                            "{}",
                            SelectorError::ChainIndexOutOfRange {
                                index,
                                num_chains: structure.num_chains,
                            }
                        );
                        None
                    }
                    None => {
                        error!(
                            "{}",
                            SelectorError::InvalidStructure(format!(
                                "no protecting chain for decode target {}",
                                dt.target
                            ))
                        );
                        None
                    }
                }
            } else {
                None
            };
            targets.push(DecodeTarget::new(dt.target, dt.layer, chain));
        }
        // highest layer first, so the scan picks the best usable target
        targets.sort_by(|a, b| b.layer().cmp(&a.layer()));

        debug!(
            "new dependency structure: {} decode targets, {} chains",
            structure.num_decode_targets, structure.num_chains
        );
        self.structure = Some(structure);
        // the decision cache survives structure updates on purpose: earlier
        // frames keep their fate across a keyframe
        *self.decode_targets.write() = targets;
    }

    fn update_active_decode_targets(&mut self, bitmask: u32) {
        debug!("active decode targets bitmask {bitmask:#b}");
        for chain in &mut self.chains {
            chain.begin_update_active();
        }
        {
            let mut targets = self.decode_targets.write();
            for dt in targets.iter_mut() {
                dt.update_active(bitmask);
                if let Some(index) = dt.chain() {
                    if let Some(chain) = self.chains.get_mut(index) {
                        chain.update_active(dt.active());
                    }
                }
            }
        }
        for chain in &mut self.chains {
            chain.end_update_active();
        }
    }

    fn mark_dropped(&mut self, efn: u64) {
        self.packets_dropped += 1;
        if let Err(err) = self.decisions.add_dropped(efn) {
            debug!("could not record drop of frame {efn}: {err}");
        }
    }
}

impl Default for DependencyDescriptorSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoLayerSelector for DependencyDescriptorSelector {
    fn select(&mut self, packet: &ExtPacket) -> SelectorResult {
        let mut result = SelectorResult::default();
        // once locked onto a layer, every packet of the feed counts toward
        // delivery statistics, forwarded or not
        if self.base.current_layer().is_valid() {
            result.relevant = true;
        }

        let Some(info) = packet.dependency_descriptor.as_ref() else {
            debug!(
                "drop packet, no dependency descriptor, incoming {}, sn {}, keyframe {}",
                packet.video_layer, packet.header.sequence_number, packet.keyframe
            );
            self.packets_dropped += 1;
            return result;
        };

        let dd = &info.descriptor;
        let fd = &dd.frame_dependencies;
        let efn = info.ext_frame_number;
        let incoming = VideoLayer::new(i32::from(fd.spatial_id), i32::from(fd.temporal_id));

        match self.decisions.get_decision(efn) {
            Err(err) => {
                // outside the window; drop without recording anything
                debug!(
                    "drop packet on decision error, incoming {incoming}, fn {}/{efn}, sn {}: {err}",
                    dd.frame_number, packet.header.sequence_number
                );
                self.packets_dropped += 1;
                return result;
            }
            Ok(SelectorDecision::Dropped) => {
                // a packet of an already dropped frame, maintain the decision
                debug!(
                    "drop packet of dropped frame, incoming {incoming}, fn {}/{efn}, sn {}",
                    dd.frame_number, packet.header.sequence_number
                );
                self.packets_dropped += 1;
                return result;
            }
            Ok(_) => {}
        }

        if info.structure_updated {
            if let Some(structure) = dd.attached_structure.as_ref() {
                self.update_dependency_structure(structure.clone(), &info.decode_targets);
            }
        }

        if info.active_decode_targets_updated {
            if let Some(bitmask) = dd.active_decode_targets_bitmask {
                self.update_active_decode_targets(bitmask);
            }
        }

        for chain in &mut self.chains {
            chain.on_frame(efn, fd, &self.decisions);
        }

        let target_layer = self.base.target_layer();
        let scan = {
            let mut targets = self.decode_targets.write();
            let mut outcome = TargetScan::NoTarget;
            for dt in targets.iter_mut() {
                if !dt.active() {
                    continue;
                }
                if !self.config.allow_overshoot && !dt.layer().is_within(target_layer) {
                    continue;
                }
                let chain = dt.chain().and_then(|index| self.chains.get(index));
                match dt.on_frame(fd, chain) {
                    Err(err) => {
                        outcome = TargetScan::Failed(err);
                        break;
                    }
                    Ok(inspection) if inspection.target_valid => {
                        outcome = TargetScan::Chosen {
                            layer: dt.layer(),
                            dti: inspection.dti,
                        };
                        break;
                    }
                    Ok(_) => {}
                }
            }
            outcome
        };

        let (chosen_layer, dti) = match scan {
            TargetScan::Failed(err) => {
                // the descriptor for this frame is unusable
                debug!("drop packet for frame inspection error, incoming {incoming}: {err}");
                self.mark_dropped(efn);
                return result;
            }
            TargetScan::NoTarget => {
                debug!(
                    "drop packet, no usable decode target, target {target_layer}, incoming {incoming}, fn {}/{efn}",
                    dd.frame_number
                );
                self.mark_dropped(efn);
                return result;
            }
            TargetScan::Chosen { layer, dti } => (layer, dti),
        };

        if dti == Dti::NotPresent {
            debug!(
                "drop packet, frame not present in selected target {chosen_layer}, incoming {incoming}, fn {}/{efn}",
                dd.frame_number
            );
            self.mark_dropped(efn);
            return result;
        }

        // Decodability through explicit references. This is deliberately
        // relaxed: unknown or forgotten references are left to chain
        // integrity, so reordering and recoverable loss do not cause drops.
        for &diff in &fd.frame_diffs {
            if diff == 0 {
                continue;
            }
            let referenced = efn.saturating_sub(u64::from(diff));
            if matches!(
                self.decisions.get_decision(referenced),
                Ok(SelectorDecision::Dropped)
            ) {
                debug!(
                    "drop packet, references dropped frame {referenced}, incoming {incoming}, fn {}/{efn}",
                    dd.frame_number
                );
                self.mark_dropped(efn);
                return result;
            }
        }

        if self.base.current_layer() != chosen_layer {
            result.switching = true;
            if !self.base.current_layer().is_valid() {
                result.resuming = true;
                info!(
                    "resuming at layer {chosen_layer}, target {target_layer}, max {}, req {}, max seen {}, feed {:#x}, fn {}/{efn}",
                    self.base.max_layer(),
                    self.base.request_spatial(),
                    self.base.max_seen_layer(),
                    packet.header.ssrc,
                    dd.frame_number
                );
            }

            self.base.switch_to(chosen_layer);
            self.previous_active_bitmask = self.active_decode_targets_bitmask;
            self.active_decode_targets_bitmask = Some(active_decode_target_bitmask(
                chosen_layer,
                &info.decode_targets,
            ));
            self.layer_switches += 1;
            debug!(
                "switched to layer {chosen_layer}, active bitmask {:#b}, fn {}/{efn}",
                self.active_decode_targets_bitmask.unwrap_or(0),
                dd.frame_number
            );
            result.relevant = true;
        }

        // Rewrite the outgoing descriptor. The parsed descriptor is shared
        // with the rest of the pipeline, so the bitmask override works on a
        // clone.
        let marshalled = if dd.attached_structure.is_none()
            && self.active_decode_targets_bitmask.is_some()
        {
            let mut outgoing = dd.clone();
            outgoing.active_decode_targets_bitmask = self.active_decode_targets_bitmask;
            marshal_dependency_descriptor(&outgoing, self.structure.as_deref())
        } else {
            marshal_dependency_descriptor(dd, self.structure.as_deref())
        };
        match marshalled {
            Ok(bytes) => result.dd_extension = Some(bytes),
            Err(err) => {
                warn!("error marshalling dependency descriptor extension: {err}");
            }
        }

        if info.integrity {
            if let Err(err) = self.decisions.add_forwarded(efn) {
                debug!("could not record forward of frame {efn}: {err}");
            }
        }
        result.rtp_marker = packet.header.marker
            || (dd.last_packet_in_frame
                && self.base.current_layer().spatial == i32::from(fd.spatial_id));
        result.selected = true;
        self.packets_selected += 1;
        result
    }

    fn rollback(&mut self) {
        self.active_decode_targets_bitmask = self.previous_active_bitmask;
        self.base.rollback();
    }

    fn check_sync(&self) -> (bool, i32) {
        let layer = self.base.request_spatial();
        if !self.base.current_layer().is_valid() {
            // always declare not locked while resuming from nothing
            return (false, layer);
        }

        let targets = self.decode_targets.read();
        for dt in targets.iter() {
            if dt.active() && dt.layer().spatial <= self.base.target_layer().spatial && dt.valid() {
                return (true, layer);
            }
        }
        (false, layer)
    }

    fn is_overshoot_okay(&self) -> bool {
        self.config.allow_overshoot
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn into_base(self: Box<Self>) -> Base {
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfu_types::FrameDependencyStructure;

    #[test]
    fn test_out_of_range_chain_index_leaves_target_unprotected() {
        let structure = Arc::new(FrameDependencyStructure {
            structure_id: 0,
            num_decode_targets: 2,
            num_chains: 1,
            // chain 7 does not exist
            decode_target_protected_by_chain: vec![0, 7],
            templates: vec![],
            resolutions: vec![],
        });
        let decode_targets = vec![
            DecodeTargetLayer {
                target: 0,
                layer: VideoLayer::new(0, 0),
            },
            DecodeTargetLayer {
                target: 1,
                layer: VideoLayer::new(0, 1),
            },
        ];

        let mut selector = DependencyDescriptorSelector::new();
        selector.update_dependency_structure(structure, &decode_targets);

        let targets = selector.decode_targets.read();
        assert_eq!(targets.len(), 2);
        // sorted highest first; the misconfigured target lost its chain
        assert_eq!(targets[0].target(), 1);
        assert_eq!(targets[0].chain(), None);
        assert_eq!(targets[1].chain(), Some(0));
    }

    #[test]
    fn test_targets_sorted_highest_first() {
        let structure = Arc::new(FrameDependencyStructure {
            structure_id: 0,
            num_decode_targets: 4,
            num_chains: 0,
            decode_target_protected_by_chain: vec![],
            templates: vec![],
            resolutions: vec![],
        });
        let decode_targets = vec![
            DecodeTargetLayer {
                target: 0,
                layer: VideoLayer::new(0, 0),
            },
            DecodeTargetLayer {
                target: 2,
                layer: VideoLayer::new(1, 0),
            },
            DecodeTargetLayer {
                target: 1,
                layer: VideoLayer::new(0, 1),
            },
            DecodeTargetLayer {
                target: 3,
                layer: VideoLayer::new(1, 1),
            },
        ];

        let mut selector = DependencyDescriptorSelector::new();
        selector.update_dependency_structure(structure, &decode_targets);

        let targets = selector.decode_targets.read();
        let layers: Vec<VideoLayer> = targets.iter().map(|dt| dt.layer()).collect();
        assert_eq!(
            layers,
            vec![
                VideoLayer::new(1, 1),
                VideoLayer::new(1, 0),
                VideoLayer::new(0, 1),
                VideoLayer::new(0, 0),
            ]
        );
    }
}
