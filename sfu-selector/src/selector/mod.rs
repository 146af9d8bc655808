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

//! The selector abstraction shared by all layer selection strategies.
//!
//! A downstream track always has exactly one selector. Which one depends on
//! what the publisher sends: a plain stream gets [`NullSelector`], a stream
//! carrying dependency descriptors gets
//! [`DependencyDescriptorSelector`](dependency_descriptor::DependencyDescriptorSelector).
//! Streams change their nature mid-call (a publisher toggles SVC, a codec
//! switch), so selectors are hot-swappable: the common layer state lives in
//! [`Base`] and moves to the successor via
//! [`into_base`](VideoLayerSelector::into_base).

pub mod dependency_descriptor;
pub mod null;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use sfu_types::{ExtPacket, VideoLayer};

pub use null::NullSelector;

/// The verdict for one packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorResult {
    /// Forward this packet downstream.
    pub selected: bool,
    /// Count this packet toward the stream's delivery statistics even when
    /// it is not forwarded.
    pub relevant: bool,
    /// The forwarded layer changed with this packet.
    pub switching: bool,
    /// The stream went from nothing forwarded to a locked layer.
    pub resuming: bool,
    /// Marker bit for the outgoing RTP header.
    pub rtp_marker: bool,
    /// Rewritten dependency descriptor extension, when one applies.
    pub dd_extension: Option<Bytes>,
}

/// Layer state common to every selector variant.
///
/// `current` is what we last forwarded, `previous` the rollback value,
/// `target` what the allocator wants, `max` the publisher's ceiling,
/// `max_seen` the highest layer observed on the incoming stream, and
/// `request_spatial` the spatial layer the subscriber asked for.
#[derive(Debug, Clone)]
pub struct Base {
    current_layer: VideoLayer,
    previous_layer: VideoLayer,
    target_layer: VideoLayer,
    max_layer: VideoLayer,
    request_spatial: i32,
    max_seen_layer: VideoLayer,
}

impl Base {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current_layer: VideoLayer::INVALID,
            previous_layer: VideoLayer::INVALID,
            target_layer: VideoLayer::INVALID,
            max_layer: VideoLayer::INVALID,
            request_spatial: -1,
            max_seen_layer: VideoLayer::INVALID,
        }
    }

    #[must_use]
    pub fn current_layer(&self) -> VideoLayer {
        self.current_layer
    }

    #[must_use]
    pub fn previous_layer(&self) -> VideoLayer {
        self.previous_layer
    }

    #[must_use]
    pub fn target_layer(&self) -> VideoLayer {
        self.target_layer
    }

    #[must_use]
    pub fn max_layer(&self) -> VideoLayer {
        self.max_layer
    }

    #[must_use]
    pub fn request_spatial(&self) -> i32 {
        self.request_spatial
    }

    #[must_use]
    pub fn max_seen_layer(&self) -> VideoLayer {
        self.max_seen_layer
    }

    pub fn set_target_layer(&mut self, layer: VideoLayer) {
        self.target_layer = layer;
    }

    pub fn set_max_layer(&mut self, layer: VideoLayer) {
        self.max_layer = layer;
    }

    pub fn set_request_spatial(&mut self, spatial: i32) {
        self.request_spatial = spatial;
    }

    pub fn set_max_seen_layer(&mut self, layer: VideoLayer) {
        self.max_seen_layer = layer;
    }

    /// Record a switch: `layer` becomes current, the old current becomes the
    /// rollback value.
    pub fn switch_to(&mut self, layer: VideoLayer) {
        self.previous_layer = self.current_layer;
        self.current_layer = layer;
    }

    /// Undo the most recent [`switch_to`](Self::switch_to).
    pub fn rollback(&mut self) {
        self.current_layer = self.previous_layer;
    }
}

impl Default for Base {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwarding counters for one selector, taken as a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorStats {
    pub packets_selected: u64,
    pub packets_dropped: u64,
    pub layer_switches: u64,
    pub current_layer: VideoLayer,
}

/// A per-track layer selection strategy.
///
/// `select` and `rollback` are driven by the single packet-pipeline consumer
/// of the track; `check_sync` and the `Base` getters may be called from a
/// control thread.
pub trait VideoLayerSelector: Send {
    /// Decide the fate of one packet.
    fn select(&mut self, packet: &ExtPacket) -> SelectorResult;

    /// Undo the state change of the last `select` after a transport failure
    /// between selection and transmission.
    fn rollback(&mut self);

    /// Whether the stream is currently delivering a decodable layer at or
    /// below the target. Returns the lock state and the spatial layer the
    /// subscriber asked for, so the caller can request a keyframe for it.
    fn check_sync(&self) -> (bool, i32);

    /// Whether layers above the target may be forwarded.
    fn is_overshoot_okay(&self) -> bool;

    fn base(&self) -> &Base;

    fn base_mut(&mut self) -> &mut Base;

    /// Surrender the shared layer state to a successor selector.
    fn into_base(self: Box<Self>) -> Base;

    fn set_target_layer(&mut self, layer: VideoLayer) {
        self.base_mut().set_target_layer(layer);
    }

    fn set_max_layer(&mut self, layer: VideoLayer) {
        self.base_mut().set_max_layer(layer);
    }

    fn set_request_spatial(&mut self, spatial: i32) {
        self.base_mut().set_request_spatial(spatial);
    }

    fn set_max_seen_layer(&mut self, layer: VideoLayer) {
        self.base_mut().set_max_seen_layer(layer);
    }

    fn current_layer(&self) -> VideoLayer {
        self.base().current_layer()
    }

    fn target_layer(&self) -> VideoLayer {
        self.base().target_layer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_starts_invalid() {
        let base = Base::new();
        assert!(!base.current_layer().is_valid());
        assert!(!base.target_layer().is_valid());
        assert_eq!(base.request_spatial(), -1);
    }

    #[test]
    fn test_switch_and_rollback() {
        let mut base = Base::new();
        base.switch_to(VideoLayer::new(1, 2));
        assert_eq!(base.current_layer(), VideoLayer::new(1, 2));

        base.switch_to(VideoLayer::new(0, 2));
        assert_eq!(base.current_layer(), VideoLayer::new(0, 2));
        assert_eq!(base.previous_layer(), VideoLayer::new(1, 2));

        base.rollback();
        assert_eq!(base.current_layer(), VideoLayer::new(1, 2));
    }

    #[test]
    fn test_stats_snapshot_serializes() {
        let stats = SelectorStats {
            packets_selected: 10,
            packets_dropped: 2,
            layer_switches: 1,
            current_layer: VideoLayer::new(1, 2),
        };
        let json = serde_json::to_string(&stats).unwrap();
        let parsed: SelectorStats = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, stats);
    }
}
