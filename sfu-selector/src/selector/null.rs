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

//! Pass-through selector for streams without layer information.

use sfu_types::ExtPacket;

use crate::selector::{Base, SelectorResult, VideoLayerSelector};

/// Forwards every packet unchanged.
///
/// Used while a stream provides nothing to select on. It still tracks the
/// observed layer in its [`Base`] so that an upgrade to a layer-aware
/// selector starts from the real stream state instead of from scratch.
#[derive(Debug, Default)]
pub struct NullSelector {
    base: Base,
}

impl NullSelector {
    #[must_use]
    pub fn new() -> Self {
        Self { base: Base::new() }
    }

    /// Build from a predecessor's layer state.
    #[must_use]
    pub fn with_base(base: Base) -> Self {
        Self { base }
    }
}

impl VideoLayerSelector for NullSelector {
    fn select(&mut self, packet: &ExtPacket) -> SelectorResult {
        if packet.video_layer.is_valid() {
            self.base.switch_to(packet.video_layer);
        }
        SelectorResult {
            selected: true,
            relevant: true,
            rtp_marker: packet.header.marker,
            ..Default::default()
        }
    }

    fn rollback(&mut self) {
        self.base.rollback();
    }

    fn check_sync(&self) -> (bool, i32) {
        (true, self.base.request_spatial())
    }

    fn is_overshoot_okay(&self) -> bool {
        true
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
