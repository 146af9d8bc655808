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

//! Parsed form of the AV1 Dependency Descriptor RTP header extension.
//!
//! The descriptor tells a forwarder, per frame, which decode targets the
//! frame belongs to, which earlier frames it references, and how the stream's
//! templates and chains are laid out. These types are the *resolved* view:
//! template indirection has already been applied by the parser, so
//! [`FrameDependencies`] always carries concrete per-frame values.

use std::sync::Arc;

use crate::layer::VideoLayer;

/// Decode Target Indication: how a frame relates to one decode target.
///
/// The two-bit wire values are fixed by the AV1 spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dti {
    /// The frame is not part of this decode target and must not be decoded.
    NotPresent,
    /// Part of the target, but no later frame depends on it.
    Discardable,
    /// Part of the target; decoding from here on yields the full target.
    Switch,
    /// Part of the target and referenced by later frames.
    Required,
}

impl Dti {
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::NotPresent => 0,
            Self::Discardable => 1,
            Self::Switch => 2,
            Self::Required => 3,
        }
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::NotPresent),
            1 => Some(Self::Discardable),
            2 => Some(Self::Switch),
            3 => Some(Self::Required),
            _ => None,
        }
    }
}

/// One frame template from the dependency structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDependencyTemplate {
    pub spatial_id: u8,
    pub temporal_id: u8,
    /// One indication per decode target.
    pub dtis: Vec<Dti>,
    /// Frame number deltas to referenced frames.
    pub frame_diffs: Vec<u32>,
    /// Per chain, delta to the previous frame in that chain.
    pub chain_diffs: Vec<u32>,
}

/// Render resolution advertised for one spatial layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderResolution {
    pub width: u32,
    pub height: u32,
}

/// The template dependency structure attached to keyframes.
///
/// Chains and decode targets reference each other by index only; the arrays
/// here are the single source of truth for both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDependencyStructure {
    /// `template_id_offset` on the wire; template ids are relative to it.
    pub structure_id: u8,
    pub num_decode_targets: usize,
    pub num_chains: usize,
    /// For each decode target, the index of the chain protecting it.
    /// Empty when `num_chains == 0`.
    pub decode_target_protected_by_chain: Vec<usize>,
    pub templates: Vec<FrameDependencyTemplate>,
    /// One entry per spatial layer when present, empty otherwise.
    pub resolutions: Vec<RenderResolution>,
}

/// Resolved dependency information for a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDependencies {
    pub spatial_id: u8,
    pub temporal_id: u8,
    /// The frame depends on `frame_number - diff` for each entry.
    pub frame_diffs: Vec<u32>,
    /// One indication per decode target, in target order.
    pub decode_target_indications: Vec<Dti>,
    /// Per chain, delta to the previous frame in that chain; 0 means this
    /// frame (re)starts the chain.
    pub chain_diffs: Vec<u32>,
}

/// A parsed dependency descriptor for one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDescriptor {
    pub first_packet_in_frame: bool,
    pub last_packet_in_frame: bool,
    /// The 6-bit wire template id this frame was encoded against.
    pub template_id: u8,
    pub frame_number: u16,
    pub frame_dependencies: FrameDependencies,
    /// Present on keyframes that carry a new structure. Shared, never
    /// mutated after parse.
    pub attached_structure: Option<Arc<FrameDependencyStructure>>,
    pub active_decode_targets_bitmask: Option<u32>,
}

/// A decode target together with the layer it decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeTargetLayer {
    /// Index into the structure's decode target list.
    pub target: usize,
    pub layer: VideoLayer,
}

/// What the parser hands the selector per packet: the descriptor plus the
/// stream-level bookkeeping only the parser can compute (extended frame
/// number, change flags, frame integrity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDescriptorInfo {
    pub descriptor: DependencyDescriptor,
    /// Wrap-around-extended frame number.
    pub ext_frame_number: u64,
    /// Decode targets with resolved layers, highest first.
    pub decode_targets: Vec<DecodeTargetLayer>,
    /// A new structure arrived with this frame.
    pub structure_updated: bool,
    /// The active decode targets bitmask changed with this frame.
    pub active_decode_targets_updated: bool,
    /// All packets of this frame were observed by the parser.
    pub integrity: bool,
}

/// The bitmask of decode targets decodable at or below `layer`.
///
/// Bit `i` corresponds to decode target `i` of the current structure.
#[must_use]
pub fn active_decode_target_bitmask(layer: VideoLayer, targets: &[DecodeTargetLayer]) -> u32 {
    let mut bitmask = 0u32;
    for dt in targets {
        if dt.target < 32 && dt.layer.is_within(layer) {
            bitmask |= 1 << dt.target;
        }
    }
    bitmask
}
