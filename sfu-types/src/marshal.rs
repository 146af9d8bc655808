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

//! Serializer for the Dependency Descriptor header extension.
//!
//! The forwarding path rewrites the active decode targets bitmask when it
//! narrows a subscriber's layers, so it has to put descriptors back on the
//! wire. Only serialization lives here; parsing belongs to the receive
//! pipeline. Field layout follows the AV1 spec: mandatory fields, an
//! optional extended-flags bit set, the template dependency structure, the
//! active bitmask, and per-frame custom overrides, zero-padded to a byte
//! boundary.

use bytes::Bytes;
use thiserror::Error;

use crate::descriptor::{DependencyDescriptor, FrameDependencyStructure};

/// Errors produced while serializing a descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    #[error("template id {0} does not resolve against the dependency structure")]
    TemplateNotFound(u8),

    #[error("structure declares {0} decode targets, at most 32 are supported")]
    TooManyDecodeTargets(usize),

    #[error("{field} value {value} exceeds its {bits}-bit field")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        bits: u32,
    },

    #[error("frame carries {got} decode target indications, structure declares {want}")]
    DtiCountMismatch { got: usize, want: usize },

    #[error("no dependency structure available to encode against")]
    MissingStructure,

    #[error("templates do not form a valid layer progression")]
    InvalidTemplateLayout,
}

/// MSB-first bit accumulator.
///
/// Values are written big-endian within their fields, matching the `f(n)`
/// notation of the AV1 spec. The partial trailing byte is already
/// zero-filled, so finishing is just handing the buffer over.
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bool(&mut self, bit: bool) {
        let offset = self.bit_len % 8;
        if offset == 0 {
            self.buf.push(0);
        }
        if bit {
            let last = self.buf.len() - 1;
            self.buf[last] |= 1 << (7 - offset);
        }
        self.bit_len += 1;
    }

    /// Write the low `bits` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u64, bits: u32) {
        debug_assert!(bits <= 64);
        debug_assert!(bits == 64 || value >> bits == 0);
        for i in (0..bits).rev() {
            self.write_bool((value >> i) & 1 == 1);
        }
    }

    /// Write `value` with the AV1 nonsymmetric encoding `ns(num_values)`.
    ///
    /// Uses `floor(log2(n)) + 1` bits at most, one fewer for the first
    /// `2^w - n` values. `num_values` must be at least 1 and `value`
    /// strictly below it.
    pub fn write_non_symmetric(&mut self, value: u32, num_values: u32) {
        debug_assert!(num_values >= 1);
        debug_assert!(value < num_values);
        if num_values == 1 {
            return;
        }
        let w = 32 - (num_values - 1).leading_zeros();
        let m = (1u32 << w) - num_values;
        if value < m {
            self.write_bits(u64::from(value), w - 1);
        } else {
            self.write_bits(u64::from(value + m), w);
        }
    }

    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Hand over the byte buffer, zero-padded to a byte boundary.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Serialize `descriptor` into extension bytes.
///
/// `fallback_structure` is the forwarder's current structure; it is used to
/// resolve the frame's template when the descriptor does not attach one of
/// its own. A descriptor with no structure in reach can only be encoded when
/// it needs nothing beyond the mandatory fields.
pub fn marshal_dependency_descriptor(
    descriptor: &DependencyDescriptor,
    fallback_structure: Option<&FrameDependencyStructure>,
) -> Result<Bytes, MarshalError> {
    let structure = descriptor
        .attached_structure
        .as_deref()
        .or(fallback_structure);

    let mut writer = BitWriter::new();
    writer.write_bool(descriptor.first_packet_in_frame);
    writer.write_bool(descriptor.last_packet_in_frame);
    if descriptor.template_id >= 64 {
        return Err(MarshalError::FieldOverflow {
            field: "template_id",
            value: u64::from(descriptor.template_id),
            bits: 6,
        });
    }
    writer.write_bits(u64::from(descriptor.template_id), 6);
    writer.write_bits(u64::from(descriptor.frame_number), 16);

    let structure_present = descriptor.attached_structure.is_some();
    let (active_present, custom_dtis, custom_fdiffs, custom_chains) = match structure {
        Some(st) => {
            let template = resolve_template(descriptor, st)?;
            let fd = &descriptor.frame_dependencies;
            let all_active = all_active_mask(st.num_decode_targets)?;
            let active_present = match descriptor.active_decode_targets_bitmask {
                None => false,
                // An attached structure implies all targets active, so the
                // bitmask can be elided in that case.
                Some(mask) => !(structure_present && mask == all_active),
            };
            (
                active_present,
                fd.decode_target_indications != template.dtis,
                fd.frame_diffs != template.frame_diffs,
                fd.chain_diffs != template.chain_diffs,
            )
        }
        None => {
            if descriptor.active_decode_targets_bitmask.is_some() {
                return Err(MarshalError::MissingStructure);
            }
            (false, false, false, false)
        }
    };

    let extended =
        structure_present || active_present || custom_dtis || custom_fdiffs || custom_chains;
    if !extended {
        return Ok(Bytes::from(writer.finish()));
    }

    writer.write_bool(structure_present);
    writer.write_bool(active_present);
    writer.write_bool(custom_dtis);
    writer.write_bool(custom_fdiffs);
    writer.write_bool(custom_chains);

    // The match above guarantees a structure whenever any flag is set.
    let st = structure.ok_or(MarshalError::MissingStructure)?;
    if structure_present {
        write_structure(&mut writer, st)?;
    }
    if active_present {
        let mask = descriptor
            .active_decode_targets_bitmask
            .ok_or(MarshalError::MissingStructure)?;
        let dt_cnt = st.num_decode_targets as u32;
        if u64::from(mask) >> dt_cnt != 0 {
            return Err(MarshalError::FieldOverflow {
                field: "active_decode_targets_bitmask",
                value: u64::from(mask),
                bits: dt_cnt,
            });
        }
        writer.write_bits(u64::from(mask), dt_cnt);
    }

    let fd = &descriptor.frame_dependencies;
    if custom_dtis {
        if fd.decode_target_indications.len() != st.num_decode_targets {
            return Err(MarshalError::DtiCountMismatch {
                got: fd.decode_target_indications.len(),
                want: st.num_decode_targets,
            });
        }
        for dti in &fd.decode_target_indications {
            writer.write_bits(u64::from(dti.bits()), 2);
        }
    }
    if custom_fdiffs {
        for &fdiff in &fd.frame_diffs {
            let value = u64::from(fdiff.wrapping_sub(1));
            let bits: u32 = match fdiff {
                1..=16 => 4,
                17..=256 => 8,
                257..=4096 => 12,
                _ => {
                    return Err(MarshalError::FieldOverflow {
                        field: "frame_diff",
                        value: u64::from(fdiff),
                        bits: 12,
                    })
                }
            };
            writer.write_bits(u64::from(bits / 4), 2);
            writer.write_bits(value, bits);
        }
        writer.write_bits(0, 2);
    }
    if custom_chains {
        for &chain_diff in &fd.chain_diffs {
            if chain_diff > 255 {
                return Err(MarshalError::FieldOverflow {
                    field: "chain_diff",
                    value: u64::from(chain_diff),
                    bits: 8,
                });
            }
            writer.write_bits(u64::from(chain_diff), 8);
        }
    }

    Ok(Bytes::from(writer.finish()))
}

fn resolve_template<'a>(
    descriptor: &DependencyDescriptor,
    structure: &'a FrameDependencyStructure,
) -> Result<&'a crate::descriptor::FrameDependencyTemplate, MarshalError> {
    let index =
        (usize::from(descriptor.template_id) + 64 - usize::from(structure.structure_id)) % 64;
    structure
        .templates
        .get(index)
        .ok_or(MarshalError::TemplateNotFound(descriptor.template_id))
}

fn all_active_mask(num_decode_targets: usize) -> Result<u32, MarshalError> {
    if num_decode_targets == 0 || num_decode_targets > 32 {
        return Err(MarshalError::TooManyDecodeTargets(num_decode_targets));
    }
    Ok(if num_decode_targets == 32 {
        u32::MAX
    } else {
        (1u32 << num_decode_targets) - 1
    })
}

fn write_structure(
    writer: &mut BitWriter,
    structure: &FrameDependencyStructure,
) -> Result<(), MarshalError> {
    if structure.structure_id >= 64 {
        return Err(MarshalError::FieldOverflow {
            field: "template_id_offset",
            value: u64::from(structure.structure_id),
            bits: 6,
        });
    }
    writer.write_bits(u64::from(structure.structure_id), 6);

    let dt_cnt = structure.num_decode_targets;
    if dt_cnt == 0 || dt_cnt > 32 {
        return Err(MarshalError::TooManyDecodeTargets(dt_cnt));
    }
    writer.write_bits((dt_cnt - 1) as u64, 5);

    // template_layers: a 2-bit walk over (spatial, temporal), terminator 3.
    let templates = &structure.templates;
    let first = templates.first().ok_or(MarshalError::InvalidTemplateLayout)?;
    if first.spatial_id != 0 || first.temporal_id != 0 {
        return Err(MarshalError::InvalidTemplateLayout);
    }
    for pair in templates.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        let idc = if cur.spatial_id == prev.spatial_id && cur.temporal_id == prev.temporal_id {
            0
        } else if cur.spatial_id == prev.spatial_id && cur.temporal_id == prev.temporal_id + 1 {
            1
        } else if cur.spatial_id == prev.spatial_id + 1 && cur.temporal_id == 0 {
            2
        } else {
            return Err(MarshalError::InvalidTemplateLayout);
        };
        writer.write_bits(idc, 2);
    }
    writer.write_bits(3, 2);

    for template in templates {
        if template.dtis.len() != dt_cnt {
            return Err(MarshalError::DtiCountMismatch {
                got: template.dtis.len(),
                want: dt_cnt,
            });
        }
        for dti in &template.dtis {
            writer.write_bits(u64::from(dti.bits()), 2);
        }
    }

    for template in templates {
        for &fdiff in &template.frame_diffs {
            if !(1..=16).contains(&fdiff) {
                return Err(MarshalError::FieldOverflow {
                    field: "template_fdiff",
                    value: u64::from(fdiff),
                    bits: 4,
                });
            }
            writer.write_bool(true);
            writer.write_bits(u64::from(fdiff - 1), 4);
        }
        writer.write_bool(false);
    }

    let chain_cnt = structure.num_chains;
    if chain_cnt > dt_cnt {
        return Err(MarshalError::InvalidTemplateLayout);
    }
    writer.write_non_symmetric(chain_cnt as u32, (dt_cnt + 1) as u32);
    if chain_cnt > 0 {
        if structure.decode_target_protected_by_chain.len() != dt_cnt {
            return Err(MarshalError::InvalidTemplateLayout);
        }
        for &protected_by in &structure.decode_target_protected_by_chain {
            if protected_by >= chain_cnt {
                return Err(MarshalError::InvalidTemplateLayout);
            }
            writer.write_non_symmetric(protected_by as u32, chain_cnt as u32);
        }
        for template in templates {
            if template.chain_diffs.len() != chain_cnt {
                return Err(MarshalError::InvalidTemplateLayout);
            }
            for &chain_diff in &template.chain_diffs {
                if chain_diff > 15 {
                    return Err(MarshalError::FieldOverflow {
                        field: "template_chain_diff",
                        value: u64::from(chain_diff),
                        bits: 4,
                    });
                }
                writer.write_bits(u64::from(chain_diff), 4);
            }
        }
    }

    writer.write_bool(!structure.resolutions.is_empty());
    for resolution in &structure.resolutions {
        for (field, value) in [
            ("render_width", resolution.width),
            ("render_height", resolution.height),
        ] {
            let minus_one = u64::from(value).wrapping_sub(1);
            if value == 0 || minus_one > 0xFFFF {
                return Err(MarshalError::FieldOverflow {
                    field,
                    value: u64::from(value),
                    bits: 16,
                });
            }
            writer.write_bits(minus_one, 16);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Dti, FrameDependencies, FrameDependencyTemplate};
    use std::sync::Arc;

    fn minimal_descriptor() -> DependencyDescriptor {
        DependencyDescriptor {
            first_packet_in_frame: true,
            last_packet_in_frame: true,
            template_id: 5,
            frame_number: 0x1234,
            frame_dependencies: FrameDependencies {
                spatial_id: 0,
                temporal_id: 0,
                frame_diffs: vec![],
                decode_target_indications: vec![Dti::Switch, Dti::Switch],
                chain_diffs: vec![0],
            },
            attached_structure: None,
            active_decode_targets_bitmask: None,
        }
    }

    fn two_target_structure() -> FrameDependencyStructure {
        FrameDependencyStructure {
            structure_id: 5,
            num_decode_targets: 2,
            num_chains: 1,
            decode_target_protected_by_chain: vec![0, 0],
            templates: vec![
                FrameDependencyTemplate {
                    spatial_id: 0,
                    temporal_id: 0,
                    dtis: vec![Dti::Switch, Dti::Switch],
                    frame_diffs: vec![],
                    chain_diffs: vec![0],
                },
                FrameDependencyTemplate {
                    spatial_id: 0,
                    temporal_id: 1,
                    dtis: vec![Dti::NotPresent, Dti::Required],
                    frame_diffs: vec![1],
                    chain_diffs: vec![1],
                },
            ],
            resolutions: vec![],
        }
    }

    #[test]
    fn test_mandatory_only_layout() {
        let bytes = marshal_dependency_descriptor(&minimal_descriptor(), None).unwrap();
        // start(1) end(1) template_id=5(6) | frame_number(16)
        assert_eq!(bytes.as_ref(), &[0xC5u8, 0x12, 0x34][..]);
    }

    #[test]
    fn test_mandatory_only_with_matching_template() {
        // With a resolvable template and no deviations, the encoding stays
        // mandatory-only even though a structure is in reach.
        let st = two_target_structure();
        let bytes = marshal_dependency_descriptor(&minimal_descriptor(), Some(&st)).unwrap();
        assert_eq!(bytes.len(), 3);
    }

    #[test]
    fn test_bitmask_forces_extended_fields() {
        let st = two_target_structure();
        let mut descriptor = minimal_descriptor();
        descriptor.active_decode_targets_bitmask = Some(0b01);
        let bytes = marshal_dependency_descriptor(&descriptor, Some(&st)).unwrap();
        assert!(bytes.len() > 3);
        // flags: structure=0 active=1 custom_dtis=0 custom_fdiffs=0 custom_chains=0,
        // then the 2-bit bitmask 01, zero-padded.
        assert_eq!(bytes[3], 0b0100_0010);
    }

    #[test]
    fn test_bitmask_without_structure_fails() {
        let mut descriptor = minimal_descriptor();
        descriptor.active_decode_targets_bitmask = Some(0b01);
        assert_eq!(
            marshal_dependency_descriptor(&descriptor, None),
            Err(MarshalError::MissingStructure)
        );
    }

    #[test]
    fn test_attached_structure_elides_all_active_bitmask() {
        let st = Arc::new(two_target_structure());
        let mut descriptor = minimal_descriptor();
        descriptor.attached_structure = Some(st.clone());
        descriptor.active_decode_targets_bitmask = Some(0b11);
        let with_all_active = marshal_dependency_descriptor(&descriptor, None).unwrap();

        descriptor.active_decode_targets_bitmask = None;
        let without = marshal_dependency_descriptor(&descriptor, None).unwrap();
        assert_eq!(with_all_active, without);
    }

    #[test]
    fn test_custom_dtis_flagged_on_deviation() {
        let st = two_target_structure();
        let mut descriptor = minimal_descriptor();
        descriptor.frame_dependencies.decode_target_indications =
            vec![Dti::Required, Dti::Required];
        let bytes = marshal_dependency_descriptor(&descriptor, Some(&st)).unwrap();
        // flags: custom_dtis set, then 11 11 for the two indications.
        assert_eq!(bytes[3], 0b0010_0111, "custom_dtis flag and 2x Required");
        assert_eq!(bytes[4], 0b1000_0000);
    }

    #[test]
    fn test_unresolvable_template_id() {
        let mut st = two_target_structure();
        st.structure_id = 0;
        let mut descriptor = minimal_descriptor();
        descriptor.template_id = 63;
        descriptor.active_decode_targets_bitmask = Some(0b01);
        assert_eq!(
            marshal_dependency_descriptor(&descriptor, Some(&st)),
            Err(MarshalError::TemplateNotFound(63))
        );
    }

    #[test]
    fn test_frame_diff_overflow() {
        let st = two_target_structure();
        let mut descriptor = minimal_descriptor();
        descriptor.frame_dependencies.frame_diffs = vec![5000];
        let err = marshal_dependency_descriptor(&descriptor, Some(&st)).unwrap_err();
        assert!(matches!(
            err,
            MarshalError::FieldOverflow {
                field: "frame_diff",
                ..
            }
        ));
    }

    #[test]
    fn test_structure_round_figures() {
        let st = Arc::new(two_target_structure());
        let mut descriptor = minimal_descriptor();
        descriptor.attached_structure = Some(st);
        let bytes = marshal_dependency_descriptor(&descriptor, None).unwrap();
        // mandatory(24) + flags(5) + id_offset(6) + dt_cnt(5) + layers(2+2)
        // + dtis(2*4) + fdiffs(1 + 6) + chains(ns(3)=2, ns(1)=0 per target,
        // 2x4-bit diffs) + resolutions flag(1)
        let bits: usize = 24 + 5 + 6 + 5 + 4 + 8 + 7 + (2 + 8) + 1;
        assert_eq!(bytes.len(), bits / 8 + usize::from(bits % 8 != 0));
    }

    #[test]
    fn test_non_symmetric_encoding() {
        let mut writer = BitWriter::new();
        // ns(3): values 0 -> "0", 1 -> "10", 2 -> "11"
        writer.write_non_symmetric(0, 3);
        writer.write_non_symmetric(1, 3);
        writer.write_non_symmetric(2, 3);
        assert_eq!(writer.bit_len(), 5);
        assert_eq!(writer.finish(), vec![0b0101_1000]);
    }

    #[test]
    fn test_non_symmetric_single_value_writes_nothing() {
        let mut writer = BitWriter::new();
        writer.write_non_symmetric(0, 1);
        assert_eq!(writer.bit_len(), 0);
    }
}
