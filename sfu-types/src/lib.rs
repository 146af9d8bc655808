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

//! Shared data model for the SFU video forwarding path.
//!
//! This crate holds the types that cross the boundary between the RTP
//! receive pipeline and the layer selection engine: the RTP header wrapper,
//! the video layer coordinate, and the parsed form of the AV1 Dependency
//! Descriptor header extension together with its serializer. The bit-level
//! *parser* for the extension lives upstream; the selection engine only ever
//! sees the parsed form, but it must be able to re-serialize a rewritten
//! descriptor, which is what [`marshal`] provides.

pub mod descriptor;
pub mod layer;
pub mod marshal;
pub mod packet;

pub use descriptor::{
    active_decode_target_bitmask, DecodeTargetLayer, DependencyDescriptor,
    DependencyDescriptorInfo, Dti, FrameDependencies, FrameDependencyStructure,
    FrameDependencyTemplate, RenderResolution,
};
pub use layer::VideoLayer;
pub use marshal::{marshal_dependency_descriptor, MarshalError};
pub use packet::{ExtPacket, RtpHeader};
