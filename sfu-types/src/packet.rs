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

//! RTP packet wrappers as they flow through the video forwarding path.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::descriptor::DependencyDescriptorInfo;
use crate::layer::VideoLayer;

/// RTP header information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpHeader {
    /// RTP sequence number
    pub sequence_number: u16,
    /// RTP timestamp
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
    /// Payload type
    pub payload_type: u8,
    /// Marker bit
    pub marker: bool,
}

impl RtpHeader {
    pub fn new(
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        payload_type: u8,
        marker: bool,
    ) -> Self {
        Self {
            sequence_number,
            timestamp,
            ssrc,
            payload_type,
            marker,
        }
    }

    /// Check if this sequence number is newer than another
    pub fn is_sequence_newer(&self, other_seq: u16) -> bool {
        // Handle sequence number wrap-around
        let diff = self.sequence_number.wrapping_sub(other_seq);
        diff != 0 && diff < 0x8000
    }
}

/// An RTP packet after the receive pipeline has annotated it: depacketized
/// metadata, the observed layer, and (for DD streams) the parsed dependency
/// descriptor with its extended frame number.
///
/// This is the unit the layer selector consumes. The selector never touches
/// the payload; it only reads the header and descriptor and decides whether
/// the packet goes downstream.
#[derive(Debug, Clone)]
pub struct ExtPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
    /// Whether the depacketizer identified this packet as part of a keyframe.
    pub keyframe: bool,
    /// The layer the receive pipeline observed this packet on.
    pub video_layer: VideoLayer,
    /// Parsed dependency descriptor, when the stream carries one.
    pub dependency_descriptor: Option<DependencyDescriptorInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_newer_basic() {
        let header = RtpHeader::new(100, 0, 0x1234, 96, false);
        assert!(header.is_sequence_newer(99));
        assert!(!header.is_sequence_newer(100));
        assert!(!header.is_sequence_newer(101));
    }

    #[test]
    fn test_sequence_newer_across_wrap() {
        let header = RtpHeader::new(2, 0, 0x1234, 96, false);
        assert!(header.is_sequence_newer(65534));

        let header = RtpHeader::new(65534, 0, 0x1234, 96, false);
        assert!(!header.is_sequence_newer(2));
    }
}
