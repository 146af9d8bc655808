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

//! Per-packet video layer selection for scalable streams in an SFU.
//!
//! An SFU forwards encoded video without touching it, so subscribing a
//! receiver to "the 720p layer" means deciding, packet by packet, which
//! packets of the publisher's scalable stream that receiver needs. For
//! streams carrying the AV1 Dependency Descriptor this crate makes that
//! decision: it tracks the stream's decode targets and dependency chains,
//! remembers which frames were forwarded or dropped, and rewrites the
//! outgoing descriptor so the receiver sees a consistent set of active
//! decode targets.
//!
//! One [`selector::VideoLayerSelector`] exists per downstream track and is
//! driven from the track's packet pipeline. Streams without layer
//! information use the pass-through [`selector::NullSelector`]; the shared
//! [`selector::Base`] state moves between selector variants when a stream
//! starts or stops providing descriptors.

pub mod config;
pub mod decision_cache;
pub mod decode_target;
pub mod error;
pub mod frame_chain;
pub mod selector;
pub mod wraparound;

pub use config::SelectorConfig;
pub use decision_cache::{SelectorDecision, SelectorDecisionCache};
pub use error::{Result, SelectorError};
pub use selector::dependency_descriptor::DependencyDescriptorSelector;
pub use selector::{Base, NullSelector, SelectorResult, SelectorStats, VideoLayerSelector};
pub use wraparound::{WrapAround, WrapAround16, WrapAround32, WrapAroundUpdate};
