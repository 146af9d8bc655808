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

use sfu_types::MarshalError;
use thiserror::Error;

use crate::decision_cache::SelectorDecision;

/// Result type for selector operations
pub type Result<T> = std::result::Result<T, SelectorError>;

/// Errors that can occur while selecting video layers.
///
/// None of these are fatal; inside `select()` they all degrade to a drop
/// decision for the affected packet or frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectorError {
    #[error("packet has no dependency descriptor")]
    MissingDependencyDescriptor,

    #[error("frame {0} is outside the decision window")]
    DecisionTooOld(u64),

    #[error("frame {efn} was already decided as {existing:?}")]
    DecisionConflict {
        efn: u64,
        existing: SelectorDecision,
    },

    #[error("frame carries {available} decode target indications, target {target} is out of range")]
    DtiExtractionFailed { target: usize, available: usize },

    #[error("no active decode target at or below the target layer")]
    NoActiveTarget,

    #[error("decode target indication is not-present for the selected target")]
    TargetNotPresent,

    #[error("frame references dropped frame {0}")]
    NotDecodable(u64),

    #[error("failed to marshal dependency descriptor: {0}")]
    MarshalFailed(#[from] MarshalError),

    #[error("chain index {index} out of range, structure has {num_chains} chains")]
    ChainIndexOutOfRange { index: usize, num_chains: usize },

    #[error("invalid dependency structure: {0}")]
    InvalidStructure(String),
}
