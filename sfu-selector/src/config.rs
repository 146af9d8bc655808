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

/// Configuration for a layer selector
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Capacity of the per-frame decision ring
    pub decision_cache_size: usize,
    /// Hysteresis margin; frames more than `size - margin` behind the
    /// highest decided frame are reported as too old
    pub decision_cache_margin: usize,
    /// Whether layers above the target may be forwarded
    pub allow_overshoot: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            decision_cache_size: 256,
            decision_cache_margin: 80,
            allow_overshoot: false,
        }
    }
}
