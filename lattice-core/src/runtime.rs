// Copyright 2026 Lattice maintainers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runtime key/value and randomness collaborators.
//!
//! The data plane consults these seams instead of global state so that
//! policies can be tuned live and tests can pin the answers.

use lattice_error::Result;
use rand::RngCore;

/// A key/value oracle for runtime-tunable knobs and feature rollouts.
pub trait RuntimeLoader {
    /// Integer knob with a default when unset.
    fn get_integer(&self, key: &str, default: u64) -> u64;

    /// Whether a feature keyed on a rollout percentage is enabled for
    /// this request. `default_pct` applies when the key is unset.
    fn feature_enabled(&self, key: &str, default_pct: u64) -> bool;
}

/// A runtime with nothing set: every knob reads its default.
pub struct NullRuntime;

impl RuntimeLoader for NullRuntime {
    fn get_integer(&self, _key: &str, default: u64) -> u64 {
        default
    }

    fn feature_enabled(&self, _key: &str, default_pct: u64) -> bool {
        default_pct >= 100
    }
}

/// Source of randomness for load balancing draws and request ids.
pub trait RandomGenerator {
    fn random(&mut self) -> u64;

    /// A fresh request id. The default implementation cannot fail; the
    /// `Result` is part of the interface so implementations backed by an
    /// entropy device can report exhaustion, which callers absorb.
    fn uuid(&mut self) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

/// The process RNG.
pub struct SystemRandom;

impl RandomGenerator for SystemRandom {
    fn random(&mut self) -> u64 {
        rand::thread_rng().next_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_runtime_reads_defaults() {
        let rt = NullRuntime;
        assert_eq!(rt.get_integer("upstream.healthy_panic_threshold", 50), 50);
        assert!(rt.feature_enabled("upstream.zone_routing.enabled", 100));
        assert!(!rt.feature_enabled("upstream.zone_routing.enabled", 0));
    }

    #[test]
    fn system_random_yields_uuids() {
        let mut random = SystemRandom;
        let a = random.uuid().unwrap();
        let b = random.uuid().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
