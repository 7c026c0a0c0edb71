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

//! Round robin selection.

use super::{LoadBalancer, LoadBalancerBase};
use crate::Host;
use std::sync::Arc;

/// Walks the filtered host list with a monotone index.
pub struct RoundRobinLoadBalancer {
    base: LoadBalancerBase,
    rr_index: usize,
}

impl RoundRobinLoadBalancer {
    pub fn new(base: LoadBalancerBase) -> Self {
        RoundRobinLoadBalancer { base, rr_index: 0 }
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn choose_host(&mut self) -> Option<Arc<Host>> {
        let picked = self.base.hosts_to_use();
        let hosts = picked.hosts();
        if hosts.is_empty() {
            return None;
        }
        let host = hosts[self.rr_index % hosts.len()].clone();
        self.rr_index += 1;
        Some(host)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;
    use crate::test_util::*;

    #[test]
    fn cycles_through_hosts() {
        let hosts = host_block(3, 3, "zone-a");
        let base = base_with(
            hosts.clone(),
            "",
            None,
            MockRandom::queued(&[]),
            MockRuntime::default(),
        );
        let mut lb = RoundRobinLoadBalancer::new(base);

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(lb.choose_host().unwrap().url().to_string());
        }
        assert_eq!(seen[0], seen[3]);
        assert_eq!(seen[1], seen[4]);
        assert_eq!(seen[2], seen[5]);
        let distinct: std::collections::HashSet<_> = seen.iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn skips_unhealthy_hosts() {
        let hosts = host_block(4, 2, "zone-a");
        let base = base_with(
            hosts,
            "",
            None,
            MockRandom::queued(&[]),
            MockRuntime::default(),
        );
        let mut lb = RoundRobinLoadBalancer::new(base);
        for _ in 0..8 {
            assert!(lb.choose_host().unwrap().healthy());
        }
    }

    #[test]
    fn panic_mode_still_selects() {
        // all hosts unhealthy: panic serves from the full list anyway
        let hosts = host_block(4, 0, "zone-a");
        let base = base_with(
            hosts,
            "",
            None,
            MockRandom::queued(&[]),
            MockRuntime::default(),
        );
        let mut lb = RoundRobinLoadBalancer::new(base);
        assert!(lb.choose_host().is_some());
    }

    #[test]
    fn empty_set_selects_nothing() {
        let base = base_with(
            Vec::new(),
            "",
            None,
            MockRandom::queued(&[]),
            MockRuntime::default(),
        );
        let mut lb = RoundRobinLoadBalancer::new(base);
        assert!(lb.choose_host().is_none());
    }
}
