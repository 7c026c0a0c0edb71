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

//! Random selection.

use super::{LoadBalancer, LoadBalancerBase};
use crate::Host;
use std::sync::Arc;

/// One uniform draw over the filtered host list.
pub struct RandomLoadBalancer {
    base: LoadBalancerBase,
}

impl RandomLoadBalancer {
    pub fn new(base: LoadBalancerBase) -> Self {
        RandomLoadBalancer { base }
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn choose_host(&mut self) -> Option<Arc<Host>> {
        let picked = self.base.hosts_to_use();
        let hosts = picked.hosts();
        if hosts.is_empty() {
            return None;
        }
        let index = self.base.random() as usize % hosts.len();
        Some(picked.hosts()[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;
    use crate::test_util::*;

    #[test]
    fn draw_is_uniform_over_the_list() {
        let hosts = host_block(4, 4, "zone-a");
        let expected: Vec<String> = hosts.iter().map(|h| h.url().to_string()).collect();
        let base = base_with(
            hosts,
            "",
            None,
            MockRandom::queued(&[0, 1, 2, 3, 5]),
            MockRuntime::default(),
        );
        let mut lb = RandomLoadBalancer::new(base);

        for want in [0usize, 1, 2, 3, 1] {
            let host = lb.choose_host().unwrap();
            assert_eq!(host.url(), expected[want]);
        }
    }

    #[test]
    fn empty_set_selects_nothing() {
        let base = base_with(
            Vec::new(),
            "",
            None,
            MockRandom::queued(&[7]),
            MockRuntime::default(),
        );
        let mut lb = RandomLoadBalancer::new(base);
        assert!(lb.choose_host().is_none());
    }
}
