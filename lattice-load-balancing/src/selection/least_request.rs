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

//! Least-request selection: power-of-two-choices with weight stickiness.

use super::{LoadBalancer, LoadBalancerBase};
use crate::Host;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Sticky {
    last_host: Option<Arc<Host>>,
    hits_left: u32,
}

/// Picks the less loaded of two uniform draws.
///
/// When host weights are uneven (and weighting is enabled), the policy
/// switches to stickiness instead: one uniform draw that is then reused
/// for `weight - 1` further picks. Removing the sticky host from the set
/// resets the stickiness immediately.
pub struct LeastRequestLoadBalancer {
    base: LoadBalancerBase,
    sticky: Arc<Mutex<Sticky>>,
}

impl LeastRequestLoadBalancer {
    pub fn new(base: LoadBalancerBase) -> Self {
        let sticky = Arc::new(Mutex::new(Sticky::default()));
        let sticky_in_cb = sticky.clone();
        base.host_set()
            .add_member_update_cb(Box::new(move |_added, removed| {
                let mut sticky = sticky_in_cb.lock().unwrap();
                if let Some(last) = sticky.last_host.as_ref() {
                    if removed.iter().any(|host| Arc::ptr_eq(host, last)) {
                        sticky.hits_left = 0;
                        sticky.last_host = None;
                    }
                }
            }));
        LeastRequestLoadBalancer { base, sticky }
    }
}

impl LoadBalancer for LeastRequestLoadBalancer {
    fn choose_host(&mut self) -> Option<Arc<Host>> {
        let weight_imbalanced = self.base.stats().max_host_weight.value() != 1;
        let weight_enabled = self
            .base
            .runtime()
            .get_integer("upstream.weight_enabled", 1)
            != 0;

        {
            let mut sticky = self.sticky.lock().unwrap();
            if weight_imbalanced && weight_enabled && sticky.hits_left > 0 {
                sticky.hits_left -= 1;
                return sticky.last_host.clone();
            }
            // weights may have leveled out since the last pick; do not
            // serve a stale sticky host
            sticky.hits_left = 0;
            sticky.last_host = None;
        }

        let picked = self.base.hosts_to_use();
        let hosts = picked.hosts();
        if hosts.is_empty() {
            return None;
        }

        if weight_imbalanced && weight_enabled {
            let index = self.base.random() as usize % picked.hosts().len();
            let host = picked.hosts()[index].clone();
            let mut sticky = self.sticky.lock().unwrap();
            sticky.last_host = Some(host.clone());
            sticky.hits_left = host.weight() - 1;
            Some(host)
        } else {
            let first = picked.hosts()[self.base.random() as usize % picked.hosts().len()].clone();
            let second = picked.hosts()[self.base.random() as usize % picked.hosts().len()].clone();
            if first.stats().rq_active.value() < second.stats().rq_active.value() {
                Some(first)
            } else {
                Some(second)
            }
        }
    }
}
