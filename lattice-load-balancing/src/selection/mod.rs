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

//! Host selection policies and their shared prefilter.
//!
//! Every policy picks from the list produced by
//! [`LoadBalancerBase::hosts_to_use`]: all hosts in panic mode, a zone's
//! healthy hosts when zone-aware routing engages, the flat healthy list
//! otherwise.

pub mod least_request;
pub mod random;
pub mod round_robin;

use crate::{ClusterStats, Host, HostSet, HostSetSnapshot};
use lattice_core::runtime::{RandomGenerator, RuntimeLoader};
use log::trace;
use std::sync::Arc;

/// A load balancer picks one upstream host per request.
pub trait LoadBalancer {
    /// `None` only when the cluster has no hosts at all.
    fn choose_host(&mut self) -> Option<Arc<Host>>;
}

/// Which host list of a snapshot the policies should draw from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HostSource {
    All,
    Healthy,
    HealthyZone(usize),
}

/// The prefiltered host list, pinned to the snapshot it points into.
pub struct HostsToUse {
    snapshot: Arc<HostSetSnapshot>,
    source: HostSource,
}

impl HostsToUse {
    pub fn hosts(&self) -> &[Arc<Host>] {
        match self.source {
            HostSource::All => &self.snapshot.hosts,
            HostSource::Healthy => &self.snapshot.healthy_hosts,
            HostSource::HealthyZone(i) => &self.snapshot.healthy_hosts_per_zone[i],
        }
    }
}

/// State shared by all policies: the host sets, runtime knobs, stats and
/// the RNG.
pub struct LoadBalancerBase {
    host_set: Arc<HostSet>,
    local_host_set: Option<Arc<HostSet>>,
    stats: ClusterStats,
    runtime: Arc<dyn RuntimeLoader + Send + Sync>,
    random: Box<dyn RandomGenerator + Send>,
}

impl LoadBalancerBase {
    pub fn new(
        host_set: Arc<HostSet>,
        local_host_set: Option<Arc<HostSet>>,
        stats: ClusterStats,
        runtime: Arc<dyn RuntimeLoader + Send + Sync>,
        random: Box<dyn RandomGenerator + Send>,
    ) -> Self {
        LoadBalancerBase {
            host_set,
            local_host_set,
            stats,
            runtime,
            random,
        }
    }

    pub fn host_set(&self) -> &Arc<HostSet> {
        &self.host_set
    }

    pub(crate) fn stats(&self) -> &ClusterStats {
        &self.stats
    }

    pub(crate) fn runtime(&self) -> &(dyn RuntimeLoader + Send + Sync) {
        &*self.runtime
    }

    pub(crate) fn random(&mut self) -> u64 {
        self.random.random()
    }

    // Too few healthy hosts means health checking can no longer be
    // trusted; all hosts become eligible.
    fn is_global_panic(&self, snapshot: &HostSetSnapshot) -> bool {
        let threshold = 100.min(
            self.runtime
                .get_integer("upstream.healthy_panic_threshold", 50),
        );
        let healthy_percent =
            100.0 * snapshot.healthy_hosts.len() as f64 / snapshot.hosts.len() as f64;
        if healthy_percent < threshold as f64 {
            self.stats.upstream_rq_lb_healthy_panic.inc();
            true
        } else {
            false
        }
    }

    fn early_exit_non_zone_routing(&self, snapshot: &HostSetSnapshot) -> bool {
        let number_of_zones = snapshot.healthy_hosts_per_zone.len();
        if number_of_zones < 2
            || !self
                .runtime
                .feature_enabled("upstream.zone_routing.enabled", 100)
        {
            return true;
        }

        if snapshot.healthy_hosts_per_zone[0].is_empty() {
            return true;
        }

        // Zone routing works against small clusters.
        let min_cluster_size = self
            .runtime
            .get_integer("upstream.zone_routing.min_cluster_size", 6);
        if (snapshot.healthy_hosts.len() as u64) < min_cluster_size {
            self.stats.zone_cluster_too_small.inc();
            return true;
        }

        // No local cluster to compare against, or it is itself in panic.
        let Some(local) = self.local_host_set.as_ref() else {
            self.stats.local_cluster_not_ok.inc();
            return true;
        };
        let local_snapshot = local.snapshot();
        if local_snapshot.hosts.is_empty() || self.is_global_panic(&local_snapshot) {
            self.stats.local_cluster_not_ok.inc();
            return true;
        }

        // NOTE: this guard reads inverted (equal zone counts bail out) but
        // it is what shipped, and downstream behavior is calibrated to it.
        if snapshot.healthy_hosts_per_zone.len() == local_snapshot.healthy_hosts_per_zone.len() {
            self.stats.zone_number_differs.inc();
            return true;
        }

        false
    }

    fn calculate_zone_percentage(hosts_per_zone: &[Vec<Arc<Host>>]) -> Vec<f64> {
        let total: usize = hosts_per_zone.iter().map(|z| z.len()).sum();
        if total == 0 {
            return vec![0.0; hosts_per_zone.len()];
        }
        hosts_per_zone
            .iter()
            .map(|z| z.len() as f64 / total as f64)
            .collect()
    }

    fn try_zone_aware_routing(&mut self, snapshot: &Arc<HostSetSnapshot>) -> HostSource {
        debug_assert!(snapshot.healthy_hosts_per_zone.len() >= 2);
        let local_snapshot = self
            .local_host_set
            .as_ref()
            .expect("checked by early exit")
            .snapshot();

        let local_percentage =
            Self::calculate_zone_percentage(&local_snapshot.healthy_hosts_per_zone);
        let upstream_percentage =
            Self::calculate_zone_percentage(&snapshot.healthy_hosts_per_zone);

        // If the local cluster has a lower share in our zone than the
        // upstream does, the local zone can absorb all of its own traffic.
        if local_percentage[0] < upstream_percentage[0]
            || (local_percentage[0] - upstream_percentage[0]).abs() < 1e-5
        {
            self.stats.zone_over_percentage.inc();
            return HostSource::HealthyZone(0);
        }

        // Local zone saturates first; the spill is distributed over the
        // residual capacity of the other zones.
        const MULTIPLIER: f64 = 10000.0;
        let mut distribution: Vec<u64> = Vec::with_capacity(local_percentage.len());
        distribution.push((upstream_percentage[0] * MULTIPLIER) as u64);
        for i in 1..local_percentage.len() {
            let upstream = upstream_percentage.get(i).copied().unwrap_or(0.0);
            let residual = upstream - local_percentage[i];
            let step = if residual > 0.0 {
                (residual * MULTIPLIER) as u64
            } else {
                0
            };
            distribution.push(distribution[i - 1] + step);
        }

        let threshold = self.random() % *distribution.last().unwrap();
        let mut pos = 0;
        while threshold > distribution[pos] {
            pos += 1;
        }
        let pos = pos.min(snapshot.healthy_hosts_per_zone.len() - 1);
        trace!("zone aware routing picked zone {pos}");
        HostSource::HealthyZone(pos)
    }

    /// The common prefilter every policy selects over.
    pub fn hosts_to_use(&mut self) -> HostsToUse {
        let snapshot = self.host_set.snapshot();
        debug_assert!(snapshot.healthy_hosts.len() <= snapshot.hosts.len());

        if snapshot.hosts.is_empty() || self.is_global_panic(&snapshot) {
            return HostsToUse {
                snapshot,
                source: HostSource::All,
            };
        }

        if self.early_exit_non_zone_routing(&snapshot) {
            return HostsToUse {
                snapshot,
                source: HostSource::Healthy,
            };
        }

        let source = self.try_zone_aware_routing(&snapshot);
        HostsToUse { snapshot, source }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::HostSetSnapshot;
    use lattice_core::runtime::{RandomGenerator, RuntimeLoader};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Runtime with pinned keys; unset keys read their default.
    #[derive(Default)]
    pub struct MockRuntime {
        pub integers: HashMap<String, u64>,
        pub features: HashMap<String, bool>,
    }

    impl RuntimeLoader for MockRuntime {
        fn get_integer(&self, key: &str, default: u64) -> u64 {
            self.integers.get(key).copied().unwrap_or(default)
        }

        fn feature_enabled(&self, key: &str, default_pct: u64) -> bool {
            self.features
                .get(key)
                .copied()
                .unwrap_or(default_pct >= 100)
        }
    }

    /// Hands out queued values, then zero.
    pub struct MockRandom {
        pub values: Mutex<VecDeque<u64>>,
    }

    impl MockRandom {
        pub fn queued(values: &[u64]) -> Box<Self> {
            Box::new(MockRandom {
                values: Mutex::new(values.iter().copied().collect()),
            })
        }
    }

    impl RandomGenerator for MockRandom {
        fn random(&mut self) -> u64 {
            self.values.lock().unwrap().pop_front().unwrap_or(0)
        }
    }

    pub fn publish(set: &HostSet, hosts: Vec<Arc<Host>>, local_zone: &str) {
        let added = hosts.clone();
        set.update_hosts(HostSetSnapshot::build(hosts, local_zone), &added, &[]);
    }

    pub fn base_with(
        hosts: Vec<Arc<Host>>,
        local_zone: &str,
        local_hosts: Option<Vec<Arc<Host>>>,
        random: Box<dyn RandomGenerator + Send>,
        runtime: MockRuntime,
    ) -> LoadBalancerBase {
        let host_set = Arc::new(HostSet::new());
        publish(&host_set, hosts, local_zone);
        let local_host_set = local_hosts.map(|hosts| {
            let set = Arc::new(HostSet::new());
            publish(&set, hosts, local_zone);
            set
        });
        LoadBalancerBase::new(
            host_set,
            local_host_set,
            ClusterStats::new("test"),
            Arc::new(runtime),
            random,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use crate::test_util::*;

    fn zoned_hosts(per_zone: &[(&str, usize)]) -> Vec<Arc<Host>> {
        let mut hosts = Vec::new();
        let mut port = 9000;
        for (zone, count) in per_zone {
            for _ in 0..*count {
                hosts.push(host("10.1.0.1", port, zone));
                port += 1;
            }
        }
        hosts
    }

    #[test]
    fn panic_mode_returns_all_hosts() {
        let hosts = host_block(10, 3, "zone-a");
        let mut base = base_with(hosts, "", None, MockRandom::queued(&[]), MockRuntime::default());

        // 30% healthy < 50% threshold
        let picked = base.hosts_to_use();
        assert_eq!(picked.hosts().len(), 10);
        assert_eq!(base.stats().upstream_rq_lb_healthy_panic.value(), 1);

        // the counter moves once per selection
        let _ = base.hosts_to_use();
        assert_eq!(base.stats().upstream_rq_lb_healthy_panic.value(), 2);
    }

    #[test]
    fn at_threshold_is_not_panic() {
        let hosts = host_block(10, 5, "zone-a");
        let mut base = base_with(hosts, "", None, MockRandom::queued(&[]), MockRuntime::default());
        let picked = base.hosts_to_use();
        assert_eq!(picked.hosts().len(), 5);
        assert_eq!(base.stats().upstream_rq_lb_healthy_panic.value(), 0);
    }

    #[test]
    fn panic_threshold_is_tunable() {
        let mut runtime = MockRuntime::default();
        runtime
            .integers
            .insert("upstream.healthy_panic_threshold".to_string(), 80);
        let hosts = host_block(10, 5, "zone-a");
        let mut base = base_with(hosts, "", None, MockRandom::queued(&[]), runtime);
        let picked = base.hosts_to_use();
        assert_eq!(picked.hosts().len(), 10);
        assert_eq!(base.stats().upstream_rq_lb_healthy_panic.value(), 1);
    }

    #[test]
    fn empty_cluster_returns_empty_all() {
        let mut base = base_with(
            Vec::new(),
            "",
            None,
            MockRandom::queued(&[]),
            MockRuntime::default(),
        );
        assert!(base.hosts_to_use().hosts().is_empty());
    }

    #[test]
    fn single_zone_skips_zone_routing() {
        let hosts = zoned_hosts(&[("zone-a", 8)]);
        let mut base = base_with(
            hosts.clone(),
            "zone-a",
            Some(hosts),
            MockRandom::queued(&[]),
            MockRuntime::default(),
        );
        let picked = base.hosts_to_use();
        assert_eq!(picked.hosts().len(), 8);
        assert_eq!(base.stats().zone_cluster_too_small.value(), 0);
        assert_eq!(base.stats().zone_over_percentage.value(), 0);
    }

    #[test]
    fn small_cluster_skips_zone_routing() {
        // 5 healthy < min_cluster_size 6; local topology differs so the
        // size check is what trips
        let hosts = zoned_hosts(&[("zone-a", 2), ("zone-b", 3)]);
        let local = zoned_hosts(&[("zone-a", 1)]);
        let mut base = base_with(
            hosts,
            "zone-a",
            Some(local),
            MockRandom::queued(&[]),
            MockRuntime::default(),
        );
        let picked = base.hosts_to_use();
        assert_eq!(picked.hosts().len(), 5);
        assert_eq!(base.stats().zone_cluster_too_small.value(), 1);
    }

    #[test]
    fn missing_local_cluster_skips_zone_routing() {
        let hosts = zoned_hosts(&[("zone-a", 4), ("zone-b", 4)]);
        let mut base = base_with(
            hosts,
            "zone-a",
            None,
            MockRandom::queued(&[]),
            MockRuntime::default(),
        );
        let _ = base.hosts_to_use();
        assert_eq!(base.stats().local_cluster_not_ok.value(), 1);
    }

    #[test]
    fn feature_flag_disables_zone_routing() {
        let mut runtime = MockRuntime::default();
        runtime
            .features
            .insert("upstream.zone_routing.enabled".to_string(), false);
        let hosts = zoned_hosts(&[("zone-a", 4), ("zone-b", 4)]);
        let local = zoned_hosts(&[("zone-a", 2)]);
        let mut base = base_with(hosts, "zone-a", Some(local), MockRandom::queued(&[]), runtime);
        let picked = base.hosts_to_use();
        assert_eq!(picked.hosts().len(), 8);
        assert_eq!(base.stats().zone_over_percentage.value(), 0);
    }

    #[test]
    fn matching_zone_counts_bail_out_as_shipped() {
        // the guard that reads inverted: equal local/upstream zone counts
        // opt out of zone routing and bump zone_number_differs
        let hosts = zoned_hosts(&[("zone-a", 2), ("zone-b", 8)]);
        let local = zoned_hosts(&[("zone-a", 2), ("zone-b", 2)]);
        let mut base = base_with(
            hosts,
            "zone-a",
            Some(local),
            MockRandom::queued(&[]),
            MockRuntime::default(),
        );
        let picked = base.hosts_to_use();
        assert_eq!(picked.hosts().len(), 10);
        assert_eq!(base.stats().zone_number_differs.value(), 1);
        assert_eq!(base.stats().zone_over_percentage.value(), 0);
    }

    #[test]
    fn local_zone_share_below_upstream_stays_local() {
        // local spreads over three zones (share 1/3 in ours), upstream has
        // half of its capacity here: the local zone absorbs its traffic
        let hosts = zoned_hosts(&[("zone-a", 5), ("zone-b", 5)]);
        let local = zoned_hosts(&[("zone-a", 2), ("zone-b", 2), ("zone-c", 2)]);
        let mut base = base_with(
            hosts,
            "zone-a",
            Some(local),
            MockRandom::queued(&[]),
            MockRuntime::default(),
        );
        let picked = base.hosts_to_use();
        assert_eq!(base.stats().zone_over_percentage.value(), 1);
        assert_eq!(picked.hosts().len(), 5);
        assert!(picked.hosts().iter().all(|h| h.zone() == "zone-a"));
    }

    #[test]
    fn local_zone_overflow_spills_by_residual_capacity() {
        // upstream U = [0.2, 0.8], local spread L = [0.5, 0.3, 0.2]:
        // distribution D = [2000, 7000, 7000]
        let hosts = zoned_hosts(&[("zone-a", 2), ("zone-b", 8)]);
        let local = zoned_hosts(&[("zone-a", 5), ("zone-b", 3), ("zone-c", 2)]);

        // threshold 1500 <= D[0]: stay in the local zone
        let mut base = base_with(
            hosts.clone(),
            "zone-a",
            Some(local.clone()),
            MockRandom::queued(&[1500]),
            MockRuntime::default(),
        );
        let picked = base.hosts_to_use();
        assert!(picked.hosts().iter().all(|h| h.zone() == "zone-a"));
        assert_eq!(base.stats().zone_over_percentage.value(), 0);

        // threshold 6000 lands in zone-b's residual capacity
        let mut base = base_with(
            hosts,
            "zone-a",
            Some(local),
            MockRandom::queued(&[6000]),
            MockRuntime::default(),
        );
        let picked = base.hosts_to_use();
        assert!(picked.hosts().iter().all(|h| h.zone() == "zone-b"));
        assert_eq!(picked.hosts().len(), 8);
    }
}
