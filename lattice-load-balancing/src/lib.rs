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

#![warn(clippy::all)]
//! # Lattice load balancing
//!
//! Cluster membership and host selection: [`Host`]s grouped into a
//! [`HostSet`] that publishes immutable snapshots, a family of selection
//! policies in [`selection`], service discovery in [`discovery`], and
//! health checking in [`health_check`].

use arc_swap::ArcSwap;
use lattice_core::stats::{Counter, Gauge};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

pub mod discovery;
pub mod health_check;
pub mod selection;

use health_check::Health;

pub mod prelude {
    pub use crate::selection::round_robin::RoundRobinLoadBalancer;
    pub use crate::selection::LoadBalancer;
    pub use crate::{Host, HostSet, HostSetSnapshot};
}

/// Per-host counters read by the selection policies.
pub struct HostStats {
    /// Requests currently in flight to this host.
    pub rq_active: Gauge,
}

/// An upstream endpoint.
///
/// Hosts are shared by reference: a host removed from its set stays alive
/// for whoever still holds it, counters and all.
pub struct Host {
    address: SocketAddr,
    url: String,
    canary: bool,
    weight: u32,
    zone: String,
    health: Health,
    stats: HostStats,
}

impl Host {
    pub fn new(address: SocketAddr, canary: bool, weight: u32, zone: impl Into<String>) -> Self {
        Host {
            url: format!("tcp://{address}"),
            address,
            canary,
            weight: weight.max(1),
            zone: zone.into(),
            health: Health::default(),
            stats: HostStats {
                rq_active: Gauge::new("host.rq_active"),
            },
        }
    }

    pub fn address(&self) -> &SocketAddr {
        &self.address
    }

    /// Stable identity of the host, `tcp://ip:port`.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn canary(&self) -> bool {
        self.canary
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn healthy(&self) -> bool {
        self.health.healthy()
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn stats(&self) -> &HostStats {
        &self.stats
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("url", &self.url)
            .field("zone", &self.zone)
            .field("weight", &self.weight)
            .field("healthy", &self.healthy())
            .finish()
    }
}

/// An immutable view of cluster membership.
///
/// Zone bucket 0 is the local zone; the other zones follow in name order.
/// With no local zone configured there are no zone buckets and zone-aware
/// routing never engages.
#[derive(Default)]
pub struct HostSetSnapshot {
    pub hosts: Vec<Arc<Host>>,
    pub healthy_hosts: Vec<Arc<Host>>,
    pub hosts_per_zone: Vec<Vec<Arc<Host>>>,
    pub healthy_hosts_per_zone: Vec<Vec<Arc<Host>>>,
}

impl HostSetSnapshot {
    /// Group `hosts` into the snapshot views.
    pub fn build(hosts: Vec<Arc<Host>>, local_zone: &str) -> Self {
        let healthy_hosts = healthy_host_list(&hosts);
        let (hosts_per_zone, healthy_hosts_per_zone) = if local_zone.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let mut zones = vec![local_zone.to_string()];
            let others: BTreeSet<&str> = hosts
                .iter()
                .map(|h| h.zone())
                .filter(|z| !z.is_empty() && *z != local_zone)
                .collect();
            zones.extend(others.into_iter().map(str::to_string));

            let per_zone: Vec<Vec<Arc<Host>>> = zones
                .iter()
                .map(|zone| {
                    hosts
                        .iter()
                        .filter(|h| h.zone() == zone)
                        .cloned()
                        .collect()
                })
                .collect();
            let healthy_per_zone = per_zone.iter().map(|z| healthy_host_list(z)).collect();
            (per_zone, healthy_per_zone)
        };
        HostSetSnapshot {
            hosts,
            healthy_hosts,
            hosts_per_zone,
            healthy_hosts_per_zone,
        }
    }
}

fn healthy_host_list(hosts: &[Arc<Host>]) -> Vec<Arc<Host>> {
    hosts.iter().filter(|h| h.healthy()).cloned().collect()
}

pub type MemberUpdateCb = Box<dyn Fn(&[Arc<Host>], &[Arc<Host>]) + Send + Sync>;

/// The published membership of a cluster.
///
/// Updates swap in a fresh [`HostSetSnapshot`]; readers holding the old
/// snapshot keep a consistent view until they drop it. Member-update
/// subscribers run synchronously inside [`HostSet::update_hosts`].
pub struct HostSet {
    current: ArcSwap<HostSetSnapshot>,
    callbacks: Mutex<Vec<MemberUpdateCb>>,
}

impl HostSet {
    pub fn new() -> Self {
        HostSet {
            current: ArcSwap::new(Arc::new(HostSetSnapshot::default())),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<HostSetSnapshot> {
        self.current.load_full()
    }

    pub fn add_member_update_cb(&self, cb: MemberUpdateCb) {
        self.callbacks.lock().unwrap().push(cb);
    }

    /// Publish a new snapshot and notify subscribers of the membership
    /// delta. Subscribers run before this returns.
    pub fn update_hosts(
        &self,
        snapshot: HostSetSnapshot,
        hosts_added: &[Arc<Host>],
        hosts_removed: &[Arc<Host>],
    ) {
        self.current.store(Arc::new(snapshot));
        if hosts_added.is_empty() && hosts_removed.is_empty() {
            return;
        }
        for cb in self.callbacks.lock().unwrap().iter() {
            cb(hosts_added, hosts_removed);
        }
    }
}

impl Default for HostSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters and gauges emitted by a cluster, named `cluster.<name>.*`.
#[derive(Clone)]
pub struct ClusterStats {
    pub upstream_rq_lb_healthy_panic: Counter,
    pub zone_cluster_too_small: Counter,
    pub zone_number_differs: Counter,
    pub local_cluster_not_ok: Counter,
    pub zone_over_percentage: Counter,
    pub update_attempt: Counter,
    pub update_success: Counter,
    pub update_failure: Counter,
    pub max_host_weight: Gauge,
}

impl ClusterStats {
    pub fn new(cluster_name: &str) -> Self {
        let c = |stat: &str| Counter::new(format!("cluster.{cluster_name}.{stat}"));
        ClusterStats {
            upstream_rq_lb_healthy_panic: c("upstream_rq_lb_healthy_panic"),
            zone_cluster_too_small: c("zone_cluster_too_small"),
            zone_number_differs: c("zone_number_differs"),
            local_cluster_not_ok: c("local_cluster_not_ok"),
            zone_over_percentage: c("zone_over_percentage"),
            update_attempt: c("update_attempt"),
            update_success: c("update_success"),
            update_failure: c("update_failure"),
            max_host_weight: Gauge::new(format!("cluster.{cluster_name}.max_host_weight")),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    pub fn host(ip: &str, port: u16, zone: &str) -> Arc<Host> {
        let addr: SocketAddr = format!("{ip}:{port}").parse().unwrap();
        Arc::new(Host::new(addr, false, 1, zone))
    }

    pub fn weighted_host(ip: &str, port: u16, zone: &str, weight: u32) -> Arc<Host> {
        let addr: SocketAddr = format!("{ip}:{port}").parse().unwrap();
        Arc::new(Host::new(addr, false, weight, zone))
    }

    /// n hosts in one zone, the first `healthy` of them healthy.
    pub fn host_block(n: usize, healthy: usize, zone: &str) -> Vec<Arc<Host>> {
        (0..n)
            .map(|i| {
                let h = host("10.0.0.1", 8000 + i as u16, zone);
                h.health().set_healthy(i < healthy);
                h
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn hosts_default_healthy() {
        let h = host("10.0.0.1", 80, "a");
        assert!(h.healthy());
        assert_eq!(h.url(), "tcp://10.0.0.1:80");
        assert_eq!(h.weight(), 1);
    }

    #[test]
    fn snapshot_groups_zones_local_first() {
        let mut hosts = host_block(2, 2, "zone-b");
        hosts.extend(host_block(2, 2, "zone-a"));
        hosts.extend(host_block(1, 0, "zone-c"));
        let snap = HostSetSnapshot::build(hosts, "zone-b");

        assert_eq!(snap.hosts.len(), 5);
        assert_eq!(snap.healthy_hosts.len(), 4);
        assert_eq!(snap.hosts_per_zone.len(), 3);
        // local zone first, others in name order
        assert!(snap.hosts_per_zone[0].iter().all(|h| h.zone() == "zone-b"));
        assert!(snap.hosts_per_zone[1].iter().all(|h| h.zone() == "zone-a"));
        assert!(snap.hosts_per_zone[2].iter().all(|h| h.zone() == "zone-c"));
        assert_eq!(snap.healthy_hosts_per_zone[2].len(), 0);
        assert!(snap.healthy_hosts.len() <= snap.hosts.len());
    }

    #[test]
    fn no_local_zone_means_no_zone_views() {
        let snap = HostSetSnapshot::build(host_block(3, 3, "zone-a"), "");
        assert!(snap.hosts_per_zone.is_empty());
        assert!(snap.healthy_hosts_per_zone.is_empty());
    }

    #[test]
    fn member_update_callbacks_run_synchronously() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let set = HostSet::new();
        let adds = Arc::new(AtomicUsize::new(0));
        let adds_in_cb = adds.clone();
        set.add_member_update_cb(Box::new(move |added, removed| {
            adds_in_cb.fetch_add(added.len(), Ordering::Relaxed);
            assert!(removed.is_empty());
        }));

        let hosts = host_block(2, 2, "a");
        set.update_hosts(
            HostSetSnapshot::build(hosts.clone(), ""),
            &hosts,
            &[],
        );
        // fired inside update_hosts
        assert_eq!(adds.load(Ordering::Relaxed), 2);
        assert_eq!(set.snapshot().hosts.len(), 2);

        // empty delta: snapshot swaps, no callback
        set.update_hosts(HostSetSnapshot::build(hosts, ""), &[], &[]);
        assert_eq!(adds.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn removed_host_outlives_the_set() {
        let set = HostSet::new();
        let hosts = host_block(1, 1, "a");
        let keep = hosts[0].clone();
        set.update_hosts(HostSetSnapshot::build(hosts.clone(), ""), &hosts, &[]);
        set.update_hosts(HostSetSnapshot::build(Vec::new(), ""), &[], &hosts);
        assert_eq!(set.snapshot().hosts.len(), 0);
        // the reference is still fully usable
        keep.stats().rq_active.inc();
        assert_eq!(keep.stats().rq_active.value(), 1);
    }
}
