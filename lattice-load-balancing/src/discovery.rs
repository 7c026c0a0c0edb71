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

//! Service discovery: the SDS cluster.
//!
//! Membership is pulled periodically from a registration endpoint
//! (`/v1/registration/<service>`) and reconciled into the cluster's
//! [`HostSet`]. Discovery failures are absorbed here: a counter moves and
//! the next refresh is scheduled; nothing escalates.

use crate::health_check::HealthCheck;
use crate::{ClusterStats, Host, HostSet, HostSetSnapshot};
use async_trait::async_trait;
use bytes::Bytes;
use lattice_core::runtime::RandomGenerator;
use lattice_error::{ErrorType::DiscoveryError, OrErr, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Watch used to stop discovery loops; flips to `true` on shutdown.
pub type ShutdownWatch = tokio::sync::watch::Receiver<bool>;

/// The transport that fetches registration documents. Implementations own
/// their own request timeout (1s in the stock HTTP client).
#[async_trait]
pub trait RegistrationSource: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Bytes>;
}

/// Discovery settings for one cluster.
#[derive(Debug, Clone, Deserialize)]
pub struct SdsConfig {
    pub service_name: String,
    /// The zone this proxy runs in; zone bucket 0 of every snapshot.
    #[serde(default)]
    pub local_zone_name: String,
    pub refresh_delay_ms: u64,
}

impl SdsConfig {
    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }
}

// The registration document: {"hosts": [{"ip_address", "port", "tags"}]}
#[derive(Deserialize)]
struct SdsResponse {
    hosts: Vec<SdsHost>,
}

#[derive(Deserialize)]
struct SdsHost {
    ip_address: String,
    port: u16,
    #[serde(default)]
    tags: SdsTags,
}

#[derive(Deserialize, Default)]
struct SdsTags {
    #[serde(default)]
    canary: bool,
    #[serde(default = "default_weight")]
    load_balancing_weight: u32,
    #[serde(default)]
    az: String,
}

fn default_weight() -> u32 {
    1
}

type InitializeCallback = Box<dyn FnOnce() + Send>;

/// A cluster whose membership is discovered over SDS.
pub struct SdsCluster {
    name: String,
    config: SdsConfig,
    source: Box<dyn RegistrationSource>,
    host_set: Arc<HostSet>,
    stats: ClusterStats,
    random: Mutex<Box<dyn RandomGenerator + Send>>,
    health_check: Option<Box<dyn HealthCheck>>,
    hosts: Mutex<Vec<Arc<Host>>>,
    initialize_callback: Mutex<Option<InitializeCallback>>,
}

impl SdsCluster {
    pub fn new(
        name: impl Into<String>,
        config: SdsConfig,
        source: Box<dyn RegistrationSource>,
        random: Box<dyn RandomGenerator + Send>,
        health_check: Option<Box<dyn HealthCheck>>,
    ) -> Self {
        let name = name.into();
        SdsCluster {
            stats: ClusterStats::new(&name),
            name,
            config,
            source,
            host_set: Arc::new(HostSet::new()),
            random: Mutex::new(random),
            health_check,
            hosts: Mutex::new(Vec::new()),
            initialize_callback: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_set(&self) -> Arc<HostSet> {
        self.host_set.clone()
    }

    pub fn stats(&self) -> &ClusterStats {
        &self.stats
    }

    /// Fires once, after the first refresh cycle (and, with a health
    /// checker configured, after its first full round).
    pub fn set_initialize_callback(&self, cb: InitializeCallback) {
        *self.initialize_callback.lock().unwrap() = Some(cb);
    }

    /// One discovery attempt: fetch, parse, reconcile, publish.
    pub async fn refresh_hosts(&self) {
        debug!("starting sds refresh for cluster: {}", self.name);
        self.stats.update_attempt.inc();
        let path = format!("/v1/registration/{}", self.config.service_name);
        match self.source.fetch(&path).await {
            Ok(body) => match self.parse_sds_response(&body) {
                Ok(()) => self.stats.update_success.inc(),
                Err(e) => {
                    warn!("sds parse failure for cluster {}: {}", self.name, e);
                    self.stats.update_failure.inc();
                }
            },
            Err(e) => {
                debug!("sds refresh failure for cluster {}: {}", self.name, e);
                self.stats.update_failure.inc();
            }
        }
    }

    fn parse_sds_response(&self, body: &[u8]) -> Result<()> {
        let response: SdsResponse =
            serde_json::from_slice(body).or_err(DiscoveryError, "parsing sds response")?;

        let mut discovered: Vec<(String, SocketAddr, SdsTags)> = Vec::new();
        for h in response.hosts {
            let ip: IpAddr = h
                .ip_address
                .parse()
                .or_err(DiscoveryError, "parsing sds host address")?;
            let addr = SocketAddr::new(ip, h.port);
            discovered.push((format!("tcp://{addr}"), addr, h.tags));
        }

        let mut current = self.hosts.lock().unwrap();
        let existing: HashMap<&str, &Arc<Host>> =
            current.iter().map(|h| (h.url(), h)).collect();

        let mut new_hosts: Vec<Arc<Host>> = Vec::with_capacity(discovered.len());
        let mut hosts_added: Vec<Arc<Host>> = Vec::new();
        for (url, addr, tags) in discovered {
            match existing.get(url.as_str()) {
                // a known host carries its health state across refreshes
                Some(host) => new_hosts.push((*host).clone()),
                None => {
                    let host = Arc::new(Host::new(
                        addr,
                        tags.canary,
                        tags.load_balancing_weight,
                        tags.az,
                    ));
                    if self.health_check.is_some() {
                        // not eligible until its first passing check
                        host.health().set_healthy(false);
                    }
                    hosts_added.push(host.clone());
                    new_hosts.push(host);
                }
            }
        }
        let hosts_removed: Vec<Arc<Host>> = current
            .iter()
            .filter(|h| !new_hosts.iter().any(|n| Arc::ptr_eq(n, h)))
            .cloned()
            .collect();

        if hosts_added.is_empty() && hosts_removed.is_empty() {
            return Ok(());
        }

        info!(
            "sds hosts changed for cluster: {} ({} hosts, +{} -{})",
            self.name,
            new_hosts.len(),
            hosts_added.len(),
            hosts_removed.len()
        );
        *current = new_hosts.clone();
        drop(current);

        let max_weight = new_hosts.iter().map(|h| h.weight()).max().unwrap_or(1);
        self.stats.max_host_weight.set(max_weight as u64);

        self.host_set.update_hosts(
            HostSetSnapshot::build(new_hosts, &self.config.local_zone_name),
            &hosts_added,
            &hosts_removed,
        );
        Ok(())
    }

    /// Check every host once and republish the healthy views when any
    /// health flipped.
    pub async fn run_health_check_round(&self) {
        let Some(check) = self.health_check.as_ref() else {
            return;
        };
        let hosts = self.hosts.lock().unwrap().clone();
        let mut flipped_any = false;
        for host in &hosts {
            let errored = check.check(host).await.err();
            let success = errored.is_none();
            let flipped = host.health().observe(success, check.health_threshold(success));
            if flipped {
                flipped_any = true;
                if let Some(e) = errored {
                    warn!("{:?} becomes unhealthy, {}", host, e);
                } else {
                    info!("{:?} becomes healthy", host);
                }
            }
        }
        if flipped_any {
            // membership is unchanged: swap the snapshot, no member update
            self.host_set.update_hosts(
                HostSetSnapshot::build(hosts, &self.config.local_zone_name),
                &[],
                &[],
            );
        }
    }

    fn maybe_fire_initialized(&self) {
        if let Some(cb) = self.initialize_callback.lock().unwrap().take() {
            debug!("cluster {} initialized", self.name);
            cb();
        }
    }

    /// The delay to the next refresh: the configured interval plus up to
    /// one interval of jitter.
    fn next_refresh_delay(&self) -> Duration {
        let delay = self.config.refresh_delay();
        let jitter_ms = if delay.as_millis() > 0 {
            self.random.lock().unwrap().random() % delay.as_millis() as u64
        } else {
            0
        };
        delay + Duration::from_millis(jitter_ms)
    }

    /// Periodic refresh until shutdown. Shutdown cancels an in-flight
    /// fetch and the pending timer.
    pub async fn run(&self, mut shutdown: ShutdownWatch) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = self.refresh_cycle() => {}
                _ = shutdown.changed() => {
                    debug!("sds refresh cancelled for cluster: {}", self.name);
                    return;
                }
            }
            let delay = self.next_refresh_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn refresh_cycle(&self) {
        self.refresh_hosts().await;
        self.run_health_check_round().await;
        // with a health checker the first round already ran above, so the
        // healthy view the callback observes is real
        self.maybe_fire_initialized();
    }
}
