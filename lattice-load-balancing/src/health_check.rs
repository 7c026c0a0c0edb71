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

//! Health check interface and methods.

use crate::Host;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use lattice_error::{Error, ErrorType::*, Result};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct HealthInner {
    /// Whether the host is healthy to serve traffic
    healthy: bool,
    /// The counter for stateful transition between healthy and unhealthy.
    /// While healthy this counts consecutive failed checks, and vice
    /// versa, so a flip happens only once a threshold is met.
    consecutive_counter: usize,
}

/// Health of a host, updatable atomically.
pub struct Health(ArcSwap<HealthInner>);

impl Default for Health {
    fn default() -> Self {
        Health(ArcSwap::new(Arc::new(HealthInner {
            healthy: true,
            consecutive_counter: 0,
        })))
    }
}

impl Health {
    pub fn healthy(&self) -> bool {
        self.0.load().healthy
    }

    /// Force the health state, resetting the streak.
    pub fn set_healthy(&self, healthy: bool) {
        self.0.store(Arc::new(HealthInner {
            healthy,
            consecutive_counter: 0,
        }));
    }

    /// Record one check result. Returns true when the health flipped.
    pub fn observe(&self, success: bool, flip_threshold: usize) -> bool {
        let inner = self.0.load();
        if inner.healthy == success {
            // on the expected side: any streak toward flipping is broken
            if inner.consecutive_counter != 0 {
                self.0.store(Arc::new(HealthInner {
                    healthy: inner.healthy,
                    consecutive_counter: 0,
                }));
            }
            return false;
        }
        let streak = inner.consecutive_counter + 1;
        if streak >= flip_threshold {
            self.0.store(Arc::new(HealthInner {
                healthy: success,
                consecutive_counter: 0,
            }));
            true
        } else {
            self.0.store(Arc::new(HealthInner {
                healthy: inner.healthy,
                consecutive_counter: streak,
            }));
            false
        }
    }
}

/// The interface to health-check hosts.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// `Ok(())` when the check passes.
    async fn check(&self, host: &Host) -> Result<()>;

    /// How many consecutive results are needed to flip the health in the
    /// given direction.
    fn health_threshold(&self, success: bool) -> usize;
}

/// A TCP connect health check.
pub struct TcpHealthCheck {
    /// Consecutive successes to flip from unhealthy to healthy.
    pub consecutive_success: usize,
    /// Consecutive failures to flip from healthy to unhealthy.
    pub consecutive_failure: usize,
    pub connect_timeout: Duration,
}

impl Default for TcpHealthCheck {
    fn default() -> Self {
        TcpHealthCheck {
            consecutive_success: 1,
            consecutive_failure: 1,
            connect_timeout: Duration::from_secs(1),
        }
    }
}

impl TcpHealthCheck {
    pub fn new() -> Box<Self> {
        Box::<TcpHealthCheck>::default()
    }
}

#[async_trait]
impl HealthCheck for TcpHealthCheck {
    fn health_threshold(&self, success: bool) -> usize {
        if success {
            self.consecutive_success
        } else {
            self.consecutive_failure
        }
    }

    async fn check(&self, host: &Host) -> Result<()> {
        let connect = tokio::net::TcpStream::connect(host.address());
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Error::e_because(ConnectError, "health check connect", e),
            Err(_) => Error::e_explain(ConnectError, "health check connect timeout"),
        }
    }
}
