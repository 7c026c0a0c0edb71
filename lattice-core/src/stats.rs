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

//! Named atomic counters and gauges.
//!
//! The metric backend is out of scope; these carry their full dotted name
//! so a backend can scrape them, and tests can read them directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Inner {
    name: String,
    value: AtomicU64,
}

/// A monotonically increasing counter.
#[derive(Clone)]
pub struct Counter(Arc<Inner>);

impl Counter {
    pub fn new(name: impl Into<String>) -> Self {
        Counter(Arc::new(Inner {
            name: name.into(),
            value: AtomicU64::new(0),
        }))
    }

    pub fn inc(&self) {
        self.0.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }
}

/// A value that can move both ways, e.g. in-flight request counts.
#[derive(Clone)]
pub struct Gauge(Arc<Inner>);

impl Gauge {
    pub fn new(name: impl Into<String>) -> Self {
        Gauge(Arc::new(Inner {
            name: name.into(),
            value: AtomicU64::new(0),
        }))
    }

    pub fn inc(&self) {
        self.0.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set(&self, v: u64) {
        self.0.value.store(v, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name(), self.value())
    }
}

impl std::fmt::Debug for Gauge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name(), self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_counts() {
        let c = Counter::new("cluster.web.update_attempt");
        c.inc();
        c.inc();
        assert_eq!(c.value(), 2);
        assert_eq!(c.name(), "cluster.web.update_attempt");
    }

    #[test]
    fn gauge_moves_both_ways() {
        let g = Gauge::new("host.rq_active");
        g.inc();
        g.inc();
        g.dec();
        assert_eq!(g.value(), 1);
    }
}
