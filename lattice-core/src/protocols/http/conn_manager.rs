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

//! Header mutation applied by the connection manager on the way in and
//! out: hop-by-hop cleanup, forwarding headers, internal/edge
//! classification and request ids.

use crate::runtime::RandomGenerator;
use crate::stats::Counter;
use lattice_http::{HeaderMap, InlineHeader};
use log::debug;
use serde::Deserialize;
use std::net::IpAddr;

fn default_true() -> bool {
    true
}

/// Connection-manager settings, deserializable from the proxy config.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionManagerConfig {
    /// Create/append x-forwarded-for from the immediate peer. Off when a
    /// trusted front proxy already did.
    #[serde(default)]
    pub use_remote_address: bool,
    /// The service name stamped into x-envoy-downstream-service-cluster
    /// (and user-agent when absent).
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_true")]
    pub generate_request_id: bool,
    /// Headers that must never escape to external clients.
    #[serde(default)]
    pub internal_only_headers: Vec<String>,
    #[serde(default)]
    pub response_headers_to_remove: Vec<String>,
    #[serde(default)]
    pub response_headers_to_add: Vec<(String, String)>,
    /// Our own address, substituted into x-forwarded-for for loopback
    /// peers.
    #[serde(default = "default_local_address")]
    pub local_address: String,
}

fn default_local_address() -> String {
    "127.0.0.1".to_string()
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        ConnectionManagerConfig {
            use_remote_address: false,
            user_agent: None,
            generate_request_id: true,
            internal_only_headers: Vec::new(),
            response_headers_to_remove: Vec::new(),
            response_headers_to_add: Vec::new(),
            local_address: default_local_address(),
        }
    }
}

/// Counters owned by the connection manager.
pub struct ConnManagerStats {
    pub failed_generate_uuid: Counter,
}

impl ConnManagerStats {
    pub fn new(prefix: &str) -> Self {
        ConnManagerStats {
            failed_generate_uuid: Counter::new(format!("{prefix}.failed_generate_uuid")),
        }
    }
}

// proxy-control headers that external clients must not influence
const EXTERNAL_STRIP: &[InlineHeader] = &[
    InlineHeader::RetryOn,
    InlineHeader::UpstreamAltStatName,
    InlineHeader::UpstreamRequestTimeoutMs,
    InlineHeader::UpstreamRequestPerTryTimeoutMs,
    InlineHeader::ExpectedRequestTimeoutMs,
    InlineHeader::ForceTrace,
];

/// Whether the request originated inside the trust boundary: the freshest
/// x-forwarded-for entry is an RFC 1918 address.
pub fn is_internal_request(headers: &HeaderMap) -> bool {
    let xff = headers.get_inline(InlineHeader::ForwardedFor);
    let last = match xff.rsplit(',').next() {
        Some(entry) => entry.trim(),
        None => return false,
    };
    match last.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private(),
        _ => false,
    }
}

fn append_xff(headers: &mut HeaderMap, address: &str) {
    let current = headers.get_inline(InlineHeader::ForwardedFor);
    if current.is_empty() {
        headers.set_inline(InlineHeader::ForwardedFor, address);
    } else {
        let combined = format!("{current}, {address}");
        headers.set_inline(InlineHeader::ForwardedFor, combined);
    }
}

fn is_loopback(address: &str) -> bool {
    matches!(address.parse::<IpAddr>(), Ok(ip) if ip.is_loopback())
}

/// Mutate request headers on ingress.
///
/// `remote_address` is the immediate peer's IP; `ssl` whether the
/// downstream connection is TLS.
pub fn mutate_request_headers(
    headers: &mut HeaderMap,
    remote_address: &str,
    ssl: bool,
    config: &ConnectionManagerConfig,
    random: &mut dyn RandomGenerator,
    stats: &ConnManagerStats,
) {
    // Clean proxy headers.
    headers.remove_inline(InlineHeader::Connection);
    headers.remove_inline(InlineHeader::InternalRequest);
    headers.remove_inline(InlineHeader::KeepAlive);
    headers.remove_inline(InlineHeader::ProxyConnection);
    headers.remove_inline(InlineHeader::TransferEncoding);
    headers.remove_inline(InlineHeader::Upgrade);
    headers.remove_inline(InlineHeader::Version);

    let scheme = if ssl { "https" } else { "http" };

    // Using the remote address means we create/append XFF from our
    // immediate peer; otherwise a trusted peer already set it.
    if config.use_remote_address {
        if is_loopback(remote_address) {
            append_xff(headers, &config.local_address);
        } else {
            append_xff(headers, remote_address);
        }
        headers.set_inline(InlineHeader::ForwardedProto, scheme);
    }

    // A trusted proxy may have set x-forwarded-proto already; fill it in
    // if nobody did, then mirror it into :scheme.
    if !headers.has_inline(InlineHeader::ForwardedProto) {
        headers.set_inline(InlineHeader::ForwardedProto, scheme);
    }
    let proto = headers.get_inline(InlineHeader::ForwardedProto).to_string();
    headers.set_inline(InlineHeader::Scheme, proto);

    // XFF is now trustworthy, so the internal/edge split can be decided.
    let internal_request = is_internal_request(headers);
    let edge_request = !internal_request && config.use_remote_address;

    if internal_request {
        headers.set_inline(InlineHeader::InternalRequest, "true");
    } else {
        if edge_request {
            headers.remove_inline(InlineHeader::DownstreamServiceCluster);
        }
        for h in EXTERNAL_STRIP {
            headers.remove_inline(*h);
        }
        for name in &config.internal_only_headers {
            headers.remove(name);
        }
    }

    if let Some(user_agent) = &config.user_agent {
        headers.set_inline(InlineHeader::DownstreamServiceCluster, user_agent.clone());
        if !headers.has_inline(InlineHeader::UserAgent) {
            headers.set_inline(InlineHeader::UserAgent, user_agent.clone());
        }
    }

    // First ingress point into the trusted network records the peer.
    if edge_request {
        headers.set_inline(InlineHeader::ExternalAddress, remote_address);
    }

    // Edge requests always get a fresh id; internal ones keep what they
    // carry unless there is none.
    if config.generate_request_id
        && (edge_request || !headers.has_inline(InlineHeader::RequestId))
    {
        match random.uuid() {
            Ok(uuid) => headers.set_inline(InlineHeader::RequestId, uuid),
            Err(e) => {
                // not fatal, the request just goes through without an id
                debug!("request id generation failed: {e}");
                stats.failed_generate_uuid.inc();
            }
        }
    }
}

/// Mutate response headers on egress.
pub fn mutate_response_headers(
    response_headers: &mut HeaderMap,
    request_headers: &HeaderMap,
    config: &ConnectionManagerConfig,
) {
    response_headers.remove_inline(InlineHeader::Connection);
    response_headers.remove_inline(InlineHeader::TransferEncoding);
    response_headers.remove_inline(InlineHeader::Version);

    for name in &config.response_headers_to_remove {
        response_headers.remove(name);
    }
    for (name, value) in &config.response_headers_to_add {
        response_headers.add(name, value.clone());
    }

    if request_headers.has_inline(InlineHeader::ForceTrace) {
        response_headers.set_inline(
            InlineHeader::RequestId,
            request_headers.get_inline(InlineHeader::RequestId),
        );
    }
}
