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

//! The registry of well-known header names.
//!
//! A header whose lowercase name appears here is stored in a fixed slot of
//! the map and reachable without walking the entry list. Everything else
//! is a dynamic header.

/// Well-known headers with dedicated storage slots.
///
/// The discriminant doubles as the slot index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum InlineHeader {
    // pseudo headers, never emitted on the HTTP/1.1 wire
    Authority,
    Method,
    Path,
    Scheme,
    Status,
    Version,
    // hop-by-hop and framing
    Connection,
    ContentLength,
    ContentType,
    Expect,
    KeepAlive,
    ProxyConnection,
    TransferEncoding,
    Upgrade,
    UserAgent,
    // forwarding
    ForwardedFor,
    ForwardedProto,
    RequestId,
    // gRPC bridging
    GrpcStatus,
    GrpcMessage,
    // proxy control headers
    InternalRequest,
    DownstreamServiceCluster,
    ExternalAddress,
    ForceTrace,
    RetryOn,
    UpstreamAltStatName,
    UpstreamRequestTimeoutMs,
    UpstreamRequestPerTryTimeoutMs,
    ExpectedRequestTimeoutMs,
}

pub(crate) const INLINE_COUNT: usize = InlineHeader::ExpectedRequestTimeoutMs as usize + 1;

impl InlineHeader {
    /// The canonical (lowercase) name of this header.
    pub fn name(self) -> &'static str {
        match self {
            InlineHeader::Authority => ":authority",
            InlineHeader::Method => ":method",
            InlineHeader::Path => ":path",
            InlineHeader::Scheme => ":scheme",
            InlineHeader::Status => ":status",
            InlineHeader::Version => ":version",
            InlineHeader::Connection => "connection",
            InlineHeader::ContentLength => "content-length",
            InlineHeader::ContentType => "content-type",
            InlineHeader::Expect => "expect",
            InlineHeader::KeepAlive => "keep-alive",
            InlineHeader::ProxyConnection => "proxy-connection",
            InlineHeader::TransferEncoding => "transfer-encoding",
            InlineHeader::Upgrade => "upgrade",
            InlineHeader::UserAgent => "user-agent",
            InlineHeader::ForwardedFor => "x-forwarded-for",
            InlineHeader::ForwardedProto => "x-forwarded-proto",
            InlineHeader::RequestId => "x-request-id",
            InlineHeader::GrpcStatus => "grpc-status",
            InlineHeader::GrpcMessage => "grpc-message",
            InlineHeader::InternalRequest => "x-envoy-internal",
            InlineHeader::DownstreamServiceCluster => "x-envoy-downstream-service-cluster",
            InlineHeader::ExternalAddress => "x-envoy-external-address",
            InlineHeader::ForceTrace => "x-envoy-force-trace",
            InlineHeader::RetryOn => "x-envoy-retry-on",
            InlineHeader::UpstreamAltStatName => "x-envoy-upstream-alt-stat-name",
            InlineHeader::UpstreamRequestTimeoutMs => "x-envoy-upstream-rq-timeout-ms",
            InlineHeader::UpstreamRequestPerTryTimeoutMs => {
                "x-envoy-upstream-rq-per-try-timeout-ms"
            }
            InlineHeader::ExpectedRequestTimeoutMs => "x-envoy-expected-rq-timeout-ms",
        }
    }

    /// Resolve a lowercase name to its inline slot.
    ///
    /// The legacy wire name `host` aliases `:authority` so that inbound
    /// HTTP/1.1 requests land in the same slot upper layers read.
    pub fn from_name(name: &str) -> Option<InlineHeader> {
        let h = match name {
            ":authority" | "host" => InlineHeader::Authority,
            ":method" => InlineHeader::Method,
            ":path" => InlineHeader::Path,
            ":scheme" => InlineHeader::Scheme,
            ":status" => InlineHeader::Status,
            ":version" => InlineHeader::Version,
            "connection" => InlineHeader::Connection,
            "content-length" => InlineHeader::ContentLength,
            "content-type" => InlineHeader::ContentType,
            "expect" => InlineHeader::Expect,
            "keep-alive" => InlineHeader::KeepAlive,
            "proxy-connection" => InlineHeader::ProxyConnection,
            "transfer-encoding" => InlineHeader::TransferEncoding,
            "upgrade" => InlineHeader::Upgrade,
            "user-agent" => InlineHeader::UserAgent,
            "x-forwarded-for" => InlineHeader::ForwardedFor,
            "x-forwarded-proto" => InlineHeader::ForwardedProto,
            "x-request-id" => InlineHeader::RequestId,
            "grpc-status" => InlineHeader::GrpcStatus,
            "grpc-message" => InlineHeader::GrpcMessage,
            "x-envoy-internal" => InlineHeader::InternalRequest,
            "x-envoy-downstream-service-cluster" => InlineHeader::DownstreamServiceCluster,
            "x-envoy-external-address" => InlineHeader::ExternalAddress,
            "x-envoy-force-trace" => InlineHeader::ForceTrace,
            "x-envoy-retry-on" => InlineHeader::RetryOn,
            "x-envoy-upstream-alt-stat-name" => InlineHeader::UpstreamAltStatName,
            "x-envoy-upstream-rq-timeout-ms" => InlineHeader::UpstreamRequestTimeoutMs,
            "x-envoy-upstream-rq-per-try-timeout-ms" => {
                InlineHeader::UpstreamRequestPerTryTimeoutMs
            }
            "x-envoy-expected-rq-timeout-ms" => InlineHeader::ExpectedRequestTimeoutMs,
            _ => return None,
        };
        Some(h)
    }

    /// The name emitted on the HTTP/1.1 wire, `None` for pseudo headers
    /// that must not appear there. `:authority` maps back to `host`.
    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            InlineHeader::Authority => Some("host"),
            _ => {
                let name = self.name();
                if name.starts_with(':') {
                    None
                } else {
                    Some(name)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known_names() {
        assert_eq!(
            InlineHeader::from_name("content-length"),
            Some(InlineHeader::ContentLength)
        );
        assert_eq!(InlineHeader::from_name("host"), Some(InlineHeader::Authority));
        assert_eq!(
            InlineHeader::from_name(":authority"),
            Some(InlineHeader::Authority)
        );
        assert_eq!(InlineHeader::from_name("x-custom"), None);
    }

    #[test]
    fn wire_names_skip_pseudo() {
        assert_eq!(InlineHeader::Method.wire_name(), None);
        assert_eq!(InlineHeader::Authority.wire_name(), Some("host"));
        assert_eq!(
            InlineHeader::TransferEncoding.wire_name(),
            Some("transfer-encoding")
        );
    }
}
