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
#![allow(clippy::new_without_default)]

//! # Lattice core
//!
//! The data plane of an HTTP/1.1 reverse proxy, bottom up:
//!
//! - [`buffer`]: a scatter/gather byte queue with two-phase reserve/commit
//!   append and non-blocking socket I/O.
//! - [`connection`]: the fd-owning connection state machine, its filter
//!   pipeline and the tokio readiness driver.
//! - [`protocols::http::v1`]: an incremental, push-based HTTP/1.1 codec.
//! - [`protocols::http::conn_manager`]: the ingress/egress header
//!   mutation passes applied by the connection manager.
//!
//! Everything here runs single-threaded on a worker's event loop; there
//! are no locks on the request path.

pub mod buffer;
pub mod connection;
pub mod protocols;
pub mod runtime;
pub mod stats;

pub use lattice_error::{ErrorType::*, *};
