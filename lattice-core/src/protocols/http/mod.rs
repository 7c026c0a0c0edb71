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

//! HTTP protocol layers.

pub mod conn_manager;
pub mod v1;

use crate::buffer::Buffer;
use lattice_http::HeaderMap;

/// The upper layer of a stream: receives decoded headers and body data.
///
/// `decode_headers(_, true)` or `decode_data(_, true)` marks the end of a
/// message; each decoded message produces exactly one end-of-stream call.
pub trait StreamDecoder {
    fn decode_headers(&mut self, headers: HeaderMap, end_stream: bool);
    fn decode_data(&mut self, data: &mut Buffer, end_stream: bool);
}

/// Outcome of feeding bytes to a codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchStatus {
    /// All consumable input was processed; more bytes are needed to make
    /// progress.
    NeedMoreData,
    /// A message completed and the decoder paused. Bytes may remain in the
    /// input buffer; the caller decides when to dispatch them, which is
    /// what keeps a connection at one in-flight request.
    Paused,
}
