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

//! HTTP/1.x server codec: decodes requests pushed in from the connection
//! and encodes responses into an output buffer.

use super::*;
use crate::buffer::{Buffer, ReservedWriter};
use crate::protocols::http::{DispatchStatus, StreamDecoder};
use lattice_error::{Error, ErrorType::*, Result};
use lattice_http::{HeaderMap, InlineHeader};
use log::{debug, trace};

/// Supplies the stream decoder for each request that starts on the
/// connection.
pub trait ServerCodecCallbacks {
    fn new_stream(&mut self) -> Box<dyn StreamDecoder>;
}

impl<F> ServerCodecCallbacks for F
where
    F: FnMut() -> Box<dyn StreamDecoder>,
{
    fn new_stream(&mut self) -> Box<dyn StreamDecoder> {
        self()
    }
}

enum DecodeState {
    Head { scanned: usize },
    Body(BodyDecoder),
}

/// The server side of an HTTP/1.1 connection.
///
/// `dispatch` consumes request bytes and pushes decoded events to the
/// current stream's [`StreamDecoder`]. The decoder pauses after every
/// complete request; the caller re-dispatches remaining bytes once the
/// response has been dealt with, which enforces one request at a time.
///
/// Encoded response bytes land in [`ServerCodec::output_mut`]; the caller
/// moves them to the connection's write path.
pub struct ServerCodec {
    callbacks: Box<dyn ServerCodecCallbacks>,
    output: Buffer,
    state: DecodeState,
    active: Option<Box<dyn StreamDecoder>>,
    deferred_end_stream_headers: Option<HeaderMap>,
    remote_complete: bool,
    started_response: bool,
    encode_complete: bool,
    framing: Option<EncodeFraming>,
    reset_called: bool,
    errored: bool,
}

impl ServerCodec {
    pub fn new(callbacks: Box<dyn ServerCodecCallbacks>) -> Self {
        ServerCodec {
            callbacks,
            output: Buffer::new(),
            state: DecodeState::Head { scanned: 0 },
            active: None,
            deferred_end_stream_headers: None,
            remote_complete: false,
            started_response: false,
            encode_complete: false,
            framing: None,
            reset_called: false,
            errored: false,
        }
    }

    /// Feed request bytes. Consumes from `data` exactly what was decoded.
    ///
    /// On a protocol error a minimal 400 with `connection: close` is
    /// placed on the output (unless a response already started) and the
    /// error surfaces to the caller, who closes the connection.
    pub fn dispatch(&mut self, data: &mut Buffer) -> Result<DispatchStatus> {
        if self.errored {
            return Error::e_explain(CodecProtocol, "dispatch on a failed codec");
        }
        trace!("parsing {} bytes", data.len());
        match self.do_dispatch(data) {
            Ok(status) => Ok(status),
            Err(e) => {
                self.errored = true;
                self.send_protocol_error();
                Err(e.into_down())
            }
        }
    }

    fn do_dispatch(&mut self, data: &mut Buffer) -> Result<DispatchStatus> {
        loop {
            match &mut self.state {
                DecodeState::Head { scanned } => {
                    let Some(head_len) = find_head_end(data, scanned)? else {
                        return Ok(DispatchStatus::NeedMoreData);
                    };
                    if self.on_head(data, head_len)? {
                        return Ok(DispatchStatus::Paused);
                    }
                }
                DecodeState::Body(decoder) => match decoder.decode(data)? {
                    BodyEvent::Data(mut chunk) => {
                        debug_assert!(self.deferred_end_stream_headers.is_none());
                        trace!("body size={}", chunk.len());
                        if let Some(active) = self.active.as_mut() {
                            active.decode_data(&mut chunk, false);
                        }
                    }
                    BodyEvent::NeedMoreData => return Ok(DispatchStatus::NeedMoreData),
                    BodyEvent::Complete => {
                        self.on_message_complete();
                        return Ok(DispatchStatus::Paused);
                    }
                },
            }
        }
    }

    // Parse and deliver a complete request head. Returns true when the
    // message completed along with it (bodyless request).
    fn on_head(&mut self, data: &mut Buffer, head_len: usize) -> Result<bool> {
        let mut parsed = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut parsed);
        let head = data.linearize(head_len)?;
        match req.parse(head) {
            Ok(httparse::Status::Complete(n)) => debug_assert_eq!(n, head_len),
            Ok(httparse::Status::Partial) => {
                return Error::e_explain(CodecProtocol, "truncated request head");
            }
            Err(e) => {
                debug!("invalid request head: {e}");
                return Error::e_explain(CodecProtocol, format!("http/1.1 protocol error: {e}"));
            }
        }

        let mut headers = HeaderMap::new();
        populate_headers(req.headers, &mut headers)?;
        headers.set_inline(InlineHeader::Path, req.path.unwrap_or(""));
        headers.set_inline(InlineHeader::Method, req.method.unwrap_or(""));
        headers.set_inline(InlineHeader::Version, version_string(req.version));

        let chunked = is_chunked(&headers);
        let content_length = content_length(&headers)?;
        data.drain(head_len)?;

        if !self.reset_called {
            self.active = Some(self.callbacks.new_stream());
        }
        self.remote_complete = false;

        // expect: 100-continue is answered right here: the only sane
        // answer before the request completes is to continue, and doing it
        // in the codec spares every upper layer from the dance
        if headers
            .get_inline(InlineHeader::Expect)
            .eq_ignore_ascii_case("100-continue")
        {
            self.output.add(b"HTTP/1.1 100 Continue\r\n\r\n");
            headers.remove_inline(InlineHeader::Expect);
        }

        // A body exists iff chunked encoding or a positive content-length.
        // Bodyless request heads are held back and delivered together with
        // end-of-stream so upper layers see HTTP/2-like events.
        if chunked {
            if let Some(active) = self.active.as_mut() {
                active.decode_headers(headers, false);
            }
            self.state = DecodeState::Body(BodyDecoder::new(BodyState::ChunkHead));
            Ok(false)
        } else if content_length.unwrap_or(0) > 0 {
            let cl = content_length.unwrap();
            if let Some(active) = self.active.as_mut() {
                active.decode_headers(headers, false);
            }
            self.state = DecodeState::Body(BodyDecoder::new(BodyState::ContentLength(cl)));
            Ok(false)
        } else {
            self.deferred_end_stream_headers = Some(headers);
            self.on_message_complete();
            Ok(true)
        }
    }

    fn on_message_complete(&mut self) {
        trace!("message complete");
        self.remote_complete = true;
        if let Some(headers) = self.deferred_end_stream_headers.take() {
            if let Some(active) = self.active.as_mut() {
                active.decode_headers(headers, true);
            }
        } else if let Some(active) = self.active.as_mut() {
            let mut empty = Buffer::new();
            active.decode_data(&mut empty, true);
        }
        self.state = DecodeState::Head { scanned: 0 };
        self.maybe_retire_request();
    }

    /// Encode the response head. `end_stream` marks a headers-only
    /// response and finishes the message.
    pub fn encode_headers(&mut self, headers: &HeaderMap, end_stream: bool) -> Result<()> {
        let status = headers.status();
        let code: u16 = status
            .parse()
            .map_err(|_| Error::explain(InvalidArgument, ":status must be numeric"))?;
        let reason = http::StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");

        self.started_response = true;
        let framing = {
            let mut w = ReservedWriter::new(&mut self.output);
            w.put_slice(b"HTTP/1.1 ");
            w.put_slice(status.as_bytes());
            w.put_u8(b' ');
            w.put_slice(reason.as_bytes());
            w.put_slice(CRLF);
            encode_header_block(headers, end_stream, &mut w)
        };
        self.framing = Some(framing);
        if end_stream {
            self.end_encode();
        }
        Ok(())
    }

    /// Encode response body bytes, consuming `data`.
    pub fn encode_data(&mut self, data: &mut Buffer, end_stream: bool) {
        let framing = self.framing.expect("encode_headers must come first");
        encode_body(framing, data, end_stream, &mut self.output);
        if end_stream {
            self.end_encode();
        }
    }

    fn end_encode(&mut self) {
        self.encode_complete = true;
        self.maybe_retire_request();
    }

    // Retire the stream once both sides finished. Responding before the
    // request completes keeps the stream around; closing the connection is
    // then the upper layer's call.
    fn maybe_retire_request(&mut self) {
        if self.remote_complete && self.encode_complete {
            self.active = None;
            self.remote_complete = false;
            self.started_response = false;
            self.encode_complete = false;
            self.framing = None;
        }
    }

    /// Abort the current stream: no further events are delivered and new
    /// requests on this connection are not decoded into streams.
    pub fn reset_stream(&mut self) {
        self.reset_called = true;
        self.active = None;
    }

    /// Bytes the codec wants on the wire. The caller moves them to the
    /// connection's write path.
    pub fn output_mut(&mut self) -> &mut Buffer {
        &mut self.output
    }

    // A protocol error may arrive before any stream exists, so the 400
    // goes straight onto the output, outside the stream abstraction.
    fn send_protocol_error(&mut self) {
        if !self.started_response {
            self.output.add(
                b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            );
        }
    }
}
