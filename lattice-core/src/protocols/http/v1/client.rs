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

//! HTTP/1.x client codec: encodes requests and matches decoded responses
//! to pending requests in FIFO order.

use super::*;
use crate::buffer::{Buffer, ReservedWriter};
use crate::protocols::http::{DispatchStatus, StreamDecoder};
use lattice_error::{Error, ErrorType::*, Result};
use lattice_http::{HeaderMap, InlineHeader};
use log::{debug, trace};
use std::collections::VecDeque;

struct PendingResponse {
    decoder: Box<dyn StreamDecoder>,
    head_request: bool,
}

enum DecodeState {
    Head { scanned: usize },
    Body(BodyDecoder),
}

/// The client side of an HTTP/1.1 connection.
///
/// Each request is opened with [`ClientCodec::new_stream`], which queues
/// the decoder its response will be delivered to. Encoded request bytes
/// land in [`ClientCodec::output_mut`].
pub struct ClientCodec {
    output: Buffer,
    state: DecodeState,
    pending_responses: VecDeque<PendingResponse>,
    deferred_end_stream_headers: Option<HeaderMap>,
    framing: Option<EncodeFraming>,
    reset_called: bool,
    errored: bool,
}

impl ClientCodec {
    pub fn new() -> Self {
        ClientCodec {
            output: Buffer::new(),
            state: DecodeState::Head { scanned: 0 },
            pending_responses: VecDeque::new(),
            deferred_end_stream_headers: None,
            framing: None,
            reset_called: false,
            errored: false,
        }
    }

    /// Queue the decoder for the response to the request about to be
    /// encoded.
    pub fn new_stream(&mut self, decoder: Box<dyn StreamDecoder>) -> Result<()> {
        if self.reset_called {
            return Error::e_explain(CodecClient, "cannot create new streams after reset");
        }
        self.pending_responses.push_back(PendingResponse {
            decoder,
            head_request: false,
        });
        Ok(())
    }

    /// Encode the request head. `:method` and `:path` are required.
    pub fn encode_headers(&mut self, headers: &HeaderMap, end_stream: bool) -> Result<()> {
        let method = headers.method();
        let path = headers.path();
        if method.is_empty() || path.is_empty() {
            return Error::e_explain(CodecClient, ":method and :path must be specified");
        }
        if method == "HEAD" {
            // remembered so the response body can be suppressed
            if let Some(pending) = self.pending_responses.back_mut() {
                pending.head_request = true;
            }
        }

        let framing = {
            let mut w = ReservedWriter::new(&mut self.output);
            w.put_slice(method.as_bytes());
            w.put_u8(b' ');
            w.put_slice(path.as_bytes());
            w.put_slice(b" HTTP/1.1");
            w.put_slice(CRLF);
            encode_header_block(headers, end_stream, &mut w)
        };
        self.framing = Some(framing);
        if end_stream {
            self.framing = None;
        }
        Ok(())
    }

    /// Encode request body bytes, consuming `data`.
    pub fn encode_data(&mut self, data: &mut Buffer, end_stream: bool) {
        let framing = self.framing.expect("encode_headers must come first");
        encode_body(framing, data, end_stream, &mut self.output);
        if end_stream {
            self.framing = None;
        }
    }

    /// Feed response bytes from the connection.
    pub fn dispatch(&mut self, data: &mut Buffer) -> Result<DispatchStatus> {
        if self.errored {
            return Error::e_explain(CodecProtocol, "dispatch on a failed codec");
        }
        trace!("parsing {} bytes", data.len());
        match self.do_dispatch(data) {
            Ok(status) => Ok(status),
            Err(e) => {
                self.errored = true;
                Err(e.into_up())
            }
        }
    }

    /// The peer closed the connection. A body framed by connection close
    /// completes here.
    pub fn on_eof(&mut self) {
        if matches!(
            &self.state,
            DecodeState::Body(BodyDecoder {
                state: BodyState::UntilClose,
            })
        ) {
            self.on_message_complete();
        }
    }

    fn do_dispatch(&mut self, data: &mut Buffer) -> Result<DispatchStatus> {
        loop {
            match &mut self.state {
                DecodeState::Head { scanned } => {
                    let Some(head_len) = find_head_end(data, scanned)? else {
                        return Ok(DispatchStatus::NeedMoreData);
                    };
                    self.on_head(data, head_len)?;
                }
                DecodeState::Body(decoder) => match decoder.decode(data)? {
                    BodyEvent::Data(mut chunk) => {
                        debug_assert!(self.deferred_end_stream_headers.is_none());
                        if let Some(pending) = self.pending_responses.front_mut() {
                            pending.decoder.decode_data(&mut chunk, false);
                        }
                        // with no pending response the bytes are drained:
                        // this only happens after a stream reset
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

    fn on_head(&mut self, data: &mut Buffer, head_len: usize) -> Result<()> {
        let mut parsed = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut parsed);
        let head = data.linearize(head_len)?;
        match resp.parse(head) {
            Ok(httparse::Status::Complete(n)) => debug_assert_eq!(n, head_len),
            Ok(httparse::Status::Partial) => {
                return Error::e_explain(CodecProtocol, "truncated response head");
            }
            Err(e) => {
                debug!("invalid response head: {e}");
                return Error::e_explain(CodecProtocol, format!("http/1.1 protocol error: {e}"));
            }
        }

        let code = resp
            .code
            .ok_or_else(|| Error::explain(CodecProtocol, "response without status code"))?;
        let mut headers = HeaderMap::new();
        populate_headers(resp.headers, &mut headers)?;
        headers.set_inline(InlineHeader::Status, code.to_string());
        headers.set_inline(InlineHeader::Version, version_string(resp.version));

        let chunked = is_chunked(&headers);
        let content_length = content_length(&headers)?;
        data.drain(head_len)?;

        if self.pending_responses.is_empty() && !self.reset_called {
            // e.g. a server closing a kept-alive connection with an
            // unsolicited response
            return Error::e_explain(PrematureResponse, format!("status {code}"));
        }

        let head_request = self
            .pending_responses
            .front()
            .is_some_and(|p| p.head_request);
        let cannot_have_body = head_request || code == 204 || code == 304;

        if cannot_have_body {
            // held back and delivered with end-of-stream, body suppressed
            // even if the peer wrote one
            self.deferred_end_stream_headers = Some(headers);
            self.on_message_complete();
            return Ok(());
        }

        if chunked {
            if let Some(pending) = self.pending_responses.front_mut() {
                pending.decoder.decode_headers(headers, false);
            }
            self.state = DecodeState::Body(BodyDecoder::new(BodyState::ChunkHead));
        } else if let Some(cl) = content_length {
            if let Some(pending) = self.pending_responses.front_mut() {
                pending.decoder.decode_headers(headers, false);
            }
            if cl > 0 {
                self.state = DecodeState::Body(BodyDecoder::new(BodyState::ContentLength(cl)));
            } else {
                self.on_message_complete();
            }
        } else {
            // no framing at all: the body runs until the peer closes
            if let Some(pending) = self.pending_responses.front_mut() {
                pending.decoder.decode_headers(headers, false);
            }
            self.state = DecodeState::Body(BodyDecoder::new(BodyState::UntilClose));
        }
        Ok(())
    }

    fn on_message_complete(&mut self) {
        trace!("response complete");
        let pending = self.pending_responses.pop_front();
        let deferred = self.deferred_end_stream_headers.take();
        if let Some(mut pending) = pending {
            match deferred {
                Some(headers) => pending.decoder.decode_headers(headers, true),
                None => {
                    let mut empty = Buffer::new();
                    pending.decoder.decode_data(&mut empty, true);
                }
            }
        }
        self.state = DecodeState::Head { scanned: 0 };
    }

    /// Abort all pending responses. Bytes that still arrive are drained
    /// without raising events.
    pub fn reset_stream(&mut self) {
        self.reset_called = true;
        self.pending_responses.clear();
    }

    /// Bytes the codec wants on the wire.
    pub fn output_mut(&mut self) -> &mut Buffer {
        &mut self.output
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::server::test_support::{Collect, Event};
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn collector() -> (Box<dyn StreamDecoder>, Rc<RefCell<Vec<Event>>>) {
        let events: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
        (
            Box::new(Collect {
                events: events.clone(),
            }),
            events,
        )
    }

    fn request(method: &str, path: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.set(":method", method);
        h.set(":path", path);
        h
    }

    #[test]
    fn encode_request_line_and_headers() {
        init_log();
        let mut codec = ClientCodec::new();
        let (decoder, _) = collector();
        codec.new_stream(decoder).unwrap();
        let mut headers = request("GET", "/status");
        headers.set(":authority", "upstream.local");
        codec.encode_headers(&headers, true).unwrap();
        let wire = String::from_utf8(codec.output_mut().to_vec()).unwrap();
        assert_eq!(
            wire,
            "GET /status HTTP/1.1\r\nhost: upstream.local\r\ncontent-length: 0\r\n\r\n"
        );
    }

    #[test]
    fn encode_requires_method_and_path() {
        init_log();
        let mut codec = ClientCodec::new();
        let mut headers = HeaderMap::new();
        headers.set(":method", "GET");
        let err = codec.encode_headers(&headers, true).unwrap_err();
        assert_eq!(err.etype(), &CodecClient);
    }

    #[test]
    fn encode_streaming_request_uses_chunked() {
        init_log();
        let mut codec = ClientCodec::new();
        let (decoder, _) = collector();
        codec.new_stream(decoder).unwrap();
        let headers = request("POST", "/ingest");
        codec.encode_headers(&headers, false).unwrap();
        let mut body = Buffer::from(&b"abc"[..]);
        codec.encode_data(&mut body, true);
        let wire = String::from_utf8(codec.output_mut().to_vec()).unwrap();
        assert_eq!(
            wire,
            "POST /ingest HTTP/1.1\r\ntransfer-encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn response_with_content_length() {
        init_log();
        let mut codec = ClientCodec::new();
        let (decoder, events) = collector();
        codec.new_stream(decoder).unwrap();
        codec.encode_headers(&request("GET", "/"), true).unwrap();

        let mut input = Buffer::from("HTTP/1.1 200 OK\r\ncontent-length: 4\r\n\r\nbody");
        assert_eq!(codec.dispatch(&mut input).unwrap(), DispatchStatus::Paused);
        let events = events.borrow();
        match &events[0] {
            Event::Headers(h, false) => assert_eq!(h.status(), "200"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(events[1], Event::Data(b"body".to_vec(), false));
        assert_eq!(events[2], Event::Data(vec![], true));
    }

    #[test]
    fn head_response_defers_headers_and_suppresses_body() {
        init_log();
        let mut codec = ClientCodec::new();
        let (decoder, events) = collector();
        codec.new_stream(decoder).unwrap();
        codec.encode_headers(&request("HEAD", "/obj"), true).unwrap();

        // the peer advertises a body it will not send
        let mut input = Buffer::from("HTTP/1.1 200 OK\r\ncontent-length: 1024\r\n\r\n");
        codec.dispatch(&mut input).unwrap();
        let events = events.borrow();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Headers(h, true) => assert_eq!(h.get("content-length"), "1024"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_204_and_304_have_no_body() {
        init_log();
        for status in ["204 No Content", "304 Not Modified"] {
            let mut codec = ClientCodec::new();
            let (decoder, events) = collector();
            codec.new_stream(decoder).unwrap();
            codec.encode_headers(&request("GET", "/"), true).unwrap();
            let mut input = Buffer::from(format!("HTTP/1.1 {status}\r\n\r\n").as_str());
            codec.dispatch(&mut input).unwrap();
            let events = events.borrow();
            assert_eq!(events.len(), 1);
            assert!(matches!(&events[0], Event::Headers(_, true)));
        }
    }

    #[test]
    fn premature_response_is_an_error() {
        init_log();
        let mut codec = ClientCodec::new();
        let mut input = Buffer::from("HTTP/1.1 408 Request Timeout\r\ncontent-length: 0\r\n\r\n");
        let err = codec.dispatch(&mut input).unwrap_err();
        assert_eq!(err.etype(), &PrematureResponse);
    }

    #[test]
    fn bytes_after_reset_are_drained_silently() {
        init_log();
        let mut codec = ClientCodec::new();
        let (decoder, events) = collector();
        codec.new_stream(decoder).unwrap();
        codec.encode_headers(&request("GET", "/"), true).unwrap();
        codec.reset_stream();

        let mut input = Buffer::from("HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok");
        assert_eq!(codec.dispatch(&mut input).unwrap(), DispatchStatus::Paused);
        assert!(input.is_empty());
        assert!(events.borrow().is_empty());

        let err = codec.new_stream(Box::new(Collect {
            events: events.clone(),
        }));
        assert_eq!(err.unwrap_err().etype(), &CodecClient);
    }

    #[test]
    fn responses_match_requests_fifo() {
        init_log();
        let mut codec = ClientCodec::new();
        let (first, first_events) = collector();
        let (second, second_events) = collector();
        codec.new_stream(first).unwrap();
        codec.encode_headers(&request("GET", "/1"), true).unwrap();
        codec.new_stream(second).unwrap();
        codec.encode_headers(&request("GET", "/2"), true).unwrap();

        let mut input = Buffer::from(
            "HTTP/1.1 200 OK\r\ncontent-length: 1\r\n\r\na\
             HTTP/1.1 500 Internal Server Error\r\ncontent-length: 1\r\n\r\nb",
        );
        codec.dispatch(&mut input).unwrap();
        codec.dispatch(&mut input).unwrap();

        match &first_events.borrow()[0] {
            Event::Headers(h, _) => assert_eq!(h.status(), "200"),
            other => panic!("unexpected {other:?}"),
        };
        match &second_events.borrow()[0] {
            Event::Headers(h, _) => assert_eq!(h.status(), "500"),
            other => panic!("unexpected {other:?}"),
        };
    }

    #[test]
    fn encoded_headers_survive_a_decode_round_trip() {
        init_log();
        // server-encoded response, read back by the client codec: same
        // map modulo lowercasing, order of repeated names preserved
        let mut server = super::super::server::test_support::collecting_codec().0;
        let mut headers = HeaderMap::new();
        headers.set(":status", "200");
        headers.set("Content-Length", "0");
        headers.add("X-Trace", "one");
        headers.add("x-trace", "two");
        headers.set("content-type", "text/plain");
        server.encode_headers(&headers, true).unwrap();

        let mut client = ClientCodec::new();
        let (decoder, events) = collector();
        client.new_stream(decoder).unwrap();
        client.encode_headers(&request("GET", "/"), true).unwrap();
        client.dispatch(server.output_mut()).unwrap();

        let events = events.borrow();
        match &events[0] {
            Event::Headers(parsed, false) => {
                let mut seen = Vec::new();
                parsed.iterate(|name, value| {
                    if !name.starts_with(':') {
                        seen.push((name.to_string(), value.to_string()));
                    }
                });
                let mut wrote = Vec::new();
                headers.iterate(|name, value| {
                    if !name.starts_with(':') {
                        wrote.push((name.to_string(), value.to_string()));
                    }
                });
                assert_eq!(seen, wrote);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn body_until_close_ends_on_eof() {
        init_log();
        let mut codec = ClientCodec::new();
        let (decoder, events) = collector();
        codec.new_stream(decoder).unwrap();
        codec.encode_headers(&request("GET", "/stream"), true).unwrap();

        let mut input = Buffer::from("HTTP/1.0 200 OK\r\n\r\nchunk-of");
        assert_eq!(
            codec.dispatch(&mut input).unwrap(),
            DispatchStatus::NeedMoreData
        );
        let mut more = Buffer::from("-bytes");
        codec.dispatch(&mut more).unwrap();
        codec.on_eof();

        let events = events.borrow();
        assert!(matches!(&events[0], Event::Headers(_, false)));
        assert_eq!(events[1], Event::Data(b"chunk-of".to_vec(), false));
        assert_eq!(events[2], Event::Data(b"-bytes".to_vec(), false));
        assert_eq!(events[3], Event::Data(vec![], true));
    }
}
