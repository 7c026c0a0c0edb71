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

//! End-to-end: socket bytes through the connection, the server codec and
//! the header mutation pass, and a response back out.

use lattice_core::buffer::Buffer;
use lattice_core::connection::filter::{FilterStatus, ReadFilter};
use lattice_core::connection::{Connection, ConnectionEvent, ConnectionState};
use lattice_core::protocols::http::conn_manager::{
    mutate_request_headers, ConnManagerStats, ConnectionManagerConfig,
};
use lattice_core::protocols::http::v1::server::ServerCodec;
use lattice_core::protocols::http::{DispatchStatus, StreamDecoder};
use lattice_core::runtime::SystemRandom;
use lattice_http::HeaderMap;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::rc::Rc;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// The app half of a stream: runs the ingress mutation pass, remembers the
// request, and stages a response for the filter to encode once the codec
// pauses.
struct EchoApp {
    requests_seen: Rc<RefCell<Vec<HeaderMap>>>,
    ready_responses: Rc<RefCell<Vec<String>>>,
    config: ConnectionManagerConfig,
    stats: Rc<ConnManagerStats>,
    path: String,
}

impl StreamDecoder for EchoApp {
    fn decode_headers(&mut self, mut headers: HeaderMap, end_stream: bool) {
        let mut random = SystemRandom;
        mutate_request_headers(
            &mut headers,
            "203.0.113.7",
            false,
            &self.config,
            &mut random,
            &self.stats,
        );
        self.path = headers.path().to_string();
        self.requests_seen.borrow_mut().push(headers);
        if end_stream {
            self.ready_responses.borrow_mut().push(self.path.clone());
        }
    }

    fn decode_data(&mut self, _data: &mut Buffer, end_stream: bool) {
        if end_stream {
            self.ready_responses.borrow_mut().push(self.path.clone());
        }
    }
}

// The read filter that owns the codec and bridges it to the connection:
// dispatch buffered bytes, encode whatever the app staged, repeat while
// pipelined requests remain.
struct HttpReadFilter {
    codec: ServerCodec,
    ready_responses: Rc<RefCell<Vec<String>>>,
    pending_output: Rc<RefCell<Buffer>>,
    failed: Rc<RefCell<bool>>,
}

impl HttpReadFilter {
    fn encode_staged_responses(&mut self) {
        for path in self.ready_responses.borrow_mut().drain(..) {
            let body = format!("echo {path}");
            let mut headers = HeaderMap::new();
            headers.set(":status", "200");
            headers.set("content-length", body.len().to_string());
            self.codec.encode_headers(&headers, false).unwrap();
            let mut data = Buffer::from(body.as_str());
            self.codec.encode_data(&mut data, true);
        }
    }
}

impl ReadFilter for HttpReadFilter {
    fn on_data(&mut self, data: &mut Buffer) -> FilterStatus {
        loop {
            match self.codec.dispatch(data) {
                Ok(status) => {
                    // the response is ready synchronously here, so drain it
                    // and re-dispatch any pipelined bytes left behind
                    self.encode_staged_responses();
                    match status {
                        DispatchStatus::Paused if !data.is_empty() => continue,
                        _ => break,
                    }
                }
                Err(_) => {
                    *self.failed.borrow_mut() = true;
                    break;
                }
            }
        }
        self.pending_output
            .borrow_mut()
            .move_from(self.codec.output_mut());
        FilterStatus::Continue
    }
}

struct Harness {
    conn: Connection,
    peer: UnixStream,
    requests_seen: Rc<RefCell<Vec<HeaderMap>>>,
    pending_output: Rc<RefCell<Buffer>>,
    failed: Rc<RefCell<bool>>,
    events: Rc<RefCell<Vec<ConnectionEvent>>>,
}

fn harness() -> Harness {
    let (ours, peer) = UnixStream::pair().unwrap();
    ours.set_nonblocking(true).unwrap();
    peer.set_read_timeout(Some(std::time::Duration::from_secs(5)))
        .unwrap();
    let mut conn = Connection::new_server(ours.into(), "203.0.113.7".to_string());

    let requests_seen: Rc<RefCell<Vec<HeaderMap>>> = Rc::new(RefCell::new(Vec::new()));
    let ready_responses: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let stats = Rc::new(ConnManagerStats::new("http.ingress"));
    let config = ConnectionManagerConfig {
        use_remote_address: true,
        ..Default::default()
    };

    let app_requests = requests_seen.clone();
    let app_responses = ready_responses.clone();
    let codec = ServerCodec::new(Box::new(move || {
        Box::new(EchoApp {
            requests_seen: app_requests.clone(),
            ready_responses: app_responses.clone(),
            config: config.clone(),
            stats: stats.clone(),
            path: String::new(),
        }) as Box<dyn StreamDecoder>
    }));

    let pending_output: Rc<RefCell<Buffer>> = Rc::new(RefCell::new(Buffer::new()));
    let failed = Rc::new(RefCell::new(false));
    conn.add_read_filter(Box::new(HttpReadFilter {
        codec,
        ready_responses,
        pending_output: pending_output.clone(),
        failed: failed.clone(),
    }));

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    conn.add_connection_callbacks(Box::new(move |e| sink.borrow_mut().push(e)));

    Harness {
        conn,
        peer,
        requests_seen,
        pending_output,
        failed,
        events,
    }
}

impl Harness {
    // One turn of the event loop: read readiness, then flush whatever the
    // codec produced.
    fn turn(&mut self) {
        self.conn.on_read_ready();
        let mut out = self.pending_output.borrow_mut();
        if !out.is_empty() {
            self.conn.write(&mut out);
        }
        drop(out);
        self.conn.run_deferred();
    }

    fn read_response(&mut self) -> String {
        let mut buf = [0u8; 4096];
        let n = self.peer.read(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }
}

#[test]
fn get_request_round_trip() {
    init_log();
    let mut h = harness();
    h.peer
        .write_all(b"GET /hello HTTP/1.1\r\nHost: lattice.dev\r\n\r\n")
        .unwrap();
    h.turn();

    let response = h.read_response();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("echo /hello"), "{response}");

    // the mutation pass ran on the way in
    let requests = h.requests_seen.borrow();
    let headers = &requests[0];
    assert_eq!(headers.get("x-forwarded-for"), "203.0.113.7");
    assert_eq!(headers.get("x-forwarded-proto"), "http");
    assert_eq!(headers.get(":scheme"), "http");
    assert!(!headers.get("x-request-id").is_empty());
    assert_eq!(headers.authority(), "lattice.dev");
}

#[test]
fn post_body_round_trip() {
    init_log();
    let mut h = harness();
    h.peer
        .write_all(b"POST /upload HTTP/1.1\r\ncontent-length: 4\r\n\r\n")
        .unwrap();
    h.turn();
    // headers alone do not produce a response
    assert_eq!(h.requests_seen.borrow().len(), 1);

    h.peer.write_all(b"data").unwrap();
    h.turn();
    let response = h.read_response();
    assert!(response.ends_with("echo /upload"), "{response}");
}

#[test]
fn pipelined_requests_are_both_answered() {
    init_log();
    let mut h = harness();
    h.peer
        .write_all(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n")
        .unwrap();
    h.turn();

    let mut response = String::new();
    while !response.contains("echo /two") {
        response.push_str(&h.read_response());
    }
    assert!(response.contains("echo /one"));
    assert_eq!(h.requests_seen.borrow().len(), 2);
}

#[test]
fn malformed_request_gets_400_and_close() {
    init_log();
    let mut h = harness();
    h.peer.write_all(b"not an http request\r\n\r\n").unwrap();
    h.turn();

    let response = h.read_response();
    assert!(
        response.starts_with("HTTP/1.1 400 Bad Request\r\n"),
        "{response}"
    );
    assert!(*h.failed.borrow());

    // the filter reported the failure; the owner closes the connection
    h.conn
        .close(lattice_core::connection::ConnectionCloseType::FlushWrite);
    h.conn.run_deferred();
    assert_eq!(h.conn.state(), ConnectionState::Closed);
    assert_eq!(*h.events.borrow(), vec![ConnectionEvent::LocalClose]);

    // and the peer sees EOF after the error response
    let mut rest = Vec::new();
    h.peer.read_to_end(&mut rest).unwrap();
}

#[test]
fn peer_disconnect_mid_request_raises_remote_close() {
    init_log();
    let mut h = harness();
    h.peer
        .write_all(b"POST /partial HTTP/1.1\r\ncontent-length: 100\r\n\r\nonly-som")
        .unwrap();
    // shut down the peer before the body completes
    h.peer.shutdown(std::net::Shutdown::Both).unwrap();
    h.turn();

    assert_eq!(h.conn.state(), ConnectionState::Closed);
    assert_eq!(*h.events.borrow(), vec![ConnectionEvent::RemoteClose]);
    // no response was produced for the incomplete request
    assert!(h.pending_output.borrow().is_empty());
}
