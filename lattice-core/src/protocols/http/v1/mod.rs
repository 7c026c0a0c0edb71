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

//! HTTP/1.x codec: incremental decode shared by the server and client
//! sides, and the common wire-encode helpers.

pub mod client;
pub mod server;

use crate::buffer::{Buffer, ReservedWriter};
use lattice_error::{Error, ErrorType::*, Result};
use lattice_http::{HeaderMap, InlineHeader};
use log::trace;

pub(crate) const MAX_HEADERS: usize = 128;
pub(crate) const MAX_HEADER_SIZE: usize = 1048575;
// bound on trailer bytes buffered after the terminating chunk
pub(crate) const TRAILER_SIZE_LIMIT: usize = 1024 * 64;

pub(crate) const CRLF: &[u8] = b"\r\n";
pub(crate) const HEAD_END: &[u8] = b"\r\n\r\n";
pub(crate) const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Incrementally locate the end of a message head (`CRLFCRLF`) in `data`.
///
/// `scanned` carries how far previous calls already looked, so repeated
/// partial reads do not rescan from the start.
pub(crate) fn find_head_end(data: &Buffer, scanned: &mut usize) -> Result<Option<usize>> {
    let from = scanned.saturating_sub(HEAD_END.len() - 1);
    match data.search(HEAD_END, from) {
        Some(pos) => Ok(Some(pos + HEAD_END.len())),
        None => {
            if data.len() > MAX_HEADER_SIZE {
                return Error::e_explain(
                    CodecProtocol,
                    format!("message head larger than {MAX_HEADER_SIZE}"),
                );
            }
            *scanned = data.len();
            Ok(None)
        }
    }
}

pub(crate) fn version_string(minor: Option<u8>) -> &'static str {
    // anything that is not 1.1 collapses to 1.0; upper layers only care
    // whether the message is HTTP/1.1
    match minor {
        Some(1) => "HTTP/1.1",
        _ => "HTTP/1.0",
    }
}

pub(crate) fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_inline(InlineHeader::TransferEncoding)
        .eq_ignore_ascii_case("chunked")
}

pub(crate) fn content_length(headers: &HeaderMap) -> Result<Option<u64>> {
    if !headers.has_inline(InlineHeader::ContentLength) {
        return Ok(None);
    }
    let value = headers.get_inline(InlineHeader::ContentLength);
    match value.parse::<u64>() {
        Ok(n) => Ok(Some(n)),
        Err(_) => Error::e_explain(CodecProtocol, format!("bad content-length: {value}")),
    }
}

/// How the body of the message being decoded is framed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum BodyState {
    /// content-length framing: bytes left to read
    ContentLength(u64),
    /// chunked framing: at a chunk-size line
    ChunkHead,
    /// chunked framing: bytes left in the current chunk
    ChunkData(u64),
    /// chunked framing: at the CRLF that ends a chunk
    ChunkDataEnd,
    /// chunked framing: after the terminating chunk, consuming the
    /// (ignored) trailer section up to its final CRLF
    Trailers { scanned: usize },
    /// no framing: the body runs until the peer closes
    UntilClose,
}

#[derive(Debug)]
pub(crate) enum BodyEvent {
    /// A piece of body, moved out of the input.
    Data(Buffer),
    /// The message is complete.
    Complete,
    /// Out of input.
    NeedMoreData,
}

/// The body half of the decoder. Stepped over the input buffer until it
/// reports `Complete` or runs out of bytes.
pub(crate) struct BodyDecoder {
    pub(crate) state: BodyState,
}

impl BodyDecoder {
    pub(crate) fn new(state: BodyState) -> Self {
        BodyDecoder { state }
    }

    pub(crate) fn decode(&mut self, data: &mut Buffer) -> Result<BodyEvent> {
        match self.state {
            BodyState::ContentLength(remaining) => {
                if remaining == 0 {
                    return Ok(BodyEvent::Complete);
                }
                if data.is_empty() {
                    return Ok(BodyEvent::NeedMoreData);
                }
                let take = (data.len() as u64).min(remaining);
                let mut chunk = Buffer::new();
                chunk.move_from_n(data, take as usize)?;
                self.state = BodyState::ContentLength(remaining - take);
                Ok(BodyEvent::Data(chunk))
            }
            BodyState::ChunkHead => {
                if data.is_empty() {
                    return Ok(BodyEvent::NeedMoreData);
                }
                let head = data.linearize(data.len())?;
                match httparse::parse_chunk_size(head) {
                    Ok(httparse::Status::Complete((consumed, size))) => {
                        data.drain(consumed)?;
                        trace!("chunk head: size={size}");
                        if size == 0 {
                            self.state = BodyState::Trailers { scanned: 0 };
                        } else {
                            self.state = BodyState::ChunkData(size);
                        }
                        self.decode(data)
                    }
                    Ok(httparse::Status::Partial) => Ok(BodyEvent::NeedMoreData),
                    Err(_) => Error::e_explain(CodecProtocol, "invalid chunk size"),
                }
            }
            BodyState::ChunkData(remaining) => {
                if data.is_empty() {
                    return Ok(BodyEvent::NeedMoreData);
                }
                let take = (data.len() as u64).min(remaining);
                let mut chunk = Buffer::new();
                chunk.move_from_n(data, take as usize)?;
                self.state = if take == remaining {
                    BodyState::ChunkDataEnd
                } else {
                    BodyState::ChunkData(remaining - take)
                };
                Ok(BodyEvent::Data(chunk))
            }
            BodyState::ChunkDataEnd => {
                if data.len() < CRLF.len() {
                    return Ok(BodyEvent::NeedMoreData);
                }
                let bytes = data.linearize(CRLF.len())?;
                if bytes != CRLF {
                    return Error::e_explain(CodecProtocol, "chunk data not CRLF terminated");
                }
                data.drain(CRLF.len())?;
                self.state = BodyState::ChunkHead;
                self.decode(data)
            }
            BodyState::Trailers { scanned } => {
                // The terminating chunk was consumed along with its CRLF, so
                // an empty trailer section is a bare CRLF and a non-empty one
                // ends with CRLFCRLF.
                if data.len() >= CRLF.len() && data.linearize(CRLF.len())? == CRLF {
                    data.drain(CRLF.len())?;
                    return Ok(BodyEvent::Complete);
                }
                let from = scanned.saturating_sub(HEAD_END.len() - 1);
                match data.search(HEAD_END, from) {
                    Some(pos) => {
                        // trailers update nothing at this point in the
                        // message: the head is long since delivered
                        data.drain(pos + HEAD_END.len())?;
                        Ok(BodyEvent::Complete)
                    }
                    None => {
                        if data.len() > TRAILER_SIZE_LIMIT {
                            return Error::e_explain(CodecProtocol, "trailer section over limit");
                        }
                        self.state = BodyState::Trailers {
                            scanned: data.len(),
                        };
                        Ok(BodyEvent::NeedMoreData)
                    }
                }
            }
            BodyState::UntilClose => {
                if data.is_empty() {
                    return Ok(BodyEvent::NeedMoreData);
                }
                let mut chunk = Buffer::new();
                chunk.move_from(data);
                Ok(BodyEvent::Data(chunk))
            }
        }
    }
}

// ---- encode side ----

/// Framing chosen by `encode_headers`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EncodeFraming {
    Identity,
    Chunked,
}

/// Emit the header block (everything after the start line) and pick the
/// body framing.
///
/// Pseudo headers are skipped on the wire, with `:authority` rewritten to
/// the legacy `host`. With no content-length and no end-of-stream the
/// message switches to chunked transfer encoding.
pub(crate) fn encode_header_block(
    headers: &HeaderMap,
    end_stream: bool,
    w: &mut ReservedWriter,
) -> EncodeFraming {
    assert!(
        !headers.has_inline(InlineHeader::TransferEncoding),
        "transfer-encoding is owned by the codec"
    );

    headers.iterate(|name, value| {
        let name_to_use = if name == ":authority" { "host" } else { name };
        if name_to_use.starts_with(':') {
            return;
        }
        w.put_slice(name_to_use.as_bytes());
        w.put_slice(b": ");
        w.put_slice(value.as_bytes());
        w.put_slice(CRLF);
    });

    let framing = if headers.has_inline(InlineHeader::ContentLength) {
        EncodeFraming::Identity
    } else if end_stream {
        w.put_slice(b"content-length: 0\r\n");
        EncodeFraming::Identity
    } else {
        w.put_slice(b"transfer-encoding: chunked\r\n");
        EncodeFraming::Chunked
    };

    w.put_slice(CRLF);
    framing
}

/// Append body bytes to `output` under the given framing, consuming `data`.
pub(crate) fn encode_body(
    framing: EncodeFraming,
    data: &mut Buffer,
    end_stream: bool,
    output: &mut Buffer,
) {
    if !data.is_empty() {
        match framing {
            EncodeFraming::Chunked => {
                output.add(format!("{:x}\r\n", data.len()).as_bytes());
                output.move_from(data);
                output.add(CRLF);
            }
            EncodeFraming::Identity => output.move_from(data),
        }
    }
    if end_stream && framing == EncodeFraming::Chunked {
        output.add(LAST_CHUNK);
    }
}

/// Copy parsed httparse headers into a [`HeaderMap`], lowercasing names.
pub(crate) fn populate_headers(
    parsed: &[httparse::Header<'_>],
    headers: &mut HeaderMap,
) -> Result<()> {
    for h in parsed {
        if h.name.is_empty() {
            continue;
        }
        let value = std::str::from_utf8(h.value)
            .map_err(|_| Error::explain(CodecProtocol, "non UTF-8 header value"))?;
        headers.add(h.name, value);
    }
    Ok(())
}
