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

//! Non-blocking connection state machines.
//!
//! A [`Connection`] owns its fd, a read and a write buffer and the filter
//! pipeline. `on_read_ready`/`on_write_ready` are the readiness entry
//! points; "zero delay timer" work (the deferred read re-dispatch after
//! `read_disable(false)` and the deferred write attempt) is recorded as
//! flags and drained by the driver between readiness polls, which on a
//! single-threaded loop is the same schedule a zero-delay timer would get.
//!
//! [`drive`] is the tokio half: it parks on `AsyncFd` readiness and feeds
//! the state machine until the connection closes.

pub mod filter;

use crate::buffer::Buffer;
use filter::{FilterManager, FilterStatus, ReadFilter, WriteFilter};
use lattice_error::{Error, ErrorType::*, OrErr, Result};
use log::{debug, trace};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

const READ_CHUNK: usize = 4096;

static NEXT_GLOBAL_ID: AtomicU64 = AtomicU64::new(0);

/// Lifecycle events observable on a connection.
///
/// `Connected` fires once for client sockets; exactly one of `RemoteClose`
/// or `LocalClose` ends the stream of events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    RemoteClose,
    LocalClose,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionCloseType {
    /// Close right away, discarding pending write data.
    NoFlush,
    /// Flush the write buffer first, then close.
    FlushWrite,
}

pub type ConnectionCallback = Box<dyn FnMut(ConnectionEvent)>;

/// A non-blocking socket connection.
pub struct Connection {
    fd: Option<OwnedFd>,
    id: u64,
    remote_address: String,
    pub read_buffer: Buffer,
    write_buffer: Buffer,
    filter_manager: FilterManager,
    callbacks: Vec<ConnectionCallback>,
    read_enabled: bool,
    connecting: bool,
    closing_with_flush: bool,
    // deferred one-shot work, the zero-delay timers of this machine
    redispatch_read: bool,
    do_write: bool,
}

impl Connection {
    /// Wrap an established (accepted) socket.
    pub fn new_server(fd: OwnedFd, remote_address: String) -> Self {
        Self::new(fd, remote_address, false)
    }

    /// Start a client connection to `addr`. The socket is created
    /// non-blocking and the connect is in progress when this returns; the
    /// `Connected` event fires on the first write-ready.
    pub fn connect(addr: &SocketAddr) -> Result<Self> {
        let fd = nonblocking_connect(addr).or_err(ConnectError, "starting connect")?;
        Ok(Self::new(fd, addr.to_string(), true))
    }

    fn new(fd: OwnedFd, remote_address: String, connecting: bool) -> Self {
        Connection {
            fd: Some(fd),
            id: NEXT_GLOBAL_ID.fetch_add(1, Ordering::Relaxed) + 1,
            remote_address,
            read_buffer: Buffer::new(),
            write_buffer: Buffer::new(),
            filter_manager: FilterManager::new(),
            callbacks: Vec::new(),
            read_enabled: true,
            connecting,
            closing_with_flush: false,
            redispatch_read: false,
            do_write: false,
        }
    }

    /// Process-wide monotone id of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn state(&self) -> ConnectionState {
        if self.fd.is_none() {
            ConnectionState::Closed
        } else if self.closing_with_flush {
            ConnectionState::Closing
        } else {
            ConnectionState::Open
        }
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub fn add_read_filter(&mut self, filter: Box<dyn ReadFilter>) {
        self.filter_manager.add_read_filter(filter);
    }

    pub fn add_write_filter(&mut self, filter: Box<dyn WriteFilter>) {
        self.filter_manager.add_write_filter(filter);
    }

    /// Register for lifecycle events. Callbacks run synchronously on the
    /// loop thread, in registration order.
    pub fn add_connection_callbacks(&mut self, cb: ConnectionCallback) {
        self.callbacks.push(cb);
    }

    pub fn read_enabled(&self) -> bool {
        self.read_enabled
    }

    /// Suppress (or restore) read filter dispatch.
    ///
    /// The socket stays registered either way so remote close is still
    /// detected promptly; bytes keep accumulating in the read buffer while
    /// disabled. Re-enabling with buffered bytes schedules a deferred
    /// re-dispatch, since no new network event may arrive to trigger one.
    pub fn read_disable(&mut self, disable: bool) {
        trace!(
            "[C{}] read_disable: enabled={} disable={}",
            self.id,
            self.read_enabled,
            disable
        );
        if disable {
            self.read_enabled = false;
        } else {
            self.read_enabled = true;
            if !self.read_buffer.is_empty() {
                self.redispatch_read = true;
            }
        }
    }

    /// Resume a read filter chain stopped by `StopIteration`.
    pub fn continue_reading(&mut self) {
        if self.filter_manager.is_stopped() {
            self.filter_manager.continue_reading(&mut self.read_buffer);
        }
    }

    /// Send `data` through the write filter chain and queue the remainder
    /// on the write buffer. The actual socket write happens on the next
    /// deferred-work drain or write-ready event.
    pub fn write(&mut self, data: &mut Buffer) {
        if self.state() != ConnectionState::Open {
            debug!("[C{}] write on non-open connection ignored", self.id);
            return;
        }
        if self.filter_manager.on_write(data) == FilterStatus::StopIteration {
            return;
        }
        if !data.is_empty() {
            trace!("[C{}] writing {} bytes", self.id, data.len());
            self.write_buffer.move_from(data);
            self.do_write = true;
        }
    }

    pub fn close(&mut self, close_type: ConnectionCloseType) {
        if self.fd.is_none() {
            return;
        }
        let data_to_write = self.write_buffer.len();
        debug!("[C{}] closing, data_to_write={}", self.id, data_to_write);
        if data_to_write == 0 || close_type == ConnectionCloseType::NoFlush {
            self.close_socket();
            self.raise_event(ConnectionEvent::LocalClose);
        } else {
            self.closing_with_flush = true;
            self.read_enabled = false;
            self.do_write = true;
        }
    }

    /// Readiness entry point: drain the socket into the read buffer, run
    /// the filter chain, then handle EOF.
    pub fn on_read_ready(&mut self) {
        debug_assert!(!self.connecting);
        let Some(fd) = self.raw_fd() else { return };

        let mut raise_close = false;
        loop {
            match self.read_buffer.read_from(fd, READ_CHUNK) {
                Ok(0) => {
                    raise_close = true;
                    break;
                }
                Ok(n) => trace!("[C{}] read returns: {}", self.id, n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("[C{}] read error: {}", self.id, e);
                    raise_close = true;
                    break;
                }
            }
        }

        self.on_read();

        if raise_close && self.fd.is_some() {
            trace!("[C{}] remote close", self.id);
            self.close_socket();
            self.raise_event(ConnectionEvent::RemoteClose);
        }
    }

    // Dispatch buffered bytes to the read filters. Also the target of the
    // deferred re-dispatch, so it cancels that first in case it raced with
    // a real network event.
    fn on_read(&mut self) {
        self.redispatch_read = false;
        if !self.read_enabled || self.read_buffer.is_empty() {
            return;
        }
        self.filter_manager.on_read(&mut self.read_buffer);
    }

    /// Readiness entry point: flush the write buffer to the socket.
    pub fn on_write_ready(&mut self) {
        trace!("[C{}] write ready", self.id);
        if self.connecting {
            trace!("[C{}] connected", self.id);
            self.connecting = false;
            self.raise_event(ConnectionEvent::Connected);
        }

        loop {
            if self.write_buffer.is_empty() {
                if self.closing_with_flush {
                    debug!("[C{}] write flush complete", self.id);
                    self.close_socket();
                    self.raise_event(ConnectionEvent::LocalClose);
                }
                return;
            }
            let Some(fd) = self.raw_fd() else { return };
            match self.write_buffer.write_to(fd) {
                Ok(n) => trace!("[C{}] write returns: {}", self.id, n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    debug!("[C{}] write error: {}", self.id, e);
                    self.close_socket();
                    self.raise_event(ConnectionEvent::RemoteClose);
                    return;
                }
            }
        }
    }

    /// Whether the driver should poll for write readiness.
    pub fn wants_write(&self) -> bool {
        self.connecting || !self.write_buffer.is_empty()
    }

    pub fn has_deferred_work(&self) -> bool {
        self.redispatch_read || self.do_write
    }

    /// Drain deferred one-shot work. The driver calls this between
    /// readiness polls, giving the same schedule a zero-delay timer would.
    pub fn run_deferred(&mut self) {
        if self.do_write {
            self.do_write = false;
            if !self.connecting && self.fd.is_some() {
                self.on_write_ready();
            }
        }
        if self.redispatch_read {
            self.on_read();
        }
    }

    // Release the fd and cancel anything pending. After this the state is
    // Closed and no further events can fire.
    fn close_socket(&mut self) {
        debug_assert!(self.fd.is_some());
        self.fd = None;
        self.closing_with_flush = false;
        self.redispatch_read = false;
        self.do_write = false;
    }

    fn raise_event(&mut self, event: ConnectionEvent) {
        debug!("[C{}] event: {:?}", self.id, event);
        let mut callbacks = std::mem::take(&mut self.callbacks);
        for cb in callbacks.iter_mut() {
            cb(event);
        }
        self.callbacks = callbacks;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote_address)
            .field("state", &self.state())
            .finish()
    }
}

/// Drive a connection on the event loop until it closes.
///
/// Parks on fd readiness, feeds `on_read_ready`/`on_write_ready` and
/// drains deferred work in between. Write readiness is only polled while
/// the machine wants it (connecting, or bytes pending).
pub async fn drive(conn: &mut Connection) -> Result<()> {
    let fd = conn
        .raw_fd()
        .ok_or_else(|| Error::explain(SocketError, "driving a closed connection"))?;
    let async_fd = AsyncFd::with_interest(fd, Interest::READABLE | Interest::WRITABLE)
        .or_err(SocketError, "registering connection fd")?;

    loop {
        conn.run_deferred();
        if conn.state() == ConnectionState::Closed {
            return Ok(());
        }
        let want_write = conn.wants_write();
        tokio::select! {
            biased;
            ready = async_fd.writable(), if want_write => {
                let mut guard = ready.or_err(SocketError, "polling writable")?;
                guard.clear_ready();
                conn.on_write_ready();
            }
            ready = async_fd.readable() => {
                let mut guard = ready.or_err(SocketError, "polling readable")?;
                guard.clear_ready();
                conn.on_read_ready();
            }
        }
        if conn.state() == ConnectionState::Closed {
            return Ok(());
        }
    }
}

// A non-blocking TCP connect: the fd is created with SOCK_NONBLOCK and the
// connect is left in progress (EINPROGRESS). Write readiness signals the
// outcome.
fn nonblocking_connect(addr: &SocketAddr) -> io::Result<OwnedFd> {
    let family = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    // Safety: plain socket(2) call, result checked below.
    let fd = unsafe {
        libc::socket(
            family,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Safety: fd is a fresh, valid descriptor owned from here on.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };

    let (sockaddr, len): (libc::sockaddr_storage, libc::socklen_t) = match addr {
        SocketAddr::V4(v4) => {
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            let sin = &mut storage as *mut _ as *mut libc::sockaddr_in;
            unsafe {
                (*sin).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sin).sin_port = v4.port().to_be();
                (*sin).sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            }
            (storage, std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(v6) => {
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            let sin6 = &mut storage as *mut _ as *mut libc::sockaddr_in6;
            unsafe {
                (*sin6).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sin6).sin6_port = v6.port().to_be();
                (*sin6).sin6_addr.s6_addr = v6.ip().octets();
            }
            (storage, std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    };

    // Safety: sockaddr_storage is sized for either family.
    let rc = unsafe {
        libc::connect(
            owned.as_raw_fd(),
            &sockaddr as *const _ as *const libc::sockaddr,
            len,
        )
    };
    if rc == 0 {
        return Ok(owned);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        Ok(owned)
    } else {
        Err(err)
    }
}
