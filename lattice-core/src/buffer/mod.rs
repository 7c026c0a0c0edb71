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

//! The byte queue backing all I/O in the data plane.
//!
//! A [`Buffer`] is a FIFO of bytes stored as an ordered list of slabs.
//! Appends land in the tail slab, drains advance the head slab, and moving
//! bytes between buffers transfers whole slabs without copying. The
//! two-phase [`Buffer::reserve`]/[`Buffer::commit`] API hands out raw
//! writable regions so that socket reads (and the codec's wire encoding)
//! can produce bytes directly into the queue with no intermediate copy.

use bytes::{Buf, BytesMut};
use lattice_error::{Error, ErrorType::InvalidArgument, Result};
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;

const SLAB_SIZE: usize = 4096;

/// A raw view into a buffer region, compatible with an iovec.
#[derive(Clone, Copy, Debug)]
pub struct RawSlice {
    pub mem: *mut u8,
    pub len: usize,
}

impl RawSlice {
    pub const fn empty() -> Self {
        RawSlice {
            mem: std::ptr::null_mut(),
            len: 0,
        }
    }
}

// Where a reserved region lives: the spare tail capacity of the last
// readable slab, or a freshly allocated slab not yet part of the queue.
enum Reserved {
    Tail { cap: usize },
    Slab(BytesMut),
}

/// A scatter/gather byte queue.
///
/// All operations are O(slabs) at worst. Reserved-but-uncommitted regions
/// are scratch space: they do not count toward [`Buffer::len`] and are
/// discarded by any other mutation of the buffer.
pub struct Buffer {
    slabs: VecDeque<BytesMut>,
    reservation: Vec<Reserved>,
}

impl Buffer {
    pub fn new() -> Self {
        Buffer {
            slabs: VecDeque::new(),
            reservation: Vec::new(),
        }
    }

    /// Readable byte count.
    pub fn len(&self) -> usize {
        self.slabs.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slabs.iter().all(|s| s.is_empty())
    }

    /// Append a copy of `data`.
    pub fn add(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.invalidate_reservation();
        match self.slabs.back_mut() {
            // extending the tail may grow its allocation, which is fine now
            // that any reservation into its spare capacity is gone
            Some(tail) if tail.capacity() - tail.len() >= data.len() => {
                tail.extend_from_slice(data)
            }
            _ => {
                let mut slab = BytesMut::with_capacity(data.len().max(SLAB_SIZE));
                slab.extend_from_slice(data);
                self.slabs.push_back(slab);
            }
        }
    }

    /// Append a copy of another buffer, leaving it unchanged.
    pub fn add_buffer(&mut self, other: &Buffer) {
        for slab in &other.slabs {
            self.add(slab);
        }
    }

    /// Remove the first `n` bytes.
    pub fn drain(&mut self, mut n: usize) -> Result<()> {
        if n > self.len() {
            return Error::e_explain(
                InvalidArgument,
                format!("drain {n} bytes out of {}", self.len()),
            );
        }
        self.invalidate_reservation();
        while n > 0 {
            let front = self.slabs.front_mut().expect("len() covers n");
            if front.len() <= n {
                n -= front.len();
                self.slabs.pop_front();
            } else {
                front.advance(n);
                n = 0;
            }
        }
        Ok(())
    }

    /// Transfer all bytes of `src` to the end of `self` without copying.
    /// `src` is left empty.
    pub fn move_from(&mut self, src: &mut Buffer) {
        self.invalidate_reservation();
        src.invalidate_reservation();
        while let Some(slab) = src.slabs.pop_front() {
            if !slab.is_empty() {
                self.slabs.push_back(slab);
            }
        }
    }

    /// Transfer exactly the first `n` bytes of `src` to the end of `self`.
    /// Whole slabs move without copying; a slab split at the boundary
    /// shares its allocation with `src`.
    pub fn move_from_n(&mut self, src: &mut Buffer, mut n: usize) -> Result<()> {
        if n > src.len() {
            return Error::e_explain(
                InvalidArgument,
                format!("move {n} bytes out of {}", src.len()),
            );
        }
        self.invalidate_reservation();
        src.invalidate_reservation();
        while n > 0 {
            let front = src.slabs.front_mut().expect("len() covers n");
            if front.len() <= n {
                n -= front.len();
                let slab = src.slabs.pop_front().unwrap();
                self.slabs.push_back(slab);
            } else {
                let head = front.split_to(n);
                self.slabs.push_back(head);
                n = 0;
            }
        }
        Ok(())
    }

    /// Number of readable slices, and the slices themselves.
    ///
    /// Fills up to `out.len()` entries in queue order and returns how many
    /// entries a full listing needs.
    pub fn raw_slices(&self, out: &mut [RawSlice]) -> usize {
        let mut filled = 0;
        for slab in &self.slabs {
            if slab.is_empty() {
                continue;
            }
            if filled < out.len() {
                out[filled] = RawSlice {
                    mem: slab.as_ptr() as *mut u8,
                    len: slab.len(),
                };
            }
            filled += 1;
        }
        filled
    }

    /// Make the first `n` bytes contiguous and return them.
    ///
    /// May merge slabs internally; the rest of the queue is untouched.
    pub fn linearize(&mut self, n: usize) -> Result<&[u8]> {
        if n > self.len() {
            return Error::e_explain(
                InvalidArgument,
                format!("linearize {n} bytes out of {}", self.len()),
            );
        }
        self.invalidate_reservation();
        if n == 0 {
            return Ok(&[]);
        }
        if self.slabs.front().map_or(0, |s| s.len()) < n {
            let mut merged = BytesMut::with_capacity(n);
            let mut needed = n;
            while needed > 0 {
                let front = self.slabs.front_mut().expect("len() covers n");
                if front.len() <= needed {
                    needed -= front.len();
                    merged.extend_from_slice(front);
                    self.slabs.pop_front();
                } else {
                    let head = front.split_to(needed);
                    merged.extend_from_slice(&head);
                    needed = 0;
                }
            }
            self.slabs.push_front(merged);
        }
        Ok(&self.slabs.front().unwrap()[..n])
    }

    /// Find the first occurrence of `needle` at or after `from`.
    pub fn search(&self, needle: &[u8], from: usize) -> Option<usize> {
        let total = self.len();
        if needle.is_empty() {
            return (from <= total).then_some(from);
        }
        if from + needle.len() > total {
            return None;
        }
        for start in from..=(total - needle.len()) {
            if self.matches_at(start, needle) {
                return Some(start);
            }
        }
        None
    }

    // Compare `needle` against the bytes at virtual offset `start`,
    // walking slab boundaries.
    fn matches_at(&self, start: usize, needle: &[u8]) -> bool {
        let mut offset = start;
        let mut matched = 0;
        for slab in &self.slabs {
            if offset >= slab.len() {
                offset -= slab.len();
                continue;
            }
            let avail = &slab[offset..];
            let want = &needle[matched..];
            let take = avail.len().min(want.len());
            if avail[..take] != want[..take] {
                return false;
            }
            matched += take;
            if matched == needle.len() {
                return true;
            }
            offset = 0;
        }
        false
    }

    /// Reserve writable regions totalling at least `min` bytes.
    ///
    /// Fills `out` with 1..=`out.len()` regions and returns how many were
    /// filled. The regions stay scratch until [`Buffer::commit`]; any other
    /// mutation of the buffer discards them.
    pub fn reserve(&mut self, min: usize, out: &mut [RawSlice]) -> usize {
        assert!(min > 0, "reserve of zero bytes");
        assert!(!out.is_empty(), "reserve with no room for regions");
        self.invalidate_reservation();

        let mut filled = 0;
        let mut total = 0;
        if out.len() > 1 {
            let tail_spare = self.slabs.back_mut().map(|tail| {
                let spare = tail.spare_capacity_mut();
                (spare.as_mut_ptr() as *mut u8, spare.len())
            });
            if let Some((mem, len)) = tail_spare {
                if len > 0 {
                    out[filled] = RawSlice { mem, len };
                    total += len;
                    self.reservation.push(Reserved::Tail { cap: len });
                    filled += 1;
                }
            }
        }
        if total < min {
            let mut slab = BytesMut::with_capacity((min - total).max(SLAB_SIZE));
            let spare = slab.spare_capacity_mut();
            out[filled] = RawSlice {
                mem: spare.as_mut_ptr() as *mut u8,
                len: spare.len(),
            };
            self.reservation.push(Reserved::Slab(slab));
            filled += 1;
        }
        filled
    }

    /// Append the first `used[i]` bytes of each reserved region to the
    /// readable queue.
    ///
    /// `regions` must be the slices returned by the matching
    /// [`Buffer::reserve`] call, with no other mutation in between.
    pub fn commit(&mut self, regions: &[RawSlice], used: &[usize]) {
        assert_eq!(regions.len(), used.len());
        assert_eq!(
            regions.len(),
            self.reservation.len(),
            "commit does not match the outstanding reservation"
        );
        let reservation = std::mem::take(&mut self.reservation);
        for (i, part) in reservation.into_iter().enumerate() {
            match part {
                Reserved::Tail { cap } => {
                    assert!(used[i] <= cap);
                    let tail = self.slabs.back_mut().expect("tail still present");
                    debug_assert_eq!(
                        regions[i].mem as *const u8,
                        tail.spare_capacity_mut().as_ptr() as *const u8
                    );
                    // Safety: the caller wrote `used[i]` bytes into the
                    // region, which lies within the slab's capacity.
                    unsafe { tail.set_len(tail.len() + used[i]) };
                }
                Reserved::Slab(mut slab) => {
                    assert!(used[i] <= slab.capacity());
                    // Safety: same as above for the fresh slab.
                    unsafe { slab.set_len(used[i]) };
                    if !slab.is_empty() {
                        self.slabs.push_back(slab);
                    }
                }
            }
        }
    }

    /// One non-blocking `readv` from `fd` into reserved regions, committing
    /// what arrived.
    ///
    /// `Ok(0)` is end of stream. `WouldBlock` means the socket has nothing
    /// more right now and the read loop should stop.
    pub fn read_from(&mut self, fd: RawFd, max: usize) -> io::Result<usize> {
        assert!(max > 0);
        let mut regions = [RawSlice::empty(); 2];
        let filled = self.reserve(max, &mut regions);

        let mut iovs = [libc::iovec {
            iov_base: std::ptr::null_mut(),
            iov_len: 0,
        }; 2];
        let mut budget = max;
        let mut iov_count = 0;
        for region in regions.iter().take(filled) {
            if budget == 0 {
                break;
            }
            let take = region.len.min(budget);
            iovs[iov_count] = libc::iovec {
                iov_base: region.mem as *mut libc::c_void,
                iov_len: take,
            };
            budget -= take;
            iov_count += 1;
        }

        // Safety: the iovecs point into regions reserved above.
        let rc = unsafe { libc::readv(fd, iovs.as_ptr(), iov_count as libc::c_int) };
        if rc < 0 {
            self.invalidate_reservation();
            return Err(io::Error::last_os_error());
        }
        let mut read = rc as usize;
        let mut used = [0usize; 2];
        for i in 0..filled {
            let cap = iovs.get(i).map_or(0, |v| v.iov_len);
            used[i] = read.min(cap);
            read -= used[i];
        }
        self.commit(&regions[..filled], &used[..filled]);
        Ok(rc as usize)
    }

    /// One non-blocking `writev` of the readable slices to `fd`, draining
    /// what was written.
    ///
    /// `WouldBlock` means the socket cannot take more right now and the
    /// write loop should stop.
    pub fn write_to(&mut self, fd: RawFd) -> io::Result<usize> {
        const MAX_IOV: usize = 16;
        let mut slices = [RawSlice::empty(); MAX_IOV];
        let count = self.raw_slices(&mut slices).min(MAX_IOV);
        if count == 0 {
            return Ok(0);
        }
        let mut iovs = [libc::iovec {
            iov_base: std::ptr::null_mut(),
            iov_len: 0,
        }; MAX_IOV];
        for i in 0..count {
            iovs[i] = libc::iovec {
                iov_base: slices[i].mem as *mut libc::c_void,
                iov_len: slices[i].len,
            };
        }
        // Safety: the iovecs point at readable slabs that outlive the call.
        let rc = unsafe { libc::writev(fd, iovs.as_ptr(), count as libc::c_int) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        let written = rc as usize;
        self.drain(written).expect("cannot write more than len()");
        Ok(written)
    }

    /// Copy the readable bytes out. Mostly for tests and small payloads.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for slab in &self.slabs {
            out.extend_from_slice(slab);
        }
        out
    }

    fn invalidate_reservation(&mut self) {
        self.reservation.clear();
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        let mut buf = Buffer::new();
        buf.add(data);
        buf
    }
}

impl From<&str> for Buffer {
    fn from(data: &str) -> Self {
        data.as_bytes().into()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("slabs", &self.slabs.len())
            .finish()
    }
}

/// Writes bytes into a buffer through its reserve/commit API, committing
/// in slab-sized batches. This is how the codec lays down wire bytes
/// without an intermediate allocation per write.
pub struct ReservedWriter<'a> {
    buf: &'a mut Buffer,
    region: RawSlice,
    written: usize,
}

impl<'a> ReservedWriter<'a> {
    pub fn new(buf: &'a mut Buffer) -> Self {
        ReservedWriter {
            buf,
            region: RawSlice::empty(),
            written: 0,
        }
    }

    fn ensure(&mut self, size: usize) {
        if self.region.len - self.written >= size {
            return;
        }
        self.flush();
        let mut regions = [RawSlice::empty(); 1];
        self.buf.reserve(size.max(SLAB_SIZE), &mut regions);
        self.region = regions[0];
    }

    pub fn put_slice(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.ensure(data.len());
        // Safety: `ensure` guarantees `data.len()` bytes of reserved room
        // past `written`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.region.mem.add(self.written),
                data.len(),
            );
        }
        self.written += data.len();
    }

    pub fn put_u8(&mut self, byte: u8) {
        self.put_slice(&[byte]);
    }

    /// Commit everything written so far.
    pub fn flush(&mut self) {
        if !self.region.mem.is_null() {
            let region = self.region;
            let used = self.written;
            self.buf.commit(&[region], &[used]);
            self.region = RawSlice::empty();
            self.written = 0;
        }
    }
}

impl Drop for ReservedWriter<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
