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

//! The per-connection filter pipeline.
//!
//! Two ordered chains: read filters see bytes coming off the socket, write
//! filters see bytes headed to it. A filter can stop iteration; the chain
//! is resumed from that filter by [`FilterManager::continue_reading`].

use crate::buffer::Buffer;

/// What a filter callback tells the chain to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStatus {
    Continue,
    StopIteration,
}

/// A filter on the read path.
pub trait ReadFilter {
    /// Called once when the connection is established, before any data.
    fn on_new_connection(&mut self) -> FilterStatus {
        FilterStatus::Continue
    }

    /// Called with the connection's read buffer whenever bytes arrive.
    /// The filter may consume from the buffer.
    fn on_data(&mut self, data: &mut Buffer) -> FilterStatus;
}

/// A filter on the write path.
pub trait WriteFilter {
    /// Called with the data about to be moved to the write buffer.
    fn on_write(&mut self, data: &mut Buffer) -> FilterStatus;
}

struct ReadEntry {
    filter: Box<dyn ReadFilter>,
    new_connection_done: bool,
}

/// Owns the two filter chains and the read-side resume cursor.
pub struct FilterManager {
    read_filters: Vec<ReadEntry>,
    write_filters: Vec<Box<dyn WriteFilter>>,
    // index of the filter that stopped read iteration, if any
    stopped_at: Option<usize>,
}

impl FilterManager {
    pub fn new() -> Self {
        FilterManager {
            read_filters: Vec::new(),
            write_filters: Vec::new(),
            stopped_at: None,
        }
    }

    /// Filters may be added while an event is being dispatched; they are
    /// appended and not invoked for the in-flight event.
    pub fn add_read_filter(&mut self, filter: Box<dyn ReadFilter>) {
        self.read_filters.push(ReadEntry {
            filter,
            new_connection_done: false,
        });
    }

    pub fn add_write_filter(&mut self, filter: Box<dyn WriteFilter>) {
        self.write_filters.push(filter);
    }

    /// Run the read chain over `data`, starting from the beginning or from
    /// the filter that previously stopped iteration.
    pub fn on_read(&mut self, data: &mut Buffer) -> FilterStatus {
        let start = self.stopped_at.take().unwrap_or(0);
        // filters appended during this dispatch are not part of it
        let count = self.read_filters.len();
        for i in start..count {
            let entry = &mut self.read_filters[i];
            if !entry.new_connection_done {
                entry.new_connection_done = true;
                if entry.filter.on_new_connection() == FilterStatus::StopIteration {
                    self.stopped_at = Some(i);
                    return FilterStatus::StopIteration;
                }
            }
            if entry.filter.on_data(data) == FilterStatus::StopIteration {
                self.stopped_at = Some(i);
                return FilterStatus::StopIteration;
            }
        }
        FilterStatus::Continue
    }

    /// Resume a stopped read chain with the current read buffer.
    /// No-op when iteration was never stopped.
    pub fn continue_reading(&mut self, data: &mut Buffer) -> FilterStatus {
        if self.stopped_at.is_none() {
            return FilterStatus::Continue;
        }
        self.on_read(data)
    }

    /// Run the write chain over `data`. There is no stop/resume bookkeeping
    /// on the write path; a stop simply leaves the data with the caller.
    pub fn on_write(&mut self, data: &mut Buffer) -> FilterStatus {
        for filter in self.write_filters.iter_mut() {
            if filter.on_write(data) == FilterStatus::StopIteration {
                return FilterStatus::StopIteration;
            }
        }
        FilterStatus::Continue
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped_at.is_some()
    }
}

impl Default for FilterManager {
    fn default() -> Self {
        Self::new()
    }
}
