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
//! HTTP header objects for Lattice.
//!
//! [`HeaderMap`] is an ordered multimap from lowercase header name to
//! value. Well-known names (see [`InlineHeader`]) are reachable in O(1)
//! through fixed slots; everything else is a dynamic entry. Insertion
//! order is preserved for iteration, which is what a proxy needs to echo
//! headers through unchanged.
//!
//! Pseudo headers (names starting with `:`) live in the map like any other
//! header but are never emitted on the HTTP/1.1 wire; the codec skips them
//! and rewrites `:authority` to the legacy `host` name.

use std::borrow::Cow;

mod headers;
pub use headers::InlineHeader;
use headers::INLINE_COUNT;

/// A header name, resolved to an inline slot where possible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderName {
    Inline(InlineHeader),
    Dynamic(Box<str>),
}

impl HeaderName {
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Inline(h) => h.name(),
            HeaderName::Dynamic(s) => s,
        }
    }
}

// Lowercase `name` only when it needs it.
fn lower(name: &str) -> Cow<'_, str> {
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(name.to_ascii_lowercase())
    } else {
        Cow::Borrowed(name)
    }
}

fn resolve(name: &str) -> HeaderName {
    let name = lower(name);
    match InlineHeader::from_name(&name) {
        Some(h) => HeaderName::Inline(h),
        None => HeaderName::Dynamic(name.into_owned().into_boxed_str()),
    }
}

#[derive(Clone, Debug)]
struct Entry {
    name: HeaderName,
    value: String,
    // an entry stays in the list after remove() so indices remain stable;
    // absent entries are skipped everywhere
    present: bool,
}

/// An ordered, lowercase header multimap.
#[derive(Clone, Debug, Default)]
pub struct HeaderMap {
    entries: Vec<Entry>,
    inline: [Option<usize>; INLINE_COUNT],
}

impl HeaderMap {
    pub fn new() -> Self {
        HeaderMap {
            entries: Vec::with_capacity(10),
            inline: [None; INLINE_COUNT],
        }
    }

    /// Set a header, replacing any existing value under the same name.
    ///
    /// A header set for the first time is linked at the end of the
    /// iteration order; overwriting keeps the original position.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        match resolve(name) {
            HeaderName::Inline(h) => self.set_inline(h, value),
            HeaderName::Dynamic(n) => {
                let found = self
                    .entries
                    .iter()
                    .position(|e| e.present && e.name.as_str() == &*n);
                match found {
                    Some(i) => {
                        self.entries[i].value = value.into();
                        // drop any other values under the same name
                        for e in self.entries.iter_mut().skip(i + 1) {
                            if e.present && e.name.as_str() == &*n {
                                e.present = false;
                                e.value.clear();
                            }
                        }
                    }
                    None => self.entries.push(Entry {
                        name: HeaderName::Dynamic(n),
                        value: value.into(),
                        present: true,
                    }),
                }
            }
        }
    }

    /// Set a well-known header through its slot.
    pub fn set_inline(&mut self, h: InlineHeader, value: impl Into<String>) {
        match self.inline[h as usize] {
            Some(i) => self.entries[i].value = value.into(),
            None => {
                self.entries.push(Entry {
                    name: HeaderName::Inline(h),
                    value: value.into(),
                    present: true,
                });
                self.inline[h as usize] = Some(self.entries.len() - 1);
            }
        }
    }

    /// Add a header. The name is lowercased if it is not already.
    ///
    /// Well-known names behave like [`Self::set`]; dynamic names append a
    /// new entry even when one already exists, preserving multimap
    /// semantics and order among same-named entries.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        match resolve(name) {
            HeaderName::Inline(h) => self.set_inline(h, value),
            HeaderName::Dynamic(n) => self.entries.push(Entry {
                name: HeaderName::Dynamic(n),
                value: value.into(),
                present: true,
            }),
        }
    }

    /// The value under `name`, or `""` when absent. For a repeated dynamic
    /// header this is the first value in insertion order.
    pub fn get(&self, name: &str) -> &str {
        match resolve(name) {
            HeaderName::Inline(h) => self.get_inline(h),
            HeaderName::Dynamic(n) => self
                .entries
                .iter()
                .find(|e| e.present && e.name.as_str() == &*n)
                .map_or("", |e| e.value.as_str()),
        }
    }

    pub fn get_inline(&self, h: InlineHeader) -> &str {
        match self.inline[h as usize] {
            Some(i) => self.entries[i].value.as_str(),
            None => "",
        }
    }

    pub fn has(&self, name: &str) -> bool {
        match resolve(name) {
            HeaderName::Inline(h) => self.has_inline(h),
            HeaderName::Dynamic(n) => self
                .entries
                .iter()
                .any(|e| e.present && e.name.as_str() == &*n),
        }
    }

    pub fn has_inline(&self, h: InlineHeader) -> bool {
        self.inline[h as usize].is_some()
    }

    /// Remove all values under `name`. `has()` turns false and `get()`
    /// returns the empty string afterwards.
    pub fn remove(&mut self, name: &str) {
        match resolve(name) {
            HeaderName::Inline(h) => self.remove_inline(h),
            HeaderName::Dynamic(n) => {
                for e in self.entries.iter_mut() {
                    if e.present && e.name.as_str() == &*n {
                        e.present = false;
                        e.value.clear();
                    }
                }
            }
        }
    }

    pub fn remove_inline(&mut self, h: InlineHeader) {
        if let Some(i) = self.inline[h as usize].take() {
            self.entries[i].present = false;
            self.entries[i].value.clear();
        }
    }

    /// Visit every present header in insertion order.
    pub fn iterate<F: FnMut(&str, &str)>(&self, mut cb: F) {
        for e in &self.entries {
            if e.present {
                cb(e.name.as_str(), &e.value);
            }
        }
    }

    /// Total size of all present names and values.
    pub fn byte_size(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.present)
            .map(|e| e.name.as_str().len() + e.value.len())
            .sum()
    }

    /// Number of present headers.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.present).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Pseudo-header conveniences used throughout the codec and the
    // connection manager.

    pub fn method(&self) -> &str {
        self.get_inline(InlineHeader::Method)
    }

    pub fn path(&self) -> &str {
        self.get_inline(InlineHeader::Path)
    }

    pub fn status(&self) -> &str {
        self.get_inline(InlineHeader::Status)
    }

    pub fn scheme(&self) -> &str {
        self.get_inline(InlineHeader::Scheme)
    }

    pub fn authority(&self) -> &str {
        self.get_inline(InlineHeader::Authority)
    }
}

impl PartialEq for HeaderMap {
    /// Equality is over the present entries, in order.
    fn eq(&self, other: &Self) -> bool {
        let mine: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.present)
            .map(|e| (e.name.as_str(), e.value.as_str()))
            .collect();
        let theirs: Vec<_> = other
            .entries
            .iter()
            .filter(|e| e.present)
            .map(|e| (e.name.as_str(), e.value.as_str()))
            .collect();
        mine == theirs
    }
}

impl Eq for HeaderMap {}

impl<'a> FromIterator<(&'a str, &'a str)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.add(name, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_missing_is_empty() {
        let map = HeaderMap::new();
        assert_eq!(map.get("content-length"), "");
        assert_eq!(map.get("x-custom"), "");
        assert!(!map.has("content-length"));
    }

    #[test]
    fn add_remove_roundtrip() {
        let mut map = HeaderMap::new();
        map.add("content-length", "42");
        map.add("x-custom", "a");
        assert!(map.has("content-length"));
        assert!(map.has("x-custom"));

        map.remove("content-length");
        map.remove("x-custom");
        assert!(!map.has("content-length"));
        assert_eq!(map.get("content-length"), "");
        assert!(!map.has("x-custom"));
        assert_eq!(map.get("x-custom"), "");
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn names_are_lowercased() {
        let mut map = HeaderMap::new();
        map.add("Content-Type", "text/plain");
        map.add("X-Custom-Header", "v");
        assert_eq!(map.get("content-type"), "text/plain");
        let mut names = vec![];
        map.iterate(|name, _| names.push(name.to_string()));
        assert_eq!(names, ["content-type", "x-custom-header"]);
    }

    #[test]
    fn insertion_order_preserved() {
        let mut map = HeaderMap::new();
        map.add("b-second", "2");
        map.add("content-type", "t");
        map.add("a-third", "3");
        let mut seen = vec![];
        map.iterate(|name, value| seen.push(format!("{name}={value}")));
        assert_eq!(seen, ["b-second=2", "content-type=t", "a-third=3"]);
    }

    #[test]
    fn inline_overwrite_keeps_position() {
        let mut map = HeaderMap::new();
        map.add("content-type", "a");
        map.add("x-other", "o");
        map.add("content-type", "b");
        let mut seen = vec![];
        map.iterate(|name, value| seen.push(format!("{name}={value}")));
        assert_eq!(seen, ["content-type=b", "x-other=o"]);
    }

    #[test]
    fn dynamic_headers_are_multivalued() {
        let mut map = HeaderMap::new();
        map.add("set-cookie", "a=1");
        map.add("set-cookie", "b=2");
        let mut seen = vec![];
        map.iterate(|_, value| seen.push(value.to_string()));
        assert_eq!(seen, ["a=1", "b=2"]);
        // first one wins for get()
        assert_eq!(map.get("set-cookie"), "a=1");
        // set() collapses to one
        map.set("set-cookie", "c=3");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("set-cookie"), "c=3");
    }

    #[test]
    fn removed_then_readded_moves_to_tail() {
        let mut map = HeaderMap::new();
        map.add("content-type", "t");
        map.add("x-other", "o");
        map.remove("content-type");
        map.add("content-type", "t2");
        let mut names = vec![];
        map.iterate(|name, _| names.push(name.to_string()));
        assert_eq!(names, ["x-other", "content-type"]);
    }

    #[test]
    fn host_aliases_authority() {
        let mut map = HeaderMap::new();
        map.add("Host", "example.com");
        assert_eq!(map.authority(), "example.com");
        assert_eq!(map.get(":authority"), "example.com");
        assert_eq!(map.get("host"), "example.com");
    }

    #[test]
    fn byte_size_counts_present_entries() {
        let mut map = HeaderMap::new();
        map.add("a", "12");   // 1 + 2
        map.add("bc", "345"); // 2 + 3
        assert_eq!(map.byte_size(), 8);
        map.remove("a");
        assert_eq!(map.byte_size(), 5);
    }

    #[test]
    fn equality_ignores_tombstones() {
        let mut a = HeaderMap::new();
        a.add("x-one", "1");
        a.add("x-two", "2");
        a.remove("x-one");

        let mut b = HeaderMap::new();
        b.add("x-two", "2");
        assert_eq!(a, b);
    }
}
