//! Streaming parser for PICA+ normalized input.
//!
//! [`ItemReader`] turns a byte stream into a lazy sequence of [`Item`]s
//! using three nested delimiters:
//!
//! - [`GROUP_SEPARATOR`] closes the current item and opens a new one,
//! - [`RECORD_SEPARATOR`] starts a field line,
//! - [`UNIT_SEPARATOR`] separates subfields within a field line.
//!
//! Dumps usually put the group separator on a line of its own and one field
//! per line, but delimiters are recognised anywhere in a line, so a fully
//! inline stream parses the same way.
//!
//! # Example
//!
//! ```
//! use pica_core::ItemReader;
//!
//! let input = "\u{1D}\u{1E}003@ \u{1F}0123456789\u{1E}021A \u{1F}aTitle";
//! let items: Vec<_> = ItemReader::new(input.as_bytes())
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//!
//! assert_eq!(items.len(), 1);
//! assert_eq!(items[0].identifier.as_deref(), Some("123456789"));
//! assert_eq!(items[0].first("021A", 'a'), Some("Title"));
//! ```

use std::collections::VecDeque;
use std::io::{BufRead, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{ParseError, Result};
use crate::types::{
    GROUP_SEPARATOR, IdentifierKey, Item, RECORD_SEPARATOR, UNIT_SEPARATOR, Value,
};

/// Counters collected while parsing one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Physical lines read, including blank ones.
    pub lines: u64,
    /// Items handed out.
    pub items: u64,
    /// Values contained in handed-out items.
    pub values: u64,
    /// Subfield segments shorter than two characters.
    pub dropped_segments: u64,
    /// Field lines seen before the first item boundary.
    pub orphan_field_lines: u64,
    /// Boundaries closed without any field line in between.
    pub empty_items: u64,
}

/// Item under construction.
struct Pending {
    item: Item,
    has_field_line: bool,
}

/// Lazy iterator over the items of one PICA+ stream.
///
/// Each call to [`next`](Iterator::next) reads only as many lines as needed
/// to complete the next item. A read error is reported once as
/// [`ParseError::Io`]; the item that was being assembled is discarded and
/// the iterator ends.
pub struct ItemReader<R> {
    reader: R,
    origin: Option<Arc<Path>>,
    key: IdentifierKey,
    current: Option<Pending>,
    ready: VecDeque<Item>,
    buf: Vec<u8>,
    stats: ParseStats,
    done: bool,
}

impl<R: BufRead> ItemReader<R> {
    /// Creates a reader over `reader` using the default identifier key.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            origin: None,
            key: IdentifierKey::default(),
            current: None,
            ready: VecDeque::new(),
            buf: Vec::with_capacity(256),
            stats: ParseStats::default(),
            done: false,
        }
    }

    /// Tags every produced item with the file it was read from.
    pub fn with_origin(mut self, origin: impl AsRef<Path>) -> Self {
        self.origin = Some(Arc::from(origin.as_ref()));
        self
    }

    /// Overrides the field/subfield that supplies item identifiers.
    pub fn with_identifier_key(mut self, key: IdentifierKey) -> Self {
        self.key = key;
        self
    }

    /// Returns the counters collected so far.
    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    fn origin_label(&self) -> String {
        self.origin
            .as_ref()
            .map_or_else(|| "<stream>".to_string(), |p| p.display().to_string())
    }

    fn process_line(&mut self, line: &str) {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            return;
        }

        let mut groups = line.split(GROUP_SEPARATOR);
        if let Some(head) = groups.next() {
            self.process_segment(head);
        }
        for group in groups {
            self.boundary();
            self.process_segment(group);
        }
    }

    fn boundary(&mut self) {
        if let Some(pending) = self.current.take() {
            self.finish(pending);
        }
        self.current = Some(Pending {
            item: Item::new(self.origin.clone()),
            has_field_line: false,
        });
    }

    fn process_segment(&mut self, text: &str) {
        // Anything before the first record separator is not a field line.
        for field_line in text.split(RECORD_SEPARATOR).skip(1) {
            self.process_field_line(field_line);
        }
    }

    fn process_field_line(&mut self, line: &str) {
        let Some(pending) = self.current.as_mut() else {
            self.stats.orphan_field_lines += 1;
            debug!(origin = %self.origin_label(), "Skipping field line before first item boundary");
            return;
        };
        pending.has_field_line = true;

        let mut parts = line.split(UNIT_SEPARATOR);
        let field = parts.next().unwrap_or_default().trim();
        let mut seen: Vec<(char, u32)> = Vec::new();

        for segment in parts {
            let mut chars = segment.chars();
            let (Some(code), content) = (chars.next(), chars.as_str()) else {
                self.stats.dropped_segments += 1;
                continue;
            };
            if content.is_empty() {
                self.stats.dropped_segments += 1;
                continue;
            }

            let occurrence = match seen.iter_mut().find(|(c, _)| *c == code) {
                Some((_, count)) => {
                    *count += 1;
                    *count
                }
                None => {
                    seen.push((code, 0));
                    0
                }
            };

            if self.key.matches(field, code) {
                pending.item.identifier = Some(content.to_string());
            }
            pending
                .item
                .values
                .push(Value::new(field, code, occurrence, content));
        }
    }

    fn finish(&mut self, pending: Pending) {
        if pending.has_field_line {
            self.stats.items += 1;
            self.stats.values += pending.item.values.len() as u64;
            self.ready.push_back(pending.item);
        } else {
            self.stats.empty_items += 1;
        }
    }
}

impl<R: BufRead> Iterator for ItemReader<R> {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }

            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    if let Some(pending) = self.current.take() {
                        self.finish(pending);
                    }
                }
                Ok(_) => {
                    self.stats.lines += 1;
                    let buf = std::mem::take(&mut self.buf);
                    self.process_line(&String::from_utf8_lossy(&buf));
                    self.buf = buf;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    self.done = true;
                    self.current = None;
                    return Some(Err(ParseError::Io {
                        origin: self.origin_label(),
                        source: err,
                    }));
                }
            }
        }
    }
}
