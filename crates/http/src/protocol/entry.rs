//! Parsed request entries.
//!
//! An entry is either a generic header (`name: value`) or a typed structural
//! element of the request line such as the method or the protocol version.
//! Entries are recorded by the parser as byte ranges into the connection's read
//! buffer and only become slices when a [`Request`](super::Request) view is
//! handed out, so no header byte is ever copied on the hot path.

use bytes::Bytes;

/// Discriminant of a parsed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A generic `name: value` header field.
    Header,
    /// The request method, e.g. `GET`.
    RequestMethod,
    /// The full request target as sent, e.g. `/search?q=1#top`.
    RequestUri,
    /// The path component of the request target.
    RequestPath,
    /// The query component of the request target, without the leading `?`.
    QueryString,
    /// The fragment component of the request target, without the leading `#`.
    Fragment,
    /// The protocol version token, e.g. `HTTP/1.1`.
    HttpVersion,
}

/// Byte ranges of one entry inside the read buffer.
///
/// This is what the parser stores. A range only means something against the
/// buffer generation it was recorded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryIndex {
    pub(crate) kind: EntryKind,
    /// Start and end byte positions of the header name, empty for typed elements
    pub(crate) name: (usize, usize),
    /// Start and end byte positions of the value
    pub(crate) value: (usize, usize),
}

impl EntryIndex {
    pub(crate) fn header(name: (usize, usize), value: (usize, usize)) -> Self {
        Self { kind: EntryKind::Header, name, value }
    }

    pub(crate) fn element(kind: EntryKind, value: (usize, usize)) -> Self {
        Self { kind, name: (0, 0), value }
    }

    /// Resolves the ranges against `buf`, the buffer they were recorded from.
    pub(crate) fn resolve(self, buf: &[u8]) -> Entry<'_> {
        let name = match self.kind {
            EntryKind::Header => Some(&buf[self.name.0..self.name.1]),
            _ => None,
        };
        Entry { kind: self.kind, name, value: &buf[self.value.0..self.value.1] }
    }
}

/// A non-owning view of one parsed entry.
///
/// The lifetime ties the view to the read buffer of the connection it came
/// from, so it cannot outlive the dispatch it was handed out in. Use
/// [`Entry::to_owned_entry`] to keep the data longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a> {
    kind: EntryKind,
    name: Option<&'a [u8]>,
    value: &'a [u8],
}

impl<'a> Entry<'a> {
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// The header field name, `None` for typed elements.
    pub fn name(&self) -> Option<&'a [u8]> {
        self.name
    }

    pub fn value(&self) -> &'a [u8] {
        self.value
    }

    /// The value as text, if it is valid UTF-8.
    pub fn value_str(&self) -> Option<&'a str> {
        std::str::from_utf8(self.value).ok()
    }

    pub fn is_header(&self) -> bool {
        self.kind == EntryKind::Header
    }

    /// Copies the entry out of the read buffer.
    pub fn to_owned_entry(&self) -> OwnedEntry {
        OwnedEntry {
            kind: self.kind,
            name: self.name.map(Bytes::copy_from_slice),
            value: Bytes::copy_from_slice(self.value),
        }
    }
}

/// An entry that owns its bytes and may be kept past the dispatch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedEntry {
    kind: EntryKind,
    name: Option<Bytes>,
    value: Bytes,
}

impl OwnedEntry {
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn name(&self) -> Option<&Bytes> {
        self.name.as_ref()
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_header_and_element() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";

        let method = EntryIndex::element(EntryKind::RequestMethod, (0, 3)).resolve(buf);
        assert_eq!(method.kind(), EntryKind::RequestMethod);
        assert_eq!(method.name(), None);
        assert_eq!(method.value(), b"GET");
        assert!(!method.is_header());

        let host = EntryIndex::header((16, 20), (22, 23)).resolve(buf);
        assert!(host.is_header());
        assert_eq!(host.name(), Some(&b"Host"[..]));
        assert_eq!(host.value_str(), Some("x"));
    }

    #[test]
    fn owned_entry_survives_buffer() {
        let owned = {
            let buf = b"Accept: */*".to_vec();
            EntryIndex::header((0, 6), (8, 11)).resolve(&buf).to_owned_entry()
        };

        assert_eq!(owned.kind(), EntryKind::Header);
        assert_eq!(owned.name().map(|b| &b[..]), Some(&b"Accept"[..]));
        assert_eq!(&owned.value()[..], b"*/*");
    }
}
