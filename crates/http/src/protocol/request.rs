//! Borrowed view of a fully parsed request.
//!
//! A [`Request`] is assembled at dispatch time from the connection's read
//! buffer and the entry ranges recorded by the parser. Every slice it hands out
//! borrows the read buffer, which stays untouched until the connection is
//! reinitialized or closed.

use http::{Method, Version};

use super::entry::{Entry, EntryIndex, EntryKind};

#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    buf: &'a [u8],
    entries: &'a [EntryIndex],
    header_len: usize,
    content_length: u64,
}

impl<'a> Request<'a> {
    /// `buf` is the filled part of the read buffer the entry ranges were recorded from.
    pub(crate) fn new(buf: &'a [u8], entries: &'a [EntryIndex], header_len: usize, content_length: u64) -> Self {
        Self { buf, entries, header_len, content_length }
    }

    /// All entries in the order the parser produced them.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = Entry<'a>> + use<'a> {
        let buf = self.buf;
        self.entries.iter().map(move |index| index.resolve(buf))
    }

    /// Generic header entries only.
    pub fn headers(&self) -> impl Iterator<Item = Entry<'a>> + use<'a> {
        self.entries().filter(Entry::is_header)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The first typed element of the given kind.
    pub fn element(&self, kind: EntryKind) -> Option<&'a [u8]> {
        let buf = self.buf;
        self.entries.iter().find(|index| index.kind == kind).map(|index| index.resolve(buf).value())
    }

    /// The first header whose name matches `name`, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.headers().find(|entry| entry.name().is_some_and(|n| n.eq_ignore_ascii_case(name.as_bytes()))).map(|entry| entry.value())
    }

    pub fn method(&self) -> Option<Method> {
        self.element(EntryKind::RequestMethod).and_then(|bytes| Method::from_bytes(bytes).ok())
    }

    pub fn version(&self) -> Option<Version> {
        match self.element(EntryKind::HttpVersion)? {
            b"HTTP/1.0" => Some(Version::HTTP_10),
            b"HTTP/1.1" => Some(Version::HTTP_11),
            _ => None,
        }
    }

    pub fn uri(&self) -> Option<&'a str> {
        self.element_str(EntryKind::RequestUri)
    }

    pub fn path(&self) -> Option<&'a str> {
        self.element_str(EntryKind::RequestPath)
    }

    pub fn query(&self) -> Option<&'a str> {
        self.element_str(EntryKind::QueryString)
    }

    pub fn fragment(&self) -> Option<&'a str> {
        self.element_str(EntryKind::Fragment)
    }

    /// Declared body length, zero when the request has no Content-Length.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Size of the request head including the blank line.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Body bytes that arrived together with the head.
    ///
    /// This is the whole body unless it is larger than the read buffer, in which
    /// case the rest has to be pulled with `Exchange::read_body`.
    pub fn body_head(&self) -> &'a [u8] {
        let declared = usize::try_from(self.content_length).unwrap_or(usize::MAX);
        let end = self.header_len.saturating_add(declared).min(self.buf.len());
        &self.buf[self.header_len.min(end)..end]
    }

    fn element_str(&self, kind: EntryKind) -> Option<&'a str> {
        self.element(kind).and_then(|bytes| std::str::from_utf8(bytes).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<u8>, Vec<EntryIndex>) {
        let buf = b"POST /a?b=1 HTTP/1.0\r\nContent-Length: 4\r\n\r\nbody".to_vec();
        let entries = vec![
            EntryIndex::element(EntryKind::RequestMethod, (0, 4)),
            EntryIndex::element(EntryKind::RequestUri, (5, 11)),
            EntryIndex::element(EntryKind::RequestPath, (5, 7)),
            EntryIndex::element(EntryKind::QueryString, (8, 11)),
            EntryIndex::element(EntryKind::HttpVersion, (12, 20)),
            EntryIndex::header((22, 36), (38, 39)),
        ];
        (buf, entries)
    }

    #[test]
    fn typed_accessors() {
        let (buf, entries) = sample();
        let request = Request::new(&buf, &entries, 43, 4);

        assert_eq!(request.method(), Some(Method::POST));
        assert_eq!(request.version(), Some(Version::HTTP_10));
        assert_eq!(request.uri(), Some("/a?b=1"));
        assert_eq!(request.path(), Some("/a"));
        assert_eq!(request.query(), Some("b=1"));
        assert_eq!(request.fragment(), None);
        assert_eq!(request.len(), 6);
        assert_eq!(request.headers().count(), 1);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let (buf, entries) = sample();
        let request = Request::new(&buf, &entries, 43, 4);

        assert_eq!(request.header("content-length"), Some(&b"4"[..]));
        assert_eq!(request.header("CONTENT-LENGTH"), Some(&b"4"[..]));
        assert_eq!(request.header("host"), None);
    }

    #[test]
    fn body_head_is_bounded_by_content_length() {
        let (buf, entries) = sample();

        assert_eq!(Request::new(&buf, &entries, 43, 4).body_head(), b"body");
        assert_eq!(Request::new(&buf, &entries, 43, 2).body_head(), b"bo");
        assert_eq!(Request::new(&buf, &entries, 43, 100).body_head(), b"body");
        assert_eq!(Request::new(&buf, &entries, 43, 0).body_head(), b"");
    }
}
