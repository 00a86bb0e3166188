//! Incremental bridge between the read buffer and the request head parser.
//!
//! The bridge is fed the filled part of a connection's read buffer every time
//! new bytes land in it. It keeps a cursor over what it has already scanned, so
//! each feed only looks at the newly arrived increment until the end of the
//! request head shows up. At that point the head is handed to `httparse` once
//! and every element it reports is recorded as an [`EntryIndex`], a pair of
//! byte ranges into the read buffer.
//!
//! # Entries
//!
//! A completed parse produces, in order:
//!
//! 1. the request method
//! 2. the request target as sent, then its path, query and fragment parts
//! 3. the protocol version
//! 4. one entry per header field
//!
//! The number of entries is bounded. Exceeding the bound flags the bridge as
//! overflowed and fails the parse rather than truncating the list.

use httparse::Status;
use tracing::trace;

use crate::protocol::{EntryIndex, EntryKind, ParseError};

/// Outcome of one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// The request head is not complete yet.
    Partial,
    /// The request head ends at `header_len` and declares `content_length` body bytes.
    Complete { header_len: usize, content_length: u64 },
}

#[derive(Debug)]
pub struct ParserBridge {
    max_entries: usize,
    /// Number of buffer bytes already scanned.
    cursor: usize,
    entries: Vec<EntryIndex>,
    complete: Option<(usize, u64)>,
    overflowed: bool,
}

impl ParserBridge {
    pub fn new(max_entries: usize) -> Self {
        Self { max_entries, cursor: 0, entries: Vec::new(), complete: None, overflowed: false }
    }

    /// Forgets the previous request. Entry storage is kept for reuse.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.entries.clear();
        self.complete = None;
        self.overflowed = false;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.complete.is_some()
    }

    pub fn has_overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub(crate) fn entries(&self) -> &[EntryIndex] {
        &self.entries
    }

    /// Length of the request head, zero until the parse completes.
    pub fn header_len(&self) -> usize {
        self.complete.map_or(0, |(header_len, _)| header_len)
    }

    pub fn content_length(&self) -> u64 {
        self.complete.map_or(0, |(_, content_length)| content_length)
    }

    /// Feeds the filled part of the read buffer.
    ///
    /// `buf` must start at the same position on every call and only ever grow
    /// between two calls; bytes before the cursor are not looked at again.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the head is malformed, if it produces more
    /// entries than the configured bound, or if Content-Length is invalid.
    pub fn execute(&mut self, buf: &[u8]) -> Result<ParseStatus, ParseError> {
        if let Some((header_len, content_length)) = self.complete {
            return Ok(ParseStatus::Complete { header_len, content_length });
        }

        // step back so a terminator split across two reads is still found
        let from = self.cursor.saturating_sub(3).min(buf.len());
        let head_end = find_head_end(buf, from);
        self.cursor = buf.len();

        let Some(head_end) = head_end else {
            return Ok(ParseStatus::Partial);
        };

        self.parse_head(&buf[..head_end])
    }

    fn parse_head(&mut self, head: &[u8]) -> Result<ParseStatus, ParseError> {
        let mut headers = vec![httparse::EMPTY_HEADER; self.max_entries];
        let mut req = httparse::Request::new(&mut headers);

        let header_len = match req.parse(head) {
            Ok(Status::Complete(header_len)) => header_len,
            Ok(Status::Partial) => return Ok(ParseStatus::Partial),
            Err(httparse::Error::TooManyHeaders) => {
                self.overflowed = true;
                return Err(ParseError::too_many_entries(self.max_entries));
            }
            Err(e) => return Err(ParseError::invalid_header(e)),
        };
        trace!(header_len, header_num = req.headers.len(), "parsed request head");

        let method = req.method.ok_or_else(|| ParseError::invalid_header("missing method"))?;
        let target = req.path.ok_or_else(|| ParseError::invalid_header("missing request target"))?;

        let method_range = range_of(head, method.as_bytes()).ok_or_else(|| ParseError::invalid_header("method outside buffer"))?;
        self.push(EntryIndex::element(EntryKind::RequestMethod, method_range))?;

        let target_range = range_of(head, target.as_bytes()).ok_or_else(|| ParseError::invalid_header("target outside buffer"))?;
        self.push_target(target.as_bytes(), target_range)?;

        let version_range = version_range(head, target_range.1);
        self.push(EntryIndex::element(EntryKind::HttpVersion, version_range))?;

        let mut content_length: Option<u64> = None;
        for header in req.headers.iter() {
            let name = range_of(head, header.name.as_bytes()).ok_or_else(|| ParseError::invalid_header("header name outside buffer"))?;
            // empty values may not point into the buffer at all
            let value = range_of(head, header.value).unwrap_or((name.1, name.1));
            self.push(EntryIndex::header(name, value))?;

            if header.name.eq_ignore_ascii_case(http::header::CONTENT_LENGTH.as_str()) {
                let length = parse_content_length(header.value)?;
                match content_length {
                    Some(previous) if previous != length => {
                        return Err(ParseError::invalid_content_length("conflicting values"));
                    }
                    _ => content_length = Some(length),
                }
            }
        }

        let content_length = content_length.unwrap_or(0);
        self.complete = Some((header_len, content_length));
        Ok(ParseStatus::Complete { header_len, content_length })
    }

    fn push_target(&mut self, target: &[u8], (start, end): (usize, usize)) -> Result<(), ParseError> {
        self.push(EntryIndex::element(EntryKind::RequestUri, (start, end)))?;

        let hash = target.iter().position(|b| *b == b'#');
        let before_hash = hash.unwrap_or(target.len());
        let question = target[..before_hash].iter().position(|b| *b == b'?');

        self.push(EntryIndex::element(EntryKind::RequestPath, (start, start + question.unwrap_or(before_hash))))?;
        if let Some(question) = question {
            self.push(EntryIndex::element(EntryKind::QueryString, (start + question + 1, start + before_hash)))?;
        }
        if let Some(hash) = hash {
            self.push(EntryIndex::element(EntryKind::Fragment, (start + hash + 1, end)))?;
        }
        Ok(())
    }

    fn push(&mut self, index: EntryIndex) -> Result<(), ParseError> {
        if self.entries.len() >= self.max_entries {
            self.overflowed = true;
            return Err(ParseError::too_many_entries(self.max_entries));
        }
        self.entries.push(index);
        Ok(())
    }
}

/// Finds the end of the request head: the first empty line at or after `from`.
fn find_head_end(buf: &[u8], from: usize) -> Option<usize> {
    let mut start = from;
    while let Some(pos) = buf[start..].iter().position(|b| *b == b'\n') {
        let newline = start + pos;
        match &buf[newline + 1..] {
            [b'\n', ..] => return Some(newline + 2),
            [b'\r', b'\n', ..] => return Some(newline + 3),
            _ => start = newline + 1,
        }
    }
    None
}

/// Position of `part` inside `buf`, if `part` is a subslice of it.
fn range_of(buf: &[u8], part: &[u8]) -> Option<(usize, usize)> {
    let start = (part.as_ptr() as usize).checked_sub(buf.as_ptr() as usize)?;
    let end = start + part.len();
    (end <= buf.len()).then_some((start, end))
}

/// The version token follows the request target on the request line.
fn version_range(head: &[u8], target_end: usize) -> (usize, usize) {
    let line = &head[target_end..];
    let line_end = target_end + line.iter().position(|b| *b == b'\r' || *b == b'\n').unwrap_or(line.len());
    let spaces = head[target_end..line_end].iter().take_while(|b| **b == b' ').count();
    (target_end + spaces, line_end)
}

fn parse_content_length(value: &[u8]) -> Result<u64, ParseError> {
    let text = std::str::from_utf8(value).map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;
    text.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {text} is not u64")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;
    use indoc::indoc;

    fn request<'a>(buf: &'a [u8], bridge: &'a ParserBridge) -> Request<'a> {
        Request::new(buf, bridge.entries(), bridge.header_len(), bridge.content_length())
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let mut bridge = ParserBridge::new(500);
        let status = bridge.execute(str.as_bytes()).unwrap();

        assert_eq!(status, ParseStatus::Complete { header_len: str.len(), content_length: 0 });

        let request = request(str.as_bytes(), &bridge);
        assert_eq!(request.method(), Some(http::Method::GET));
        assert_eq!(request.version(), Some(http::Version::HTTP_11));
        assert_eq!(request.path(), Some("/index.html"));
        assert_eq!(request.query(), None);
        assert_eq!(request.headers().count(), 3);
        assert_eq!(request.header("host"), Some(&b"127.0.0.1:8080"[..]));
        assert_eq!(request.header("user-agent"), Some(&b"curl/7.79.1"[..]));
        assert_eq!(request.header("accept"), Some(&b"*/*"[..]));
    }

    #[test]
    fn entries_in_order() {
        let buf = b"GET /search?q=rust#top HTTP/1.0\r\nHost: x\r\nX-Empty:\r\n\r\n";
        let mut bridge = ParserBridge::new(500);
        bridge.execute(buf).unwrap();

        let request = request(buf, &bridge);
        let kinds = request.entries().map(|entry| entry.kind()).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                EntryKind::RequestMethod,
                EntryKind::RequestUri,
                EntryKind::RequestPath,
                EntryKind::QueryString,
                EntryKind::Fragment,
                EntryKind::HttpVersion,
                EntryKind::Header,
                EntryKind::Header,
            ]
        );

        assert_eq!(request.uri(), Some("/search?q=rust#top"));
        assert_eq!(request.path(), Some("/search"));
        assert_eq!(request.query(), Some("q=rust"));
        assert_eq!(request.fragment(), Some("top"));
        assert_eq!(request.element(EntryKind::HttpVersion), Some(&b"HTTP/1.0"[..]));
        assert_eq!(request.header("x-empty"), Some(&b""[..]));
    }

    #[test]
    fn views_point_into_the_buffer() {
        let buf = b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut bridge = ParserBridge::new(500);
        bridge.execute(buf).unwrap();

        let range = buf.as_ptr_range();
        for entry in request(buf, &bridge).entries() {
            assert!(range.contains(&entry.value().as_ptr()));
            if let Some(name) = entry.name() {
                assert!(range.contains(&name.as_ptr()));
            }
        }
    }

    #[test]
    fn byte_by_byte_feed() {
        let buf = b"POST /upload HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
        let head_len = buf.len() - 5;
        let mut bridge = ParserBridge::new(500);

        for filled in 1..head_len {
            assert_eq!(bridge.execute(&buf[..filled]).unwrap(), ParseStatus::Partial);
            assert_eq!(bridge.cursor(), filled);
            assert!(!bridge.is_finished());
        }

        let status = bridge.execute(&buf[..head_len]).unwrap();
        assert_eq!(status, ParseStatus::Complete { header_len: head_len, content_length: 5 });
        assert!(bridge.is_finished());

        // further feeds do not parse again
        assert_eq!(bridge.execute(buf).unwrap(), status);
        assert_eq!(request(buf, &bridge).body_head(), b"hello");
    }

    #[test]
    fn overflow_is_a_parse_error() {
        // method, target, path, version leave room for exactly two headers
        let mut bridge = ParserBridge::new(6);
        let fits = b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\n\r\n";
        assert!(matches!(bridge.execute(fits), Ok(ParseStatus::Complete { .. })));
        assert!(!bridge.has_overflowed());

        bridge.reset();
        let too_many = b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n";
        assert_eq!(bridge.execute(too_many), Err(ParseError::too_many_entries(6)));
        assert!(bridge.has_overflowed());
    }

    #[test]
    fn overflow_from_header_count() {
        let mut bridge = ParserBridge::new(4);
        let buf = b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\nD: 4\r\nE: 5\r\n\r\n";
        assert_eq!(bridge.execute(buf), Err(ParseError::too_many_entries(4)));
        assert!(bridge.has_overflowed());
    }

    #[test]
    fn malformed_head() {
        let mut bridge = ParserBridge::new(500);
        let result = bridge.execute(b"GET / HTTP/1.1\r\nBad Header\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidHeader { .. })));
    }

    #[test]
    fn invalid_content_length() {
        let mut bridge = ParserBridge::new(500);
        let result = bridge.execute(b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidContentLength { .. })));

        bridge.reset();
        let result = bridge.execute(b"POST / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidContentLength { .. })));
    }

    #[test]
    fn reset_clears_previous_request() {
        let mut bridge = ParserBridge::new(500);
        bridge.execute(b"GET /one HTTP/1.1\r\nA: 1\r\nB: 2\r\n\r\n").unwrap();
        assert_eq!(bridge.entries().len(), 6);

        bridge.reset();
        assert_eq!(bridge.cursor(), 0);
        assert!(!bridge.is_finished());
        assert!(bridge.entries().is_empty());
        assert_eq!(bridge.header_len(), 0);

        let buf = b"GET /two HTTP/1.1\r\n\r\n";
        bridge.execute(buf).unwrap();
        let request = request(buf, &bridge);
        assert_eq!(request.path(), Some("/two"));
        assert_eq!(request.headers().count(), 0);
    }

    #[test]
    fn terminator_split_across_feeds() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut bridge = ParserBridge::new(500);
        assert_eq!(bridge.execute(&buf[..buf.len() - 2]).unwrap(), ParseStatus::Partial);
        assert!(matches!(bridge.execute(buf).unwrap(), ParseStatus::Complete { .. }));
    }
}
