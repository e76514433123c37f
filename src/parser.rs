//! Incremental HTTP/1.1 request parser.
//!
//! The reactor reads socket bytes straight into [`RequestParser::writable_tail`]
//! and commits them with [`RequestParser::advance`]. [`RequestParser::eof`]
//! reports when the request is complete (or has failed in a way that can be
//! answered), and [`RequestParser::finalize`] performs full validation and
//! produces an owning [`Request`].
//!
//! Wire strictness applied at finalization:
//! - request target: absolute path, no query string, no `..`/`%`/`\`/control
//!   bytes, at most 2048 bytes
//! - header keys restricted to RFC 7230 tchars, values free of bare CR/LF
//! - `Transfer-Encoding` rejected outright, duplicate `Host` rejected
//! - POST bodies must be `application/json` or `multipart/form-data`

use std::collections::HashMap;

use thiserror::Error;

use crate::buffer::SocketBuffer;
use crate::http::{FilePart, HeaderMap, Method, Request};
use crate::multipart::{sanitize_filename, Multipart};

pub const MAX_URI_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("request is not complete")]
    Incomplete,
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("unsupported HTTP method")]
    UnsupportedMethod,
    #[error("URI query parameters are not allowed")]
    QueryNotAllowed,
    #[error("URI exceeds {MAX_URI_LEN} bytes")]
    UriTooLong,
    #[error("invalid URI path")]
    InvalidPath,
    #[error("malformed header line")]
    MalformedHeader,
    #[error("invalid header key: {0}")]
    InvalidHeaderKey(String),
    #[error("invalid characters in header value for key: {0}")]
    InvalidHeaderValue(String),
    #[error("Transfer-Encoding is not supported")]
    TransferEncoding,
    #[error("duplicate Host header detected")]
    DuplicateHost,
    #[error("POST request without Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value")]
    InvalidContentLength,
    #[error("request body exceeds the configured maximum size")]
    BodyTooLarge,
    #[error("request filled the buffer before the header section completed")]
    BufferOverflow,
    #[error("POST request with body is missing Content-Type header")]
    MissingContentType,
    #[error("unsupported Content-Type for POST: {0}")]
    UnsupportedContentType(String),
    #[error("JSON parse error: {0}")]
    InvalidJson(String),
    #[error("malformed multipart/form-data: boundary not found")]
    MissingBoundary,
}

pub struct RequestParser {
    buf: SocketBuffer,
    header_size: Option<usize>,
    method: Option<Method>,
    content_length: Option<usize>,
    pending_error: Option<ParseError>,
}

impl RequestParser {
    pub fn new(max_request_size: usize) -> Self {
        Self {
            buf: SocketBuffer::new(max_request_size),
            header_size: None,
            method: None,
            content_length: None,
            pending_error: None,
        }
    }

    /// Where the reactor writes freshly read socket bytes. Empty only when
    /// the buffer hit the configured maximum.
    pub fn writable_tail(&mut self) -> &mut [u8] {
        self.buf.writable_tail()
    }

    /// Commit `n` bytes read from the socket.
    pub fn advance(&mut self, n: usize) {
        self.buf.advance(n);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether the request is ready for [`RequestParser::finalize`]. Each
    /// discovery step is idempotent once it has succeeded. A request that
    /// can already be answered with an error (unknown method, bad
    /// Content-Length, oversized body) also reports EOF so the connection
    /// receives a 400 instead of waiting for the idle sweep.
    pub fn eof(&mut self) -> bool {
        if self.pending_error.is_some() {
            return true;
        }
        if !self.locate_header_end() {
            return false;
        }
        if self.pending_error.is_some() {
            return true;
        }
        self.identify_method();
        if self.pending_error.is_some() {
            return true;
        }
        match self.method {
            Some(Method::Get) | Some(Method::Options) => true,
            Some(Method::Post) => {
                self.locate_content_length();
                if self.pending_error.is_some() {
                    return true;
                }
                let header_size = self.header_size.unwrap_or(0);
                let content_length = self.content_length.unwrap_or(0);
                self.buf.len() >= header_size + content_length
            }
            _ => true,
        }
    }

    /// Full validation pass producing an owning request. Consumes the
    /// parser; the connection installs a fresh one for keep-alive.
    pub fn finalize(mut self, remote_ip: String) -> Result<Request, ParseError> {
        if !self.eof() {
            return Err(ParseError::Incomplete);
        }
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        let header_size = self.header_size.ok_or(ParseError::Incomplete)?;
        let view = self.buf.view();

        let line_end = find(view, b"\r\n").ok_or(ParseError::MalformedRequestLine)?;
        let path = parse_request_line(&view[..line_end])?;

        let mut headers = HeaderMap::default();
        parse_headers(&view[line_end + 2..header_size - 4], &mut headers)?;

        let method = self.method.unwrap_or(Method::Unknown);
        let mut params = HashMap::new();
        let mut json = None;
        let mut file_parts = Vec::new();
        let mut body = Vec::new();

        if method == Method::Post {
            let content_length = self.content_length.ok_or(ParseError::MissingContentLength)?;
            let raw_body = &view[header_size..header_size + content_length];

            if content_length > 0 {
                let content_type = headers
                    .get("content-type")
                    .ok_or(ParseError::MissingContentType)?;

                if content_type.starts_with("application/json") {
                    let value: serde_json::Value = serde_json::from_slice(raw_body)
                        .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
                    json = Some(value);
                    body = raw_body.to_vec();
                } else if content_type.starts_with("multipart/form-data") {
                    let boundary =
                        extract_boundary(content_type).ok_or(ParseError::MissingBoundary)?;
                    decode_multipart(raw_body, &boundary, &mut params, &mut file_parts);
                } else {
                    return Err(ParseError::UnsupportedContentType(content_type.to_string()));
                }
            }
        }

        Ok(Request {
            method,
            path,
            headers,
            params,
            json,
            file_parts,
            body,
            remote_ip,
            claims: None,
        })
    }

    fn locate_header_end(&mut self) -> bool {
        if self.header_size.is_some() {
            return true;
        }
        if let Some(pos) = find(self.buf.view(), b"\r\n\r\n") {
            self.header_size = Some(pos + 4);
            return true;
        }
        // Header section still open with the buffer at its limit: the
        // request can never complete. This is terminal for the connection;
        // the reactor closes it without a response.
        if self.buf.len() == self.buf.max_size() {
            self.pending_error = Some(ParseError::BufferOverflow);
            return true;
        }
        false
    }

    fn identify_method(&mut self) {
        if self.method.is_some() {
            return;
        }
        let view = self.buf.view();
        let Some(line_end) = find(view, b"\r\n") else {
            self.pending_error = Some(ParseError::MalformedRequestLine);
            return;
        };
        let line = &view[..line_end];
        let Some(space) = line.iter().position(|&b| b == b' ') else {
            self.pending_error = Some(ParseError::MalformedRequestLine);
            return;
        };
        let method = Method::from_bytes(&line[..space]);
        if method == Method::Unknown {
            self.pending_error = Some(ParseError::UnsupportedMethod);
            return;
        }
        self.method = Some(method);
    }

    fn locate_content_length(&mut self) {
        if self.content_length.is_some() {
            return;
        }
        let Some(header_size) = self.header_size else {
            return;
        };
        let view = self.buf.view();
        let Some(line_end) = find(view, b"\r\n") else {
            return;
        };
        let header_block = &view[line_end + 2..header_size - 4];

        for line in split_lines(header_block) {
            let Some(colon) = line.iter().position(|&b| b == b':') else {
                continue;
            };
            let key = &line[..colon];
            if !key.eq_ignore_ascii_case(b"content-length") {
                continue;
            }
            let value = trim_ascii(&line[colon + 1..]);
            if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
                self.pending_error = Some(ParseError::InvalidContentLength);
                return;
            }
            let Ok(n) = std::str::from_utf8(value).unwrap_or("").parse::<usize>() else {
                self.pending_error = Some(ParseError::InvalidContentLength);
                return;
            };
            // The whole request has to fit in the buffer.
            if n > self.buf.max_size().saturating_sub(header_size) {
                self.pending_error = Some(ParseError::BodyTooLarge);
                return;
            }
            self.content_length = Some(n);
            return;
        }
        self.pending_error = Some(ParseError::MissingContentLength);
    }
}

fn parse_request_line(line: &[u8]) -> Result<String, ParseError> {
    let mut parts = line.split(|&b| b == b' ');
    let _method = parts.next().ok_or(ParseError::MalformedRequestLine)?;
    let uri = parts.next().ok_or(ParseError::MalformedRequestLine)?;

    if uri.contains(&b'?') {
        return Err(ParseError::QueryNotAllowed);
    }
    if uri.len() > MAX_URI_LEN {
        return Err(ParseError::UriTooLong);
    }
    let path = std::str::from_utf8(uri).map_err(|_| ParseError::InvalidPath)?;
    if !path.starts_with('/')
        || path.contains("..")
        || path.bytes().any(|b| b == b'%' || b == b'\\' || b < 0x20 || b == 0x7f)
    {
        return Err(ParseError::InvalidPath);
    }
    Ok(path.to_string())
}

fn parse_headers(block: &[u8], headers: &mut HeaderMap) -> Result<(), ParseError> {
    for line in split_lines(block) {
        if line.is_empty() {
            continue;
        }
        let line = std::str::from_utf8(line).map_err(|_| ParseError::MalformedHeader)?;
        let colon = line.find(':').ok_or(ParseError::MalformedHeader)?;
        let key = &line[..colon];
        if !is_valid_header_key(key) {
            return Err(ParseError::InvalidHeaderKey(key.to_string()));
        }
        let value = line[colon + 1..].trim_matches([' ', '\t']);
        // Bare CR or LF in a value enables response splitting.
        if value.contains(['\r', '\n']) {
            return Err(ParseError::InvalidHeaderValue(key.to_string()));
        }
        if key.eq_ignore_ascii_case("transfer-encoding") {
            return Err(ParseError::TransferEncoding);
        }
        if key.eq_ignore_ascii_case("host") && headers.contains("host") {
            return Err(ParseError::DuplicateHost);
        }
        headers.insert(key, value.to_string());
    }
    Ok(())
}

/// Per RFC 7230 a header key is 1*tchar.
fn is_valid_header_key(key: &str) -> bool {
    !key.is_empty()
        && key.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

fn extract_boundary(content_type: &str) -> Option<String> {
    let rest = &content_type[content_type.find("boundary=")? + "boundary=".len()..];
    let rest = rest.split(';').next().unwrap_or(rest).trim();
    let boundary = rest
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(rest);
    if boundary.is_empty() {
        None
    } else {
        Some(boundary.to_string())
    }
}

fn decode_multipart(
    body: &[u8],
    boundary: &str,
    params: &mut HashMap<String, String>,
    file_parts: &mut Vec<FilePart>,
) {
    for part in Multipart::new(body, boundary) {
        let Some(name) = part.name else {
            continue;
        };
        match part.filename {
            Some(filename) => file_parts.push(FilePart {
                field_name: name.to_string(),
                filename: sanitize_filename(filename).to_string(),
                content_type: part.content_type.unwrap_or("").to_string(),
                content: part.body.to_vec(),
            }),
            None => {
                let value = String::from_utf8_lossy(part.body).into_owned();
                params.entry(name.to_string()).or_insert(value);
            }
        }
    }
}

fn find(data: &[u8], needle: &[u8]) -> Option<usize> {
    data.windows(needle.len()).position(|w| w == needle)
}

/// Split a header block on CRLF pairs without allocating.
fn split_lines(block: &[u8]) -> CrlfSplit<'_> {
    CrlfSplit { rest: Some(block) }
}

struct CrlfSplit<'a> {
    rest: Option<&'a [u8]>,
}

impl<'a> Iterator for CrlfSplit<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest?;
        match find(rest, b"\r\n") {
            Some(pos) => {
                self.rest = Some(&rest[pos + 2..]);
                Some(&rest[..pos])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}

fn trim_ascii(value: &[u8]) -> &[u8] {
    let start = value
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(value.len());
    let end = value
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map(|p| p + 1)
        .unwrap_or(start);
    &value[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut RequestParser, bytes: &[u8]) {
        let mut offset = 0;
        while offset < bytes.len() {
            let tail = parser.writable_tail();
            assert!(!tail.is_empty(), "buffer exhausted mid-test");
            let n = tail.len().min(bytes.len() - offset);
            tail[..n].copy_from_slice(&bytes[offset..offset + n]);
            parser.advance(n);
            offset += n;
        }
    }

    fn parse(raw: &[u8]) -> Result<Request, ParseError> {
        let mut parser = RequestParser::new(5 * 1024 * 1024);
        feed(&mut parser, raw);
        assert!(parser.eof(), "parser did not reach EOF");
        parser.finalize("127.0.0.1".to_string())
    }

    #[test]
    fn simple_get() {
        let req = parse(b"GET /ping HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/ping");
        assert_eq!(req.header("host"), Some("h"));
        assert_eq!(req.remote_ip(), "127.0.0.1");
    }

    #[test]
    fn eof_is_incremental() {
        let mut parser = RequestParser::new(1 << 20);
        feed(&mut parser, b"GET /a HTTP/1.1\r\nHost");
        assert!(!parser.eof());
        feed(&mut parser, b": h\r\n\r\n");
        assert!(parser.eof());
    }

    #[test]
    fn post_waits_for_full_body() {
        let mut parser = RequestParser::new(1 << 20);
        feed(
            &mut parser,
            b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Type: application/json\r\nContent-Length: 11\r\n\r\n{\"a\"",
        );
        assert!(!parser.eof());
        feed(&mut parser, b":\"bcd\"}");
        assert!(parser.eof());
        let req = parser.finalize("ip".to_string()).unwrap();
        assert_eq!(req.raw_param("a").as_deref(), Some("bcd"));
        assert_eq!(req.body(), b"{\"a\":\"bcd\"}");
    }

    #[test]
    fn query_string_is_rejected() {
        let err = parse(b"GET /products?limit=1 HTTP/1.1\r\nHost: h\r\n\r\n").unwrap_err();
        assert!(matches!(err, ParseError::QueryNotAllowed));
        assert!(err.to_string().contains("URI query parameters are not allowed"));
    }

    #[test]
    fn traversal_and_encoding_rejected() {
        for uri in ["/a/../b", "/a%41", "/a\\b", "relative"] {
            let raw = format!("GET {uri} HTTP/1.1\r\nHost: h\r\n\r\n");
            assert!(
                matches!(parse(raw.as_bytes()), Err(ParseError::InvalidPath)),
                "expected rejection for {uri}"
            );
        }
    }

    #[test]
    fn overlong_uri_rejected() {
        let raw = format!("GET /{} HTTP/1.1\r\nHost: h\r\n\r\n", "a".repeat(MAX_URI_LEN));
        assert!(matches!(parse(raw.as_bytes()), Err(ParseError::UriTooLong)));
    }

    #[test]
    fn unknown_method_is_answerable_error() {
        let mut parser = RequestParser::new(1 << 20);
        feed(&mut parser, b"PATCH /x HTTP/1.1\r\nHost: h\r\n\r\n");
        assert!(parser.eof());
        assert!(matches!(
            parser.finalize("ip".to_string()),
            Err(ParseError::UnsupportedMethod)
        ));
    }

    #[test]
    fn transfer_encoding_rejected_even_with_content_length() {
        let err = parse(
            b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\nhello",
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::TransferEncoding));
        assert!(err.to_string().contains("Transfer-Encoding is not supported"));
    }

    #[test]
    fn duplicate_host_rejected() {
        let err = parse(b"GET /x HTTP/1.1\r\nHost: a\r\nhost: b\r\n\r\n").unwrap_err();
        assert!(matches!(err, ParseError::DuplicateHost));
    }

    #[test]
    fn bad_header_key_and_value_rejected() {
        assert!(matches!(
            parse(b"GET /x HTTP/1.1\r\nBad Key: v\r\n\r\n"),
            Err(ParseError::InvalidHeaderKey(_))
        ));
        assert!(matches!(
            parse(b"GET /x HTTP/1.1\r\nK: a\rb\r\n\r\n"),
            Err(ParseError::InvalidHeaderValue(_))
        ));
    }

    #[test]
    fn post_without_content_length_rejected() {
        let mut parser = RequestParser::new(1 << 20);
        feed(&mut parser, b"POST /x HTTP/1.1\r\nHost: h\r\n\r\n");
        assert!(parser.eof());
        assert!(matches!(
            parser.finalize("ip".to_string()),
            Err(ParseError::MissingContentLength)
        ));
    }

    #[test]
    fn non_numeric_content_length_rejected() {
        let mut parser = RequestParser::new(1 << 20);
        feed(&mut parser, b"POST /x HTTP/1.1\r\nContent-Length: 12abc\r\n\r\n");
        assert!(parser.eof());
        assert!(matches!(
            parser.finalize("ip".to_string()),
            Err(ParseError::InvalidContentLength)
        ));
    }

    #[test]
    fn zero_length_post_without_content_type_accepted() {
        let req = parse(b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert_eq!(req.method(), Method::Post);
        assert!(req.body().is_empty());
    }

    #[test]
    fn unsupported_post_content_type_rejected() {
        let err = parse(
            b"POST /x HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi",
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedContentType(_)));
    }

    #[test]
    fn content_length_beyond_buffer_rejected_up_front() {
        let mut parser = RequestParser::new(4096);
        feed(
            &mut parser,
            b"POST /x HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 1000000\r\n\r\n",
        );
        assert!(parser.eof());
        assert!(matches!(
            parser.finalize("ip".to_string()),
            Err(ParseError::BodyTooLarge)
        ));
    }

    #[test]
    fn malformed_json_body_rejected() {
        let err = parse(
            b"POST /x HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 9\r\n\r\n{\"a\": bad",
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));
    }

    #[test]
    fn multipart_fields_and_files_decoded() {
        let body = b"--bd\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\r\n\
            report\r\n\
            --bd\r\n\
            Content-Disposition: form-data; name=\"doc\"; filename=\"../../x/report.pdf\"\r\n\
            Content-Type: application/pdf\r\n\r\n\
            PDFDATA\r\n\
            --bd--\r\n";
        let raw = format!(
            "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=bd\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let mut full = raw.into_bytes();
        full.extend_from_slice(body);

        let req = parse(&full).unwrap();
        assert_eq!(req.raw_param("title").as_deref(), Some("report"));
        let file = req.file_upload("doc").unwrap();
        assert_eq!(file.filename, "report.pdf");
        assert_eq!(file.content_type, "application/pdf");
        assert_eq!(file.content, b"PDFDATA");
    }

    #[test]
    fn multipart_quoted_boundary_accepted() {
        let body = b"--qb\r\nContent-Disposition: form-data; name=\"k\"\r\n\r\nv\r\n--qb--\r\n";
        let raw = format!(
            "POST /u HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=\"qb\"\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let mut full = raw.into_bytes();
        full.extend_from_slice(body);
        let req = parse(&full).unwrap();
        assert_eq!(req.raw_param("k").as_deref(), Some("v"));
    }

    #[test]
    fn multipart_without_boundary_rejected() {
        let err = parse(
            b"POST /u HTTP/1.1\r\nContent-Type: multipart/form-data\r\nContent-Length: 4\r\n\r\nbody",
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::MissingBoundary));
    }

    #[test]
    fn oversized_header_section_fails() {
        let mut parser = RequestParser::new(4096);
        let raw = format!("GET /x HTTP/1.1\r\nPadding: {}", "y".repeat(8192));
        let mut offset = 0;
        let bytes = raw.as_bytes();
        while offset < bytes.len() {
            let tail = parser.writable_tail();
            if tail.is_empty() {
                break;
            }
            let n = tail.len().min(bytes.len() - offset);
            tail[..n].copy_from_slice(&bytes[offset..offset + n]);
            parser.advance(n);
            offset += n;
        }
        assert!(parser.eof());
        assert!(matches!(
            parser.finalize("ip".to_string()),
            Err(ParseError::BufferOverflow)
        ));
    }
}
