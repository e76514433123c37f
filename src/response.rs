//! Response serialization.
//!
//! A [`Response`] owns one pre-serialized byte buffer (status line, headers
//! and body) plus a read cursor for partial writes. Finalization is
//! one-shot: the first `set_*` call wins and later calls are no-ops.

use std::fmt::Write;

use chrono::Utc;

use crate::http::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NoContent,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    InternalServerError,
    ServiceUnavailable,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NoContent => 204,
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NoContent => "No Content",
            Status::BadRequest => "Bad Request",
            Status::Unauthorized => "Unauthorized",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Server Error",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }
}

const SECURITY_HEADERS: &str = "Strict-Transport-Security: max-age=31536000; includeSubDomains\r\n\
X-Frame-Options: SAMEORIGIN\r\n\
X-Content-Type-Options: nosniff\r\n\
Referrer-Policy: no-referrer\r\n\
Cache-Control: no-store\r\n";

pub struct Response {
    buf: Vec<u8>,
    read_pos: usize,
    finalized: bool,
    origin: Option<String>,
    close_connection: bool,
}

impl Response {
    /// A response that echoes `origin` in its CORS header when present.
    pub fn new(origin: Option<&str>) -> Self {
        Self {
            buf: Vec::with_capacity(512),
            read_pos: 0,
            finalized: false,
            origin: origin.filter(|o| !o.is_empty()).map(str::to_string),
            close_connection: false,
        }
    }

    /// A response bound to `req`: CORS origin echo plus `Connection: close`
    /// when the client asked for it.
    pub fn for_request(req: &Request) -> Self {
        let mut res = Self::new(req.header("origin"));
        res.close_connection = req.wants_close();
        res
    }

    /// Force the connection to close once this response is written. Used
    /// for parse errors, where the stream cannot be resynchronized.
    pub fn set_close(&mut self) {
        self.close_connection = true;
    }

    pub fn close_after(&self) -> bool {
        self.close_connection
    }

    pub fn set_body(&mut self, status: Status, body: &str) {
        self.set_body_with_type(status, body, "application/json; charset=utf-8");
    }

    pub fn set_body_with_type(&mut self, status: Status, body: &str, content_type: &str) {
        if self.finalized {
            return;
        }
        let mut head = String::with_capacity(512);
        let _ = write!(
            head,
            "HTTP/1.1 {} {}\r\nDate: {}\r\n",
            status.code(),
            status.reason(),
            http_date()
        );
        self.write_cors(&mut head);
        head.push_str(SECURITY_HEADERS);
        let _ = write!(
            head,
            "Connection: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            self.connection_value(),
            content_type,
            body.len()
        );
        self.buf = head.into_bytes();
        self.buf.extend_from_slice(body.as_bytes());
        self.finalized = true;
    }

    /// Binary download: like `set_body` but with a `Content-Disposition`
    /// exposed to browsers via `Access-Control-Expose-Headers`.
    pub fn set_blob(&mut self, data: &[u8], content_type: &str, content_disposition: &str) {
        if self.finalized {
            return;
        }
        let mut head = String::with_capacity(512);
        let _ = write!(head, "HTTP/1.1 200 OK\r\nDate: {}\r\n", http_date());
        self.write_cors(&mut head);
        head.push_str("Access-Control-Expose-Headers: Content-Disposition\r\n");
        head.push_str(SECURITY_HEADERS);
        let _ = write!(
            head,
            "Connection: {}\r\nContent-Type: {}\r\nContent-Disposition: {}\r\nContent-Length: {}\r\n\r\n",
            self.connection_value(),
            content_type,
            content_disposition,
            data.len()
        );
        self.buf = head.into_bytes();
        self.buf.extend_from_slice(data);
        self.finalized = true;
    }

    /// CORS preflight answer.
    pub fn set_options(&mut self) {
        if self.finalized {
            return;
        }
        let mut head = String::with_capacity(384);
        let _ = write!(head, "HTTP/1.1 204 No Content\r\nDate: {}\r\n", http_date());
        self.write_cors(&mut head);
        head.push_str(
            "Access-Control-Allow-Methods: POST, GET, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type, Authorization, x-api-key\r\n\
             Access-Control-Max-Age: 86400\r\n",
        );
        let _ = write!(
            head,
            "Connection: {}\r\nContent-Length: 0\r\n\r\n",
            self.connection_value()
        );
        self.buf = head.into_bytes();
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Bytes not yet written to the socket.
    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.read_pos.min(self.buf.len())..]
    }

    /// Advance the write cursor after a partial socket write.
    pub fn advance(&mut self, n: usize) {
        self.read_pos += n;
    }

    pub fn is_complete(&self) -> bool {
        self.read_pos >= self.buf.len()
    }

    fn write_cors(&self, head: &mut String) {
        if let Some(origin) = &self.origin {
            let _ = write!(head, "Access-Control-Allow-Origin: {origin}\r\n");
        }
    }

    fn connection_value(&self) -> &'static str {
        if self.close_connection {
            "close"
        } else {
            "keep-alive"
        }
    }
}

/// RFC 7231 IMF-fixdate.
fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
