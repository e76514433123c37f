//! Per-connection state, owned by exactly one reactor shard.

use std::time::{Duration, Instant};

use crate::parser::RequestParser;
use crate::response::Response;

pub struct Connection {
    pub remote_ip: String,
    pub parser: RequestParser,
    pub response: Option<Response>,
    last_activity: Instant,
    max_request_size: usize,
}

impl Connection {
    pub fn new(remote_ip: String, max_request_size: usize) -> Self {
        Self {
            remote_ip,
            parser: RequestParser::new(max_request_size),
            response: None,
            last_activity: Instant::now(),
            max_request_size,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Hand the parser to finalization, leaving a fresh one in place.
    pub fn take_parser(&mut self) -> RequestParser {
        std::mem::replace(&mut self.parser, RequestParser::new(self.max_request_size))
    }

    /// Ready the connection for the next request on keep-alive.
    pub fn reset(&mut self) {
        self.parser = RequestParser::new(self.max_request_size);
        self.response = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Status;

    #[test]
    fn reset_clears_response_and_parser_state() {
        let mut conn = Connection::new("1.2.3.4".to_string(), 4096);
        let bytes = b"GET / HTTP/1.1\r\n\r\n";
        conn.parser.writable_tail()[..bytes.len()].copy_from_slice(bytes);
        conn.parser.advance(bytes.len());
        let mut res = Response::new(None);
        res.set_body(Status::Ok, "{}");
        conn.response = Some(res);

        conn.reset();
        assert!(conn.response.is_none());
        assert_eq!(conn.parser.buffered(), 0);
    }

    #[test]
    fn take_parser_leaves_fresh_instance() {
        let mut conn = Connection::new("1.2.3.4".to_string(), 4096);
        let bytes = b"GET /x HTTP/1.1\r\n\r\n";
        conn.parser.writable_tail()[..bytes.len()].copy_from_slice(bytes);
        conn.parser.advance(bytes.len());

        let mut taken = conn.take_parser();
        assert!(taken.eof());
        assert_eq!(conn.parser.buffered(), 0);
    }
}
