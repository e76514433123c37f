//! The per-shard I/O reactor.
//!
//! Each shard owns a SO_REUSEPORT listener, an edge-triggered epoll
//! instance, a 1 Hz timerfd for idle sweeps, an eventfd for response-ready
//! wakeups, a worker pool and a response queue. The loop is single
//! threaded: handlers run to completion before the next event is serviced,
//! and every readiness source is drained fully before the next wait.
//!
//! A finalized request is processed on the I/O thread up to the dispatch
//! decision: CORS, preflight and the built-in endpoints are answered
//! inline; everything else is handed to the worker pool. The connection's
//! epoll interest is dropped at dispatch and restored when its response
//! arrives on the response queue, which is what serializes requests per
//! connection.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, error, info_span, warn};

use crate::auth::{self, Jwt};
use crate::config::Config;
use crate::conn::Connection;
use crate::cors;
use crate::error::{HandlerError, ServerResult};
use crate::http::{Method, Request};
use crate::metrics::Metrics;
use crate::parser::ParseError;
use crate::pool::{Task, ThreadPool};
use crate::queue::SharedQueue;
use crate::response::{Response, Status};
use crate::router::{Endpoint, Router};
use crate::syscalls::{self, Epoll, EventFd, Listener, RawFd, TimerFd, HANGUP, READABLE, WRITABLE};

const MAX_EVENTS: usize = 4096;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A completed response travelling back from a worker to the shard that
/// owns the target connection.
pub struct ResponseItem {
    pub client_fd: RawFd,
    pub response: Response,
}

pub struct Reactor {
    port: u16,
    router: Arc<Router>,
    origins: Arc<HashSet<String>>,
    metrics: Arc<Metrics>,
    jwt: Arc<Jwt>,
    api_key: String,
    mfa_uri: String,
    max_request_size: usize,
    read_timeout: Duration,
    running: Arc<AtomicBool>,

    pool: Arc<ThreadPool>,
    response_queue: Arc<SharedQueue<ResponseItem>>,
    listener: Listener,
    epoll: Epoll,
    timer: TimerFd,
    event: EventFd,
    connections: HashMap<RawFd, Connection>,
}

enum ReadOutcome {
    Wait,
    Close,
    Process,
}

enum WriteOutcome {
    Wait,
    Close,
    Done { close_after: bool },
}

impl Reactor {
    pub fn new(
        config: &Config,
        router: Arc<Router>,
        origins: Arc<HashSet<String>>,
        metrics: Arc<Metrics>,
        jwt: Arc<Jwt>,
        worker_count: usize,
        running: Arc<AtomicBool>,
    ) -> ServerResult<Self> {
        let listener = Listener::bind(config.port)?;
        let epoll = Epoll::new()?;
        let timer = TimerFd::interval(1)?;
        let event = EventFd::new()?;

        let pool = Arc::new(ThreadPool::new(worker_count, config.queue_capacity));
        // Twice the task capacity so completed work can always be returned.
        let response_queue = Arc::new(SharedQueue::new(config.queue_capacity * 2));
        response_queue.set_event_fd(event.raw());

        Ok(Self {
            port: config.port,
            router,
            origins,
            metrics,
            jwt,
            api_key: config.api_key.clone(),
            mfa_uri: config.mfa_uri.clone(),
            max_request_size: config.max_request_size,
            read_timeout: Duration::from_secs(config.read_timeout_seconds),
            running,
            pool,
            response_queue,
            listener,
            epoll,
            timer,
            event,
            connections: HashMap::new(),
        })
    }

    pub fn pool(&self) -> Arc<ThreadPool> {
        Arc::clone(&self.pool)
    }

    pub fn response_queue(&self) -> Arc<SharedQueue<ResponseItem>> {
        Arc::clone(&self.response_queue)
    }

    /// The shard's event loop. Blocks until the running flag drops, then
    /// drains in-flight work before returning.
    pub fn run(&mut self) -> ServerResult<()> {
        self.epoll.add(self.listener.raw(), READABLE)?;
        self.epoll.add(self.timer.raw(), READABLE)?;
        self.epoll.add(self.event.raw(), READABLE)?;
        self.pool.start()?;
        debug!("I/O shard listening on port {}", self.port);

        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];

        while self.running.load(Ordering::Acquire) {
            let n = self.epoll.wait(&mut events, -1)?;
            for event in &events[..n] {
                let flags = event.events;
                let fd = event.u64 as RawFd;

                if fd == self.listener.raw() {
                    self.on_accept();
                } else if fd == self.timer.raw() {
                    self.timer.drain();
                    self.sweep_idle();
                } else if fd == self.event.raw() {
                    self.event.drain();
                    self.process_response_queue();
                } else if flags & HANGUP != 0 {
                    self.close_connection(fd);
                } else if flags & READABLE != 0 {
                    self.on_read(fd);
                } else if flags & WRITABLE != 0 {
                    self.on_write(fd);
                }
            }
        }

        self.drain_pending(&mut events);
        self.pool.stop();
        let remaining: Vec<RawFd> = self.connections.keys().copied().collect();
        for fd in remaining {
            self.close_connection(fd);
        }
        debug!("I/O shard finished");
        Ok(())
    }

    fn on_accept(&mut self) {
        while let Ok(Some(fd)) = syscalls::accept_connection(self.listener.raw()) {
            if self.epoll.add(fd, READABLE).is_err() {
                syscalls::close_fd(fd);
                continue;
            }
            let peer = syscalls::peer_ip(fd);
            self.connections
                .insert(fd, Connection::new(peer, self.max_request_size));
            self.metrics.increment_connections();
        }
    }

    fn on_read(&mut self, fd: RawFd) {
        let outcome = {
            let Some(conn) = self.connections.get_mut(&fd) else {
                return;
            };
            conn.touch();
            let mut outcome = ReadOutcome::Wait;
            loop {
                let tail = conn.parser.writable_tail();
                if tail.is_empty() {
                    // Buffer at its maximum: either the request is already
                    // answerable or the connection is hopeless.
                    outcome = if conn.parser.eof() {
                        ReadOutcome::Process
                    } else {
                        ReadOutcome::Close
                    };
                    break;
                }
                match syscalls::read_nonblocking(fd, tail) {
                    Ok(None) => break,
                    Ok(Some(0)) => {
                        outcome = ReadOutcome::Close;
                        break;
                    }
                    Ok(Some(n)) => conn.parser.advance(n),
                    Err(_) => {
                        outcome = ReadOutcome::Close;
                        break;
                    }
                }
            }
            if matches!(outcome, ReadOutcome::Wait) && conn.parser.eof() {
                outcome = ReadOutcome::Process;
            }
            outcome
        };

        match outcome {
            ReadOutcome::Wait => {}
            ReadOutcome::Close => self.close_connection(fd),
            ReadOutcome::Process => self.process_request(fd),
        }
    }

    /// Route a finalized request: CORS, preflight, built-ins, catalog
    /// lookup, then worker dispatch.
    fn process_request(&mut self, fd: RawFd) {
        let (parser, remote_ip) = {
            let Some(conn) = self.connections.get_mut(&fd) else {
                return;
            };
            (conn.take_parser(), conn.remote_ip.clone())
        };
        // Interest is restored once the response is ready; this is what
        // keeps per-connection processing in receive order.
        let _ = self.epoll.delete(fd);

        let req = match parser.finalize(remote_ip) {
            Ok(req) => req,
            Err(ParseError::BufferOverflow) => {
                // The headers never completed within the buffer limit;
                // terminal for the connection, no response.
                warn!("request on fd {fd} overflowed the buffer before its headers completed");
                self.close_connection(fd);
                return;
            }
            Err(err) => {
                warn!("failed to parse request on fd {fd}: {err}");
                let mut res = Response::new(None);
                // The byte stream cannot be resynchronized after a parse
                // failure.
                res.set_close();
                res.set_body(Status::BadRequest, &json!({ "error": err.to_string() }).to_string());
                self.enqueue_response(fd, res);
                return;
            }
        };

        let span = info_span!("request", request_id = %req.request_id());
        let _guard = span.enter();

        if !cors::is_origin_allowed(req.header("origin"), &self.origins) {
            warn!(
                "CORS check failed for origin {:?} on path '{}' from {}",
                req.header("origin").unwrap_or("N/A"),
                req.path(),
                req.remote_ip()
            );
            let mut res = Response::new(None);
            res.set_body(Status::Forbidden, r#"{"error":"CORS origin not allowed"}"#);
            self.enqueue_response(fd, res);
            return;
        }

        let mut res = Response::for_request(&req);

        if req.method() == Method::Options {
            res.set_options();
            self.enqueue_response(fd, res);
            return;
        }

        if self.handle_internal(&req, &mut res) {
            self.enqueue_response(fd, res);
            return;
        }

        let Some(endpoint) = self.router.find(req.path()).cloned() else {
            warn!(
                "no handler for path '{}' from {}",
                req.path(),
                req.remote_ip()
            );
            res.set_body(Status::NotFound, r#"{"error":"Not Found"}"#);
            self.enqueue_response(fd, res);
            return;
        };

        self.dispatch(fd, req, endpoint);
    }

    fn dispatch(&mut self, fd: RawFd, req: Request, endpoint: Arc<Endpoint>) {
        let jwt = Arc::clone(&self.jwt);
        let metrics = Arc::clone(&self.metrics);
        let response_queue = Arc::clone(&self.response_queue);
        let mfa_uri = self.mfa_uri.clone();
        // Kept out of the task so a shed request can still be answered.
        let origin = req.header("origin").map(str::to_string);
        let path = req.path().to_string();
        let remote_ip = req.remote_ip().to_string();

        let task: Task = Box::new(move || {
            let mut req = req;
            let span = info_span!("request", request_id = %req.request_id());
            let _guard = span.enter();

            let start = Instant::now();
            metrics.increment_active_threads();
            let mut res = Response::for_request(&req);
            execute_endpoint(&mut req, &mut res, &endpoint, &jwt, &mfa_uri);
            let elapsed_us = start.elapsed().as_micros() as u64;

            if response_queue
                .push(ResponseItem { client_fd: fd, response: res })
                .is_err()
            {
                error!("response queue full; dropping response for fd {fd}");
            }
            metrics.record_request_time(elapsed_us);
            metrics.decrement_active_threads();
            debug!("handler for '{}' executed in {elapsed_us} microseconds", req.path());
        });

        if self.pool.dispatch(task).is_err() {
            warn!("worker queue full; shedding request for '{path}' from {remote_ip}");
            let mut res = Response::new(origin.as_deref());
            res.set_body(
                Status::ServiceUnavailable,
                r#"{"error":"Service Unavailable: Server Overloaded"}"#,
            );
            self.enqueue_response(fd, res);
        }
    }

    /// Latency-insensitive introspection endpoints served without a
    /// dispatch hop.
    fn handle_internal(&self, req: &Request, res: &mut Response) -> bool {
        match req.path() {
            "/ping" => {
                res.set_body(Status::Ok, r#"{"status":"OK"}"#);
                true
            }
            "/metrics" => {
                if self.bearer_key_ok(req) {
                    res.set_body(Status::Ok, &self.metrics.to_json());
                } else {
                    res.set_body(Status::BadRequest, r#"{"error":"Bad Request"}"#);
                }
                true
            }
            "/metricsp" => {
                if self.bearer_key_ok(req) {
                    res.set_body_with_type(Status::Ok, &self.metrics.to_prometheus(), "text/plain");
                } else {
                    res.set_body(Status::BadRequest, r#"{"error":"Bad Request"}"#);
                }
                true
            }
            "/version" => {
                if self.bearer_key_ok(req) {
                    res.set_body(
                        Status::Ok,
                        &json!({ "pod_name": self.metrics.pod_name(), "version": VERSION })
                            .to_string(),
                    );
                } else {
                    res.set_body(Status::BadRequest, r#"{"error":"Bad Request"}"#);
                }
                true
            }
            _ => false,
        }
    }

    fn bearer_key_ok(&self, req: &Request) -> bool {
        if self.api_key.is_empty() {
            return true;
        }
        match req.bearer_token() {
            Some(token) if token == self.api_key => true,
            Some(_) => {
                warn!(
                    "unauthorized internal request (key mismatch) to {} from {}",
                    req.path(),
                    req.remote_ip()
                );
                false
            }
            None => {
                warn!(
                    "unauthorized internal request (missing bearer) to {} from {}",
                    req.path(),
                    req.remote_ip()
                );
                false
            }
        }
    }

    fn enqueue_response(&mut self, fd: RawFd, response: Response) {
        if self
            .response_queue
            .push(ResponseItem { client_fd: fd, response })
            .is_err()
        {
            error!("response queue full for fd {fd}; closing connection to shed load");
            self.close_connection(fd);
        }
    }

    /// Move ready responses onto their connections and arm write interest.
    fn process_response_queue(&mut self) {
        let mut batch = Vec::with_capacity(64);
        self.response_queue.drain_to(&mut batch);

        for item in batch {
            let fd = item.client_fd;
            if let Some(conn) = self.connections.get_mut(&fd) {
                conn.response = Some(item.response);
            } else {
                debug!("connection {fd} closed before its response was ready");
                continue;
            }
            if self.epoll.arm(fd, WRITABLE).is_err() {
                self.close_connection(fd);
            }
        }
    }

    fn on_write(&mut self, fd: RawFd) {
        let outcome = {
            let Some(conn) = self.connections.get_mut(&fd) else {
                return;
            };
            conn.touch();
            let Some(res) = conn.response.as_mut() else {
                return;
            };
            let mut outcome = WriteOutcome::Wait;
            loop {
                let buf = res.remaining();
                if buf.is_empty() {
                    outcome = WriteOutcome::Done { close_after: res.close_after() };
                    break;
                }
                match syscalls::write_nonblocking(fd, buf) {
                    Ok(None) | Ok(Some(0)) => break,
                    Ok(Some(n)) => res.advance(n),
                    Err(_) => {
                        outcome = WriteOutcome::Close;
                        break;
                    }
                }
            }
            outcome
        };

        match outcome {
            WriteOutcome::Wait => {}
            WriteOutcome::Close => self.close_connection(fd),
            WriteOutcome::Done { close_after } => {
                if close_after || !self.running.load(Ordering::Acquire) {
                    self.close_connection(fd);
                } else {
                    if let Some(conn) = self.connections.get_mut(&fd) {
                        conn.reset();
                    }
                    if self.epoll.arm(fd, READABLE).is_err() {
                        self.close_connection(fd);
                    }
                }
            }
        }
    }

    /// Slowloris defense: close anything idle past the read timeout.
    fn sweep_idle(&mut self) {
        let timeout = self.read_timeout;
        let expired: Vec<RawFd> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.idle_for() > timeout)
            .map(|(fd, _)| *fd)
            .collect();
        for fd in expired {
            debug!("closing idle connection {fd}");
            self.close_connection(fd);
        }
    }

    fn close_connection(&mut self, fd: RawFd) {
        let _ = self.epoll.delete(fd);
        syscalls::close_fd(fd);
        if self.connections.remove(&fd).is_some() {
            self.metrics.decrement_connections();
        }
    }

    /// Shutdown phase: keep servicing worker completions and writes until
    /// every accepted request has had its response transmitted.
    fn drain_pending(&mut self, events: &mut [libc::epoll_event]) {
        debug!("I/O shard draining pending work");
        let deadline = Instant::now() + DRAIN_TIMEOUT;

        loop {
            self.process_response_queue();

            let busy = self.pool.in_flight() > 0
                || !self.response_queue.is_empty()
                || self
                    .connections
                    .values()
                    .any(|c| c.response.as_ref().is_some_and(|r| !r.is_complete()));
            if !busy {
                break;
            }
            if Instant::now() > deadline {
                warn!("drain timeout reached; abandoning remaining responses");
                break;
            }

            let n = match self.epoll.wait(events, 10) {
                Ok(n) => n,
                Err(_) => break,
            };
            for i in 0..n {
                let flags = events[i].events;
                let fd = events[i].u64 as RawFd;
                if fd == self.event.raw() {
                    self.event.drain();
                } else if fd != self.listener.raw()
                    && fd != self.timer.raw()
                    && flags & WRITABLE != 0
                {
                    self.on_write(fd);
                }
            }
        }
        debug!("I/O shard drain complete");
    }
}

/// Runs on a worker thread. The sole translator of handler outcomes
/// (including panics) into responses.
fn execute_endpoint(
    req: &mut Request,
    res: &mut Response,
    endpoint: &Endpoint,
    jwt: &Jwt,
    mfa_uri: &str,
) {
    if endpoint.method != req.method() {
        res.set_body(Status::BadRequest, r#"{"error":"Method Not Allowed"}"#);
        return;
    }

    if endpoint.secure {
        match auth::authorize(req, jwt, mfa_uri) {
            Some(claims) => {
                req.set_claims(claims);
                debug!(
                    "authenticated request by user '{}' for path '{}' from {}",
                    req.user(),
                    req.path(),
                    req.remote_ip()
                );
            }
            None => {
                res.set_body(Status::Unauthorized, r#"{"error":"Invalid or missing token"}"#);
                return;
            }
        }
    }

    if let Err(err) = endpoint.validator.validate(req) {
        res.set_body(Status::BadRequest, &json!({ "error": err.to_string() }).to_string());
        return;
    }

    match catch_unwind(AssertUnwindSafe(|| (endpoint.handler)(req, res))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => translate_handler_error(err, req.path(), res),
        Err(_) => {
            error!("handler for '{}' panicked", req.path());
            res.set_body(Status::InternalServerError, r#"{"error":"Internal Server Error"}"#);
        }
    }
}

fn translate_handler_error(err: HandlerError, path: &str, res: &mut Response) {
    match err {
        HandlerError::Validation(msg) => {
            res.set_body(Status::BadRequest, &json!({ "error": msg }).to_string());
        }
        HandlerError::JsonParse(err) => {
            error!("JSON parsing error in handler for path '{path}': {err}");
            res.set_body(Status::BadRequest, r#"{"error":"Invalid JSON format in request"}"#);
        }
        HandlerError::JsonOutput(err) => {
            error!("JSON output error in handler for path '{path}': {err}");
            res.set_body(
                Status::InternalServerError,
                r#"{"error":"Failed to generate JSON response"}"#,
            );
        }
        HandlerError::Sql(err) => {
            error!("SQL error in handler for path '{path}': {err}");
            res.set_body(Status::InternalServerError, r#"{"error":"Database operation failed"}"#);
        }
        HandlerError::Upstream(err) => {
            error!("upstream error in handler for path '{path}': {err}");
            res.set_body(Status::InternalServerError, r#"{"error":"Internal communication failed"}"#);
        }
        HandlerError::Other(err) => {
            error!("unhandled error in handler for path '{path}': {err}");
            res.set_body(Status::InternalServerError, r#"{"error":"Internal Server Error"}"#);
        }
    }
}
