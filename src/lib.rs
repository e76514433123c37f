//! Minuet: a sharded epoll HTTP/1.1 API runtime.
//!
//! Each I/O shard owns a SO_REUSEPORT listener, an edge-triggered epoll
//! loop and a bounded worker pool; requests are parsed incrementally on
//! the I/O thread, gated (CORS, JWT) and dispatched to workers, and the
//! responses come back over an eventfd-signalled queue.

pub mod auth;
pub mod buffer;
pub mod config;
pub mod conn;
pub mod cors;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod multipart;
pub mod parser;
pub mod pool;
pub mod queue;
pub mod reactor;
pub mod response;
pub mod router;
pub mod server;
pub mod syscalls;
pub mod util;
pub mod validator;

// Re-exports for users
pub use auth::{ClaimsMap, Jwt};
pub use config::Config;
pub use error::{HandlerError, HandlerResult, ServerError, ServerResult};
pub use http::{Method, Request};
pub use logging::init_logging;
pub use response::{Response, Status};
pub use server::{Server, ServerHandle};
pub use validator::{InputValue, ParamKind, Rule, Validator};
