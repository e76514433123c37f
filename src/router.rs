//! The endpoint catalog: exact-path lookup of registered handlers.
//!
//! Routes are registered before the server starts and never change
//! afterwards; the catalog is shared read-only across every shard. No
//! wildcards and no parameterized paths: parameters travel in the body.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HandlerResult;
use crate::http::{Method, Request};
use crate::response::Response;
use crate::validator::Validator;

pub type Handler = Arc<dyn Fn(&Request, &mut Response) -> HandlerResult + Send + Sync>;

pub struct Endpoint {
    pub method: Method,
    pub validator: Validator,
    pub handler: Handler,
    pub secure: bool,
}

#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Arc<Endpoint>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint. Paths are validated here because a bad path
    /// is a programming error, not a runtime condition.
    pub fn register<F>(
        &mut self,
        path: &str,
        method: Method,
        validator: Validator,
        handler: F,
        secure: bool,
    ) where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        assert!(
            path.starts_with('/') && (path.len() == 1 || !path.ends_with('/')),
            "invalid API path {path:?}: must start with '/' and not end with '/'"
        );
        assert!(
            path.bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"/_-".contains(&b)),
            "invalid API path {path:?}: lowercase letters, digits, '/', '_' and '-' only"
        );
        self.routes.insert(
            path.to_string(),
            Arc::new(Endpoint {
                method,
                validator,
                handler: Arc::new(handler),
                secure,
            }),
        );
    }

    pub fn find(&self, path: &str) -> Option<&Arc<Endpoint>> {
        self.routes.get(path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
