//! The server supervisor.
//!
//! Builds one reactor shard per I/O thread, pins them to cores, shares the
//! frozen endpoint catalog, origin set and metrics across shards, then
//! blocks on a signalfd. On SIGINT/SIGTERM/SIGQUIT it flips the running
//! flag and stops every response queue; queue-stop writes each shard's
//! eventfd, so parked reactors wake promptly and enter their drain phase.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{error, info};

use crate::auth::Jwt;
use crate::config::Config;
use crate::error::{HandlerResult, ServerError, ServerResult};
use crate::http::{Method, Request};
use crate::metrics::Metrics;
use crate::queue::SharedQueue;
use crate::reactor::{Reactor, ResponseItem};
use crate::response::Response;
use crate::router::Router;
use crate::syscalls::SignalFd;
use crate::validator::Validator;

pub struct Server {
    config: Config,
    router: Router,
}

/// Handle to a started server: flips the running flag and joins the
/// shards. Mostly used by tests; production binaries go through
/// [`Server::serve`].
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    response_queues: Vec<Arc<SharedQueue<ResponseItem>>>,
    shards: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Initiate the drain: in-flight requests complete and their
    /// responses are written before the shards exit.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::Release);
        for queue in &self.response_queues {
            queue.stop();
        }
        for shard in self.shards {
            let _ = shard.join();
        }
    }
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            router: Router::new(),
        }
    }

    /// Register an endpoint. Must happen before [`Server::start`]; the
    /// catalog is frozen afterwards.
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
        self.router.register(path, method, validator, handler, secure);
    }

    /// Start every shard and return a handle. The catalog, origin set and
    /// metrics become read-only shared state here.
    pub fn start(self) -> ServerResult<ServerHandle> {
        let setup_start = Instant::now();
        let config = self.config;

        info!(
            "minuet {} starting on port {} with {} I/O threads and {} total workers",
            env!("CARGO_PKG_VERSION"),
            config.port,
            config.io_threads,
            config.pool_size
        );

        let workers_per_shard = (config.pool_size / config.io_threads).max(1);
        let router = Arc::new(self.router);
        let origins: Arc<HashSet<String>> = Arc::new(config.cors_origins.clone());
        let metrics = Arc::new(Metrics::new(config.pod_name.clone(), config.pool_size));
        let jwt = Arc::new(Jwt::new(
            &config.jwt_secret,
            config.jwt_timeout_seconds,
            config.jwt_mfa_timeout_seconds,
        ));
        let running = Arc::new(AtomicBool::new(true));
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();

        let mut reactors = Vec::with_capacity(config.io_threads);
        for _ in 0..config.io_threads {
            let reactor = Reactor::new(
                &config,
                Arc::clone(&router),
                Arc::clone(&origins),
                Arc::clone(&metrics),
                Arc::clone(&jwt),
                workers_per_shard,
                Arc::clone(&running),
            )?;
            metrics.register_pool(reactor.pool());
            reactors.push(reactor);
        }
        let response_queues: Vec<_> = reactors.iter().map(Reactor::response_queue).collect();

        let mut shards = Vec::with_capacity(reactors.len());
        for (i, mut reactor) in reactors.into_iter().enumerate() {
            let core = core_ids.get(i % core_ids.len().max(1)).copied();
            let handle = thread::Builder::new()
                .name(format!("minuet-io-{i}"))
                .spawn(move || {
                    if let Some(id) = core {
                        core_affinity::set_for_current(id);
                    }
                    if let Err(err) = reactor.run() {
                        error!("I/O shard {i} failed: {err}");
                    }
                })
                .map_err(ServerError::Io)?;
            shards.push(handle);
        }

        info!(
            "server started in {} milliseconds",
            setup_start.elapsed().as_millis()
        );

        Ok(ServerHandle {
            running,
            response_queues,
            shards,
        })
    }

    /// Run until a shutdown signal arrives, then drain and return.
    pub fn serve(self) -> ServerResult<()> {
        // Installed before any thread spawns so the whole process inherits
        // the signal mask (and the SIGPIPE ignore).
        let signals = SignalFd::new()?;
        let handle = self.start()?;

        let signo = signals.wait()?;
        info!("received signal {signo}, shutting down");
        handle.shutdown();
        info!("shutdown complete");
        Ok(())
    }
}
