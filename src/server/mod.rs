//! The server supervisor: lifecycle, readiness, and the accept loop.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::debug;

use crate::handler::Handler;
use crate::logging::{self, Logger, PrintLogger, TraceLogger};
use crate::net::{self, Endpoint, Listener};
use crate::router::{RoutePattern, Router};

mod conn;

/// The default per-request handler deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// An HTTP/1.1 server.
///
/// `Server` is a cheap-to-clone handle: one clone can run
/// [`start`](Server::start) while others append routes, await
/// [`wait_until_listening`](Server::wait_until_listening), or call
/// [`stop`](Server::stop).
///
/// # Example
///
/// ```no_run
/// use bytes::Bytes;
/// use foxhole::handler::handler_fn;
/// use foxhole::{Response, Server, StatusCode};
///
/// # async fn run() -> foxhole::Result<()> {
/// let server = Server::builder().port(8080).build();
/// server.append_route(
///     "GET /hello",
///     handler_fn(|_req| async {
///         Ok::<_, foxhole::Error>(
///             Response::builder()
///                 .status(StatusCode::OK)
///                 .body(Bytes::from_static(b"hi"))
///                 .unwrap(),
///         )
///     }),
/// );
/// server.start().await
/// # }
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    bind: Bind,
    pub(crate) timeout: Duration,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) router: Mutex<Router>,
    state: Mutex<State>,
    listening_tx: watch::Sender<bool>,
    // held so the channel stays open for late subscribers
    listening_rx: watch::Receiver<bool>,
}

#[derive(Debug, Clone)]
enum Bind {
    Endpoint(Endpoint),
    Port(u16),
}

#[derive(Default)]
struct State {
    local: Option<Endpoint>,
    shutdown: Option<watch::Sender<bool>>,
}

/// Configures and builds a [`Server`].
pub struct Builder {
    bind: Bind,
    timeout: Duration,
    logger: Arc<dyn Logger>,
    handler: Option<Arc<dyn Handler>>,
}

// ===== impl Builder =====

impl Builder {
    /// Sets the endpoint to bind: an IP socket address or a unix path.
    pub fn address(mut self, endpoint: impl Into<Endpoint>) -> Self {
        self.bind = Bind::Endpoint(endpoint.into());
        self
    }

    /// Binds a wildcard address on `port`: `::` where the host supports
    /// IPv6, otherwise `0.0.0.0`.
    pub fn port(mut self, port: u16) -> Self {
        self.bind = Bind::Port(port);
        self
    }

    /// Sets the per-request handler deadline.
    ///
    /// Default is 15 seconds. A handler that outlives the deadline is
    /// cancelled and its request answered with `500`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the log sink.
    pub fn logger<L: Logger + 'static>(mut self, logger: L) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Forces the plain stderr printer instead of the `tracing`-backed
    /// default sink.
    pub fn print_logger(self) -> Self {
        self.logger(PrintLogger)
    }

    /// Installs a catch-all handler as route `"*"`.
    pub fn handler<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Consumes the builder, creating a [`Server`].
    pub fn build(self) -> Server {
        let mut router = Router::default();
        if let Some(handler) = self.handler {
            router.append(RoutePattern::parse("*"), handler);
        }
        let (listening_tx, listening_rx) = watch::channel(false);
        Server {
            inner: Arc::new(Inner {
                bind: self.bind,
                timeout: self.timeout,
                logger: self.logger,
                router: Mutex::new(router),
                state: Mutex::new(State::default()),
                listening_tx,
                listening_rx,
            }),
        }
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("bind", &self.bind)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ===== impl Server =====

impl Server {
    /// Starts a [`Builder`], defaulting to an ephemeral wildcard port,
    /// a 15 second handler deadline, and the `tracing`-backed logger.
    pub fn builder() -> Builder {
        Builder {
            bind: Bind::Port(0),
            timeout: DEFAULT_TIMEOUT,
            logger: Arc::new(TraceLogger),
            handler: None,
        }
    }

    /// A server bound to the provided endpoint, with default options.
    pub fn bind(endpoint: impl Into<Endpoint>) -> Server {
        Server::builder().address(endpoint).build()
    }

    /// Appends a route to the table; the first matching route wins.
    ///
    /// Routes may be appended before or during serving; a route appended
    /// before a request is read is visible to that request's dispatch.
    pub fn append_route<H>(&self, pattern: impl Into<RoutePattern>, handler: H)
    where
        H: Handler + 'static,
    {
        let mut router = self.inner.router.lock().unwrap();
        router.append(pattern.into(), Arc::new(handler));
    }

    /// Binds the listening socket and serves until [`stop`](Server::stop),
    /// a fatal accept error, or cancellation.
    ///
    /// Fails immediately if the server is already listening, or if the
    /// socket cannot be bound. After `stop()`, in-flight connections are
    /// drained before this returns.
    pub async fn start(&self) -> crate::Result<()> {
        let (listener, shutdown_rx) = {
            let mut state = self.inner.state.lock().unwrap();
            if state.shutdown.is_some() {
                return Err(crate::Error::new_already_listening());
            }
            let listener = match self.bring_up() {
                Ok(listener) => listener,
                Err(err) => {
                    self.inner
                        .logger
                        .log_critical(&format!("server error: {}", err));
                    return Err(err);
                }
            };
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            state.local = listener.local_endpoint();
            state.shutdown = Some(shutdown_tx);
            (listener, shutdown_rx)
        };

        // resets the gate on return and on cancellation alike
        let guard = ListenGuard {
            inner: self.inner.as_ref(),
        };

        self.inner.listening_tx.send_replace(true);
        self.inner
            .logger
            .log_info(&logging::startup_message(self.local_endpoint().as_ref()));

        let result = self.accept_loop(listener, shutdown_rx).await;

        drop(guard);
        if let Err(ref err) = result {
            self.inner
                .logger
                .log_critical(&format!("server error: {}", err));
        }
        result
    }

    /// Stops listening. Idempotent; a no-op when not listening.
    ///
    /// This is the graceful path: the listening socket closes, no new
    /// connections are accepted, and `start()` returns once in-flight
    /// connections have drained.
    pub fn stop(&self) {
        let shutdown = {
            let mut state = self.inner.state.lock().unwrap();
            state.shutdown.take()
        };
        if let Some(shutdown) = shutdown {
            self.inner.listening_tx.send_replace(false);
            let _ = shutdown.send(true);
        }
    }

    /// Whether the listening socket is currently bound.
    pub fn is_listening(&self) -> bool {
        *self.inner.listening_rx.borrow()
    }

    /// The endpoint actually bound, once listening. Reports the OS-chosen
    /// port when an ephemeral port was requested.
    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.inner.state.lock().unwrap().local.clone()
    }

    /// Resolves once the server is listening; immediately if it already
    /// is. Dropping the returned future detaches the waiter.
    pub async fn wait_until_listening(&self) -> crate::Result<()> {
        let mut rx = self.inner.listening_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // the supervisor is gone; nothing will ever listen
                return Err(crate::Error::new_closed());
            }
        }
        Ok(())
    }

    /// Like [`wait_until_listening`](Server::wait_until_listening), but
    /// fails with a timeout error if the gate doesn't open within `dur`.
    pub async fn wait_until_listening_timeout(&self, dur: Duration) -> crate::Result<()> {
        tokio::time::timeout(dur, self.wait_until_listening())
            .await
            .map_err(|_| crate::Error::new_timeout())?
    }

    fn bring_up(&self) -> crate::Result<Listener> {
        match &self.inner.bind {
            Bind::Endpoint(endpoint) => Listener::bind(endpoint),
            Bind::Port(port) => Listener::bind_port(*port),
        }
    }

    /// Accepts connections until shut down or a fatal error.
    ///
    /// A graceful shutdown closes the listener first and then waits for
    /// every connection task; a fatal accept error aborts them instead.
    async fn accept_loop(
        &self,
        listener: Listener,
        mut shutdown: watch::Receiver<bool>,
    ) -> crate::Result<()> {
        let mut tasks = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((io, peer)) => {
                        tasks.spawn(conn::serve(Arc::clone(&self.inner), io, peer));
                    }
                    Err(err) if net::is_connection_error(&err) => {
                        debug!("accepted connection already errored: {}", err);
                    }
                    Err(err) => break Err(crate::Error::new_accept(err)),
                },
            }
        };

        drop(listener);
        match result {
            Ok(()) => {
                while tasks.join_next().await.is_some() {}
                Ok(())
            }
            Err(err) => {
                tasks.shutdown().await;
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("bind", &self.inner.bind)
            .field("listening", &self.is_listening())
            .finish()
    }
}

struct ListenGuard<'a> {
    inner: &'a Inner,
}

impl<'a> Drop for ListenGuard<'a> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap();
        state.local = None;
        state.shutdown = None;
        self.inner.listening_tx.send_replace(false);
    }
}
