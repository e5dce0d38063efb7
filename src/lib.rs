#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]

//! # foxhole
//!
//! foxhole is a small, embeddable HTTP/1.1 server: a library linked into
//! an application that wants to serve HTTP endpoints or expose a local
//! API, not a framework that owns your process.
//!
//! A [`Server`] binds a stream-oriented endpoint (IPv4, IPv6, or a unix
//! socket path), accepts connections concurrently, parses each request,
//! and dispatches it to the first matching route. Connections are kept
//! alive per HTTP semantics, every handler runs under a configurable
//! deadline, and a route can switch the connection to WebSocket in-band
//! with a `101` upgrade.
//!
//! ```no_run
//! use bytes::Bytes;
//! use foxhole::handler::handler_fn;
//! use foxhole::{Response, Server, StatusCode};
//!
//! # async fn run() -> foxhole::Result<()> {
//! let server = Server::builder().port(8080).build();
//! server.append_route(
//!     "GET /hello/*",
//!     handler_fn(|_req| async {
//!         Ok::<_, foxhole::Error>(Response::new(Bytes::from_static(b"hello")))
//!     }),
//! );
//! server.append_route("GET /ws", foxhole::ws::websocket_echo());
//! server.start().await
//! # }
//! ```
//!
//! Handlers are plain async functions from request to response; anything
//! they fail with is answered as a `500` on that connection, without
//! disturbing the server or other connections.

#[doc(no_inline)]
pub use http::{header, HeaderMap, Method, Request, Response, StatusCode, Uri, Version};

pub use crate::error::{Error, NotHandled, Result};
pub use crate::handler::Handler;
pub use crate::logging::{Logger, PrintLogger, TraceLogger};
pub use crate::net::Endpoint;
pub use crate::router::RoutePattern;
pub use crate::server::{Builder, Server, DEFAULT_TIMEOUT};

mod error;
pub mod handler;
pub mod logging;
mod net;
mod proto;
mod router;
mod server;
pub mod upgrade;
pub mod ws;
