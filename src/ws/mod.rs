//! WebSocket handshake and serving.
//!
//! A [`websocket`] handler is selected by the router like any other
//! handler. It validates the RFC 6455 client handshake, answers
//! `101 Switching Protocols`, and hands the socket to a frame-exchange
//! task. [`websocket_echo`] is the default task: every frame comes back
//! unmasked with the same payload.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::header::{HeaderName, HeaderValue, CONNECTION, UPGRADE};
use http::{Request, Response, StatusCode};
use sha1::{Digest, Sha1};
use tracing::{debug, trace};

use crate::handler::Handler;
use crate::upgrade::{Upgrade, Upgraded};

pub mod frame;

pub use self::frame::{Frame, Opcode};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";
const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";

/// A handler that upgrades connections to WebSocket and serves frames
/// with `serve`.
pub struct WebSocketHandler<F> {
    serve: Arc<F>,
}

/// Creates a [`Handler`] that performs the WebSocket handshake and runs
/// `serve` on every upgraded connection.
///
/// Requests that are not well-formed version-13 upgrade requests are
/// answered with `400 Bad Request` instead.
pub fn websocket<F, Fut>(serve: F) -> WebSocketHandler<F>
where
    F: Fn(Upgraded) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    WebSocketHandler {
        serve: Arc::new(serve),
    }
}

/// The default WebSocket handler: echoes every frame back unmasked.
pub fn websocket_echo() -> WebSocketHandler<impl Fn(Upgraded) -> BoxFuture<'static, ()> + Send + Sync>
{
    websocket(|socket| echo(socket).boxed())
}

impl<F, Fut> Handler for WebSocketHandler<F>
where
    F: Fn(Upgraded) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, req: Request<Bytes>) -> BoxFuture<'static, crate::Result<Response<Bytes>>> {
        let serve = Arc::clone(&self.serve);
        async move {
            let key = match validate_handshake(&req) {
                Some(key) => key,
                None => {
                    debug!("rejecting malformed websocket handshake");
                    let mut res = Response::new(Bytes::new());
                    *res.status_mut() = StatusCode::BAD_REQUEST;
                    return Ok(res);
                }
            };

            let mut res = Response::new(Bytes::new());
            *res.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
            res.headers_mut()
                .insert(UPGRADE, HeaderValue::from_static("websocket"));
            res.headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("upgrade"));
            res.headers_mut().insert(
                HeaderName::from_static(SEC_WEBSOCKET_ACCEPT),
                HeaderValue::from_str(&accept_key(&key))
                    .expect("base64 output is a valid header value"),
            );
            res.extensions_mut()
                .insert(Upgrade::new(move |upgraded| serve(upgraded)));
            Ok(res)
        }
        .boxed()
    }
}

impl<F> std::fmt::Debug for WebSocketHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketHandler").finish()
    }
}

/// Checks the four handshake requirements and returns the client key.
fn validate_handshake(req: &Request<Bytes>) -> Option<String> {
    let upgrade = req.headers().get(UPGRADE)?.to_str().ok()?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return None;
    }
    if !crate::proto::h1::connection_has(req.headers(), "upgrade") {
        return None;
    }
    let version = req.headers().get(SEC_WEBSOCKET_VERSION)?.to_str().ok()?;
    if version.trim() != "13" {
        return None;
    }
    let key = req.headers().get(SEC_WEBSOCKET_KEY)?.to_str().ok()?;
    Some(key.trim().to_owned())
}

/// `base64(SHA1(key + GUID))`, the `Sec-WebSocket-Accept` value proving
/// the server read the client's key.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    base64::encode(sha1.finalize())
}

/// Echoes frames until a close frame, EOF, or an I/O error.
///
/// Client masks are stripped before echoing; an unmasked client frame is
/// a protocol violation and ends the exchange.
async fn echo(mut socket: Upgraded) {
    loop {
        let mut frame = match frame::read_frame(&mut socket).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(err) => {
                debug!("websocket read failed: {}", err);
                return;
            }
        };
        if let Err(err) = frame.require_masked() {
            debug!("closing websocket: {}", err);
            let _ = frame::write_frame(&mut socket, &Frame::close()).await;
            return;
        }
        frame.mask = None;

        trace!("echoing {:?} frame, {} bytes", frame.opcode, frame.payload.len());
        if frame::write_frame(&mut socket, &frame).await.is_err() {
            return;
        }
        if frame.opcode == Opcode::Close {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_vector() {
        // key "ABCDEFGHIJKLMNOP", base64-encoded on the wire
        let key = base64::encode(b"ABCDEFGHIJKLMNOP");
        assert_eq!(key, "QUJDREVGR0hJSktMTU5PUA==");
        assert_eq!(accept_key(&key), "9twnCz4Oi2Q3EuDqLAETCuip07c=");
    }

    fn handshake_request() -> http::request::Builder {
        Request::builder()
            .method("GET")
            .uri("/ws")
            .header("upgrade", "websocket")
            .header("connection", "Upgrade")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "QUJDREVGR0hJSktMTU5PUA==")
    }

    #[tokio::test]
    async fn handshake_produces_switching_protocols() {
        let handler = websocket_echo();
        let req = handshake_request().body(Bytes::new()).unwrap();
        let mut res = handler.call(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(res.headers()["upgrade"], "websocket");
        assert_eq!(res.headers()["connection"], "upgrade");
        assert_eq!(
            res.headers()["sec-websocket-accept"],
            "9twnCz4Oi2Q3EuDqLAETCuip07c="
        );
        assert!(res.extensions_mut().remove::<Upgrade>().is_some());
    }

    #[tokio::test]
    async fn missing_key_is_bad_request() {
        let handler = websocket_echo();
        let req = Request::builder()
            .method("GET")
            .uri("/ws")
            .header("upgrade", "websocket")
            .header("connection", "Upgrade")
            .header("sec-websocket-version", "13")
            .body(Bytes::new())
            .unwrap();
        let res = handler.call(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_version_is_bad_request() {
        let handler = websocket_echo();
        let req = Request::builder()
            .method("GET")
            .uri("/ws")
            .header("upgrade", "websocket")
            .header("connection", "Upgrade")
            .header("sec-websocket-version", "8")
            .header("sec-websocket-key", "QUJDREVGR0hJSktMTU5PUA==")
            .body(Bytes::new())
            .unwrap();
        let res = handler.call(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
