//! The per-connection request/response loop.

use std::sync::Arc;

use bytes::Bytes;
use http::header::CONNECTION;
use http::{Request, Response, StatusCode};
use tracing::{debug, trace};

use super::Inner;
use crate::logging;
use crate::net::Io;
use crate::proto::h1::{self, Buffered};
use crate::upgrade::Upgrade;

/// Serves one accepted connection until it closes, errors, or upgrades.
///
/// Requests are handled strictly one at a time: the response to request N
/// is written before request N+1 is read off the socket.
pub(super) async fn serve(inner: Arc<Inner>, io: Io, peer: String) {
    let logger = inner.logger.as_ref();
    logger.log_info(&logging::open_message(&peer));

    let mut buffered = Buffered::new(io);
    loop {
        let req = match buffered.read_request().await {
            Ok(Some(req)) => req,
            Ok(None) => break,
            Err(err) => {
                logger.log_error(&logging::error_message(&peer, &err));
                break;
            }
        };
        logger.log_info(&logging::request_message(
            &peer,
            req.method(),
            req.uri().path(),
        ));

        let keep_alive = h1::should_keep_alive(req.version(), req.headers());
        let connection = req.headers().get(CONNECTION).cloned();

        let mut res = dispatch(&inner, &peer, req).await;
        if keep_alive {
            if let Some(value) = connection {
                res.headers_mut().insert(CONNECTION, value);
            }
        }

        let upgrade = res.extensions_mut().remove::<Upgrade>();
        if let Err(err) = buffered.write_response(&res).await {
            logger.log_error(&logging::error_message(&peer, &err));
            break;
        }

        if let Some(upgrade) = upgrade {
            trace!("connection upgraded");
            let (io, read_buf) = buffered.into_parts();
            upgrade.run(io, read_buf).await;
            break;
        }
        if !keep_alive {
            break;
        }
    }

    logger.log_info(&logging::close_message(&peer));
}

/// Routes a request to its handler under the server's deadline.
///
/// No matching route answers `404`; a handler that fails, or outlives the
/// deadline, answers `500`. The connection itself survives all three.
async fn dispatch(inner: &Inner, peer: &str, req: Request<Bytes>) -> Response<Bytes> {
    let handler = {
        let router = inner.router.lock().unwrap();
        router.lookup(req.method(), req.uri().path())
    };

    let result = match handler {
        Some(handler) => match tokio::time::timeout(inner.timeout, handler.call(req)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(crate::Error::new_timeout()),
        },
        None => {
            debug!("no route for {} {}", req.method(), req.uri().path());
            Err(crate::Error::new_not_handled())
        }
    };

    match result {
        Ok(res) => res,
        Err(err) if err.is_not_handled() => synthesized(StatusCode::NOT_FOUND),
        Err(err) => {
            inner.logger.log_error(&logging::error_message(peer, &err));
            synthesized(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn synthesized(status: StatusCode) -> Response<Bytes> {
    let mut res = Response::new(Bytes::new());
    *res.status_mut() = status;
    res
}
