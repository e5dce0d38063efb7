//! The asynchronous request handler contract.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::{Request, Response};

/// An asynchronous function from `Request` to `Response`.
///
/// A handler may fail; the failure is answered with `500 Internal Server
/// Error` on the connection that carried the request, except for the
/// [`NotHandled`](crate::NotHandled) sentinel which is answered with
/// `404 Not Found`. A handler never keeps the connection's socket, other
/// than through an upgrade payload on the response.
pub trait Handler: Send + Sync {
    /// Calls this handler with a request, returning a future of the
    /// response.
    fn call(&self, req: Request<Bytes>) -> BoxFuture<'static, crate::Result<Response<Bytes>>>;
}

/// Create a [`Handler`] from an async function.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use foxhole::handler::handler_fn;
/// use foxhole::{Request, Response, StatusCode};
///
/// let handler = handler_fn(|_req: Request<Bytes>| async {
///     Ok::<_, foxhole::NotHandled>(
///         Response::builder()
///             .status(StatusCode::ACCEPTED)
///             .body(Bytes::new())
///             .unwrap(),
///     )
/// });
/// ```
pub fn handler_fn<F, R>(f: F) -> HandlerFn<F, R>
where
    F: Fn(Request<Bytes>) -> R,
    R: Future,
{
    HandlerFn {
        f,
        _req: PhantomData,
    }
}

/// Handler returned by [`handler_fn`].
pub struct HandlerFn<F, R> {
    f: F,
    _req: PhantomData<fn() -> R>,
}

impl<F, R, E> Handler for HandlerFn<F, R>
where
    F: Fn(Request<Bytes>) -> R + Send + Sync,
    R: Future<Output = Result<Response<Bytes>, E>> + Send + 'static,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    fn call(&self, req: Request<Bytes>) -> BoxFuture<'static, crate::Result<Response<Bytes>>> {
        (self.f)(req)
            .map(|result| result.map_err(crate::Error::new_user_handler))
            .boxed()
    }
}

impl<F, R> fmt::Debug for HandlerFn<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("impl Handler").finish()
    }
}

impl<F, R> Clone for HandlerFn<F, R>
where
    F: Clone,
{
    fn clone(&self) -> Self {
        HandlerFn {
            f: self.f.clone(),
            _req: PhantomData,
        }
    }
}
