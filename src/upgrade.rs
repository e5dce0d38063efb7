//! In-band protocol upgrades.
//!
//! A handler opts into an upgrade by attaching an [`Upgrade`] payload to
//! its response (typically a `101 Switching Protocols`). After the
//! response head is written, the connection loop stops speaking HTTP and
//! hands the socket to the payload's task. Bytes the HTTP reader had
//! already buffered past the request are replayed first, so the new
//! protocol misses nothing.

use std::cmp;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::future::BoxFuture;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::net::Io;

type UpgradeFn = Box<dyn FnOnce(Upgraded) -> BoxFuture<'static, ()> + Send>;

/// A response payload that takes over the connection once the response
/// head has been written.
///
/// Stored in the response's extensions; the connection loop removes and
/// runs it.
pub struct Upgrade {
    inner: Mutex<Option<UpgradeFn>>,
}

impl Upgrade {
    /// Wraps the task to run on the upgraded connection.
    pub fn new<F, Fut>(f: F) -> Upgrade
    where
        F: FnOnce(Upgraded) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Upgrade {
            inner: Mutex::new(Some(Box::new(move |upgraded| Box::pin(f(upgraded))))),
        }
    }

    pub(crate) async fn run(self, io: Io, read_buf: Bytes) {
        let f = self.inner.lock().unwrap().take();
        if let Some(f) = f {
            f(Upgraded::new(io, read_buf)).await;
        }
    }
}

impl fmt::Debug for Upgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgrade").finish()
    }
}

pin_project! {
    /// An upgraded connection.
    ///
    /// Reads drain the HTTP reader's leftover buffer before touching the
    /// socket again.
    #[derive(Debug)]
    pub struct Upgraded {
        #[pin]
        io: Io,
        pre: Option<Bytes>,
    }
}

impl Upgraded {
    pub(crate) fn new(io: Io, read_buf: Bytes) -> Upgraded {
        let pre = if read_buf.is_empty() {
            None
        } else {
            Some(read_buf)
        };
        Upgraded { io, pre }
    }
}

impl AsyncRead for Upgraded {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if let Some(mut pre) = this.pre.take() {
            if !pre.is_empty() {
                let count = cmp::min(buf.remaining(), pre.len());
                buf.put_slice(&pre[..count]);
                pre.advance(count);
                // Put back whats left
                if !pre.is_empty() {
                    *this.pre = Some(pre);
                }
                return Poll::Ready(Ok(()));
            }
        }
        this.io.poll_read(cx, buf)
    }
}

impl AsyncWrite for Upgraded {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().io.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().io.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().io.poll_shutdown(cx)
    }
}
