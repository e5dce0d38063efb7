//! HTTP/1.x request reading and response writing over a buffered stream.

use bytes::{Bytes, BytesMut};
use http::{Request, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

pub(crate) mod encode;
pub(crate) mod parse;

pub(crate) use self::parse::{connection_has, should_keep_alive};

use self::parse::BodyLength;

const INIT_BUFFER_SIZE: usize = 8192;
const MAX_HEAD_SIZE: usize = 8192 + 4096 * 100;

/// One connection's stream plus its read buffer.
///
/// Reads may pull in bytes past the end of the current message; the
/// leftover is surrendered through [`into_parts`](Buffered::into_parts)
/// when the connection is upgraded to another protocol.
#[derive(Debug)]
pub(crate) struct Buffered<T> {
    io: T,
    read_buf: BytesMut,
}

impl<T> Buffered<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(io: T) -> Buffered<T> {
        Buffered {
            io,
            read_buf: BytesMut::with_capacity(INIT_BUFFER_SIZE),
        }
    }

    pub(crate) fn into_parts(self) -> (T, Bytes) {
        (self.io, self.read_buf.freeze())
    }

    /// Reads the next request off the stream.
    ///
    /// `Ok(None)` means the peer closed the connection cleanly between
    /// requests. EOF in the middle of a message is an error.
    pub(crate) async fn read_request(&mut self) -> crate::Result<Option<Request<Bytes>>> {
        let (head, body_len) = loop {
            if let Some(parsed) = parse::parse_head(&mut self.read_buf)? {
                break parsed;
            }
            if self.read_buf.len() > MAX_HEAD_SIZE {
                return Err(crate::Error::new_too_large());
            }
            if self.fill_read_buf().await? == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(crate::Error::new_incomplete());
            }
        };

        let body = match body_len {
            BodyLength::Empty => Bytes::new(),
            BodyLength::Length(len) => self.read_sized_body(len as usize).await?,
            BodyLength::Chunked => self.read_chunked_body().await?,
        };
        trace!("read_request: {} body bytes", body.len());

        let (parts, ()) = head.into_parts();
        Ok(Some(Request::from_parts(parts, body)))
    }

    /// Serializes and writes one whole response.
    pub(crate) async fn write_response(&mut self, res: &Response<Bytes>) -> crate::Result<()> {
        let dst = encode::encode(res);
        self.io
            .write_all(&dst)
            .await
            .map_err(crate::Error::new_io)?;
        self.io.flush().await.map_err(crate::Error::new_io)?;
        Ok(())
    }

    async fn read_sized_body(&mut self, len: usize) -> crate::Result<Bytes> {
        while self.read_buf.len() < len {
            if self.fill_read_buf().await? == 0 {
                return Err(crate::Error::new_incomplete());
            }
        }
        Ok(parse::take_body(&mut self.read_buf, len))
    }

    async fn read_chunked_body(&mut self) -> crate::Result<Bytes> {
        let mut body = BytesMut::new();
        loop {
            let size = loop {
                if let Some(size) = parse::parse_chunk_size(&mut self.read_buf)? {
                    break size as usize;
                }
                if self.fill_read_buf().await? == 0 {
                    return Err(crate::Error::new_incomplete());
                }
            };

            if size == 0 {
                // trailer section; skipped up to its final empty line
                self.skip_trailers().await?;
                return Ok(body.freeze());
            }

            // chunk data plus its trailing CRLF
            while self.read_buf.len() < size + 2 {
                if self.fill_read_buf().await? == 0 {
                    return Err(crate::Error::new_incomplete());
                }
            }
            body.extend_from_slice(&self.read_buf[..size]);
            let _ = self.read_buf.split_to(size + 2);
        }
    }

    async fn skip_trailers(&mut self) -> crate::Result<()> {
        loop {
            match parse::find_crlf(&self.read_buf) {
                Some(0) => {
                    let _ = self.read_buf.split_to(2);
                    return Ok(());
                }
                Some(at) => {
                    let _ = self.read_buf.split_to(at + 2);
                }
                None => {
                    if self.fill_read_buf().await? == 0 {
                        return Err(crate::Error::new_incomplete());
                    }
                }
            }
        }
    }

    async fn fill_read_buf(&mut self) -> crate::Result<usize> {
        self.io
            .read_buf(&mut self.read_buf)
            .await
            .map_err(crate::Error::new_io)
    }
}
