//! Request head parsing.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Request, Uri, Version};
use tracing::{debug, trace};

use crate::error::{Kind, Parse};

pub(crate) const MAX_HEADERS: usize = 100;

/// How much message body follows the parsed head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyLength {
    Empty,
    Length(u64),
    Chunked,
}

/// Parses one request head from the front of `buf`.
///
/// Returns `Ok(None)` until a full head has been buffered. On success the
/// head bytes are consumed from `buf`, leaving any body bytes behind.
pub(crate) fn parse_head(
    buf: &mut BytesMut,
) -> crate::Result<Option<(Request<()>, BodyLength)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    trace!("parsing request head from {} buffered bytes", buf.len());
    let mut req = httparse::Request::new(&mut headers);
    let len = match req.parse(buf)? {
        httparse::Status::Complete(len) => {
            trace!("request head complete ({} bytes)", len);
            len
        }
        httparse::Status::Partial => return Ok(None),
    };

    let method = req.method.unwrap().parse::<Method>()?;
    let uri = req.path.unwrap().parse::<Uri>()?;
    let version = if req.version.unwrap() == 1 {
        Version::HTTP_11
    } else {
        Version::HTTP_10
    };

    let mut header_map = HeaderMap::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| crate::Error::new(Kind::Parse(Parse::Header)).with(e))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| crate::Error::new(Kind::Parse(Parse::Header)).with(e))?;
        header_map.append(name, value);
    }

    let _ = buf.split_to(len);

    let body = body_length(&header_map)?;

    let mut head = Request::new(());
    *head.method_mut() = method;
    *head.uri_mut() = uri;
    *head.version_mut() = version;
    *head.headers_mut() = header_map;

    Ok(Some((head, body)))
}

/// RFC 7230 section 3.3.3 body length rules for requests: a chunked
/// transfer coding wins, a single valid Content-Length is a sized body,
/// anything malformed closes the connection.
fn body_length(headers: &HeaderMap) -> crate::Result<BodyLength> {
    if let Some(te) = headers.get(TRANSFER_ENCODING) {
        let te = te
            .to_str()
            .map_err(|_| crate::Error::new(Kind::Parse(Parse::Header)))?;
        let last = te.rsplit(',').next().map(str::trim);
        if last.map(|enc| enc.eq_ignore_ascii_case("chunked")) == Some(true) {
            return Ok(BodyLength::Chunked);
        }
        debug!("request with transfer-encoding header, but not chunked");
        return Err(crate::Error::new(Kind::Parse(Parse::Header)));
    }

    let mut length = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| crate::Error::new(Kind::Parse(Parse::ContentLength)))?;
        match length {
            Some(existing) if existing != parsed => {
                debug!("multiple differing content-length headers");
                return Err(crate::Error::new(Kind::Parse(Parse::ContentLength)));
            }
            _ => length = Some(parsed),
        }
    }

    match length {
        Some(0) | None => Ok(BodyLength::Empty),
        Some(len) => Ok(BodyLength::Length(len)),
    }
}

/// Whether the peer expects this connection to carry another request:
/// HTTP/1.1 unless `Connection: close`, HTTP/1.0 only with an explicit
/// `Connection: keep-alive`.
pub(crate) fn should_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    match version {
        Version::HTTP_11 => !connection_has(headers, "close"),
        Version::HTTP_10 => connection_has(headers, "keep-alive"),
        _ => false,
    }
}

/// Whether any `Connection` header lists `token`.
pub(crate) fn connection_has(headers: &HeaderMap, token: &str) -> bool {
    headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|v| {
                v.split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case(token))
            })
            .unwrap_or(false)
    })
}

/// Consumes the leading chunk-size line from `buf`, returning the chunk
/// size, or `None` if the line is not complete yet.
pub(crate) fn parse_chunk_size(buf: &mut BytesMut) -> crate::Result<Option<u64>> {
    let line_end = match find_crlf(buf) {
        Some(at) => at,
        None => return Ok(None),
    };

    let size = {
        let line = &buf[..line_end];
        // chunk extensions after ';' are ignored
        let digits = line
            .split(|&b| b == b';')
            .next()
            .unwrap_or(line);
        let digits = std::str::from_utf8(digits)
            .map_err(|_| crate::Error::new(Kind::Parse(Parse::Chunk)))?
            .trim();
        u64::from_str_radix(digits, 16)
            .map_err(|_| crate::Error::new(Kind::Parse(Parse::Chunk)))?
    };

    let _ = buf.split_to(line_end + 2);
    Ok(Some(size))
}

pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == b"\r\n")
}

/// Freezes `len` body bytes off the front of `buf`.
pub(crate) fn take_body(buf: &mut BytesMut, len: usize) -> Bytes {
    buf.split_to(len).freeze()
}
