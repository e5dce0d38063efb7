//! Response serialization.

use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, DATE};
use http::{Response, StatusCode};

const AVERAGE_HEADER_SIZE: usize = 30;

/// Serializes `res` as an HTTP/1.1 response message.
///
/// A `Content-Length` for the body and a `Date` are filled in when the
/// handler didn't set them; status codes that forbid a body (1xx, 204,
/// 304) get neither.
pub(crate) fn encode(res: &Response<Bytes>) -> BytesMut {
    let body = res.body();
    let headers = res.headers();
    let status = res.status();

    let mut dst =
        BytesMut::with_capacity(30 + headers.len() * AVERAGE_HEADER_SIZE + body.len());

    if status == StatusCode::OK {
        dst.put_slice(b"HTTP/1.1 200 OK\r\n");
    } else {
        dst.put_slice(b"HTTP/1.1 ");
        let mut buffer = itoa::Buffer::new();
        dst.put_slice(buffer.format(status.as_u16()).as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
        dst.put_slice(b"\r\n");
    }

    for (name, value) in headers.iter() {
        dst.put_slice(name.as_str().as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }

    if can_have_body(status) {
        if !headers.contains_key(CONTENT_LENGTH) {
            dst.put_slice(b"Content-Length: ");
            let mut buffer = itoa::Buffer::new();
            dst.put_slice(buffer.format(body.len()).as_bytes());
            dst.put_slice(b"\r\n");
        }
        if !headers.contains_key(DATE) {
            dst.put_slice(b"Date: ");
            dst.put_slice(httpdate::fmt_http_date(SystemTime::now()).as_bytes());
            dst.put_slice(b"\r\n");
        }
    }

    dst.put_slice(b"\r\n");

    if can_have_body(status) {
        dst.put_slice(body);
    }

    dst
}

fn can_have_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}
