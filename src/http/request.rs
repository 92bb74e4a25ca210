use bytes::{BufMut, Bytes, BytesMut};

use crate::http::headers::Headers;

/// Request method. Only the two methods the discovery and update-check
/// protocols use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Serializes a complete HTTP/1.0 request into a single outbound buffer:
/// request line, headers in map order, blank line, body.
pub(crate) fn serialize(method: Method, path: &str, headers: &Headers, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + headers.len() * 32 + body.len());
    buf.put_slice(method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(path.as_bytes());
    buf.put_slice(b" HTTP/1.0\r\n");
    for (name, value) in headers.iter() {
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
    buf.put_slice(body);
    buf.freeze()
}
