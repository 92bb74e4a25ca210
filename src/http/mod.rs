//! HTTP/1.0 request serialization and response parsing.
//!
//! The wire surface is deliberately small: requests are `GET` or `POST` with
//! `Connection: Close`, responses are framed by `Content-Length` (chunked
//! transfer is not supported) and may carry `Content-Encoding: gzip`.

pub mod headers;
pub mod request;
pub mod response;
