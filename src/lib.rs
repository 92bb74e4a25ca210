//! # refnet
//!
//! An event-driven HTTP/1.0 client for game-session discovery and
//! auto-update checks.
//!
//! `refnet` implements a single-request-at-a-time HTTP client state machine
//! on top of a pluggable, callback-driven TCP transport. It speaks just
//! enough HTTP to talk to master servers and update mirrors: Content-Length
//! framed responses, gzip content encoding, and nothing else.
//!
//! ## Features
//!
//! - **Single in-flight request**: issuing a new query cancels the previous one
//! - **Happy Eyeballs**: races an IPv4 fallback when the primary address is IPv6
//! - **Gzip**: transparent decompression of `Content-Encoding: gzip` bodies
//! - **Poll-driven**: no blocking calls; timeouts are wall-clock deadlines
//!   checked from the caller's poll loop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use refnet::{ClientConfig, Headers, HttpClient, Method, TcpTransport};
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! let transport = TcpTransport::new(rt.handle().clone());
//! let mut client = HttpClient::new(transport, ClientConfig::default());
//!
//! client.set_server("league.example.org:84/league.php").unwrap();
//! client.query(Method::Get, &[], false, Headers::new()).unwrap();
//! while client.is_busy() {
//!     client.execute();
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! println!("{}", client.result_string());
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Core error definitions
//! - [`dns`] - Server-spec parsing and endpoint resolution
//! - [`http`] - Request serialization, response parsing, header maps
//! - [`transport`] - The transport traits and the tokio-backed TCP transport
//! - [`client`] - The request state machine

pub mod base;
pub mod client;
pub mod dns;
pub mod http;
pub mod transport;

pub use base::error::HttpError;
pub use client::{ClientConfig, HttpClient};
pub use dns::ServerEndpoint;
pub use http::headers::Headers;
pub use http::request::Method;
pub use transport::tcp::TcpTransport;
pub use transport::{ParseResult, Transport, TransportError, TransportHandler};
