//! Server-spec parsing and endpoint resolution.
//!
//! A server is configured from a string of the form `host[:port][/path]`,
//! e.g. `league.example.org:84/league.php` or `[::1]:8080`. The path
//! defaults to `/` and the port to whatever the caller configured.
//!
//! When the primary resolved address is IPv6 an IPv4 address for the same
//! host is kept as a fallback, so the client can race the two connection
//! attempts (Happy Eyeballs) instead of stalling on broken IPv6 networks.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::base::error::HttpError;

/// A resolved server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    /// Primary address, first result of resolution.
    pub addr: SocketAddr,
    /// IPv4 fallback, present only when the primary is IPv6.
    pub fallback: Option<SocketAddr>,
    /// Hostname with any `:port` suffix stripped. Used for the `Host` header.
    pub host: String,
    /// Request path, always starting with `/`.
    pub path: String,
}

impl ServerEndpoint {
    /// Resolves a `host[:port][/path]` spec.
    ///
    /// Returns [`HttpError::Resolve`] when resolution yields no address.
    pub fn resolve(spec: &str, default_port: u16) -> Result<Self, HttpError> {
        let (host_port, path) = split_path(spec);
        let host = strip_port(host_port).to_string();

        let mut addrs = resolve_addrs(host_port, &host, default_port)?;
        let addr = match addrs.first() {
            Some(addr) => *addr,
            None => return Err(HttpError::Resolve(host)),
        };

        // Happy Eyeballs: keep an IPv4 candidate around when the primary
        // address family is IPv6.
        let fallback = if addr.is_ipv6() {
            addrs.retain(SocketAddr::is_ipv4);
            addrs.first().copied()
        } else {
            None
        };

        tracing::debug!(host = %host, %addr, fallback = ?fallback, "resolved server endpoint");

        Ok(Self {
            addr,
            fallback,
            host,
            path: path.to_string(),
        })
    }
}

/// Splits the request path off a server spec. The path defaults to `/`.
fn split_path(spec: &str) -> (&str, &str) {
    match spec.find('/') {
        Some(idx) => (&spec[..idx], &spec[idx..]),
        None => (spec, "/"),
    }
}

/// Strips a trailing `:port` from a host.
///
/// The colon scan must not split inside a bracketed IPv6 literal: for
/// `[::1]:1234` only the last colon counts, and only because it follows the
/// closing bracket. A bare IPv6 literal like `::1` is left untouched.
fn strip_port(host: &str) -> &str {
    let Some(first) = host.find(':') else {
        return host;
    };
    let last = host.rfind(':').unwrap_or(first);
    let port_colon = first == last
        || (host.starts_with('[') && host.as_bytes().get(last.wrapping_sub(1)) == Some(&b']'));
    if port_colon {
        &host[..last]
    } else {
        host
    }
}

/// Runs getaddrinfo for the spec, applying the default port when the spec
/// carried none.
fn resolve_addrs(
    host_port: &str,
    host: &str,
    default_port: u16,
) -> Result<Vec<SocketAddr>, HttpError> {
    let has_port = host_port.len() != host.len();
    let resolved = if has_port {
        host_port.to_socket_addrs()
    } else {
        // ToSocketAddrs does not accept brackets without a port.
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        (bare, default_port).to_socket_addrs()
    };
    match resolved {
        Ok(iter) => Ok(iter.collect()),
        Err(e) => {
            tracing::debug!(host = %host, error = %e, "server address resolution failed");
            Err(HttpError::Resolve(host.to_string()))
        }
    }
}
