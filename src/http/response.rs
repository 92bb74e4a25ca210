use std::io::Read;

use http::StatusCode;

use crate::base::error::HttpError;

/// Safety cap on decompressed output, as a multiple of the compressed size.
const MAX_EXPANSION: usize = 1000;

/// Parsed response header: everything the client needs to frame and decode
/// the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    /// Declared body length.
    pub content_length: usize,
    /// Whether the body is `Content-Encoding: gzip`.
    pub compressed: bool,
    /// Byte offset where the body begins (just past `\r\n\r\n`).
    pub body_offset: usize,
}

impl ResponseHead {
    /// Tries to parse the response header from the accumulated buffer.
    ///
    /// Returns `Ok(None)` while the `\r\n\r\n` terminator has not arrived
    /// yet. Anything else is a terminal outcome: either a parsed head or a
    /// hard failure (bad status line, unsupported version, non-200 status,
    /// missing Content-Length).
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, HttpError> {
        let Some(body_offset) = find_header_end(buf) else {
            return Ok(None);
        };
        let header = String::from_utf8_lossy(&buf[..body_offset - 4]);
        let mut lines = header.split("\r\n");

        let status_line = lines.next().unwrap_or("");
        parse_status_line(status_line)?;

        let mut content_length = None;
        let mut compressed = false;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = value.trim().parse::<usize>().ok();
            } else if name.eq_ignore_ascii_case("Content-Encoding") {
                // Case-sensitive value compare, matching the reference
                // servers which always send lowercase "gzip".
                compressed = value.trim() == "gzip";
            }
        }

        let Some(content_length) = content_length else {
            return Err(HttpError::MissingContentLength);
        };

        Ok(Some(Self {
            content_length,
            compressed,
            body_offset,
        }))
    }
}

/// Offset just past the `\r\n\r\n` header terminator, if complete.
pub(crate) fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Validates `HTTP/<major>.<minor> <code> <reason>`.
fn parse_status_line(line: &str) -> Result<(), HttpError> {
    let version = line
        .strip_prefix("HTTP/")
        .ok_or(HttpError::InvalidStatusLine)?;
    let (version, rest) = version.split_once(' ').ok_or(HttpError::InvalidStatusLine)?;
    let (major, minor) = version.split_once('.').ok_or(HttpError::InvalidStatusLine)?;
    let major: u32 = major.parse().map_err(|_| HttpError::InvalidStatusLine)?;
    let minor: u32 = minor.parse().map_err(|_| HttpError::InvalidStatusLine)?;
    if major != 1 {
        return Err(HttpError::UnsupportedVersion { major, minor });
    }

    let (code, reason) = match rest.split_once(' ') {
        Some((code, reason)) => (code, reason.trim()),
        None => (rest, ""),
    };
    let code = code
        .parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or(HttpError::InvalidStatusLine)?;
    if code != StatusCode::OK {
        return Err(HttpError::Status {
            code: code.as_u16(),
            reason: reason.to_string(),
        });
    }
    Ok(())
}

/// Decompresses an RFC 1952 gzip body.
///
/// The output buffer capacity comes from the ISIZE hint in the gzip trailer;
/// output is capped at [`MAX_EXPANSION`] times the compressed size to bound
/// memory against hostile size hints.
pub(crate) fn decompress(data: &[u8]) -> Result<Vec<u8>, HttpError> {
    let cap = data.len().saturating_mul(MAX_EXPANSION);
    let hint = match data.len().checked_sub(4).map(|i| &data[i..]) {
        Some(&[a, b, c, d]) => u32::from_le_bytes([a, b, c, d]) as usize,
        _ => 0,
    };

    let mut out = Vec::with_capacity(hint.min(cap));
    let mut decoder = flate2::read::GzDecoder::new(data).take(cap as u64 + 1);
    decoder.read_to_end(&mut out).map_err(|e| {
        tracing::debug!(error = %e, "gzip decompression failed");
        HttpError::Decompress
    })?;
    if out.len() > cap {
        return Err(HttpError::Decompress);
    }
    Ok(out)
}
