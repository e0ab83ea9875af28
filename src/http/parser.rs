use crate::http::request::{find_header, Method, Request};
use std::collections::HashMap;

/// Upper bound on the request line plus headers.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    /// A body is expected but its length is not declared (or it is chunked).
    LengthRequired,
    BodyTooLarge,
    HeadersTooLarge,
    Incomplete,
}

/// Parses one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied. Bodies larger
/// than `max_body` are rejected as soon as the headers are complete, before
/// any body bytes need to be buffered.
pub fn parse_http_request(buf: &[u8], max_body: usize) -> Result<(Request, usize), ParseError> {
    let Some(headers_end) = find_headers_end(buf) else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(ParseError::HeadersTooLarge);
        }
        return Err(ParseError::Incomplete);
    };
    if headers_end > MAX_HEADER_BYTES {
        return Err(ParseError::HeadersTooLarge);
    }

    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    // Headers
    let mut headers = HashMap::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

        headers.insert(key.trim().to_string(), value.trim().to_string());
    }

    // Body
    if find_header(&headers, "Transfer-Encoding").is_some() {
        return Err(ParseError::LengthRequired);
    }

    let content_length = match find_header(&headers, "Content-Length") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidContentLength)?,
        None if method == Method::POST => return Err(ParseError::LengthRequired),
        None => 0,
    };

    if content_length > max_body {
        return Err(ParseError::BodyTooLarge);
    }

    if body_bytes.len() < content_length {
        return Err(ParseError::Incomplete);
    }

    let body = body_bytes[..content_length].to_vec();

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body,
    };

    let total_consumed = headers_end + 4 + content_length;
    Ok((request, total_consumed))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
