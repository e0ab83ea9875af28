//! Outbound calls to backend nodes.
//!
//! Each forward opens a fresh TCP connection, writes one `POST` carrying the
//! caller's body untouched, and reads one HTTP/1.1 reply. The exchange is
//! bounded by a single deadline; dropping the returned future closes the
//! socket.

use crate::proxy::error::ForwardError;
use bytes::{Buf, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

/// Default buffer size for reads
const BUFFER_SIZE: usize = 8192;

/// Upper bound on a backend's status line plus headers.
const MAX_RESPONSE_HEADER_BYTES: usize = 64 * 1024;

/// A complete reply read from a backend.
#[derive(Debug, Clone)]
pub struct BackendReply {
    /// Status code the backend sent; logged only.
    pub status: u16,
    /// Body bytes exactly as received (chunked framing removed).
    pub body: Vec<u8>,
}

/// Performs single-attempt forwards with bounded timeouts.
#[derive(Debug, Clone)]
pub struct Forwarder {
    /// Connection timeout duration
    connect_timeout: Duration,

    /// Deadline for the whole exchange, connect included
    request_timeout: Duration,

    max_response_bytes: usize,
}

impl Forwarder {
    pub fn new(connect_timeout: Duration, request_timeout: Duration, max_response_bytes: usize) -> Self {
        Self {
            connect_timeout,
            request_timeout,
            max_response_bytes,
        }
    }

    /// POSTs `body` to `backend` and returns its reply.
    pub async fn forward(&self, backend: &Url, body: &[u8]) -> Result<BackendReply, ForwardError> {
        match timeout(self.request_timeout, self.exchange(backend, body)).await {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Timeout(self.request_timeout)),
        }
    }

    async fn exchange(&self, backend: &Url, body: &[u8]) -> Result<BackendReply, ForwardError> {
        let host = backend
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ForwardError::Internal(format!("backend URL '{}' has no host", backend)))?;
        let port = backend.port_or_known_default().unwrap_or(80);

        // Bracketed IPv6 hosts are already bracketed by host_str().
        let addr = format!("{}:{}", host, port);
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ForwardError::Unreachable(format!("{}: {}", addr, e))),
            Err(_) => {
                return Err(ForwardError::Unreachable(format!(
                    "{}: connect timed out after {:?}",
                    addr, self.connect_timeout
                )));
            }
        };

        tracing::trace!(backend = %backend, "Connected to backend");

        let request_bytes = build_http_request(backend, body);
        stream
            .write_all(&request_bytes)
            .await
            .map_err(|e| ForwardError::BadResponse(format!("failed to send request: {}", e)))?;
        stream
            .flush()
            .await
            .map_err(|e| ForwardError::BadResponse(format!("failed to send request: {}", e)))?;

        tracing::trace!("Request sent to backend");

        read_http_response(&mut stream, self.max_response_bytes).await
    }
}

/// Builds the request bytes sent to a backend.
///
/// The target is the backend URL's own path and query; the inbound path only
/// selected the backend and is not appended.
pub fn build_http_request(backend: &Url, body: &[u8]) -> Vec<u8> {
    let mut target = backend.path().to_string();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = backend.query() {
        target.push('?');
        target.push_str(query);
    }

    let host = match (backend.host_str(), backend.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };

    let mut buffer = Vec::with_capacity(256 + body.len());
    buffer.extend_from_slice(format!("POST {} HTTP/1.1\r\n", target).as_bytes());
    buffer.extend_from_slice(format!("Host: {}\r\n", host).as_bytes());
    buffer.extend_from_slice(b"Content-Type: application/json\r\n");
    buffer.extend_from_slice(b"Accept: application/json\r\n");
    buffer.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    buffer.extend_from_slice(b"Connection: close\r\n");
    buffer.extend_from_slice(b"\r\n");
    buffer.extend_from_slice(body);
    buffer
}

/// How the backend delimits its body.
#[derive(Debug, PartialEq, Eq)]
enum Framing {
    Length(usize),
    Chunked,
    UntilClose,
}

/// Reads one HTTP response from `stream`.
pub async fn read_http_response<R>(stream: &mut R, max_body: usize) -> Result<BackendReply, ForwardError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        if let Some(headers_end) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            let headers_bytes = buffer.split_to(headers_end + 4);
            let (status, framing) = parse_response_head(&headers_bytes)?;

            // 1xx interim replies carry no body; the real one follows.
            if (100..200).contains(&status) {
                continue;
            }

            let body = match framing {
                Framing::Length(len) => read_exact_body(stream, &mut buffer, len, max_body).await?,
                Framing::Chunked => read_chunked_body(stream, &mut buffer, max_body).await?,
                Framing::UntilClose => read_until_close(stream, &mut buffer, max_body).await?,
            };

            return Ok(BackendReply { status, body });
        }

        if buffer.len() > MAX_RESPONSE_HEADER_BYTES {
            return Err(ForwardError::BadResponse("response headers too large".into()));
        }

        let n = stream.read_buf(&mut buffer).await.map_err(lost)?;
        if n == 0 {
            return Err(ForwardError::BadResponse(
                "connection closed before complete response received".into(),
            ));
        }
    }
}

fn lost(e: io::Error) -> ForwardError {
    ForwardError::BadResponse(format!("connection lost: {}", e))
}

fn parse_response_head(head: &[u8]) -> Result<(u16, Framing), ForwardError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| ForwardError::BadResponse("invalid UTF-8 in response headers".into()))?;

    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(ForwardError::BadResponse(format!("invalid status line: {}", status_line)));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ForwardError::BadResponse(format!("invalid status line: {}", status_line)))?;

    let mut content_length = None;
    let mut chunked = false;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(ForwardError::BadResponse(format!("invalid header line: {}", line)));
        };
        let (key, value) = (key.trim(), value.trim());

        if key.eq_ignore_ascii_case("Content-Length") {
            let len = value
                .parse::<usize>()
                .map_err(|_| ForwardError::BadResponse(format!("invalid Content-Length: {}", value)))?;
            content_length = Some(len);
        } else if key.eq_ignore_ascii_case("Transfer-Encoding") {
            chunked = value
                .rsplit(',')
                .next()
                .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"));
        }
    }

    // No body for these regardless of headers.
    if status == 204 || status == 304 {
        return Ok((status, Framing::Length(0)));
    }

    let framing = if chunked {
        Framing::Chunked
    } else if let Some(len) = content_length {
        Framing::Length(len)
    } else {
        Framing::UntilClose
    };

    Ok((status, framing))
}

fn too_large(max_body: usize) -> ForwardError {
    ForwardError::BadResponse(format!("response body exceeds {} bytes", max_body))
}

async fn read_exact_body<R>(
    stream: &mut R,
    buffer: &mut BytesMut,
    content_length: usize,
    max_body: usize,
) -> Result<Vec<u8>, ForwardError>
where
    R: AsyncRead + Unpin,
{
    if content_length > max_body {
        return Err(too_large(max_body));
    }

    while buffer.len() < content_length {
        let n = stream.read_buf(buffer).await.map_err(lost)?;
        if n == 0 {
            return Err(ForwardError::BadResponse(
                "connection closed before complete body received".into(),
            ));
        }
    }

    Ok(buffer.split_to(content_length).to_vec())
}

async fn read_until_close<R>(
    stream: &mut R,
    buffer: &mut BytesMut,
    max_body: usize,
) -> Result<Vec<u8>, ForwardError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if buffer.len() > max_body {
            return Err(too_large(max_body));
        }
        let n = stream.read_buf(buffer).await.map_err(lost)?;
        if n == 0 {
            return Ok(buffer.split().to_vec());
        }
    }
}

/// Reads more bytes into `buffer`, failing on EOF.
async fn fill<R>(stream: &mut R, buffer: &mut BytesMut) -> Result<(), ForwardError>
where
    R: AsyncRead + Unpin,
{
    let n = stream.read_buf(buffer).await.map_err(lost)?;
    if n == 0 {
        return Err(ForwardError::BadResponse(
            "connection closed inside chunked body".into(),
        ));
    }
    Ok(())
}

/// Reads a CRLF-terminated line, returning it without the terminator.
async fn read_line<R>(stream: &mut R, buffer: &mut BytesMut) -> Result<BytesMut, ForwardError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = buffer.windows(2).position(|w| w == b"\r\n") {
            let line = buffer.split_to(pos);
            buffer.advance(2);
            return Ok(line);
        }
        if buffer.len() > BUFFER_SIZE {
            return Err(ForwardError::BadResponse("chunk header too long".into()));
        }
        fill(stream, buffer).await?;
    }
}

async fn read_chunked_body<R>(
    stream: &mut R,
    buffer: &mut BytesMut,
    max_body: usize,
) -> Result<Vec<u8>, ForwardError>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();

    loop {
        let line = read_line(stream, buffer).await?;
        let size_field = std::str::from_utf8(&line)
            .ok()
            .map(|l| l.split(';').next().unwrap_or_default().trim())
            .ok_or_else(|| ForwardError::BadResponse("invalid chunk size".into()))?;
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| ForwardError::BadResponse(format!("invalid chunk size: {}", size_field)))?;

        if size == 0 {
            // Trailers end with an empty line.
            loop {
                if read_line(stream, buffer).await?.is_empty() {
                    return Ok(body);
                }
            }
        }

        let framed = match body.len().checked_add(size).zip(size.checked_add(2)) {
            Some((total, framed)) if total <= max_body => framed,
            _ => return Err(too_large(max_body)),
        };

        while buffer.len() < framed {
            fill(stream, buffer).await?;
        }
        body.extend_from_slice(&buffer[..size]);
        if &buffer[size..framed] != b"\r\n" {
            return Err(ForwardError::BadResponse("chunk missing terminator".into()));
        }
        buffer.advance(framed);
    }
}
