use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::http::cors;
use crate::http::parser::{parse_http_request, ParseError, MAX_HEADER_BYTES};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::jsonrpc::{ErrorEnvelope, INVALID_REQUEST};
use crate::proxy::handler::RelayHandler;

pub struct Connection {
    stream: TcpStream,
    buffer: Vec<u8>,
    handler: Arc<RelayHandler>,
    max_body: usize,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

/// Outcome of one read attempt.
enum Incoming {
    Request(Request),
    Malformed(ParseError),
    Eof,
}

impl Connection {
    pub fn new(stream: TcpStream, handler: Arc<RelayHandler>, max_body: usize) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(4096),
            handler,
            max_body,
            state: ConnectionState::Reading,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => match self.read_request().await? {
                    Incoming::Request(req) => {
                        self.state = ConnectionState::Processing(req);
                    }
                    Incoming::Malformed(err) => {
                        tracing::debug!(error = ?err, "Rejecting malformed request");
                        let response = reject(&err);
                        self.state = ConnectionState::Writing(ResponseWriter::new(&response), false);
                    }
                    Incoming::Eof => {
                        self.state = ConnectionState::Closed;
                    }
                },

                ConnectionState::Processing(req) => {
                    let keep_alive = req.keep_alive();
                    let handler = Arc::clone(&self.handler);

                    // A reset client abandons the forward: dropping the
                    // handler future closes the backend socket.
                    let limit = MAX_HEADER_BYTES.saturating_add(self.max_body);
                    let mut response = tokio::select! {
                        response = handler.handle(&req) => response,
                        _ = wait_for_hangup(&mut self.stream, &mut self.buffer, limit) => {
                            tracing::debug!(path = %req.path, "Client went away, abandoning request");
                            continue;
                        }
                    };

                    response.set_header("Connection", if keep_alive { "keep-alive" } else { "close" });
                    self.state = ConnectionState::Writing(ResponseWriter::new(&response), keep_alive);
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        self.state = ConnectionState::Reading; // go back for next request
                    } else {
                        self.state = ConnectionState::Closed;
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<Incoming> {
        loop {
            match parse_http_request(&self.buffer, self.max_body) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(Incoming::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => return Ok(Incoming::Malformed(e)),
            }

            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                return Ok(Incoming::Eof);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}

/// Resolves once reading from the client fails, meaning the peer is gone.
///
/// Anything the client sends meanwhile is kept in `buffer` for the next
/// request, up to `limit` bytes. A half-close (EOF) still expects a reply, so
/// it stops the watch without resolving, as does hitting the limit.
async fn wait_for_hangup(stream: &mut TcpStream, buffer: &mut Vec<u8>, limit: usize) {
    let mut temp = [0u8; 4096];
    while buffer.len() < limit {
        match stream.read(&mut temp).await {
            Ok(0) => break,
            Ok(n) => buffer.extend_from_slice(&temp[..n]),
            Err(_) => return,
        }
    }
    std::future::pending::<()>().await
}

/// 4xx reply for a request that could not be parsed; nothing is forwarded.
fn reject(err: &ParseError) -> Response {
    let (status, message) = match err {
        ParseError::LengthRequired => (StatusCode::LengthRequired, "request body length required"),
        ParseError::BodyTooLarge => (StatusCode::PayloadTooLarge, "request body too large"),
        ParseError::HeadersTooLarge => (StatusCode::HeadersTooLarge, "request headers too large"),
        ParseError::InvalidContentLength => (StatusCode::BadRequest, "invalid Content-Length"),
        _ => (StatusCode::BadRequest, "malformed HTTP request"),
    };

    let envelope = ErrorEnvelope::new(INVALID_REQUEST, message);
    let mut response = Response::json_with_status(status, envelope.to_bytes());
    response.set_header("Connection", "close");
    cors::attach(&mut response);
    response
}
