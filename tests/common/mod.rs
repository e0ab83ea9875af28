//! In-process mock backend nodes for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use rpc_relay::http::parser::{parse_http_request, ParseError};
use rpc_relay::http::request::Request;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How a mock node answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Reply with the given status and JSON body.
    Reply(u16, Vec<u8>),
    /// Reply 200 with the request body.
    Echo,
    /// Never answer; report when the relay closes the connection.
    Hang,
}

#[derive(Debug)]
pub enum Event {
    Request(Request),
    Closed,
}

pub struct MockNode {
    pub url: String,
    events: mpsc::UnboundedReceiver<Event>,
    _handle: JoinHandle<()>,
}

impl MockNode {
    pub async fn spawn(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, events) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve_one(socket, behavior.clone(), tx.clone()));
            }
        });

        Self {
            url: format!("http://{}", addr),
            events,
            _handle: handle,
        }
    }

    /// Waits up to two seconds for the next event.
    pub async fn next_event(&mut self) -> Option<Event> {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn next_request(&mut self) -> Request {
        match self.next_event().await {
            Some(Event::Request(req)) => req,
            other => panic!("expected a request, got {:?}", other),
        }
    }

    /// True when nothing reached this node within a short grace period.
    pub async fn stayed_idle(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(200), self.events.recv())
            .await
            .is_err()
    }
}

async fn serve_one(mut socket: TcpStream, behavior: Behavior, tx: mpsc::UnboundedSender<Event>) {
    let mut buf = Vec::new();
    let request = loop {
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        match parse_http_request(&buf, usize::MAX) {
            Ok((req, _)) => break req,
            Err(ParseError::Incomplete) => continue,
            Err(_) => return,
        }
    };

    let body = request.body.clone();
    let _ = tx.send(Event::Request(request));

    let (status, body) = match behavior {
        Behavior::Reply(status, body) => (status, body),
        Behavior::Echo => (200, body),
        Behavior::Hang => {
            let mut chunk = [0u8; 64];
            loop {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => {
                        let _ = tx.send(Event::Closed);
                        return;
                    }
                    Ok(_) => {}
                }
            }
        }
    };

    let head = format!(
        "HTTP/1.1 {} Whatever\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&body).await;
    let _ = socket.shutdown().await;
}

/// An address nothing is listening on.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
