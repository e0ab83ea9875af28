//! HTTP protocol implementation.
//!
//! A small HTTP/1.1 server with keep-alive, just enough for the relay.
//!
//! # Architecture
//!
//! - **`connection`**: per-connection request/response state machine
//! - **`parser`**: parses incoming requests from byte buffers
//! - **`request`**: request representation
//! - **`response`**: response representation with builder pattern
//! - **`writer`**: serializes and writes responses
//! - **`cors`**: cross-origin headers and preflight replies
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received (malformed → 4xx, then Closed)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Route and forward; client hangup → Closed
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod cors;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
