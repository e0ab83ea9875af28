//! rpc-relay - JSON-RPC CORS relay
//!
//! Forwards JSON-RPC POSTs to blockchain-node backends selected by path and
//! returns their replies with permissive cross-origin headers.

pub mod config;
pub mod http;
pub mod jsonrpc;
pub mod proxy;
pub mod server;
