//! Relay logic
//!
//! Route resolution, the outbound forwarder, failure classification, and the
//! request handler that ties them together.

pub mod error;
pub mod handler;
pub mod router;
pub mod upstream;

pub use error::ForwardError;
pub use handler::RelayHandler;
pub use router::{Route, RouteTable};
pub use upstream::{BackendReply, Forwarder};
