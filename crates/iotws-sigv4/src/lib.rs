//! AWS Signature Version 4 for MQTT-over-WebSocket connections.
//!
//! Produces the presigned `wss://` URL that AWS IoT accepts as the
//! authentication for a WebSocket upgrade:
//! - `canonical` builds the canonical request pieces (dates, scope, query)
//! - `signing` holds the HMAC-SHA256 key chain and signature
//! - `presign` assembles the final connect URL
//!
//! Everything here is pure: identical inputs (including the instant) give
//! byte-identical output, and nothing touches the network.

pub mod canonical;
pub mod presign;
pub mod signing;

pub use canonical::*;
pub use presign::*;
pub use signing::*;
