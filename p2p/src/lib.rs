//! RVR P2P Module
//!
//! Signed protocol messages and the transports that carry them:
//! - `HttpTransport` for nodes talking over their RPC endpoints
//! - `MemoryTransport` for in-process clusters

pub mod message;
pub mod transport;
pub mod memory;
pub mod http;

pub use message::*;
pub use transport::*;
pub use memory::MemoryTransport;
pub use http::HttpTransport;
