//! RVR Node Implementation
//!
//! Combines the protocol engine with its outer surfaces:
//! - RPC server for controllers and peers
//! - Networked node with builder
//! - In-process cluster harness

mod api;
mod cluster;
mod node;
mod runtime;

pub use api::*;
pub use cluster::*;
pub use node::*;
pub use runtime::*;
