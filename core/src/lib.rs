//! RVR Core Library
//!
//! Core types, errors and configuration for the randomized view reconciliation protocol.
//! This crate provides the foundation for all other RVR components.

pub mod types;
pub mod error;
pub mod config;

pub use types::*;
pub use error::*;
pub use config::*;
