//! Ferry Transport Layer - capability contract for interchangeable transports
//!
//! This crate provides:
//! - The `Transport` capability every adapter implements
//! - Per-attempt context (cancellation token, progress and quality feedback)
//! - The set of configured adapters
//! - Attempt timeout derivation
//! - The content store interface and an in-memory store

pub mod capability;
pub mod set;
pub mod timeout;
pub mod store;

pub use capability::*;
pub use set::TransportSet;
pub use timeout::TimeoutPolicy;
pub use store::{ContentStore, MemoryContentStore};
