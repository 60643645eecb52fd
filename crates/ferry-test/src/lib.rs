//! Ferry Test Harness - scripted transports and end-to-end scenarios
//!
//! This crate provides:
//! - Scripted transports that play back fixed behaviours
//! - Loopback transports reading from a content store
//! - A seeded chaos link producing streaming quality samples
//! - The end-to-end scenario suite

pub mod chaos;
pub mod scripted;
pub mod loopback;
pub mod integration;

pub use chaos::*;
pub use scripted::*;
pub use loopback::*;
pub use integration::*;
