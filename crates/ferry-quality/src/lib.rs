//! Ferry Quality Controller - adaptive bitrate for streaming transfers
//!
//! This crate implements per-session quality control:
//! - Smoothed (EMA) network estimate, constant memory per session
//! - Multiplicative decrease on loss or throughput shortfall
//! - Additive increase with hysteresis
//! - Change-only publication of decisions

pub mod estimate;
pub mod controller;

pub use estimate::*;
pub use controller::*;
