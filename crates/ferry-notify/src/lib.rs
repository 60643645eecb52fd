//! Ferry Notification Bus - lifecycle event fan-out
//!
//! - One bounded queue per subscriber, fed by the publisher
//! - Filters by event kind, session, or an arbitrary predicate
//! - Overflow drops the oldest event and leaves a `Dropped(n)` marker
//! - Callback listeners whose errors never reach the publisher

pub mod filter;
pub mod bus;
pub mod listener;

pub use filter::*;
pub use bus::*;
pub use listener::*;
