//! Ferry Core - Fundamental types for content transfer orchestration
//!
//! This crate defines the types shared by every Ferry component:
//! - Identifiers (SessionId, ContentId)
//! - Transport, media and priority classes
//! - Content requests and transfer sessions with their lifecycle
//! - Notification events and streaming quality values
//! - The error taxonomy

pub mod id;
pub mod class;
pub mod content;
pub mod session;
pub mod event;
pub mod quality;
pub mod error;
pub mod duration;

pub use id::*;
pub use class::*;
pub use content::*;
pub use session::*;
pub use event::*;
pub use quality::*;
pub use error::*;
