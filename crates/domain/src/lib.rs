//! Shared domain types used across all LLMRTC crates.
//!
//! Leaf crate: everything else depends on this, it depends on nothing
//! internal. Holds the message/tool data model, the audio primitives,
//! the error taxonomy, per-turn cancellation, bounded conversation
//! history, and the typed configuration tree.

pub mod audio;
pub mod cancel;
pub mod config;
pub mod error;
pub mod history;
pub mod message;
pub mod stream;
