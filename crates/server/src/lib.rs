//! The LLMRTC server gateway.
//!
//! Wires the runtime together: sessions, the VAD gate, the barge-in
//! arbiter, the orchestrator or playbook engine, and the WebSocket
//! transport speaking the JSON envelope protocol with a binary audio
//! side-channel.
//!
//! The crate is a library first — embedders inject their providers and
//! tools through [`bootstrap::ServerBuilder`] — with a thin `llmrtcd`
//! binary that boots a development loopback stack.

pub mod arbiter;
pub mod bootstrap;
pub mod dev;
pub mod state;
pub mod turn_slot;
pub mod ws;

pub use bootstrap::ServerBuilder;
pub use state::AppState;
