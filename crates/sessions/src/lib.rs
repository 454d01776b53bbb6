//! Session management: creation, transport attachment, grace-window
//! reconnection, and expiry.
//!
//! A session survives transport loss: detach moves it to `Reconnecting`
//! and a sweeper expires it once the grace window elapses. Reconnecting
//! within the window re-attaches the same session with its history and
//! playbook position intact.

mod session;
mod store;

pub use session::{Session, SessionState};
pub use store::{ReconnectOutcome, SessionStore};
