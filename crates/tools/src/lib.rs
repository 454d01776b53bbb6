//! Tool registry and executor.
//!
//! Tools are registered once at startup (the registry is sealed before the
//! server accepts connections) and dispatched by the executor with
//! per-call schema validation, timeouts, cancellation, and sequential /
//! parallel scheduling policies.

mod executor;
mod registry;
mod schema;

pub use executor::ToolExecutor;
pub use registry::{FnTool, ToolContext, ToolHandler, ToolRegistry};
pub use schema::validate_arguments;
