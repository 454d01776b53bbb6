//! Provider contracts: the only coupling point to external AI services.
//!
//! Four capability traits (LLM, STT, TTS, vision) with provider-agnostic
//! request/response types. Concrete adapters live outside this workspace;
//! the runtime is polymorphic over `Arc<dyn …>` and never learns provider
//! identities. Streaming is optional everywhere — every trait ships a
//! default streaming method that degrades to the blocking call, so
//! consumers can always take the streaming path.

mod normalize;
mod traits;
mod types;

pub use normalize::{stop_reason_from_finish, ToolCallAssembler};
pub use traits::{LlmProvider, SttProvider, TtsProvider, VisionProvider};
pub use types::{
    Capabilities, LlmRequest, LlmResult, SttConfig, ToolChoice, TtsConfig, TtsResult,
    VisionRequest, VisionResult,
};
