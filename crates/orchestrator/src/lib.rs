//! The conversation orchestrator: one user utterance in, one spoken
//! assistant reply out.
//!
//! A turn is a pipeline of overlapping phases — STT, LLM, sentence
//! chunking, TTS — connected by bounded channels so the first sentence is
//! being synthesized while the model is still generating the second. Every
//! suspension point races the turn's cancel token; barge-in stops the
//! pipeline mid-stream with deterministic finalization.

pub mod chunker;
pub mod event;
pub mod orchestrator;
pub mod speech;
pub mod turn;

pub use chunker::SentenceChunker;
pub use event::{TurnEvent, TurnResult};
pub use orchestrator::{Orchestrator, TurnInput};
pub use speech::{SpeechStage, TtsOutcome};
pub use turn::{PhaseOutcome, TurnContext, TurnHandle};
