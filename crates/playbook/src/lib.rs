//! The playbook engine: a staged conversation state machine layered over
//! the turn orchestrator.
//!
//! A playbook is a declarative graph of stages (each with its own prompt,
//! tool subset, and history strategy) and condition-triggered transitions.
//! Turns execute in the current stage, optionally in two phases: a silent
//! tool loop, then a spoken reply streamed through the sentence chunker
//! into TTS. Transition evaluation runs after the turn, in a fixed
//! precedence order.

pub mod builtin;
pub mod engine;
pub mod history;
pub mod transitions;
pub mod types;
pub mod validate;

pub use builtin::{transition_tool_definition, TRANSITION_TOOL};
pub use engine::{IntentClassifier, PlaybookEngine, PlaybookTurnInput};
pub use transitions::{evaluate, TurnRecord};
pub use types::{
    HistoryStrategy, Playbook, PlaybookState, Stage, Transition, TransitionCondition, WILDCARD,
};
