//! History strategies applied when a stage is entered.
//!
//! `summary` collapses prior history into one LLM-written system note —
//! run strictly between turns, never concurrently with a streaming call.

use std::sync::Arc;

use llmrtc_domain::error::Result;
use llmrtc_domain::history::History;
use llmrtc_domain::message::{Message, Role};
use llmrtc_providers::{LlmProvider, LlmRequest};

use crate::types::HistoryStrategy;

/// Apply the target stage's history strategy. `new_prompt` is the target
/// stage's layered system prompt; every strategy re-seats it at the head
/// of the history.
pub async fn apply_strategy(
    history: &mut History,
    strategy: HistoryStrategy,
    new_prompt: &str,
    llm: &Arc<dyn LlmProvider>,
) -> Result<()> {
    match strategy {
        HistoryStrategy::Full => {
            reseat_system_prompt(history, new_prompt);
        }
        HistoryStrategy::Reset => {
            history.replace(vec![Message::system(new_prompt)]);
        }
        HistoryStrategy::LastN { n } => {
            let tail: Vec<Message> = without_system(history)
                .iter()
                .rev()
                .take(n)
                .rev()
                .cloned()
                .collect();
            let mut messages = vec![Message::system(new_prompt)];
            messages.extend(tail);
            history.replace(messages);
        }
        HistoryStrategy::Summary => {
            let summary = summarize(history, llm).await?;
            let mut messages = vec![Message::system(new_prompt)];
            if !summary.is_empty() {
                messages.push(Message::system(format!(
                    "Summary of the conversation so far:\n{summary}"
                )));
            }
            history.replace(messages);
        }
    }
    Ok(())
}

fn reseat_system_prompt(history: &mut History, new_prompt: &str) {
    let mut messages = history.snapshot();
    if messages.first().map(|m| m.role) == Some(Role::System) {
        messages[0] = Message::system(new_prompt);
    } else {
        messages.insert(0, Message::system(new_prompt));
    }
    history.replace(messages);
}

fn without_system(history: &History) -> Vec<Message> {
    history
        .messages()
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect()
}

/// Ask the LLM for a dense summary of the conversation body.
async fn summarize(history: &History, llm: &Arc<dyn LlmProvider>) -> Result<String> {
    let body = without_system(history);
    if body.is_empty() {
        return Ok(String::new());
    }

    let transcript: String = body
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
                Role::System => "system",
            };
            format!("{role}: {}\n", m.content)
        })
        .collect();

    let request = LlmRequest {
        messages: vec![
            Message::system(
                "You are a conversation summarizer. Summarize the following conversation \
                 into a concise paragraph that preserves user goals, facts established, \
                 and any commitments the assistant made. Output only the summary.",
            ),
            Message::user(transcript),
        ],
        ..Default::default()
    };

    let result = llm.complete(request).await?;
    Ok(result.full_text.trim().to_string())
}
