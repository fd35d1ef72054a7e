//! Context-window fitting.
//!
//! Given a conversation and the model's context window, drops history until
//! `tokens(system) + tokens(messages) + reserve ≤ window`. The system prompt
//! and the latest user message are never dropped. Compaction (replacing
//! dropped turns with a synthetic summary) is gated off in configuration and
//! not yet implemented; the pruner alone is sufficient for correctness.

use crate::ai::provider::estimate_tokens;
use crate::ai::types::{ChatMessage, Role};
use crate::config::{ContextWindowConfig, PruningStrategy};

/// Model-side limits the pruner fits into.
#[derive(Debug, Clone, Copy)]
pub struct FitLimits {
    pub context_window: u32,
}

/// Shrink `messages` in place until they fit.
///
/// Returns the number of messages dropped.
pub fn fit_messages(
    messages: &mut Vec<ChatMessage>,
    system_prompt: &str,
    config: &ContextWindowConfig,
    limits: FitLimits,
) -> usize {
    let initial = messages.len();

    // Cap the number of complete turns kept, regardless of token budget.
    while user_message_count(messages) > config.max_turns_in_context && drop_oldest(messages, config.pruning_strategy)
    {}

    let budget = limits
        .context_window
        .saturating_sub(config.reserve_tokens)
        .saturating_sub(estimate_tokens(system_prompt.len()));

    while total_tokens(messages) > budget {
        if !drop_oldest(messages, config.pruning_strategy) {
            break;
        }
    }

    initial - messages.len()
}

fn total_tokens(messages: &[ChatMessage]) -> u32 {
    let chars: usize = messages.iter().map(ChatMessage::char_len).sum();
    estimate_tokens(chars)
}

fn user_message_count(messages: &[ChatMessage]) -> usize {
    messages.iter().filter(|m| m.role == Role::User).count()
}

/// Index of the newest user message; everything at or after it is protected.
fn protected_from(messages: &[ChatMessage]) -> Option<usize> {
    messages.iter().rposition(|m| m.role == Role::User)
}

/// Drop the oldest droppable unit. Returns `false` when nothing can go.
fn drop_oldest(messages: &mut Vec<ChatMessage>, strategy: PruningStrategy) -> bool {
    let Some(protected) = protected_from(messages) else {
        // No user message at all: drop from the front if possible.
        if messages.is_empty() {
            return false;
        }
        messages.remove(0);
        return true;
    };
    if protected == 0 {
        return false;
    }

    match strategy {
        PruningStrategy::TokenBased => {
            messages.remove(0);
            true
        }
        PruningStrategy::TurnBased => {
            // A turn starts at a user message and runs until the next one.
            let first_user = messages.iter().position(|m| m.role == Role::User);
            let turn_end = match first_user {
                Some(start) if start < protected => messages
                    .iter()
                    .enumerate()
                    .skip(start + 1)
                    .find(|(i, m)| m.role == Role::User && *i <= protected)
                    .map(|(i, _)| i)
                    .unwrap_or(protected),
                // Leading non-user prelude: trim it one message at a time.
                _ => 1,
            };
            messages.drain(..turn_end);
            true
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
