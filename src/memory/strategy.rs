//! Request-view shaping of conversation history

use crate::config::TrimStrategy;
use crate::domain::{Message, Role};

/// Shape the history that goes out with a completion request.
///
/// Only the request view is affected; the stored transcript keeps every
/// message in order. System messages survive every strategy, wherever
/// they sit in the history.
pub fn apply_strategy(messages: &[Message], strategy: &TrimStrategy) -> Vec<Message> {
    match strategy {
        TrimStrategy::Full => messages.to_vec(),
        TrimStrategy::SlidingWindow { size } => {
            select(messages, |total, nth| nth + *size >= total)
        }
        TrimStrategy::FirstLast { first, last } => {
            select(messages, |total, nth| nth < *first || nth + *last >= total)
        }
    }
}

/// Keep every system message plus the conversational messages the
/// predicate admits. The predicate sees the conversational total and
/// the message's position among conversational messages; relative
/// order is preserved.
fn select(messages: &[Message], keep: impl Fn(usize, usize) -> bool) -> Vec<Message> {
    let total = messages.iter().filter(|m| m.role != Role::System).count();

    let mut nth = 0;
    let mut view = Vec::new();
    for message in messages {
        if message.role == Role::System {
            view.push(message.clone());
            continue;
        }
        if keep(total, nth) {
            view.push(message.clone());
        }
        nth += 1;
    }
    view
}
