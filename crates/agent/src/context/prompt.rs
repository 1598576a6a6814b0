//! Renders memory context, recent turns and the query into one prompt.

use switchyard_core::message::{Conversation, Message, Role};

use super::token;

/// A rendered prompt plus what went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub text: String,
    /// History turns included
    pub history_turns: usize,
    /// History turns left out for lack of room
    pub history_dropped: usize,
    pub estimated_tokens: usize,
}

/// Build the prompt. History is filled newest-first until
/// `history_budget` estimated tokens are used; system messages are skipped.
pub fn assemble_prompt(
    context: &str,
    conversation: &Conversation,
    query: &str,
    history_budget: usize,
) -> AssembledPrompt {
    let mut used = 0;
    let mut included: Vec<&Message> = Vec::new();
    let mut dropped = 0;

    // Sliding window from newest to oldest; once a turn does not fit,
    // everything older is dropped too so the window stays contiguous.
    let mut full = false;
    for msg in conversation.messages.iter().rev() {
        if msg.role == Role::System {
            continue;
        }
        let cost = token::estimate_message_tokens(msg);
        if !full && used + cost <= history_budget {
            included.push(msg);
            used += cost;
        } else {
            full = true;
            dropped += 1;
        }
    }
    included.reverse();

    let mut text = String::new();
    if !context.is_empty() {
        text.push_str(context.trim_end());
        text.push_str("\n\n");
    }
    if !included.is_empty() {
        text.push_str("Conversation so far:\n");
        for msg in &included {
            text.push_str(msg.role.label());
            text.push_str(": ");
            text.push_str(&msg.content);
            text.push('\n');
        }
        text.push('\n');
    }
    text.push_str("User: ");
    text.push_str(query);
    text.push_str("\nAssistant:");

    AssembledPrompt {
        estimated_tokens: token::estimate_tokens(&text),
        text,
        history_turns: included.len(),
        history_dropped: dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(turns: &[(&str, &str)]) -> Conversation {
        let mut c = Conversation::new();
        c.push(Message::system("You are terse."));
        for (u, a) in turns {
            c.push(Message::user(*u));
            c.push(Message::assistant(*a));
        }
        c
    }

    #[test]
    fn bare_query_without_context_or_history() {
        let p = assemble_prompt("", &Conversation::new(), "hi", 1000);
        assert_eq!(p.text, "User: hi\nAssistant:");
        assert_eq!(p.history_turns, 0);
    }

    #[test]
    fn context_comes_first_then_history_then_query() {
        let c = conversation(&[("what is rust", "a language")]);
        let p = assemble_prompt("Relevant past exchanges:\n[1] ...", &c, "and cargo?", 1000);

        let ctx = p.text.find("Relevant past").unwrap();
        let hist = p.text.find("what is rust").unwrap();
        let query = p.text.find("and cargo?").unwrap();
        assert!(ctx < hist && hist < query);
        assert!(!p.text.contains("You are terse."));
        assert_eq!(p.history_turns, 2);
    }

    #[test]
    fn oldest_turns_are_dropped_first() {
        let c = conversation(&[
            ("first question here", "first answer here"),
            ("second question", "second answer"),
        ]);
        // Room for the last two messages only (~8 tokens each).
        let p = assemble_prompt("", &c, "third", 18);
        assert_eq!(p.history_turns, 2);
        assert_eq!(p.history_dropped, 2);
        assert!(p.text.contains("second answer"));
        assert!(!p.text.contains("first question"));
    }

    #[test]
    fn zero_budget_keeps_only_the_query() {
        let c = conversation(&[("q", "a")]);
        let p = assemble_prompt("", &c, "next", 0);
        assert_eq!(p.history_turns, 0);
        assert_eq!(p.history_dropped, 2);
    }
}
