//! Rough token counting for prompt sizing.
//!
//! About four bytes of English text per token for BPE vocabularies. The
//! engine reports real usage after the fact; these estimates only decide
//! how much history fits in front of the query.

use switchyard_core::message::Message;

/// Rendering cost of one history line beyond its content
/// (`"User: "`, newline).
const LINE_OVERHEAD: usize = 4;

/// Estimated tokens in `text`, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimated tokens for one rendered history line.
pub fn estimate_message_tokens(message: &Message) -> usize {
    LINE_OVERHEAD + estimate_tokens(&message.content)
}
