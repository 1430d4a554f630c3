//! Query routing
//!
//! Decides which path a query takes before any retrieval work starts.
//! Pure function of the query: no model call, no index access, so the
//! decision is deterministic and free.
//!
//! Summarization intent only routes to the digest path when documents
//! are actually selected; "summarize X" with no documents is treated
//! as an ordinary informational query.

use crate::types::Query;

/// Pipeline entry route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Full retrieve-rerank-generate loop
    Grounded,

    /// Map-reduce digest over the selected documents
    Summarize,

    /// Conversational reply, no retrieval
    DirectChat,

    /// Informational query with no private documents and no shared
    /// corpus opt-in; structurally unanswerable
    NoSources,
}

const SUMMARY_MARKERS: &[&str] = &[
    "summarize",
    "summarise",
    "summary of",
    "overview of",
    "key points",
    "main points",
    "tl;dr",
    "tldr",
];

const SMALL_TALK: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "thanks",
    "thank you",
    "good morning",
    "good afternoon",
    "good evening",
    "how are you",
    "who are you",
    "what can you do",
    "help",
];

/// Route a query. Summarization wins over grounded when documents are
/// selected; small talk only short-circuits when there is nothing to
/// retrieve against.
pub fn route(query: &Query) -> Route {
    let lower = query.text.trim().to_lowercase();

    if query.has_documents() {
        if SUMMARY_MARKERS.iter().any(|m| lower.contains(m)) {
            return Route::Summarize;
        }
        return Route::Grounded;
    }

    if is_small_talk(&lower) {
        return Route::DirectChat;
    }

    if query.augment_shared {
        return Route::Grounded;
    }

    Route::NoSources
}

fn is_small_talk(lower: &str) -> bool {
    let stripped = lower.trim_end_matches(['!', '?', '.', ' ']);
    if SMALL_TALK.contains(&stripped) {
        return true;
    }
    // Short greetings with trailing words ("hi there", "thanks a lot")
    stripped.split_whitespace().count() <= 4
        && SMALL_TALK
            .iter()
            .any(|m| stripped.starts_with(m) && stripped.len() <= m.len() + 10)
}
