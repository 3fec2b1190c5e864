//! # corpora-sessions
//!
//! Durable multi-turn conversations over collections.
//!
//! - `manager`: session lifecycle, the turn flow (append user message,
//!   build context, search, append assistant message, post-turn
//!   maintenance), auto-naming, and per-session append locking
//! - `context`: bounded context assembly with relevance pruning, entity
//!   tracking, follow-up detection, and summarization
//! - `suggest`: guided follow-up question generation
//! - `export`: structured dumps of a session's messages, summaries, and
//!   source attributions
//! - `text`: the lexical helpers the above share (stopwords, noun-phrase
//!   extraction, edit distance)

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Bounded context assembly and summarization
pub mod context;

/// Session export
pub mod export;

/// Conversation lifecycle and turns
pub mod manager;

/// Follow-up suggestion generation
pub mod suggest;

/// Lexical helpers
pub mod text;

pub use context::{BuiltContext, ContextManager};
pub use export::{ExportFormat, SessionExport};
pub use manager::{ConversationService, ConversationServiceConfig, TurnRequest, TurnResponse};
pub use suggest::{SuggestionService, SuggestionSource};
