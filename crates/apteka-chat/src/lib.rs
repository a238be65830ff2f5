//! Conversational pharmacy lookup for Apteka.
//!
//! Keeps per-conversation slot memory, dispatches each turn on the tool the
//! language service picked, narrows pharmacies through a filter cascade, and
//! finalizes the spoken reply.

pub mod error;
pub mod intent;
pub mod merge;
pub mod orchestrator;
pub mod prompt;
pub mod response;
pub mod retrieval;
pub mod store;

pub use error::ChatError;
pub use intent::{tool_menu, Intent};
pub use merge::{is_continuation, merge_context, MergeDecision};
pub use orchestrator::{ChatOrchestrator, TurnInput, TurnOutput, DEFAULT_AUDIO_MIME};
pub use response::{finalize_answer, sanitize, AnswerSource};
pub use retrieval::{CascadeConfig, FieldTolerances, Resolution, RetrievalCascade, RetrievalOutcome, Stage};
pub use store::{InMemorySessionStore, SessionPolicy, SessionStore, SessionSweeper};
