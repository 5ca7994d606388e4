//! Background suggestion generation.
//!
//! Suggestions are best-effort: a failed job is retried with backoff and then
//! dropped, and never blocks the command that requested it.

pub mod suggestion_runner;

pub use suggestion_runner::{
    SuggestionError, SuggestionInbox, SuggestionQueue, SuggestionRequest, SuggestionRunner, SuggestionRunnerHandle,
    SuggestionTarget, suggestion_queue,
};
