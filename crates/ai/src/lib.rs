//! `ezbooks-ai`
//!
//! Entry suggestion boundary. Turns a transaction plus a chart-of-accounts
//! snapshot into a proposed debit/credit pair, infers categories, ranks
//! alternatives and scores likely duplicates.
//!
//! The crate does not depend on the accounting aggregates and never mutates
//! domain state: callers feed it snapshots and turn its results into
//! commands.

pub mod category;
pub mod duplicates;
pub mod error;
pub mod job;
pub mod scheduler;
pub mod snapshot;
pub mod suggest;

pub use category::{CategoryGuess, infer_category};
pub use duplicates::{DuplicateMatch, DuplicateQuery, find_duplicate};
pub use error::AiError;
pub use job::AiJob;
pub use scheduler::{AiScheduler, LocalAiScheduler};
pub use snapshot::{AccountClass, AccountSnapshot, AccountingMethod, BusinessContext, TransactionSnapshot};
pub use suggest::{
    EntrySuggestion, EntrySuggestionJob, Overrides, SuggestionInput, SuggestionOutcome,
    alternatives, suggest_entry,
};
