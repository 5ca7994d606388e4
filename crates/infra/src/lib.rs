//! Infrastructure layer: event store, dispatch, read models, background
//! workers and configuration.

pub mod ai;
pub mod bookkeeping;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod reports;
pub mod workers;

pub use bookkeeping::{
    Bookkeeping, BookkeepingError, BookkeepingResult, InMemoryBookkeeping, ManualProposal, NewAccount, NewManualEntry,
    NewTransaction,
};
pub use config::{AppConfig, ConfigError};
pub use reports::Reports;

#[cfg(test)]
mod integration_tests;
