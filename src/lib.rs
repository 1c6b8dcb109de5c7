//! # assignq
//!
//! Work-item assignment service. Callers submit text messages, workers
//! claim the next unassigned message for exclusive editing, then write
//! their edit back with an assignee recorded.
//!
//! Item ownership lives in a [`ledger::Ledger`] (Postgres via [`db::Db`],
//! or [`ledger::MemoryLedger`]); message bodies live in a
//! [`content::ContentStore`]. [`queue::QueueService`] composes the two.

pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod ledger;
pub mod model;
pub mod queue;
pub mod reaper;
pub mod telemetry;

pub use error::{Error, Result};
pub use queue::QueueService;
