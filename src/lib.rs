//! WasteWise — waste-spend analysis worker.
//!
//! Polls a job queue, routes each job to an analysis skill, and persists the
//! outcome. Skills cover invoice extraction, contract review, regulatory
//! research, cost optimization, and the full-report pipeline that composes
//! them.

pub mod config;
pub mod error;
pub mod executor;
pub mod formula;
pub mod identity;
pub mod llm;
pub mod router;
pub mod search;
pub mod skills;
pub mod store;
pub mod worker;

pub use error::{Error, Result};
