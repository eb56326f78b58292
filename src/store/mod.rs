//! Persistence layer: job queue and project data on libSQL.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{CachedResearch, Contract, Database, HaulLog, Invoice, Job, NewJob, Project};
