//! Background worker: job lifecycle state machine and the polling loop.

pub mod runner;
pub mod state;

pub use runner::WorkerLoop;
pub use state::JobStatus;
