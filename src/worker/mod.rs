//! Worker side of the cluster.
//!
//! A worker is anything that registers with the scheduler, heartbeats,
//! executes what it is told to and reports back:
//!
//! - [`WorkerAgent`]: the registration / heartbeat / execute / report loop
//! - [`JobRunner`]: the execution backend a worker drives
//! - [`CommandRunner`]: runs the payload as `sh -c <payload>`
//! - [`SimulatedRunner`]: timed stand-in workload with configurable failures
//! - [`heartbeat`]: heartbeat interval with jitter

pub mod agent;
pub mod executor;
pub mod heartbeat;

pub use agent::WorkerAgent;
pub use executor::{CommandRunner, JobRunner, ProgressReporter, SimulatedRunner};
