//! Background services

pub mod supervisor;

pub use supervisor::{IterationSummary, Supervisor, SupervisorHandle};
