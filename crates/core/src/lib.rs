//! Core library for the Conductor agent runtime
//!
//! This crate contains the shared data model and plumbing, including:
//! - Run records and their projection updates
//! - The execution event envelope and typed payloads
//! - The in-process event bus
//! - The storage interface and its in-memory and file-backed implementations

pub mod bus;
pub mod error;
pub mod run;

pub use bus::{EventBus, Unsubscribe};
pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
