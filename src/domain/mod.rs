//! Domain layer: data model, errors, and the ports (traits) this crate
//! consumes from the outside world (runners, hooks, tool registry, gates).

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
