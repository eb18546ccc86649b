//! Infrastructure layer
//!
//! Adapters for ambient concerns that sit outside the domain/services core:
//! - Structured logging (tracing + tracing-appender)
//!
//! Configuration loading lives in [`crate::services::config`] alongside the
//! types it produces, rather than here, so the whole surface loads from one
//! figment document.

pub mod logging;
