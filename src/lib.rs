//! A swarm orchestration core: plans a goal into a dependency graph of
//! tasks, dispatches them to subagents with bounded concurrency and
//! retries, reviews the result with a critic, and aggregates a final
//! answer.
//!
//! - [`domain`] holds the data model (tasks, plans, events) and the ports
//!   this crate consumes from the outside world (an LLM-backed runner, a
//!   tool registry, budget/capability/guardrail gates).
//! - [`services`] holds the orchestration logic: the coordinator, the
//!   dispatcher, the circuit breaker, the hook registry, the enforcer and
//!   decision policy, and configuration loading.
//! - [`infrastructure`] holds ambient adapters (structured logging) that
//!   don't belong to either layer above.

pub mod domain;
pub mod infrastructure;
pub mod services;
