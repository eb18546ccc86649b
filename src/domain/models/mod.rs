//! Core data model: [`Task`] and its relatives, plans, swarm state, events.

mod dispatch;
mod events;
mod plan;
mod sub_result;
mod swarm_state;
mod task;

pub use dispatch::{DispatchStatus, DispatchTask, RetryRecord};
pub use events::{DispatcherEvent, DispatcherEventKind, EventEnvelope, SwarmEvent, SwarmEventKind};
pub use plan::Plan;
pub use sub_result::SubResult;
pub use swarm_state::{SwarmMetrics, SwarmState, SwarmStatus};
pub use task::{Role, Task, TaskId, TaskStatus, DEFAULT_PRIORITY};
