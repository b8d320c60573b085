//! taskflow-core – transport-free task lifecycle domain.
//!
//! Contains the task model, the status state machine, the change-event type
//! and the in-memory event bus that fans change events out to watchers.
//! Persistence and HTTP live in `taskflow-server`.

pub mod bus;
pub mod error;
pub mod event;
pub mod model;
pub mod transition;

pub use bus::{EventBus, Subscription, GLOBAL_KEY};
pub use error::{ErrorCode, TaskError};
pub use event::{ChangeType, TaskChangeEvent};
pub use model::{Task, TaskEvent, TaskPriority, TaskStatus};
pub use transition::is_valid_transition;
