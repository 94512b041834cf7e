//! # Task State Machine
//!
//! `QUEUED → PROCESSING → {COMPLETED | FAILED | TIMEOUT}`, with `FAILED`/`TIMEOUT`
//! returning to `QUEUED` while retries remain and `QUEUED`/`PROCESSING` accepting
//! an explicit cancel. Transitions are validated here and persisted by the
//! orchestration state manager through conditional store updates.

pub mod errors;
pub mod events;
pub mod guards;
pub mod states;
pub mod task_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::TaskEvent;
pub use guards::{RetryBudgetGuard, StateGuard};
pub use states::TaskState;
pub use task_state_machine::TaskStateMachine;
