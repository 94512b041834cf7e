//! # Event Broadcasting
//!
//! Typed publish/subscribe between the task lifecycle and its listeners (the
//! API layer, the pipeline orchestrator, dashboards). Events for a given task
//! are published in the order their store writes happened; there is no
//! cross-task ordering guarantee.

pub mod publisher;
pub mod subscription;
pub mod types;

pub use publisher::{EventPublisher, EventPublisherStats};
pub use subscription::{EventSubscription, SubscriptionFilter};
pub use types::SystemEvent;
