//! Durable control plane for an autonomous assistant: human approval of
//! sensitive actions, bounded task loops, external service health and
//! scheduled work, all persisted as plain files in a vault directory.

pub mod approval;
pub mod config;
pub mod health;
pub mod runtime;
pub mod schedule;
pub mod shared;
pub mod store;
pub mod task_loop;
