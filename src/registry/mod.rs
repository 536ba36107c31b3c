//! Persistent registries: one document per task plus the global document.
//!
//! Lock order is global before task. No code path acquires the global lock
//! while holding a task lock.

pub mod global;
pub mod store;
pub mod task;

pub use global::{GlobalRegistry, GlobalTxn};
pub use store::KeyedLocks;
pub use task::{TaskRegistry, TaskTxn};
