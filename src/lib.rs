pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod ledger;
pub mod log;
pub mod orchestration;
pub mod registry;
pub mod session;
pub mod tmux;
pub mod tools;
pub mod util;
pub mod workspace;

pub use error::{Error, Result};
pub use orchestration::Orchestrator;
