//! Node orchestration: configuration, component wiring, periodic tasks
//! and the multi-node test harness.

pub mod config;
pub mod node;

#[cfg(feature = "test_utils")]
pub mod testing;

pub use config::{ConfigError, NodeConfig};
pub use node::{Node, NodeError, NodeObservers};
