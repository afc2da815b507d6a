//! Small shared utilities: logging setup.

pub mod logging;
