//! TCP bootstrap: the listener serving store contents and the client that
//! reconciles a node against a peer.

pub mod client;
pub mod server;
pub mod wire;

pub use client::{BootstrapAttempt, BootstrapInitiator, PullInfo, PushInfo};
pub use server::{BootstrapServer, BootstrapSink};
