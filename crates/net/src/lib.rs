//! UDP gossip: wire codec, peer table and the datagram service.

pub mod errors;
pub mod message;
pub mod peers;
pub mod service;

pub use errors::NetError;
pub use message::{Message, MessageParser, MessageType, ParseStatus};
pub use peers::{PeerContainer, PeerInfo};
pub use service::{MessageHandler, UdpService};
