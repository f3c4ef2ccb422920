//! The transport boundary: signaling carriers (HTTP, WebSocket, ...) live
//! outside the core and talk to it through these traits. A channel-backed
//! in-process transport is provided for tests and embedding.

pub mod channel_transport;
pub mod transport;

pub use channel_transport::ChannelTransport;
pub use transport::{TRANSPORT_API_VERSION, Transport, TransportCallbacks};
