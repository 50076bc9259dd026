//! Transport framing and peer addressing for the sync engine
//!
//! - [`framing`]: length-prefixed frame codec for `tokio_util`-style
//!   byte streams
//! - [`transport`]: the [`transport::Transport`] trait plus an in-process
//!   [`transport::MemoryChannel`] and a [`transport::TcpTransport`]
//! - [`peer`]: peer identifiers and addressing

pub mod framing;
pub mod peer;
pub mod transport;

pub use framing::FrameCodec;
pub use peer::{PeerId, PeerInfo};
pub use transport::{MemoryChannel, TcpTransport, Transport};
