//! Transports the sync engine can run over.
//!
//! The sync protocol runs against an abstract ordered, reliable byte pipe —
//! nothing about `kv_sync` cares whether that pipe is two
//! tasks in one process or a socket across the network. [`MemoryChannel`]
//! is that pipe for tests and single-process deployments; [`TcpTransport`]
//! frames a real `TcpStream` the same way, using the same
//! `length(u32 BE) | payload` layout as [`crate::framing::FrameCodec`].

use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One side of an ordered, reliable, message-framed channel.
pub trait Transport: Send {
    /// Send one framed message.
    async fn send(&mut self, message: Vec<u8>) -> io::Result<()>;

    /// Receive the next framed message, or `None` if the peer closed the
    /// channel.
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// An in-process channel pair, standing in for a network connection
/// between two peers running in the same process (tests, or a
/// single-binary multi-identity deployment).
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryChannel {
    /// Build a connected pair: messages sent on one side arrive, in order,
    /// on the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self { tx: tx_a, rx: rx_b }, Self { tx: tx_b, rx: rx_a })
    }
}

impl Transport for MemoryChannel {
    async fn send(&mut self, message: Vec<u8>) -> io::Result<()> {
        self.tx
            .send(message)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))
    }

    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }
}

/// A length-framed TCP connection.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap an already-connected stream.
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Transport for TcpTransport {
    async fn send(&mut self, message: Vec<u8>) -> io::Result<()> {
        if message.len() > MAX_FRAME_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "frame too large"));
        }
        self.stream.write_u32(message.len() as u32).await?;
        self.stream.write_all(&message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        let len = match self.stream.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        if len > MAX_FRAME_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
        }
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_channel_delivers_messages_in_order() {
        let (mut a, mut b) = MemoryChannel::pair();
        a.send(vec![1]).await.unwrap();
        a.send(vec![2]).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(vec![1]));
        assert_eq!(b.recv().await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn memory_channel_is_bidirectional() {
        let (mut a, mut b) = MemoryChannel::pair();
        b.send(vec![9]).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Some(vec![9]));
    }

    #[tokio::test]
    async fn dropping_one_side_closes_the_other() {
        let (a, mut b) = MemoryChannel::pair();
        drop(a);
        assert_eq!(b.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn tcp_transport_roundtrips_a_frame() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut t = TcpTransport::new(stream);
            let msg = t.recv().await.unwrap().unwrap();
            t.send(msg).await.unwrap();
        });
        let mut client = TcpTransport::new(TcpStream::connect(addr).await.unwrap());
        client.send(vec![1, 2, 3]).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), Some(vec![1, 2, 3]));
        server.await.unwrap();
    }
}
