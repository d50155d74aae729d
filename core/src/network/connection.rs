//! Framed connection
//!
//! Every frame is a 4-byte big-endian length followed by a JSON body of at
//! most [`MAX_MESSAGE_SIZE`] bytes.

use crate::network::protocol::{ClientMessage, MAX_MESSAGE_SIZE, ServerMessage};
use crate::{AtelierError, AtelierResult};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const READ_TIMEOUT: Duration = Duration::from_secs(60);

pub struct NetworkConnection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    last_activity: Instant,
    read_timeout: Duration,
}

impl NetworkConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buffer: vec![0; 8192],
            write_buffer: Vec::with_capacity(8192),
            last_activity: Instant::now(),
            read_timeout: READ_TIMEOUT,
        }
    }

    /// Connect to `addr` (client side).
    pub async fn connect(addr: &str) -> AtelierResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| AtelierError::Connection(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Wait at most `timeout` for the next frame header.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub async fn read_message(&mut self) -> AtelierResult<Option<ClientMessage>> {
        match self.read_frame().await? {
            Some(len) => ClientMessage::from_bytes(&self.read_buffer[..len]).map(Some),
            None => Ok(None),
        }
    }

    pub async fn send_response(&mut self, response: &ServerMessage) -> AtelierResult<()> {
        let bytes = response.to_bytes()?;
        self.write_frame(&bytes).await
    }

    /// Send a message (client side).
    pub async fn send_message(&mut self, message: &ClientMessage) -> AtelierResult<()> {
        let bytes = message.to_bytes()?;
        self.write_frame(&bytes).await
    }

    /// Read a response (client side).
    pub async fn read_response(&mut self) -> AtelierResult<Option<ServerMessage>> {
        match self.read_frame().await? {
            Some(len) => ServerMessage::from_bytes(&self.read_buffer[..len]).map(Some),
            None => Ok(None),
        }
    }

    /// Read one frame into the read buffer and return its length, or `None`
    /// when the peer closed the connection.
    async fn read_frame(&mut self) -> AtelierResult<Option<usize>> {
        let mut len_bytes = [0u8; 4];
        match tokio::time::timeout(self.read_timeout, self.stream.read_exact(&mut len_bytes)).await
        {
            Ok(Ok(_)) => {
                self.last_activity = Instant::now();
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Ok(Err(e)) => return Err(AtelierError::Io(e)),
            Err(_) => return Err(AtelierError::Timeout),
        }

        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(AtelierError::Protocol(format!(
                "Message too large: {} bytes",
                len
            )));
        }

        if self.read_buffer.len() < len {
            self.read_buffer.resize(len, 0);
        }

        self.stream.read_exact(&mut self.read_buffer[..len]).await?;
        self.last_activity = Instant::now();

        Ok(Some(len))
    }

    async fn write_frame(&mut self, body: &[u8]) -> AtelierResult<()> {
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(AtelierError::Protocol(format!(
                "Message too large: {} bytes",
                body.len()
            )));
        }

        self.write_buffer.clear();
        self.write_buffer.reserve(4 + body.len());
        self.write_buffer
            .extend_from_slice(&(body.len() as u32).to_be_bytes());
        self.write_buffer.extend_from_slice(body);

        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;

        self.last_activity = Instant::now();
        Ok(())
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub async fn close(&mut self) -> AtelierResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;

    async fn pair() -> (NetworkConnection, NetworkConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (client, accepted) = tokio::join!(NetworkConnection::connect(&addr), listener.accept());
        (client.unwrap(), NetworkConnection::new(accepted.unwrap().0))
    }

    #[tokio::test]
    async fn test_frames_round_trip_over_tcp() {
        let (mut client, mut server) = pair().await;

        client.send_message(&ClientMessage::Ping).await.unwrap();
        assert_eq!(server.read_message().await.unwrap(), Some(ClientMessage::Ping));

        server.send_response(&ServerMessage::Pong).await.unwrap();
        assert_eq!(client.read_response().await.unwrap(), Some(ServerMessage::Pong));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, mut server) = pair().await;
        let len = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
        client.stream.write_all(&len).await.unwrap();

        let err = server.read_message().await.unwrap_err();
        assert!(matches!(err, AtelierError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_closed_peer_reads_none() {
        let (mut client, mut server) = pair().await;
        client.close().await.unwrap();
        assert_eq!(server.read_message().await.unwrap(), None);
    }
}
