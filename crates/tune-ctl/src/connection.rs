use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use tune_proto::protocol::{Broadcast, Command, FrameError, Message};

pub struct DaemonConnection<S = TcpStream> {
    stream: S,
    read_buffer: Vec<u8>,
}

impl DaemonConnection {
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| anyhow::anyhow!("cannot reach tune-daemon at {}: {}", address, e))?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> DaemonConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buffer: Vec::with_capacity(4096),
        }
    }

    pub async fn send_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        let encoded = Message::Command(cmd).encode()?;
        self.stream.write_all(&encoded).await?;
        Ok(())
    }

    /// Next broadcast from the daemon; `None` once the connection closes.
    pub async fn next_broadcast(&mut self) -> anyhow::Result<Option<Broadcast>> {
        let mut buf = [0u8; 4096];
        loop {
            // Drain whatever is already buffered before reading more.
            match Message::decode(&self.read_buffer) {
                Ok(Some((msg, consumed))) => {
                    self.read_buffer.drain(..consumed);
                    match msg {
                        Message::Broadcast(b) => return Ok(Some(b)),
                        Message::Command(cmd) => {
                            debug!("ignoring command from daemon: {:?}", cmd);
                            continue;
                        }
                    }
                }
                Ok(None) => {}
                Err(FrameError::Malformed { len, source }) => {
                    warn!("skipping malformed frame from daemon: {}", source);
                    self.read_buffer.drain(..len);
                    continue;
                }
                Err(e @ FrameError::TooLarge(_)) => return Err(e.into()),
            }

            match self.stream.read(&mut buf).await {
                Ok(0) => return Ok(None),
                Ok(n) => self.read_buffer.extend_from_slice(&buf[..n]),
                Err(e) => return Err(anyhow::anyhow!("Read error: {}", e)),
            }
        }
    }
}
