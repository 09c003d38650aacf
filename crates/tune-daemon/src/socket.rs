use crate::core::{SessionHandle, SessionView};
use crate::error::SessionError;
use crate::SessionMessage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tune_proto::protocol::{Broadcast, Command, FrameError, Message, PROTOCOL_VERSION};

pub fn start_server(
    bind_address: String,
    port: u16,
    view: SessionView,
    handle: SessionHandle,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let view = view.clone();
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        let (read_half, write_half) = stream.into_split();
                        handle_client(read_half, write_half, id, view, handle).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client<R, W>(
    mut read_half: R,
    mut write_half: W,
    client_id: usize,
    view: SessionView,
    handle: SessionHandle,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut broadcast_rx = view.subscribe();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current state snapshot on connect
    if let Ok(encoded) = encode_hello(&view).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            match Message::decode(&read_buf) {
                                Ok(None) => break,
                                Ok(Some((Message::Command(cmd), consumed))) => {
                                    read_buf.drain(..consumed);
                                    info!("Client {} sent command: {:?}", client_id, cmd);

                                    match run_command(&handle, cmd).await {
                                        Err(SessionError::Closed) => {
                                            warn!("Session closed, dropping client {}", client_id);
                                            return;
                                        }
                                        // Load and transport failures are broadcast by the session loop.
                                        Err(e @ SessionError::NoSuchTrack(_)) => {
                                            let reply = Broadcast::Error { message: e.to_string() };
                                            if let Ok(encoded) = Message::Broadcast(reply).encode() {
                                                if write_half.write_all(&encoded).await.is_err() {
                                                    return;
                                                }
                                            }
                                        }
                                        _ => {}
                                    }

                                    if let Ok(encoded) = encode_state(&view).await {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Ok(Some((_, consumed))) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(FrameError::Malformed { len, source }) => {
                                    warn!("Client {} sent a malformed frame: {}", client_id, source);
                                    read_buf.drain(..len);
                                    let reply = Broadcast::Error {
                                        message: format!("malformed frame: {}", source),
                                    };
                                    if let Ok(encoded) = Message::Broadcast(reply).encode() {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Err(e @ FrameError::TooLarge(_)) => {
                                    warn!("Dropping client {}: {}", client_id, e);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let broadcast = match msg {
                    Ok(SessionMessage::StateUpdated) => {
                        if let Ok(encoded) = encode_state(&view).await {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                        continue;
                    }
                    Ok(SessionMessage::Status(status)) => Broadcast::Status { status },
                    Ok(SessionMessage::Error(message)) => Broadcast::Error { message },
                    Ok(SessionMessage::Log(message)) => Broadcast::Log { message },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        if let Ok(encoded) = encode_state(&view).await {
                            let _ = write_half.write_all(&encoded).await;
                        }
                        continue;
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = Message::Broadcast(broadcast).encode() {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn run_command(handle: &SessionHandle, cmd: Command) -> Result<(), SessionError> {
    match cmd {
        Command::Select { index } => handle.select_index(index).await,
        Command::SelectUrl { url } => handle.select_url(url).await,
        Command::Toggle => handle.toggle().await,
        // The state snapshot that follows every command is the answer.
        Command::GetState => Ok(()),
    }
}

async fn encode_hello(view: &SessionView) -> anyhow::Result<Vec<u8>> {
    let state = view.snapshot().await;
    let rev = state.rev;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        rev,
        state,
    })
    .encode()
}

async fn encode_state(view: &SessionView) -> anyhow::Result<Vec<u8>> {
    let state = view.snapshot().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}
