//! IPC server implementation

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taviblock_api::{Request, Response};
use taviblock_util::ClientId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Message from the IPC layer to the daemon's event loop
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

/// Unix-socket control server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    response_tx: mpsc::UnboundedSender<String>,
}

impl IpcServer {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// Start listening
    pub async fn start(&mut self) -> IpcResult<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner-only: the channel is privileged
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;

        info!(path = %self.socket_path.display(), "Control channel listening");

        self.listener = Some(listener);
        Ok(())
    }

    /// Get the receiver for server messages (can be taken once)
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let uid = peer_uid(&stream);
                    if !is_privileged(uid) {
                        warn!(uid = ?uid, "Rejected unprivileged control client");
                        continue;
                    }

                    let client_id = ClientId::new();
                    info!(client_id = %client_id, uid = ?uid, "Control client connected");
                    self.handle_client(stream, client_id).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();

        {
            let mut clients = self.clients.write().await;
            clients.insert(client_id.clone(), ClientHandle { response_tx });
        }

        // Reader task: parse NDJSON requests and forward them
        let message_tx = self.message_tx.clone();
        let reader_client_id = client_id.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(client_id = %reader_client_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Request>(line) {
                            Ok(request) => {
                                let _ = message_tx.send(ServerMessage::Request {
                                    client_id: reader_client_id.clone(),
                                    request,
                                });
                            }
                            Err(e) => {
                                warn!(
                                    client_id = %reader_client_id,
                                    error = %e,
                                    "Invalid request"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        debug!(client_id = %reader_client_id, error = %e, "Read error");
                        break;
                    }
                }
            }

            let _ = message_tx.send(ServerMessage::ClientDisconnected {
                client_id: reader_client_id,
            });
        });

        // Writer task: drain responses to the socket
        let clients = self.clients.clone();
        let writer_client_id = client_id;
        tokio::spawn(async move {
            let mut writer = write_half;

            while let Some(response) = response_rx.recv().await {
                let mut msg = response;
                msg.push('\n');
                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                    debug!(client_id = %writer_client_id, error = %e, "Write error");
                    break;
                }
            }

            let mut clients = clients.write().await;
            clients.remove(&writer_client_id);
        });
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Drop a client's write side
    pub async fn forget_client(&self, client_id: &ClientId) {
        self.clients.write().await.remove(client_id);
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Get peer UID from a unix socket
fn peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();
    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}

/// Only root or the daemon's own user may drive the control channel
fn is_privileged(uid: Option<u32>) -> bool {
    match uid {
        Some(0) => true,
        Some(uid) => uid == nix::unistd::getuid().as_raw(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn server_start_creates_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();

        assert!(socket_path.exists());

        let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        std::fs::write(&socket_path, b"stale").unwrap();

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();
        assert!(socket_path.exists());
    }

    #[test]
    fn own_uid_is_privileged() {
        assert!(is_privileged(Some(0)));
        assert!(is_privileged(Some(nix::unistd::getuid().as_raw())));
        assert!(!is_privileged(None));
    }
}
