//! IPC client implementation
//!
//! Used by the CLI front-end and by integration tests.

use std::path::Path;
use taviblock_api::{Command, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// Client for the taviblockd control channel
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    /// Connect to taviblockd
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        })
    }

    /// Send a command and wait for its response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;

        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        let response: Response = serde_json::from_str(line.trim())?;
        Ok(response)
    }
}
