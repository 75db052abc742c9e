//! Transport layer for MCP JSON-RPC communication.
//!
//! MCP uses newline-delimited JSON over stdin/stdout. Reading and writing are
//! split so that tool calls can finish out of order: every response goes
//! through one writer task and lines never interleave.

use std::io;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Message that can be received from the client.
#[derive(Debug)]
pub enum IncomingMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

/// Parse one line of input.
///
/// Lines that are neither a request nor a notification fail with
/// `InvalidData`.
pub fn parse_message(line: &str) -> io::Result<IncomingMessage> {
    // A request has an id; try it first.
    if let Ok(request) = serde_json::from_str::<JsonRpcRequest>(line) {
        return Ok(IncomingMessage::Request(request));
    }
    if let Ok(notification) = serde_json::from_str::<JsonRpcNotification>(line) {
        return Ok(IncomingMessage::Notification(notification));
    }

    tracing::warn!("Failed to parse message: {}", line);
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Invalid JSON-RPC message: {}", line),
    ))
}

/// Reads JSON-RPC messages, one per line.
pub struct MessageReader<R> {
    lines: Lines<R>,
}

impl MessageReader<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next message, skipping blank lines. `Ok(None)` means EOF.
    pub async fn read_message(&mut self) -> io::Result<Option<IncomingMessage>> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            tracing::debug!("Received: {}", line);
            return parse_message(line).map(Some);
        }
        Ok(None)
    }
}

/// Writes JSON-RPC messages, one per line.
pub struct MessageWriter<W> {
    writer: W,
}

impl MessageWriter<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a JSON-RPC response to the transport.
    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        let json = serde_json::to_string(response).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Serialization error: {}", e),
            )
        })?;
        tracing::debug!("Sending: {}", json);
        self.write_line(json).await
    }

    async fn write_line(&mut self, mut json: String) -> io::Result<()> {
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Move the writer onto its own task.
///
/// The task ends once every sender is dropped and the queue is drained, or on
/// the first write failure. It hands the writer back when it ends.
pub fn spawn_writer<W>(
    mut writer: MessageWriter<W>,
) -> (mpsc::UnboundedSender<JsonRpcResponse>, JoinHandle<MessageWriter<W>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
    let task = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            if let Err(e) = writer.write_response(&response).await {
                tracing::error!("Failed to write response: {}", e);
                break;
            }
        }
        writer
    });
    (tx, task)
}
