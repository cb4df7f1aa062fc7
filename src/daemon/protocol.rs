// Line-delimited JSON protocol spoken by `meld serve`

use crate::error::{MeldError, Result};
use crate::retrieval::SearchRequest;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum request line size (1MB)
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Commands accepted on stdin, one JSON object per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Run a search
    Search { request: SearchRequest },
    /// Report system status
    Status,
    /// Re-read the config file
    Reload,
    /// Deep-merge a partial config
    UpdateConfig { config: serde_json::Value },
    /// Drain in-flight requests and exit
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeRequest {
    /// Echoed back on the response; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub command: Command,
}

/// Response written to stdout, one JSON object per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeResponse {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ServeResponse {
    pub fn success(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn success_with_data(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Parse one request line
pub fn parse_request(line: &str) -> Result<ServeRequest> {
    if line.len() > MAX_LINE_SIZE {
        return Err(MeldError::InvalidRequest(format!(
            "Request too large: {} bytes (max: {})",
            line.len(),
            MAX_LINE_SIZE
        )));
    }

    serde_json::from_str(line).map_err(|e| MeldError::Json {
        source: e,
        context: "Failed to parse request".to_string(),
    })
}

/// One line read by [`RequestReader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestLine {
    Line(String),
    /// Longer than [`MAX_LINE_SIZE`]; only the length is kept
    Oversized(usize),
}

/// Newline-delimited reader that buffers at most `MAX_LINE_SIZE + 1` bytes
/// of a line and discards the rest up to the next newline.
///
/// Cancel safe: a partly read line stays buffered across calls, so it can
/// be polled from `tokio::select!`.
pub struct RequestReader<R> {
    reader: R,
    line: Vec<u8>,
    seen: usize,
}

impl<R: AsyncBufRead + Unpin> RequestReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            seen: 0,
        }
    }

    /// Next line without its terminator, or `None` at EOF
    pub async fn next_line(&mut self) -> std::io::Result<Option<RequestLine>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.seen == 0 {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            let newline = available.iter().position(|b| *b == b'\n');
            let chunk = &available[..newline.unwrap_or(available.len())];
            let room = (MAX_LINE_SIZE + 1).saturating_sub(self.line.len());
            self.line.extend_from_slice(&chunk[..chunk.len().min(room)]);
            self.seen += chunk.len();

            let used = newline.map_or(chunk.len(), |i| i + 1);
            self.reader.consume(used);
            if newline.is_some() {
                return Ok(Some(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> RequestLine {
        let seen = std::mem::take(&mut self.seen);
        let mut line = std::mem::take(&mut self.line);
        if seen > MAX_LINE_SIZE {
            return RequestLine::Oversized(seen);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        RequestLine::Line(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Write one response line and flush
pub async fn write_response<W>(writer: &mut W, response: &ServeResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut payload = serde_json::to_vec(response).map_err(|e| MeldError::Json {
        source: e,
        context: "Failed to serialize response".to_string(),
    })?;
    payload.push(b'\n');

    writer.write_all(&payload).await.map_err(|e| MeldError::Io {
        source: e,
        context: "Failed to write response".to_string(),
    })?;
    writer.flush().await.map_err(|e| MeldError::Io {
        source: e,
        context: "Failed to flush response".to_string(),
    })?;

    Ok(())
}
