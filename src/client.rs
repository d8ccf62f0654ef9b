//! Unix socket client for the relay daemon.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use serde_json::Value;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::daemon::protocol::{Request, Response};

/// Errors that can occur when communicating with the daemon.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Daemon not running (no socket at {0})")]
    SocketNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    SerializeError(#[source] serde_json::Error),

    #[error("JSON parse error: {0}")]
    ParseError(#[source] serde_json::Error),

    #[error("Empty response from daemon")]
    EmptyResponse,

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("{code}: {message}")]
    Remote { code: String, message: String },
}

impl ClientError {
    /// Stable code for JSON error output.
    pub fn code(&self) -> &str {
        match self {
            ClientError::SocketNotFound(_) => "DAEMON_NOT_RUNNING",
            ClientError::ConnectionFailed(_) => "CONNECT_FAILED",
            ClientError::SerializeError(_) => "SERIALIZE_ERROR",
            ClientError::ParseError(_) => "PARSE_ERROR",
            ClientError::EmptyResponse => "EMPTY_RESPONSE",
            ClientError::Timeout => "TIMEOUT",
            ClientError::Remote { code, .. } => code,
        }
    }
}

/// A client for the relay daemon.
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    /// Send a request to the daemon and receive its raw response.
    pub fn call(&self, request: &Request) -> Result<Response, ClientError> {
        let path = Path::new(&self.socket_path);
        if !path.exists() {
            return Err(ClientError::SocketNotFound(path.display().to_string()));
        }

        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut writer = &stream;
        let json = serde_json::to_string(request).map_err(ClientError::SerializeError)?;
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        let mut reader = BufReader::new(&stream);
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => ClientError::Timeout,
            _ => ClientError::ConnectionFailed(e),
        })?;

        if bytes_read == 0 {
            return Err(ClientError::EmptyResponse);
        }

        serde_json::from_str(&line).map_err(ClientError::ParseError)
    }

    /// Call `method` and unwrap the result, turning daemon errors into `Remote`.
    pub fn request(&self, method: &str, params: HashMap<String, Value>) -> Result<Value, ClientError> {
        let response = self.call(&Request::new(method, params))?;
        if response.ok {
            return Ok(response.result.unwrap_or(Value::Null));
        }
        let (code, message) = response
            .error
            .map(|e| (e.code, e.message))
            .unwrap_or_else(|| ("ERROR".to_string(), "unknown error".to_string()));
        Err(ClientError::Remote { code, message })
    }
}
