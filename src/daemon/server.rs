//! UNIX socket server for daemon mode.
//!
//! Listens on a UNIX socket, accepts connections, and dispatches one NDJSON
//! request per connection to DaemonService.
//!
//! CHANGELOG:
//! - 10/19/2026 - Async accept loop; connections handled concurrently
//! - 01/10/2026 - Initial implementation (Phase 4C)

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::daemon::protocol::{self, codes};
use crate::daemon::service::DaemonService;

/// Daemon server listening on UNIX socket.
pub struct DaemonServer {
    service: Arc<DaemonService>,
    socket_path: PathBuf,
}

impl DaemonServer {
    pub fn new(service: DaemonService, socket_path: impl AsRef<Path>) -> Self {
        Self {
            service: Arc::new(service),
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub fn service(&self) -> &Arc<DaemonService> {
        &self.service
    }

    /// Bind the socket (owner-only) and serve until `shutdown` fires.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<()> {
        // Clean up stale socket
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind {}", self.socket_path.display()))?;

        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(socket = %self.socket_path.display(), "daemon listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let service = self.service.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&service, stream).await {
                                warn!(error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                },
            }
        }

        info!("daemon shutting down");
        self.service.shutdown();
        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

/// Handle a single client connection.
async fn handle_connection(service: &DaemonService, stream: UnixStream) -> Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Read NDJSON request (one line)
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    if line.trim().is_empty() {
        return Ok(()); // Client disconnected
    }

    let start = Instant::now();
    let elapsed_ms = |start: Instant| start.elapsed().as_secs_f64() * 1000.0;

    let response = match protocol::Request::from_ndjson_line(&line) {
        Ok(request) => {
            debug!(method = %request.method, id = %request.id, "request");
            match service.dispatch(&request.method, request.params).await {
                Ok(result) => protocol::Response::success(request.id, result, elapsed_ms(start)),
                Err(e) => protocol::Response::error(
                    request.id,
                    e.code(),
                    e.to_string(),
                    elapsed_ms(start),
                ),
            }
        }
        Err(e) => protocol::Response::error(
            String::new(),
            codes::PARSE_ERROR,
            format!("{:#}", e),
            elapsed_ms(start),
        ),
    };

    // Send NDJSON response
    let response_line = response.to_ndjson_line()?;
    writer.write_all(response_line.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}
