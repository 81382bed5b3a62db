//! Unix-domain socket transport.

use std::path::{Path, PathBuf};

use tokio::net::UnixListener;

use super::connection::serve_connection;
use crate::error::{Result, ServerError};
use crate::protocol::SessionStats;
use crate::server::Server;

/// Removes the socket file when dropped
struct SocketGuard(PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Listen on `path`, serve the first client, then remove the socket.
///
/// A stale socket file left by an earlier run is replaced.
pub async fn serve_pipe(server: &Server, path: &Path) -> Result<SessionStats> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| {
            ServerError::Transport(format!("Failed to remove stale socket {}: {e}", path.display()))
        })?;
    }

    let listener = UnixListener::bind(path).map_err(|e| {
        ServerError::Transport(format!("Failed to bind {}: {e}", path.display()))
    })?;
    let _guard = SocketGuard(path.to_path_buf());
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    tracing::info!("Pipe transport listening on {}", path.display());

    let (stream, _) = listener
        .accept()
        .await
        .map_err(|e| ServerError::Transport(format!("Failed to accept connection: {e}")))?;
    tracing::info!("Client connected");

    let (reader, writer) = stream.into_split();
    serve_connection(reader, writer, server).await
}
