//! Standard input/output transport.

use super::connection::serve_connection;
use crate::error::Result;
use crate::protocol::SessionStats;
use crate::server::Server;

/// Serve one session over stdin/stdout until stdin closes
pub async fn serve_stdio(server: &Server) -> Result<SessionStats> {
    tracing::info!("Serving on stdio");
    serve_connection(tokio::io::stdin(), tokio::io::stdout(), server).await
}
