//! Worker task owning a session.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::config::ServerConfig;
use crate::engine::SharedEngineFactory;
use crate::error::{Result, ServerError};
use crate::protocol::{Outbox, ServerMessage, Session, SessionStats};

/// Spawns one worker per connection
#[derive(Clone)]
pub struct Server {
    config: ServerConfig,
    factory: SharedEngineFactory,
}

impl Server {
    /// Create a server building engines with `factory`
    pub fn new(config: ServerConfig, factory: SharedEngineFactory) -> Self {
        Self { config, factory }
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start a worker for a new connection.
    ///
    /// The hello greeting is the first outbound message. The outbound
    /// receiver closes once the worker has stopped.
    pub fn start(&self) -> (ServerHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let (outbox, outbound) = Outbox::channel();
        let (tx, rx) = mpsc::channel::<String>(self.config.queue_depth.max(1));

        let session = Session::new(outbox, self.factory.clone())
            .with_experimental(self.config.experimental);
        let session_id = session.id().to_string();
        tracing::info!(
            session = %session_id,
            experimental = self.config.experimental,
            "Starting session worker"
        );

        let worker = tokio::task::spawn_blocking(move || run_worker(session, rx));
        (
            ServerHandle {
                tx,
                worker,
                session_id,
            },
            outbound,
        )
    }
}

/// Drains the request queue sequentially until every sender is gone
fn run_worker(mut session: Session, mut rx: mpsc::Receiver<String>) -> SessionStats {
    session.hello();
    while let Some(frame) = rx.blocking_recv() {
        session.dispatch_json(&frame);
    }
    let stats = session.stats();
    tracing::info!(
        session = %stats.session_id,
        requests = stats.requests_received,
        errors = stats.errors_sent,
        "Session worker stopped"
    );
    stats
}

/// Feeds one connection's worker
pub struct ServerHandle {
    tx: mpsc::Sender<String>,
    worker: JoinHandle<SessionStats>,
    session_id: String,
}

impl ServerHandle {
    /// ID of the session this worker owns
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue one raw request frame, waiting while the queue is full
    pub async fn submit(&self, frame: String) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| ServerError::Transport("session worker has stopped".into()))
    }

    /// Close the queue and wait for the worker to finish pending requests
    pub async fn shutdown(self) -> Result<SessionStats> {
        drop(self.tx);
        self.worker
            .await
            .map_err(|e| ServerError::Transport(format!("session worker failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::engine::FilesystemEngineFactory;

    async fn drain(mut rx: mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_requests_are_answered_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("CMakeLists.txt"),
            "project(P)\ninclude(extra.cmake)\nadd_executable(p p.c)\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("extra.cmake"), "\n").unwrap();

        let server = Server::new(ServerConfig::default(), Arc::new(FilesystemEngineFactory));
        let (handle, outbound) = server.start();

        let handshake = json!({
            "type": "handshake",
            "cookie": "1",
            "protocolVersion": {"major": 1, "minor": 0},
            "sourceDirectory": tmp.path().display().to_string(),
            "buildDirectory": tmp.path().join("build").display().to_string(),
        });
        handle.submit(handshake.to_string()).await.unwrap();
        handle
            .submit(r#"{"type":"configure","cookie":"2"}"#.into())
            .await
            .unwrap();
        handle
            .submit(r#"{"type":"compute","cookie":"3"}"#.into())
            .await
            .unwrap();

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.requests_received, 3);
        assert_eq!(stats.errors_sent, 0);

        let sent = drain(outbound).await;
        assert_eq!(sent[0].kind(), "hello");

        let terminal: Vec<&str> = sent
            .iter()
            .filter(|m| m.is_terminal())
            .map(ServerMessage::cookie)
            .collect();
        assert_eq!(terminal, vec!["1", "2", "3"]);

        // Reports for a request come before its reply and after the previous reply.
        let configure_reply = sent
            .iter()
            .position(|m| m.is_terminal() && m.cookie() == "2")
            .unwrap();
        let handshake_reply = sent
            .iter()
            .position(|m| m.is_terminal() && m.cookie() == "1")
            .unwrap();
        for (i, msg) in sent.iter().enumerate() {
            if msg.kind() == "progress" && msg.cookie() == "2" {
                assert!(handshake_reply < i && i < configure_reply);
            }
        }
        assert!(sent.iter().any(|m| m.kind() == "progress" && m.cookie() == "2"));
    }

    #[tokio::test]
    async fn test_closed_outbound_does_not_stop_worker() {
        let server = Server::new(
            ServerConfig::default().with_queue_depth(1),
            Arc::new(FilesystemEngineFactory),
        );
        let (handle, outbound) = server.start();
        drop(outbound);
        handle.submit("{}".into()).await.unwrap();
        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.requests_received, 1);
        assert_eq!(stats.errors_sent, 1);
    }
}
