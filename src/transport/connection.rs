//! One framed connection driving one session worker.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::framing::{encode_frame, FrameDecoder};
use crate::error::{Result, ServerError};
use crate::protocol::{ServerMessage, SessionStats};
use crate::server::Server;

/// Serve a session over a reader/writer pair until the reader hits EOF.
///
/// Outbound messages are written in the order the worker queued them.
pub async fn serve_connection<R, W>(reader: R, writer: W, server: &Server) -> Result<SessionStats>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (handle, outbound) = server.start();
    let writer_task = tokio::spawn(write_frames(writer, outbound));

    let mut lines = BufReader::new(reader).lines();
    let mut decoder = FrameDecoder::new();
    let read_result: Result<()> = async {
        while let Some(line) = lines.next_line().await? {
            if let Some(frame) = decoder.push_line(&line) {
                handle.submit(frame).await?;
            }
        }
        Ok(())
    }
    .await;

    if decoder.in_frame() {
        tracing::warn!(session = handle.session_id(), "Connection closed inside a frame");
    }

    let stats = handle.shutdown().await?;
    let write_result = writer_task
        .await
        .map_err(|e| ServerError::Transport(format!("writer task failed: {e}")))?;

    read_result?;
    write_result?;
    Ok(stats)
}

async fn write_frames<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(
                    kind = message.kind(),
                    error = %err,
                    "Dropping unencodable message"
                );
                continue;
            },
        };
        writer.write_all(encode_frame(&json).as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
