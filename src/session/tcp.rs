//! Reference transport binding: newline-delimited JSON over TCP.
//!
//! One JSON object per line in both directions. The first line of a
//! connection must be the open frame `{"room": "...", "token": "..."}`;
//! everything after is [`ClientFrame`]s in and events/control frames out.
//! This adapter only pumps bytes and enforces the write deadline — all
//! session semantics live in [`run_session`](super::run_session), so a
//! streaming-RPC binding of the same contract is a second thin adapter,
//! not a second implementation.

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::{run_session, ClientFrame, ServerFrame, SessionDeps, SessionError, SessionOpen};
use crate::logutil::escape_log;

/// Buffered frames between the socket tasks and the session loop.
const CHANNEL_DEPTH: usize = 64;

/// Serve one TCP connection until the session ends or the peer goes away.
pub async fn serve_connection(stream: TcpStream, deps: SessionDeps) -> Result<(), SessionError> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // The open frame must arrive within the read deadline.
    let open: SessionOpen = match tokio::time::timeout(deps.config.read_deadline, lines.next_line())
        .await
    {
        Ok(Ok(Some(line))) => match serde_json::from_str(&line) {
            Ok(open) => open,
            Err(e) => {
                debug!("{peer}: malformed open frame: {e}");
                let _ = write_half
                    .write_all(b"{\"kind\":\"BYE\",\"payload\":{\"reason\":\"bad-open-frame\"}}\n")
                    .await;
                return Err(SessionError::AuthRejected);
            }
        },
        _ => {
            debug!("{peer}: no open frame");
            return Err(SessionError::PeerGone);
        }
    };

    let (in_tx, in_rx) = mpsc::channel::<ClientFrame>(CHANNEL_DEPTH);
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(CHANNEL_DEPTH);

    // Reader: socket lines → parsed frames. Malformed lines are reported
    // to the peer and skipped.
    let reader_out = out_tx.clone();
    let reader = tokio::spawn(async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ClientFrame>(&line) {
                        Ok(frame) => {
                            if in_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("malformed frame ({e}): {}", escape_log(&line));
                            let refusal = ServerFrame::Control(super::ControlFrame::Error {
                                code: "INTERNAL_FAULT".to_string(),
                                message: format!("malformed frame: {e}"),
                            });
                            if reader_out.send(refusal).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    });

    // Writer: frames → socket lines, each bounded by the write deadline.
    let write_deadline = deps.config.write_deadline;
    let writer_peer = peer.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let mut line = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    warn!("{writer_peer}: unserializable frame: {e}");
                    continue;
                }
            };
            line.push('\n');
            match tokio::time::timeout(write_deadline, write_half.write_all(line.as_bytes())).await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("{writer_peer}: write failed: {e}");
                    break;
                }
                Err(_) => {
                    warn!("{writer_peer}: write deadline exceeded, closing");
                    break;
                }
            }
        }
        let _ = write_half.shutdown().await;
    });

    let result = run_session(open, in_rx, out_tx, deps).await;

    // The session is done. Stop the reader first — it holds an outbound
    // sender — so the writer can drain its queue and exit.
    reader.abort();
    let _ = writer.await;
    debug!("{peer}: connection closed");
    result
}
