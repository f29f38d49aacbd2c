//! Output relay.
//!
//! Reads one of the child's pipes line by line and forwards every non-blank
//! line as a `StreamEvent` to the lifecycle coordinator.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::{OutputKind, StreamEvent};

/// Decode one raw line: lossy UTF-8, trailing `\n`/`\r\n` removed, blank
/// lines dropped.
fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches('\n').trim_end_matches('\r');
    if line.trim().is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

/// Spawn a task that relays `reader` into `tx` until EOF, a read error, or
/// the coordinator hanging up.
pub fn spawn_relay<R>(reader: R, kind: OutputKind, tx: mpsc::Sender<StreamEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(relay(reader, kind, tx))
}

async fn relay<R>(reader: R, kind: OutputKind, tx: mpsc::Sender<StreamEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(stream = %kind, error = %e, "Failed to read test output");
                break;
            }
        }
        let Some(line) = decode_line(&buf) else {
            continue;
        };
        if tx.send(kind.event(line)).await.is_err() {
            debug!(stream = %kind, "Coordinator gone, dropping output");
            return;
        }
    }
}
