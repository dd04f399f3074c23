//! Socket Server (C9): accepts stream connections on a Unix-domain socket,
//! frames NDJSON in both directions, and routes inbound commands to the
//! dispatcher while relaying outbound responses and broadcaster events.
//!
//! The teacher has no Unix-socket server of its own (a Tauri desktop app
//! talks to its frontend over Tauri's own IPC channel). Grounded instead on
//! this pack's closest analog for *shape* —
//! `CambrianTech-continuum`'s `continuum-core/src/ipc/mod.rs`
//! (`start_server`/`handle_client`: stale-socket-file cleanup on listen,
//! one reader + one serialized writer per connection) — but built on
//! `tokio::net::UnixListener`/`UnixStream` with NDJSON line framing rather
//! than that file's synchronous-thread, length-prefixed binary framing,
//! since tokio is this workspace's established async runtime (carried
//! from the teacher) and `spec.md` §4.7 calls for NDJSON specifically.

use std::path::Path;
use std::sync::Arc;

use steno_core::dispatcher::CommandDispatcher;
use steno_core::wire::{Command, Response};
use steno_core::EventBroadcaster;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bound on one NDJSON line (`spec.md` §4.7 "reference: 1 MiB").
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Outbound queue depth per connection: responses plus forwarded broadcast
/// events share this one channel so the writer task sees a single ordered
/// stream (`spec.md` §4.7 "lines are never interleaved mid-line").
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

pub struct SocketServer {
    listener: UnixListener,
    dispatcher: Arc<CommandDispatcher>,
    broadcaster: EventBroadcaster,
}

impl SocketServer {
    /// Binds the listener at `socket_path`. If a socket file already exists
    /// there, it is removed unconditionally before binding.
    ///
    /// The stale-vs-live question (`spec.md` §6, S6 "Stale socket") is
    /// already resolved by the time this is called: the caller runs
    /// [`crate::pidfile::PidFile::acquire`] against the sibling PID file
    /// first, and `acquire` fails outright if that file names a live
    /// process. So by the time `bind` sees a leftover socket file, its
    /// owner (if the pid file named one at all) is already confirmed dead —
    /// re-checking staleness here would read the pid file *after* `acquire`
    /// has overwritten it with our own, now-live PID, which would always
    /// report "not stale" and wrongly refuse to start.
    pub fn bind(
        socket_path: &Path,
        dispatcher: Arc<CommandDispatcher>,
        broadcaster: EventBroadcaster,
    ) -> std::io::Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        restrict_permissions(socket_path)?;

        Ok(Self {
            listener,
            dispatcher,
            broadcaster,
        })
    }

    /// Accepts connections until cancelled. Each connection is handled on
    /// its own task; the listener itself never blocks on a slow client.
    pub async fn serve(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let client_id = Uuid::new_v4();
                            let dispatcher = Arc::clone(&self.dispatcher);
                            let broadcaster = self.broadcaster.clone();
                            connections.push(tokio::spawn(async move {
                                handle_connection(client_id, stream, dispatcher, broadcaster).await;
                            }));
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("socket server shutting down, closing listener");
                    break;
                }
            }
        }

        for handle in connections {
            handle.abort();
        }
    }
}

fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

async fn handle_connection(
    client_id: Uuid,
    stream: UnixStream,
    dispatcher: Arc<CommandDispatcher>,
    broadcaster: EventBroadcaster,
) {
    debug!(%client_id, "client connected");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (tx_out, mut rx_out) = mpsc::channel::<String>(OUTBOUND_CHANNEL_CAPACITY);

    let writer_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(line) = rx_out.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
            if write_half.flush().await.is_err() {
                break;
            }
        }
    });

    let mut forwarder_task: Option<JoinHandle<()>> = None;
    let mut line_buf: Vec<u8> = Vec::new();

    loop {
        line_buf.clear();
        match read_capped_line(&mut reader, &mut line_buf).await {
            Ok(None) => break, // EOF
            Ok(Some(_)) => {}
            Err(_) => break, // oversized line or I/O error: close the connection
        }

        let line = match std::str::from_utf8(&line_buf) {
            Ok(s) => s.trim_end_matches(['\n', '\r']),
            Err(_) => {
                let _ = tx_out.send(bad_command_line()).await;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let command: Command = match serde_json::from_str(line) {
            Ok(command) => command,
            Err(_) => {
                let _ = tx_out.send(bad_command_line()).await;
                continue;
            }
        };

        let outcome = dispatcher.dispatch(client_id, command).await;
        if let Ok(json) = serde_json::to_string(&outcome.response) {
            if tx_out.send(json).await.is_err() {
                break;
            }
        }

        if let Some(new_subscription) = outcome.new_subscription {
            if let Some(old) = forwarder_task.take() {
                old.abort();
            }
            let tx_out = tx_out.clone();
            forwarder_task = Some(tokio::spawn(async move {
                forward_events(new_subscription, tx_out).await;
            }));
        }
    }

    if let Some(task) = forwarder_task {
        task.abort();
    }
    broadcaster.unsubscribe(client_id);
    drop(tx_out);
    let _ = writer_task.await;
    debug!(%client_id, "client disconnected");
}

/// Relays broadcaster events for one subscription into the connection's
/// shared outbound channel. Ends when the subscription channel closes
/// (replaced by a newer `subscribe`) or the outbound channel is gone (the
/// connection is closing).
async fn forward_events(mut events: mpsc::Receiver<String>, tx_out: mpsc::Sender<String>) {
    while let Some(line) = events.recv().await {
        if tx_out.send(line).await.is_err() {
            break;
        }
    }
}

fn bad_command_line() -> String {
    serde_json::to_string(&Response::bad_command()).expect("bad_command response always encodes")
}

/// Reads one `\n`-terminated line, capped at [`MAX_LINE_BYTES`]. Returns
/// `Ok(None)` on clean EOF with no partial data, `Ok(Some(len))` on a
/// complete line (including the trailing `\n`), and `Err` if the line
/// exceeds the cap or the underlying read fails — either way the caller
/// closes the connection (`spec.md` §4.7 "messages exceeding the cap close
/// the connection").
async fn read_capped_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<usize>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if buf.is_empty() { None } else { Some(buf.len()) });
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            buf.extend_from_slice(&available[..=pos]);
            let consumed = pos + 1;
            reader.consume(consumed);
            return Ok(Some(buf.len()));
        }
        buf.extend_from_slice(available);
        let consumed = available.len();
        reader.consume(consumed);
        if buf.len() > MAX_LINE_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "line exceeds maximum length",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader as TokioBufReader;

    #[tokio::test]
    async fn reads_one_line_at_a_time() {
        let data = b"{\"cmd\":\"status\"}\n{\"cmd\":\"stop\"}\n".to_vec();
        let mut reader = TokioBufReader::new(Cursor::new(data));
        let mut buf = Vec::new();

        read_capped_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(buf, b"{\"cmd\":\"status\"}\n");

        buf.clear();
        read_capped_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(buf, b"{\"cmd\":\"stop\"}\n");

        buf.clear();
        let result = read_capped_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn oversized_line_is_rejected() {
        let mut data = vec![b'a'; MAX_LINE_BYTES + 10];
        data.push(b'\n');
        let mut reader = TokioBufReader::new(Cursor::new(data));
        let mut buf = Vec::new();

        let result = read_capped_line(&mut reader, &mut buf).await;
        assert!(result.is_err());
    }
}
