//! Per-session worker: delivers queued commands and collects replies

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use muster_shared::transfer::{self, TransferDecoder};
use muster_shared::{is_download_command, is_quit_command, limits, timing, GREETING};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::connection::Session;

/// Worker that owns one session's connection traffic.
///
/// Runs until the session disconnects or the server shuts down. All I/O
/// faults are absorbed here: they mark the session disconnected and never
/// propagate to the operator side.
pub struct SessionHandler {
    session: Arc<Session>,
    command_rx: mpsc::UnboundedReceiver<String>,
    running: Arc<AtomicBool>,
    download_dir: PathBuf,
}

impl SessionHandler {
    /// Create a handler over a freshly registered session
    pub fn new(
        session: Arc<Session>,
        command_rx: mpsc::UnboundedReceiver<String>,
        running: Arc<AtomicBool>,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            session,
            command_rx,
            running,
            download_dir,
        }
    }

    /// Run the session loop to completion
    pub async fn run(mut self) {
        {
            let mut stream = self.session.stream.lock().await;
            if let Err(e) = stream.write_all(GREETING).await {
                warn!("client {}: greeting failed: {}", self.session.id, e);
                self.session.mark_disconnected();
                return;
            }
        }
        self.session.touch().await;

        let command_poll = Duration::from_millis(timing::COMMAND_POLL_MS);
        let idle_probe = Duration::from_secs(timing::IDLE_PROBE_SECS);

        while self.session.is_connected() && self.running.load(Ordering::SeqCst) {
            match timeout(command_poll, self.command_rx.recv()).await {
                Ok(Some(cmd)) => self.process_command(&cmd).await,
                Ok(None) => break,
                Err(_) => {
                    if self.session.idle_for().await > idle_probe && !self.probe().await {
                        debug!("client {}: liveness probe failed", self.session.id);
                        self.session.mark_disconnected();
                    }
                }
            }
        }

        if !self.running.load(Ordering::SeqCst) {
            // Global shutdown: the handler releases its own socket instead
            // of waiting for a sweep that may never run.
            self.session.mark_disconnected();
            self.session.close().await;
        }
    }

    /// Deliver one command and collect whatever it produces
    async fn process_command(&mut self, cmd: &str) {
        {
            let mut stream = self.session.stream.lock().await;
            if let Err(e) = stream.write_all(cmd.as_bytes()).await {
                warn!("client {}: command write failed: {}", self.session.id, e);
                self.session.mark_disconnected();
                return;
            }
        }
        self.session.touch().await;

        if is_quit_command(cmd) {
            // The agent terminates without replying; retire the session.
            self.session.mark_disconnected();
            return;
        }

        let response = if is_download_command(cmd) {
            self.handle_download(cmd).await
        } else {
            self.read_reply().await
        };
        self.session.push_response(response);
    }

    /// Single bounded read of a plain reply
    async fn read_reply(&self) -> String {
        let mut buf = vec![0u8; limits::PLAIN_REPLY_MAX];
        let mut stream = self.session.stream.lock().await;

        match stream.read(&mut buf).await {
            Ok(0) => {
                self.session.mark_disconnected();
                "[-] Connection lost".into()
            }
            Ok(n) => {
                drop(stream);
                self.session.touch().await;
                String::from_utf8_lossy(&buf[..n]).into_owned()
            }
            Err(e) => {
                warn!("client {}: reply read failed: {}", self.session.id, e);
                self.session.mark_disconnected();
                "[-] Connection lost".into()
            }
        }
    }

    /// Run the file-retrieval sub-protocol after a download command.
    ///
    /// The first read must be the start token; anything else is the agent's
    /// error message and becomes the response verbatim. Chunks stream into
    /// a local file named from the session id and the requested base name
    /// until the end sentinel shows up.
    async fn handle_download(&self, cmd: &str) -> String {
        let mut first = vec![0u8; limits::PLAIN_REPLY_MAX];
        let mut stream = self.session.stream.lock().await;

        let n = match stream.read(&mut first).await {
            Ok(0) | Err(_) => {
                self.session.mark_disconnected();
                return "[-] Connection lost during file transfer".into();
            }
            Ok(n) => n,
        };

        if let Err(refusal) = transfer::check_start(&first[..n]) {
            drop(stream);
            self.session.touch().await;
            return format!("[-] {}", refusal);
        }

        let file_name = requested_file_name(cmd);
        let path = self
            .download_dir
            .join(format!("client_{}_{}", self.session.id, file_name));

        let mut file = match File::create(&path).await {
            Ok(file) => file,
            Err(e) => {
                // The agent keeps streaming into a connection nobody will
                // drain; retire the session rather than resynchronize.
                self.session.mark_disconnected();
                return format!("[-] Failed to create {}: {}", path.display(), e);
            }
        };

        let mut decoder = TransferDecoder::new();
        let mut chunk = vec![0u8; limits::TRANSFER_CHUNK_SIZE];
        loop {
            let n = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => {
                    self.session.mark_disconnected();
                    return "[-] Connection lost during file transfer".into();
                }
                Ok(n) => n,
            };

            let step = decoder.push(&chunk[..n]);
            if let Err(e) = file.write_all(&step.data).await {
                self.session.mark_disconnected();
                return format!("[-] Failed to write {}: {}", path.display(), e);
            }
            if step.complete {
                break;
            }
        }
        drop(stream);

        if let Err(e) = file.flush().await {
            self.session.mark_disconnected();
            return format!("[-] Failed to write {}: {}", path.display(), e);
        }
        self.session.touch().await;

        format!("[+] File {} downloaded successfully", file_name)
    }

    /// Zero-length write to check the connection while idle.
    ///
    /// Surfaces an abrupt peer reset; a graceful close while idle goes
    /// unnoticed until the next exchange.
    async fn probe(&self) -> bool {
        let mut stream = self.session.stream.lock().await;
        match stream.write(&[]).await {
            Ok(_) => {
                drop(stream);
                self.session.touch().await;
                true
            }
            Err(_) => false,
        }
    }
}

/// Base name of the requested path, for naming the local copy
fn requested_file_name(cmd: &str) -> String {
    let arg = cmd
        .strip_prefix(muster_shared::DOWNLOAD_PREFIX)
        .unwrap_or(cmd)
        .trim();
    Path::new(arg)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".into())
}
