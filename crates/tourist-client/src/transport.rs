//! Line-framed transport over a `tourist serve` subprocess.
//!
//! The transport owns the child process and both of its pipes. Nothing else
//! reads or writes them. Each message is one line of JSON; serde_json never
//! emits a raw newline inside a compact document, so the newline is an
//! unambiguous frame terminator.

use crate::error::ClientError;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

/// Argument that puts the tourist binary into server mode.
pub const SERVE_ARG: &str = "serve";

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A bidirectional, newline-framed message stream.
pub struct Transport {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
    child: Option<Child>,
    closed: Option<String>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Spawn `<executable> serve` and talk to it over stdin/stdout.
    ///
    /// Must be called from within a Tokio runtime. The child is killed when
    /// the transport is dropped.
    pub fn spawn(executable: impl AsRef<Path>) -> Result<Self, ClientError> {
        let executable = executable.as_ref();
        let connection_error = |source| ClientError::Connection {
            path: executable.to_path_buf(),
            source,
        };

        let mut child = Command::new(executable)
            .arg(SERVE_ARG)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(connection_error)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| connection_error(std::io::Error::other("stdin was not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| connection_error(std::io::Error::other("stdout was not captured")))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        tracing::info!(
            "Spawned tourist server {} (pid {:?})",
            executable.display(),
            child.id()
        );

        let mut transport = Self::from_streams(stdout, stdin);
        transport.child = Some(child);
        Ok(transport)
    }

    /// Build a transport over an arbitrary reader/writer pair.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader)),
            writer: Box::new(writer),
            child: None,
            closed: None,
        }
    }

    /// Write one frame: `payload` followed by a single newline.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        self.ensure_open()?;
        if payload.contains(&b'\n') {
            return Err(ClientError::InvalidFrame);
        }

        if let Err(e) = self.write_frame(payload).await {
            let reason = format!("write failed: {e}");
            return Err(self.fail(reason));
        }
        Ok(())
    }

    /// Wait for the next complete line from the server.
    ///
    /// Blank lines are skipped. Cancelling this future may drop a partially
    /// read line, so callers that give up on a read must close the transport.
    ///
    /// A child that has already exited is not an error yet: its last lines may
    /// still be buffered in the pipe. EOF decides.
    pub async fn receive_one(&mut self) -> Result<String, ClientError> {
        self.check_closed()?;
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line).await {
                Ok(0) => {
                    let reason = self.eof_reason();
                    return Err(self.fail(reason));
                }
                Ok(_) => {
                    let line = line.trim_end_matches(&['\r', '\n'][..]);
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Ok(line.to_string());
                }
                Err(e) => {
                    let reason = format!("read failed: {e}");
                    return Err(self.fail(reason));
                }
            }
        }
    }

    /// Shut the stream down and kill the child, if any.
    pub async fn close(&mut self, reason: impl Into<String>) {
        if self.closed.is_some() {
            return;
        }
        let reason = reason.into();
        tracing::info!("Closing tourist transport: {}", reason);
        let _ = self.writer.shutdown().await;
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        self.closed = Some(reason);
    }

    /// Whether the transport has been closed, by either side.
    pub const fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Whether the child process has already exited.
    ///
    /// Always false for transports built with [`Transport::from_streams`].
    pub fn child_exited(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(Some(_))))
    }

    async fn write_frame(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(payload).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    fn check_closed(&self) -> Result<(), ClientError> {
        match &self.closed {
            Some(reason) => Err(ClientError::TransportClosed(reason.clone())),
            None => Ok(()),
        }
    }

    fn ensure_open(&mut self) -> Result<(), ClientError> {
        self.check_closed()?;
        if self.child_exited() {
            let reason = self.eof_reason();
            return Err(self.fail(reason));
        }
        Ok(())
    }

    fn eof_reason(&mut self) -> String {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(Some(status))) => format!("server exited ({status})"),
            _ => "server closed its output stream".to_string(),
        }
    }

    fn fail(&mut self, reason: String) -> ClientError {
        tracing::warn!("Tourist transport failed: {}", reason);
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        self.closed = Some(reason.clone());
        ClientError::TransportClosed(reason)
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "tourist_client::server", "{}", line);
    }
}
