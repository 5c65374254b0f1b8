//! External process runner
//!
//! Runs a user script with arguments, optional stdin and extra environment
//! variables, and returns everything it printed to stdout.
//!
//! # Lingering descendants
//! A script may fork a long-lived process that inherits its stdout/stderr
//! pipes and then exit. Reading those pipes to end-of-stream would then block
//! for as long as the descendant lives. To avoid that, both pipes are drained
//! by background tasks into shared buffers while the runner waits for the
//! immediate child to exit. After the exit the runner gives the readers a
//! short grace period to pick up what is still buffered in the pipe, then
//! returns whatever was captured. Waiting is always raced against the
//! cancellation token and the per-call timeout.

use anki_helper_common::human_time::format_duration;
use std::collections::BTreeMap;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Time allowed for draining pipes after the process exited
const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Process execution errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable could not be started
    #[error("Failed to start {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The process exited unsuccessfully; `stderr` holds what it printed
    #[error("Process exited with {status}\nScript stderr:\n{stderr}")]
    Exit { status: String, stderr: String },

    #[error("Process timed out after {}", format_duration(*.0))]
    TimedOut(Duration),

    #[error("Process execution cancelled")]
    Cancelled,

    #[error("I/O error while running process: {0}")]
    Io(#[from] io::Error),
}

/// Everything needed to start one script execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessParams {
    pub command: String,
    pub args: Vec<String>,
    /// Payload written to the process stdin; `None` connects stdin to null
    pub stdin: Option<String>,
    /// Extra variables merged over the inherited environment
    pub env: BTreeMap<String, String>,
}

impl ProcessParams {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Command line for log output: `cmd 'arg1' 'arg2'`
    pub fn display_command_line(&self) -> String {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push_str(" '");
            line.push_str(arg);
            line.push('\'');
        }
        line
    }
}

/// Executes scripts on behalf of the note processor
#[async_trait::async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Run the process and return its stdout. `None` timeout means no deadline.
    async fn execute(
        &self,
        params: &ProcessParams,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ProcessError>;
}

/// [`ScriptExecutor`] spawning real operating system processes
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    cancel: CancellationToken,
    drain_grace: Duration,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Runner whose executions are all cancelled when `cancel` fires
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    pub fn with_drain_grace(mut self, drain_grace: Duration) -> Self {
        self.drain_grace = drain_grace;
        self
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ScriptExecutor for ProcessRunner {
    async fn execute(
        &self,
        params: &ProcessParams,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ProcessError> {
        run_and_collect_output(params, timeout, &self.cancel, self.drain_grace).await
    }
}

/// Run a process to completion and collect its stdout.
///
/// Returns promptly once the immediate child exits, even if a descendant
/// keeps the output pipes open. On timeout or cancellation the child is
/// killed and the call returns without waiting for descendants.
pub async fn run_and_collect_output(
    params: &ProcessParams,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    drain_grace: Duration,
) -> Result<Vec<u8>, ProcessError> {
    let mut command = Command::new(&params.command);
    command
        .args(&params.args)
        .envs(&params.env)
        .stdin(if params.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        command: params.command.clone(),
        source,
    })?;

    let stdout = OutputCapture::spawn(child.stdout.take());
    let stderr = OutputCapture::spawn(child.stderr.take());

    if let (Some(input), Some(mut pipe)) = (params.stdin.clone(), child.stdin.take()) {
        // Written in the background: the script may exit without reading it
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                debug!(error = %e, "Failed to write process stdin");
            }
        });
    }

    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let timed_out = || ProcessError::TimedOut(timeout.unwrap_or_default());

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            kill(&mut child).await;
            return Err(ProcessError::Cancelled);
        }
        _ = &mut deadline => {
            kill(&mut child).await;
            return Err(timed_out());
        }
    };

    if !status.success() {
        let captured = stderr.collect(drain_grace).await.unwrap_or_default();
        return Err(ProcessError::Exit {
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&captured).trim_end().to_string(),
        });
    }

    tokio::select! {
        output = stdout.collect(drain_grace) => Ok(output?),
        _ = cancel.cancelled() => Err(ProcessError::Cancelled),
        _ = &mut deadline => Err(timed_out()),
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to kill process");
    }
}

/// Background reader of one output pipe
struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<io::Result<()>>,
}

impl OutputCapture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let reader = tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return Ok(());
            };
            let mut chunk = [0u8; 8192];
            loop {
                let read = pipe.read(&mut chunk).await?;
                if read == 0 {
                    return Ok(());
                }
                sink.lock().await.extend_from_slice(&chunk[..read]);
            }
        });
        Self { buffer, reader }
    }

    /// Wait up to `grace` for end-of-stream, then return what was captured
    async fn collect(mut self, grace: Duration) -> io::Result<Vec<u8>> {
        match tokio::time::timeout(grace, &mut self.reader).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(join_error)) => return Err(io::Error::new(io::ErrorKind::Other, join_error)),
            Err(_) => {
                debug!("Output pipe still open after process exit, using output captured so far");
            }
        }
        let captured = std::mem::take(&mut *self.buffer.lock().await);
        Ok(captured)
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
