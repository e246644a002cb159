// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connectors running as child processes.
//!
//! A connector reads its configuration from files in the job root and
//! speaks newline-delimited JSON: the source writes messages to stdout, the
//! destination reads messages from stdin and writes acknowledgements to
//! stdout. Stdout is drained by a background task into a channel so that
//! `attempt_read` never blocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use super::traits::*;
use crate::protocol::Message;

/// Source output buffered ahead of the relay.
const SOURCE_BUFFER: usize = 1024;
/// How long `close` waits for a connector to exit before killing it.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(60);

/// How to launch a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ConnectorCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    fn spawn(&self, extra_args: &[String], job_root: &Path, with_stdin: bool) -> Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(extra_args)
            .envs(&self.env)
            .current_dir(job_root)
            .stdin(if with_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn()
            .map_err(|e| ProcessError::StartFailed(format!("{}: {}", self.program, e)))
    }
}

enum OutputSender {
    Bounded(mpsc::Sender<Message>),
    Unbounded(mpsc::UnboundedSender<Message>),
}

impl OutputSender {
    /// Returns false once the receiving side is gone.
    async fn send(&self, message: Message) -> bool {
        match self {
            Self::Bounded(tx) => tx.send(message).await.is_ok(),
            Self::Unbounded(tx) => tx.send(message).is_ok(),
        }
    }
}

enum OutputReceiver {
    Bounded(mpsc::Receiver<Message>),
    Unbounded(mpsc::UnboundedReceiver<Message>),
}

impl OutputReceiver {
    fn try_recv(&mut self) -> std::result::Result<Message, TryRecvError> {
        match self {
            Self::Bounded(rx) => rx.try_recv(),
            Self::Unbounded(rx) => rx.try_recv(),
        }
    }
}

/// A launched connector with its output pump.
struct RunningConnector {
    component: &'static str,
    child: Child,
    output: OutputReceiver,
    output_closed: bool,
    exit_code: Option<i32>,
}

impl RunningConnector {
    /// Spawn the child and start draining stdout and stderr.
    ///
    /// The destination's output channel is unbounded: its stdout must keep
    /// draining while the relay is blocked writing to its stdin.
    fn launch(
        component: &'static str,
        command: &ConnectorCommand,
        args: &[String],
        job_root: &Path,
        with_stdin: bool,
    ) -> Result<Self> {
        let mut child = command.spawn(args, job_root, with_stdin)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::StartFailed("stdout not captured".to_string()))?;

        let (sender, output) = if with_stdin {
            let (tx, rx) = mpsc::unbounded_channel();
            (OutputSender::Unbounded(tx), OutputReceiver::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(SOURCE_BUFFER);
            (OutputSender::Bounded(tx), OutputReceiver::Bounded(rx))
        };

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Message>(&line) {
                            Ok(message) => {
                                if !sender.send(message).await {
                                    break;
                                }
                            }
                            Err(_) => info!(component, "{}", line),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(component, error = %e, "Failed to read connector output");
                        break;
                    }
                }
            }
            debug!(component, "Connector stdout closed");
        });

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(component, "{}", line);
                }
            });
        }

        info!(component, program = %command.program, "Connector started");

        Ok(Self {
            component,
            child,
            output,
            output_closed: false,
            exit_code: None,
        })
    }

    fn try_read(&mut self) -> Option<Message> {
        match self.output.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.output_closed = true;
                None
            }
        }
    }

    fn poll_exit(&mut self) -> Option<i32> {
        if self.exit_code.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => self.exit_code = Some(exit_code_of(status)),
                Ok(None) => {}
                Err(e) => {
                    warn!(component = self.component, error = %e, "Error polling connector exit");
                }
            }
        }
        self.exit_code
    }

    fn is_finished(&mut self) -> bool {
        self.poll_exit().is_some() && self.output_closed
    }

    async fn wait_or_kill(&mut self) -> Result<()> {
        if self.poll_exit().is_some() {
            return Ok(());
        }
        match tokio::time::timeout(CLOSE_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                self.exit_code = Some(exit_code_of(status?));
                Ok(())
            }
            Err(_) => {
                warn!(component = self.component, "Connector did not exit in time, killing");
                self.kill().await?;
                Err(ProcessError::Other(format!(
                    "{} did not exit within {}s",
                    self.component,
                    CLOSE_TIMEOUT.as_secs()
                )))
            }
        }
    }

    async fn kill(&mut self) -> Result<()> {
        if self.poll_exit().is_some() {
            return Ok(());
        }
        self.child.start_kill()?;
        let status = self.child.wait().await?;
        self.exit_code = Some(exit_code_of(status));
        info!(component = self.component, exit_code = ?self.exit_code, "Connector killed");
        Ok(())
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

async fn write_json(path: PathBuf, value: &impl Serialize) -> Result<String> {
    tokio::fs::write(&path, serde_json::to_vec(value)?).await?;
    Ok(path.to_string_lossy().into_owned())
}

/// Source connector run as `<program> <args> read --config .. --catalog .. [--state ..]`.
pub struct SubprocessSource {
    command: ConnectorCommand,
    running: Option<RunningConnector>,
}

impl SubprocessSource {
    pub fn new(command: ConnectorCommand) -> Self {
        Self {
            command,
            running: None,
        }
    }
}

#[async_trait]
impl Source for SubprocessSource {
    async fn start(&mut self, config: &SourceLaunchConfig, job_root: &Path) -> Result<()> {
        let mut args = vec![
            "read".to_string(),
            "--config".to_string(),
            write_json(
                job_root.join("source_config.json"),
                &config.source_configuration,
            )
            .await?,
            "--catalog".to_string(),
            write_json(job_root.join("source_catalog.json"), &config.catalog).await?,
        ];
        if let Some(state) = &config.state {
            args.push("--state".to_string());
            args.push(write_json(job_root.join("input_state.json"), &state.state).await?);
        }

        self.running = Some(RunningConnector::launch(
            "source",
            &self.command,
            &args,
            job_root,
            false,
        )?);
        Ok(())
    }

    async fn attempt_read(&mut self) -> Result<Option<Message>> {
        let running = self.running.as_mut().ok_or(ProcessError::NotStarted)?;
        Ok(running.try_read())
    }

    fn is_finished(&mut self) -> bool {
        self.running.as_mut().is_none_or(|r| r.is_finished())
    }

    fn exit_value(&mut self) -> Option<i32> {
        self.running.as_mut().and_then(|r| r.poll_exit())
    }

    async fn close(&mut self) -> Result<()> {
        match self.running.as_mut() {
            Some(running) => running.wait_or_kill().await,
            None => Ok(()),
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        match self.running.as_mut() {
            Some(running) => running.kill().await,
            None => Ok(()),
        }
    }
}

/// Destination connector run as `<program> <args> write --config .. --catalog ..`.
pub struct SubprocessDestination {
    command: ConnectorCommand,
    running: Option<RunningConnector>,
    stdin: Option<BufWriter<ChildStdin>>,
}

impl SubprocessDestination {
    pub fn new(command: ConnectorCommand) -> Self {
        Self {
            command,
            running: None,
            stdin: None,
        }
    }
}

#[async_trait]
impl Destination for SubprocessDestination {
    async fn start(&mut self, config: &DestinationLaunchConfig, job_root: &Path) -> Result<()> {
        let args = vec![
            "write".to_string(),
            "--config".to_string(),
            write_json(
                job_root.join("destination_config.json"),
                &config.destination_configuration,
            )
            .await?,
            "--catalog".to_string(),
            write_json(job_root.join("destination_catalog.json"), &config.catalog).await?,
        ];

        let mut running =
            RunningConnector::launch("destination", &self.command, &args, job_root, true)?;
        let stdin = running
            .child
            .stdin
            .take()
            .ok_or_else(|| ProcessError::StartFailed("stdin not captured".to_string()))?;
        self.stdin = Some(BufWriter::new(stdin));
        self.running = Some(running);
        Ok(())
    }

    async fn accept(&mut self, message: &Message) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(ProcessError::InputClosed)?;
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        // Checkpoints are not left sitting in the buffer.
        if matches!(message, Message::State { .. }) {
            stdin.flush().await?;
        }
        Ok(())
    }

    async fn notify_end_of_input(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().await?;
            stdin.shutdown().await?;
        }
        Ok(())
    }

    async fn attempt_read(&mut self) -> Result<Option<Message>> {
        let running = self.running.as_mut().ok_or(ProcessError::NotStarted)?;
        Ok(running.try_read())
    }

    fn is_finished(&mut self) -> bool {
        self.running.as_mut().is_none_or(|r| r.is_finished())
    }

    fn exit_value(&mut self) -> Option<i32> {
        self.running.as_mut().and_then(|r| r.poll_exit())
    }

    async fn close(&mut self) -> Result<()> {
        self.notify_end_of_input().await?;
        match self.running.as_mut() {
            Some(running) => running.wait_or_kill().await,
            None => Ok(()),
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        self.stdin = None;
        match self.running.as_mut() {
            Some(running) => running.kill().await,
            None => Ok(()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use conduit_core::catalog::ConfiguredCatalog;
    use serde_json::json;

    fn shell(script: &str) -> ConnectorCommand {
        ConnectorCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "connector".to_string()],
            env: HashMap::new(),
        }
    }

    async fn read_all(source: &mut SubprocessSource) -> Vec<Message> {
        let mut messages = Vec::new();
        while !source.is_finished() {
            match source.attempt_read().await.unwrap() {
                Some(message) => messages.push(message),
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        messages
    }

    #[tokio::test]
    async fn test_source_parses_json_lines_and_skips_plain_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = SubprocessSource::new(shell(
            r#"echo 'starting up'; echo '{"type":"RECORD","record":{"stream":"users","data":{"id":1},"emitted_at":1}}'; exit 3"#,
        ));
        let config = SourceLaunchConfig {
            source_configuration: json!({"host": "db"}),
            catalog: ConfiguredCatalog::default(),
            state: None,
        };
        source.start(&config, dir.path()).await.unwrap();

        let messages = read_all(&mut source).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(source.exit_value(), Some(3));
        assert!(dir.path().join("source_config.json").exists());
        assert!(!dir.path().join("input_state.json").exists());
    }

    #[tokio::test]
    async fn test_destination_echoes_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let mut destination = SubprocessDestination::new(shell("cat"));
        let config = DestinationLaunchConfig {
            destination_configuration: json!({}),
            catalog: ConfiguredCatalog::default(),
        };
        destination.start(&config, dir.path()).await.unwrap();

        let state = Message::legacy_state(json!({"cursor": 7}));
        destination.accept(&state).await.unwrap();
        destination.notify_end_of_input().await.unwrap();

        let mut output = Vec::new();
        while !destination.is_finished() {
            match destination.attempt_read().await.unwrap() {
                Some(message) => output.push(message),
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        assert_eq!(output, vec![state]);
        assert_eq!(destination.exit_value(), Some(0));
        assert!(matches!(
            destination.accept(&Message::legacy_state(json!({}))).await,
            Err(ProcessError::InputClosed)
        ));
    }

    #[tokio::test]
    async fn test_cancel_kills_running_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = SubprocessSource::new(shell("sleep 30"));
        let config = SourceLaunchConfig {
            source_configuration: json!({}),
            catalog: ConfiguredCatalog::default(),
            state: None,
        };
        source.start(&config, dir.path()).await.unwrap();
        source.cancel().await.unwrap();

        assert_eq!(source.exit_value(), Some(137));
    }

    #[tokio::test]
    async fn test_missing_program_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = SubprocessSource::new(ConnectorCommand::new("/nonexistent/connector"));
        let config = SourceLaunchConfig {
            source_configuration: json!({}),
            catalog: ConfiguredCatalog::default(),
            state: None,
        };
        assert!(matches!(
            source.start(&config, dir.path()).await,
            Err(ProcessError::StartFailed(_))
        ));
    }
}
