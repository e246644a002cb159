// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock connectors for testing.
//!
//! Scripted implementations that simulate connector behaviour without
//! spawning processes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::traits::*;
use super::{SIGKILL_EXIT_CODE, SIGTERM_EXIT_CODE};
use crate::protocol::Message;

/// Source that replays a fixed list of messages.
#[derive(Debug, Default)]
pub struct MockSource {
    messages: VecDeque<Message>,
    exit_code: i32,
    /// Once the script is drained, stay alive and silent until cancelled.
    hang: bool,
    start_error: Option<String>,
    read_error: Option<String>,
    started: bool,
    terminated: Option<i32>,
}

impl MockSource {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages: messages.into(),
            ..Default::default()
        }
    }

    /// Exit with `code` after the last message.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Never exit on its own after the last message.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn failing_start(mut self, message: &str) -> Self {
        self.start_error = Some(message.to_string());
        self
    }

    /// Fail the read that follows the last scripted message.
    pub fn failing_read(mut self, message: &str) -> Self {
        self.read_error = Some(message.to_string());
        self
    }

    fn exited(&self) -> bool {
        self.terminated.is_some()
            || (self.started && self.messages.is_empty() && self.read_error.is_none() && !self.hang)
    }
}

#[async_trait]
impl Source for MockSource {
    async fn start(&mut self, _config: &SourceLaunchConfig, _job_root: &Path) -> Result<()> {
        if let Some(message) = &self.start_error {
            return Err(ProcessError::StartFailed(message.clone()));
        }
        self.started = true;
        Ok(())
    }

    async fn attempt_read(&mut self) -> Result<Option<Message>> {
        if !self.started {
            return Err(ProcessError::NotStarted);
        }
        if self.terminated.is_some() {
            return Ok(None);
        }
        if let Some(message) = self.messages.pop_front() {
            return Ok(Some(message));
        }
        match self.read_error.take() {
            Some(error) => Err(ProcessError::Other(error)),
            None => Ok(None),
        }
    }

    fn is_finished(&mut self) -> bool {
        self.exited()
    }

    fn exit_value(&mut self) -> Option<i32> {
        match self.terminated {
            Some(code) => Some(code),
            None if self.exited() => Some(self.exit_code),
            None => None,
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        if !self.exited() {
            self.terminated = Some(SIGTERM_EXIT_CODE);
        }
        Ok(())
    }
}

/// Messages a [`MockDestination`] received, shared with the test.
pub type ReceivedMessages = Arc<Mutex<Vec<Message>>>;

/// Destination that records its input and echoes checkpoints back.
#[derive(Debug, Default)]
pub struct MockDestination {
    received: ReceivedMessages,
    output: VecDeque<Message>,
    /// Hold acknowledgements until end of input.
    ack_on_end_of_input: bool,
    held_acks: Vec<Message>,
    /// Die right after acknowledging this many checkpoints.
    die_after_states: Option<usize>,
    dying_trace: Option<Message>,
    start_error: Option<String>,
    acked_states: usize,
    started: bool,
    end_of_input: bool,
    terminated: Option<i32>,
}

impl MockDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the messages accepted so far.
    pub fn received(&self) -> ReceivedMessages {
        self.received.clone()
    }

    pub fn acking_on_end_of_input(mut self) -> Self {
        self.ack_on_end_of_input = true;
        self
    }

    /// Get killed (exit 137) after acknowledging `count` checkpoints.
    pub fn dying_after_states(mut self, count: usize) -> Self {
        self.die_after_states = Some(count);
        self
    }

    /// Emit `trace` right before dying.
    pub fn with_dying_trace(mut self, trace: Message) -> Self {
        self.dying_trace = Some(trace);
        self
    }

    pub fn failing_start(mut self, message: &str) -> Self {
        self.start_error = Some(message.to_string());
        self
    }

    fn exited(&self) -> bool {
        self.terminated.is_some() || (self.started && self.end_of_input)
    }
}

#[async_trait]
impl Destination for MockDestination {
    async fn start(&mut self, _config: &DestinationLaunchConfig, _job_root: &Path) -> Result<()> {
        if let Some(message) = &self.start_error {
            return Err(ProcessError::StartFailed(message.clone()));
        }
        self.started = true;
        Ok(())
    }

    async fn accept(&mut self, message: &Message) -> Result<()> {
        if !self.started {
            return Err(ProcessError::NotStarted);
        }
        if self.terminated.is_some() || self.end_of_input {
            return Err(ProcessError::InputClosed);
        }
        if let Ok(mut received) = self.received.lock() {
            received.push(message.clone());
        }

        if let Message::State { .. } = message {
            if self.ack_on_end_of_input {
                self.held_acks.push(message.clone());
            } else {
                self.output.push_back(message.clone());
            }
            self.acked_states += 1;

            if self.die_after_states == Some(self.acked_states) {
                if let Some(trace) = self.dying_trace.take() {
                    self.output.push_back(trace);
                }
                self.terminated = Some(SIGKILL_EXIT_CODE);
            }
        }
        Ok(())
    }

    async fn notify_end_of_input(&mut self) -> Result<()> {
        if self.terminated.is_some() {
            return Err(ProcessError::InputClosed);
        }
        self.end_of_input = true;
        self.output.extend(self.held_acks.drain(..));
        Ok(())
    }

    async fn attempt_read(&mut self) -> Result<Option<Message>> {
        if !self.started {
            return Err(ProcessError::NotStarted);
        }
        Ok(self.output.pop_front())
    }

    fn is_finished(&mut self) -> bool {
        self.exited() && self.output.is_empty()
    }

    fn exit_value(&mut self) -> Option<i32> {
        match self.terminated {
            Some(code) => Some(code),
            None if self.exited() => Some(0),
            None => None,
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        if !self.exited() {
            self.terminated = Some(SIGTERM_EXIT_CODE);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::catalog::ConfiguredCatalog;
    use serde_json::json;

    fn source_config() -> SourceLaunchConfig {
        SourceLaunchConfig {
            source_configuration: json!({}),
            catalog: ConfiguredCatalog::default(),
            state: None,
        }
    }

    #[tokio::test]
    async fn test_mock_source_replays_then_exits() {
        let mut source = MockSource::new(vec![Message::record("users", None, json!({"id": 1}))])
            .with_exit_code(3);
        source.start(&source_config(), Path::new("/tmp")).await.unwrap();

        assert!(!source.is_finished());
        assert!(source.attempt_read().await.unwrap().is_some());
        assert!(source.attempt_read().await.unwrap().is_none());
        assert!(source.is_finished());
        assert_eq!(source.exit_value(), Some(3));
    }

    #[tokio::test]
    async fn test_hanging_source_exits_on_cancel() {
        let mut source = MockSource::new(vec![]).hanging();
        source.start(&source_config(), Path::new("/tmp")).await.unwrap();

        assert!(!source.is_finished());
        assert_eq!(source.exit_value(), None);
        source.cancel().await.unwrap();
        assert!(source.is_finished());
        assert_eq!(source.exit_value(), Some(SIGTERM_EXIT_CODE));
    }

    #[tokio::test]
    async fn test_mock_destination_dies_after_states() {
        let config = DestinationLaunchConfig {
            destination_configuration: json!({}),
            catalog: ConfiguredCatalog::default(),
        };
        let mut destination = MockDestination::new().dying_after_states(1);
        destination.start(&config, Path::new("/tmp")).await.unwrap();

        let state = Message::legacy_state(json!({"cursor": 1}));
        destination.accept(&state).await.unwrap();
        assert!(matches!(
            destination.accept(&state).await,
            Err(ProcessError::InputClosed)
        ));
        assert_eq!(destination.attempt_read().await.unwrap(), Some(state));
        assert!(destination.is_finished());
        assert_eq!(destination.exit_value(), Some(SIGKILL_EXIT_CODE));
        assert_eq!(destination.received().lock().unwrap().len(), 1);
    }
}
