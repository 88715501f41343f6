//! In-memory line adapter for driver tests.
//!
//! Records every line written and answers queries from a scripted reply
//! queue, falling back to a fixed default reply.

use super::LineAdapter;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct State {
    connected: bool,
    sent: Vec<String>,
    replies: VecDeque<String>,
}

/// Shared-handle mock transport. Clones observe the same state.
#[derive(Clone)]
pub struct MockLineAdapter {
    state: Arc<Mutex<State>>,
    default_reply: String,
}

impl Default for MockLineAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLineAdapter {
    /// Connected-on-demand mock that answers "OK" to unscripted queries.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            default_reply: "OK".to_string(),
        }
    }

    /// Reply used when no queued reply is left.
    pub fn with_default_reply(mut self, reply: &str) -> Self {
        self.default_reply = reply.to_string();
        self
    }

    /// Queue a reply for the next query.
    pub fn push_reply(&self, reply: &str) {
        self.lock().replies.push_back(reply.to_string());
    }

    /// Every line written so far, queries included.
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LineAdapter for MockLineAdapter {
    async fn connect(&self) -> Result<()> {
        self.lock().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.lock().connected = false;
        Ok(())
    }

    async fn write_line(&self, command: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            bail!("mock adapter not connected");
        }
        state.sent.push(command.to_string());
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        let mut state = self.lock();
        if !state.connected {
            return Err(anyhow!("mock adapter not connected"));
        }
        state.sent.push(command.to_string());
        Ok(state
            .replies
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone()))
    }

    async fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn info(&self) -> String {
        "MockLineAdapter".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_replies() {
        let adapter = MockLineAdapter::new();
        assert!(adapter.write_line("*RST").await.is_err());

        adapter.connect().await.unwrap();
        adapter.push_reply("42");
        adapter.write_line("*RST").await.unwrap();
        assert_eq!(adapter.query("A?").await.unwrap(), "42");
        assert_eq!(adapter.query("B?").await.unwrap(), "OK");
        assert_eq!(adapter.sent(), vec!["*RST", "A?", "B?"]);
    }
}
