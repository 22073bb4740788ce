//! In-process broker that records every delivered message.
//!
//! Backs `stormfeed run --dry-run` and the test suites. Failures can be
//! scripted per operation to exercise the publisher's retry path.

use super::broker::{BrokerClient, BrokerError};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One message accepted by a [`MemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl SentMessage {
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.payload)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    connected: bool,
    sent: Vec<SentMessage>,
    connect_calls: u32,
    disconnect_calls: u32,
    send_attempts: u32,
    failing_connects: u32,
    failing_sends: u32,
    fail_disconnect: bool,
}

#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<MemoryState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `n` connect calls fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.state().failing_connects = n;
    }

    /// The next `n` send calls fail without recording the message.
    pub fn fail_next_sends(&self, n: u32) {
        self.state().failing_sends = n;
    }

    /// Every disconnect call fails (the session is still torn down).
    pub fn fail_disconnects(&self) {
        self.state().fail_disconnect = true;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state().sent.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn connect_calls(&self) -> u32 {
        self.state().connect_calls
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.state().disconnect_calls
    }

    pub fn send_attempts(&self) -> u32 {
        self.state().send_attempts
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.connect_calls += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(BrokerError::Connect("broker unavailable".into()));
        }
        state.connected = true;
        Ok(())
    }

    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.send_attempts += 1;
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(BrokerError::Send("leader not available".into()));
        }
        state.sent.push(SentMessage {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.disconnect_calls += 1;
        state.connected = false;
        if state.fail_disconnect {
            return Err(BrokerError::Disconnect("socket closed".into()));
        }
        Ok(())
    }
}
