//! In-process fakes for exercising the forwarding pipeline without a network.
//!
//! CHANGELOG:
//! - 10/19/2026 - ScriptedRelay

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::RelayError;
use crate::forwarding::message::Message;
use crate::relay::{RelayClient, RelayCredentials};

/// Relay that replays a script of results, then falls back to a fixed one.
pub struct ScriptedRelay {
    script: Mutex<VecDeque<Result<(), RelayError>>>,
    fallback: Result<(), RelayError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    sent: Mutex<Vec<Message>>,
}

impl ScriptedRelay {
    pub fn scripted(results: impl IntoIterator<Item = Result<(), RelayError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            fallback: Ok(()),
            delay: None,
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok() -> Self {
        Self::scripted([])
    }

    pub fn always_err(err: RelayError) -> Self {
        Self {
            fallback: Err(err),
            ..Self::scripted([])
        }
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of send calls, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages for which a send was attempted, in call order.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RelayClient for ScriptedRelay {
    async fn send(&self, _credentials: &RelayCredentials, message: &Message) -> Result<(), RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or(self.fallback)
    }
}
