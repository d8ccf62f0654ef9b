//! Capability to observe incoming messages, as reported by the platform.
//!
//! CHANGELOG:
//! - 10/19/2026 - PermissionGate trait, bridge-backed and static gates

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::error::CoreError;

#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Current capability.
    fn has_capability(&self) -> bool;

    /// Ask the platform for the capability and wait for its answer.
    ///
    /// Fails with `PlatformUnsupported` where the capability cannot exist.
    async fn request_capability(&self) -> Result<bool, CoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Unknown,
    Pending,
    Granted,
    Denied,
    Unsupported,
}

/// Gate driven by the SMS bridge through the daemon's `permission` method.
pub struct BridgeGate {
    state: watch::Sender<GateState>,
    request_timeout: Duration,
}

impl BridgeGate {
    pub fn new(request_timeout: Duration) -> Self {
        let (state, _) = watch::channel(GateState::Unknown);
        Self {
            state,
            request_timeout,
        }
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    /// Bridge reports the user's decision (or a later revocation).
    pub fn report(&self, granted: bool) {
        if self.state() == GateState::Unsupported {
            return;
        }
        let next = if granted {
            GateState::Granted
        } else {
            GateState::Denied
        };
        info!(state = ?next, "bridge reported permission");
        self.state.send_replace(next);
    }

    /// Bridge reports the platform cannot provide the capability at all.
    pub fn mark_unsupported(&self) {
        info!("bridge reported platform unsupported");
        self.state.send_replace(GateState::Unsupported);
    }
}

#[async_trait]
impl PermissionGate for BridgeGate {
    fn has_capability(&self) -> bool {
        self.state() == GateState::Granted
    }

    async fn request_capability(&self) -> Result<bool, CoreError> {
        match self.state() {
            GateState::Granted => return Ok(true),
            GateState::Unsupported => return Err(CoreError::PlatformUnsupported),
            _ => {}
        }

        let mut rx = self.state.subscribe();
        self.state.send_replace(GateState::Pending);

        let resolved = tokio::time::timeout(
            self.request_timeout,
            rx.wait_for(|s| !matches!(s, GateState::Pending | GateState::Unknown)),
        )
        .await;

        match resolved {
            Ok(Ok(state)) => match *state {
                GateState::Granted => Ok(true),
                GateState::Unsupported => Err(CoreError::PlatformUnsupported),
                _ => Ok(false),
            },
            _ => {
                // Unanswered requests fall back to "not granted".
                self.state.send_if_modified(|s| {
                    if *s == GateState::Pending {
                        *s = GateState::Denied;
                        true
                    } else {
                        false
                    }
                });
                Ok(false)
            }
        }
    }
}

/// Fixed gate for tests and platforms where the capability is implied.
#[derive(Debug)]
pub struct StaticGate {
    granted: AtomicBool,
    supported: AtomicBool,
}

impl StaticGate {
    pub fn granted() -> Self {
        Self {
            granted: AtomicBool::new(true),
            supported: AtomicBool::new(true),
        }
    }

    pub fn denied() -> Self {
        Self {
            granted: AtomicBool::new(false),
            supported: AtomicBool::new(true),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            granted: AtomicBool::new(false),
            supported: AtomicBool::new(false),
        }
    }

    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }
}

#[async_trait]
impl PermissionGate for StaticGate {
    fn has_capability(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    async fn request_capability(&self) -> Result<bool, CoreError> {
        if !self.supported.load(Ordering::SeqCst) {
            return Err(CoreError::PlatformUnsupported);
        }
        Ok(self.has_capability())
    }
}
