//! Lazily initialized, process-wide state with an observable outcome
//!
//! Both the key material store and the JWKS validator hold "initialize once" state: the
//! expensive load runs at most once among concurrent callers, and the outcome is either a
//! ready value or a recorded failure. Failures are sticky so an outage does not turn every
//! request into another load attempt. Two ways out exist: an optional retry interval after
//! which the next caller may initialize again, and an explicit [`InitCell::reset`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{AuthError, AuthResult};

/// Observable state of an [`InitCell`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStatus {
    /// No initialization has been attempted (or the cell was reset)
    Uninitialized,
    /// Initialization succeeded
    Ready,
    /// Initialization failed; `error` is returned to callers until retry or reset
    Failed { error: AuthError },
}

enum Slot<T> {
    Uninitialized,
    Ready(Arc<T>),
    Failed { error: AuthError, since: Instant },
}

/// Once-initialized cell with sticky failure
pub struct InitCell<T> {
    name: &'static str,
    slot: RwLock<Slot<T>>,
    retry_after: Option<Duration>,
}

impl<T> InitCell<T> {
    /// An empty cell; `name` labels log events
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: RwLock::new(Slot::Uninitialized),
            retry_after: None,
        }
    }

    /// A cell that starts out ready with `value`
    pub fn ready(name: &'static str, value: T) -> Self {
        Self {
            name,
            slot: RwLock::new(Slot::Ready(Arc::new(value))),
            retry_after: None,
        }
    }

    /// Allow re-initialization once `retry_after` has elapsed since a failure
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    fn retry_due(&self, since: Instant) -> bool {
        self.retry_after
            .is_some_and(|interval| since.elapsed() >= interval)
    }

    /// The ready value, if any
    pub async fn get(&self) -> Option<Arc<T>> {
        match &*self.slot.read().await {
            Slot::Ready(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Current state
    pub async fn status(&self) -> InitStatus {
        match &*self.slot.read().await {
            Slot::Uninitialized => InitStatus::Uninitialized,
            Slot::Ready(_) => InitStatus::Ready,
            Slot::Failed { error, .. } => InitStatus::Failed {
                error: error.clone(),
            },
        }
    }

    /// Return the ready value, running `init` if nothing has been recorded yet
    ///
    /// Concurrent callers are serialized on a write lock and re-check the state after
    /// acquiring it, so `init` runs at most once per attempt window.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `init`, or the recorded failure while it is sticky.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> AuthResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        {
            let slot = self.slot.read().await;
            match &*slot {
                Slot::Ready(value) => return Ok(Arc::clone(value)),
                Slot::Failed { error, since } if !self.retry_due(*since) => {
                    debug!(cell = self.name, "Initialization previously failed");
                    return Err(error.clone());
                }
                _ => {}
            }
        }

        let mut slot = self.slot.write().await;
        match &*slot {
            Slot::Ready(value) => return Ok(Arc::clone(value)),
            Slot::Failed { error, since } if !self.retry_due(*since) => {
                return Err(error.clone());
            }
            _ => {}
        }

        match init().await {
            Ok(value) => {
                let value = Arc::new(value);
                *slot = Slot::Ready(Arc::clone(&value));
                debug!(cell = self.name, "Initialization succeeded");
                Ok(value)
            }
            Err(error) => {
                warn!(
                    cell = self.name,
                    category = error.category(),
                    error = %error,
                    "Initialization failed"
                );
                *slot = Slot::Failed {
                    error: error.clone(),
                    since: Instant::now(),
                };
                Err(error)
            }
        }
    }

    /// Return the cell to `Uninitialized` so the next caller initializes again
    pub async fn reset(&self) {
        *self.slot.write().await = Slot::Uninitialized;
        debug!(cell = self.name, "Cell reset");
    }
}

impl<T> std::fmt::Debug for InitCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.slot.try_read() {
            Ok(slot) => match &*slot {
                Slot::Uninitialized => "uninitialized",
                Slot::Ready(_) => "ready",
                Slot::Failed { .. } => "failed",
            },
            Err(_) => "<locked>",
        };
        f.debug_struct("InitCell")
            .field("name", &self.name)
            .field("state", &state)
            .field("retry_after", &self.retry_after)
            .finish()
    }
}
