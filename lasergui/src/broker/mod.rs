//! Request broker: the asynchronous submit/poll protocol.
//!
//! Arbitrarily many concurrent callers submit move requests; the broker
//! serializes them through the [`EngineSession`], assigns each a unique
//! correlation id, stores the outcome, and answers polls. The engine call
//! itself is the exclusivity point: submitting never blocks unrelated
//! callers, and the submitter receives a one-shot channel that resolves
//! when the engine answers.
//!
//! # Result store
//!
//! ```text
//!            submit            engine reply           poll
//!   (none) ──────────► Computing ──────────► Ready ──────────► (removed)
//!                                              │
//!                                              └── age > max ──► (evicted)
//! ```
//!
//! Each entry transitions `Computing → Ready` exactly once and is removed
//! on its first successful poll; a poll of a consumed or unknown id fails
//! explicitly rather than returning stale data. Ready entries that are
//! never polled are evicted after a configurable maximum age so abandoned
//! requests cannot grow the store without bound.

use crate::engine::EngineSession;
use crate::protocol::{self, EngineError, EngineReply, MoveRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default maximum age of an unpolled Ready entry.
pub const DEFAULT_RESULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Default interval between eviction sweeps.
pub const DEFAULT_EVICT_INTERVAL: Duration = Duration::from_secs(30);

/// Handle letting a later poll retrieve an earlier submit's result.
///
/// Monotonically increasing, unique per process lifetime, never reused.
pub type CorrelationId = u64;

/// Outcome of one engine call: the reply, or the failure that is handed to
/// the first poller in its place.
pub type Outcome = Result<EngineReply, EngineError>;

/// Configuration for the request broker.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// How long an unpolled Ready entry may live before eviction.
    pub result_max_age: Duration,

    /// How often the eviction sweep runs.
    pub evict_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            result_max_age: DEFAULT_RESULT_MAX_AGE,
            evict_interval: DEFAULT_EVICT_INTERVAL,
        }
    }
}

/// Errors answered to a poll.
#[derive(Debug, Error)]
pub enum PollError {
    /// The id was never issued, was already consumed, or was evicted.
    #[error("unknown request id {0}")]
    UnknownRequest(CorrelationId),

    /// The engine has not answered yet; poll again.
    #[error("request {0} is still computing")]
    NotReady(CorrelationId),

    /// The engine call failed; the failure is consumed like any result.
    #[error(transparent)]
    Engine(EngineError),
}

enum Entry {
    Computing,
    Ready { outcome: Outcome, since: Instant },
}

struct Store {
    next_id: CorrelationId,
    entries: HashMap<CorrelationId, Entry>,
}

struct Inner {
    session: Arc<EngineSession>,
    config: BrokerConfig,
    store: Mutex<Store>,
}

/// Serializes concurrent move requests into the single engine conversation
/// and stores completed results for one-time retrieval by poll.
///
/// Cheap to clone; all clones share the same store and session.
#[derive(Clone)]
pub struct RequestBroker {
    inner: Arc<Inner>,
}

impl RequestBroker {
    /// Creates a broker over an already-handshaken engine session.
    pub fn new(session: Arc<EngineSession>, config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                config,
                store: Mutex::new(Store {
                    next_id: 0,
                    entries: HashMap::new(),
                }),
            }),
        }
    }

    /// Submits a move request.
    ///
    /// Allocates the next correlation id, records a Computing entry, and
    /// completes the engine call on a background task. Returns immediately
    /// with the id and a receiver that resolves to the outcome once the
    /// engine answers; the outcome is also stored for retrieval by
    /// [`poll`](Self::poll). Id allocation and store insertion happen under
    /// one lock, so two submitters never share an id and a racing poll sees
    /// either `NotReady` or the final result, never a torn entry.
    pub fn submit(&self, request: MoveRequest) -> (CorrelationId, oneshot::Receiver<Outcome>) {
        let command = protocol::encode(&request);

        let id = {
            let mut store = self.inner.store.lock().unwrap();
            let id = store.next_id;
            store.next_id += 1;
            store.entries.insert(id, Entry::Computing);
            id
        };
        info!(id, position = %request.position, "move request submitted");

        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = inner.session.run(&command).await;
            match &outcome {
                Ok(reply) => {
                    info!(id, best_move = %reply.best_move, elapsed = ?started.elapsed(), "move request completed")
                }
                Err(err) => warn!(id, %err, "move request failed"),
            }

            {
                let mut store = inner.store.lock().unwrap();
                if let Some(entry) = store.entries.get_mut(&id) {
                    *entry = Entry::Ready {
                        outcome: outcome.clone(),
                        since: Instant::now(),
                    };
                }
            }

            // The submitter may have gone away; the stored entry still
            // serves any later poll.
            let _ = tx.send(outcome);
        });

        (id, rx)
    }

    /// Retrieves and consumes a completed result.
    ///
    /// Never blocks: a still-computing entry answers `NotReady`. A
    /// successful poll removes the entry, so a second poll of the same id
    /// answers `UnknownRequest`.
    pub fn poll(&self, id: CorrelationId) -> Result<EngineReply, PollError> {
        let mut store = self.inner.store.lock().unwrap();
        match store.entries.get(&id) {
            None => Err(PollError::UnknownRequest(id)),
            Some(Entry::Computing) => Err(PollError::NotReady(id)),
            Some(Entry::Ready { .. }) => {
                let Some(Entry::Ready { outcome, .. }) = store.entries.remove(&id) else {
                    return Err(PollError::UnknownRequest(id));
                };
                debug!(id, "result consumed");
                outcome.map_err(PollError::Engine)
            }
        }
    }

    /// Number of entries currently in the store (computing and ready).
    pub fn pending(&self) -> usize {
        self.inner.store.lock().unwrap().entries.len()
    }

    /// Removes Ready entries older than the configured maximum age.
    ///
    /// Returns the number of evicted entries. Computing entries are never
    /// evicted; they become Ready (and thus evictable) when the bounded
    /// engine call resolves.
    pub fn evict_stale(&self) -> usize {
        let max_age = self.inner.config.result_max_age;
        let mut store = self.inner.store.lock().unwrap();
        let before = store.entries.len();
        store.entries.retain(|id, entry| match entry {
            Entry::Computing => true,
            Entry::Ready { since, .. } => {
                let keep = since.elapsed() <= max_age;
                if !keep {
                    debug!(id, "evicting unpolled result");
                }
                keep
            }
        });
        before - store.entries.len()
    }

    /// Runs the eviction sweep until `shutdown` cancels.
    pub async fn run_evictions(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.inner.config.evict_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            let evicted = self.evict_stale();
            if evicted > 0 {
                info!(evicted, "evicted unpolled results");
            }
        }
        debug!("eviction sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_default() {
        let config = BrokerConfig::default();
        assert_eq!(config.result_max_age, DEFAULT_RESULT_MAX_AGE);
        assert_eq!(config.evict_interval, DEFAULT_EVICT_INTERVAL);
    }

    #[test]
    fn test_poll_error_display() {
        assert!(PollError::UnknownRequest(7).to_string().contains('7'));
        assert!(PollError::NotReady(3).to_string().contains("computing"));
    }
}
