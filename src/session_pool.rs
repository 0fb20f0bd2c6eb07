//! Pool of SOAP session tokens kept in a shared cache.
//!
//! The pool is `N` slots (`<slot_prefix><index>`) plus one available-count
//! (`<counter_key>`). Checkout decrements the counter and reads the slot at the
//! new counter value; check-in increments it. Nothing records which slot a caller
//! holds, so the counter is a best-effort gate rather than a semaphore:
//!
//! - `acquire` is two cache operations (decrement, then read). Concurrent callers
//!   can observe each other's intermediate state and end up sharing a token.
//! - `release` is never validated. An unmatched release inflates the counter.
//! - When the counter leaves `[0, N)` the read is rejected with
//!   [`PoolError::SlotOutOfRange`]. The decrement stays applied; callers still owe
//!   the matching `release` ([`SessionPool::with_session`] takes care of that).
//! - Pool-wide operations (create, refresh, close) assume no checkouts are in
//!   flight.

use crate::api_client::ApiError;
use crate::config::PoolConfig;
use crate::envelope::{extract_security_token, SessionToken};
use crate::session_source::SessionTokenSource;
use crate::shared_cache::{prefixed_key, CacheError, SharedCache};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Session pool is not initialized")]
    NotInitialized,

    #[error("No session slot at index {index} (capacity {capacity})")]
    SlotOutOfRange { index: i64, capacity: usize },

    #[error("Session slot {index} is empty")]
    EmptySlot { index: usize },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl PoolError {
    // Whether the failed acquire had already taken a count off the counter
    fn consumed_count(&self) -> bool {
        matches!(
            self,
            PoolError::SlotOutOfRange { .. } | PoolError::EmptySlot { .. }
        )
    }
}

/// Outcome of a refresh or close sweep. Slots are attempted independently.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub succeeded: Vec<usize>,
    pub failed: Vec<(usize, String)>,
    pub empty: Vec<usize>,
}

impl SweepReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, index: usize, outcome: Option<Result<String, ApiError>>) {
        match outcome {
            None => self.empty.push(index),
            Some(Ok(_)) => self.succeeded.push(index),
            Some(Err(err)) => self.failed.push((index, err.to_string())),
        }
    }
}

pub struct SessionPool<C, S> {
    cache: Arc<C>,
    source: Arc<S>,
    config: PoolConfig,
}

impl<C: SharedCache, S: SessionTokenSource> SessionPool<C, S> {
    pub fn new(cache: Arc<C>, source: Arc<S>, config: PoolConfig) -> Self {
        Self {
            cache,
            source,
            config,
        }
    }

    // Configured capacity; the bound `acquire` checks against
    pub fn capacity(&self) -> usize {
        self.config.max_sessions
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    fn slot_key(&self, index: usize) -> String {
        prefixed_key(&self.config.slot_prefix, &index.to_string())
    }

    fn slot_ids(capacity: usize) -> Vec<String> {
        (0..capacity).map(|index| index.to_string()).collect()
    }

    fn read_slots(&self, capacity: usize) -> BTreeMap<usize, Option<SessionToken>> {
        let mut found = self
            .cache
            .get_many(&Self::slot_ids(capacity), &self.config.slot_prefix);

        (0..capacity)
            .map(|index| {
                let token = found.remove(&index.to_string()).map(SessionToken::new);
                (index, token)
            })
            .collect()
    }

    fn counter_error(err: CacheError) -> PoolError {
        match err {
            CacheError::MissingKey(_) => PoolError::NotInitialized,
            other => PoolError::Cache(other),
        }
    }

    /// Ask the source for one new session. A response without a token (for
    /// example a SOAP fault) is logged and yields `None`; transport and status
    /// errors are returned.
    pub async fn create_session(&self) -> Result<Option<SessionToken>, ApiError> {
        let envelope = self.source.create().await?;

        match extract_security_token(&envelope) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                error!(error = %err, "session create response carried no security token");
                debug!(%envelope, "unexpected session create response");
                Ok(None)
            }
        }
    }

    /// Replace the pool with `capacity` fresh sessions and reset the counter to
    /// `capacity`. Tokens previously stored in these slots are dropped without
    /// being closed. A slot whose session could not be created is left empty.
    pub async fn create_session_pool(
        &self,
        capacity: usize,
    ) -> BTreeMap<usize, Option<SessionToken>> {
        info!(capacity, "begin create_session_pool");

        self.cache.delete(&self.config.counter_key);
        self.cache
            .delete_many(&Self::slot_ids(capacity), &self.config.slot_prefix);

        let mut sessions = BTreeMap::new();
        let mut stored = HashMap::new();
        for index in 0..capacity {
            let token = match self.create_session().await {
                Ok(token) => token,
                Err(err) => {
                    warn!(slot = index, error = %err, "failed to create session");
                    None
                }
            };

            info!(slot = index, token = ?token.as_ref().map(SessionToken::short), "session slot filled");
            if let Some(token) = &token {
                stored.insert(index.to_string(), token.as_str().to_string());
            }
            sessions.insert(index, token);
        }

        self.cache.set_many(stored, &self.config.slot_prefix);
        self.cache
            .set(&self.config.counter_key, capacity.to_string());

        info!(capacity, "end create_session_pool");
        sessions
    }

    /// Check a session out: decrement the counter and read the slot at the new
    /// value. See the module docs for what this does not guarantee.
    pub fn acquire(&self) -> Result<SessionToken, PoolError> {
        let index = self
            .cache
            .decrement(&self.config.counter_key)
            .map_err(Self::counter_error)?;

        let capacity = self.capacity();
        if index < 0 || index as usize >= capacity {
            warn!(index, capacity, "available-count outside pool bounds");
            return Err(PoolError::SlotOutOfRange { index, capacity });
        }

        let slot = index as usize;
        let token = self
            .cache
            .get(&self.slot_key(slot))
            .map(SessionToken::new)
            .ok_or(PoolError::EmptySlot { index: slot })?;

        debug!(slot, "session checked out");
        Ok(token)
    }

    /// Check a session back in by incrementing the counter. Returns the new count.
    pub fn release(&self) -> Result<i64, PoolError> {
        let available = self
            .cache
            .increment(&self.config.counter_key)
            .map_err(Self::counter_error)?;

        debug!(available, "session checked in");
        Ok(available)
    }

    /// Run `f` with a checked-out session and always give the count back,
    /// including when `f` fails or the checkout itself was rejected after
    /// decrementing.
    pub async fn with_session<F, Fut, T>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(SessionToken) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let (result, owes_release) = match self.acquire() {
            Ok(token) => (f(token).await.map_err(PoolError::from), true),
            Err(err) => {
                let owes_release = err.consumed_count();
                (Err(err), owes_release)
            }
        };

        if owes_release {
            if let Err(err) = self.release() {
                warn!(error = %err, "failed to release session");
            }
        }

        result
    }

    // Current available-count, `None` when the pool has not been created
    pub fn available(&self) -> Option<i64> {
        self.cache
            .get(&self.config.counter_key)
            .and_then(|value| value.parse().ok())
    }

    // Occupancy of slots `0..capacity`
    pub fn slots(&self, capacity: usize) -> BTreeMap<usize, Option<SessionToken>> {
        self.read_slots(capacity)
    }

    /// Ping every occupied slot. Failures are collected and do not stop the sweep.
    pub async fn refresh_session_pool(&self, capacity: usize) -> SweepReport {
        info!(capacity, "begin refresh_session_pool");

        let now = Utc::now();
        let slots = self.read_slots(capacity);
        let outcomes = join_all(slots.into_iter().map(|(index, token)| async move {
            let outcome = match token {
                Some(token) => Some(self.source.refresh(&token, now).await),
                None => None,
            };
            (index, outcome)
        }))
        .await;

        let mut report = SweepReport::default();
        for (index, outcome) in outcomes {
            if let Some(Err(err)) = &outcome {
                warn!(slot = index, error = %err, "failed to refresh session");
            }
            report.record(index, outcome);
        }

        info!(
            refreshed = report.succeeded.len(),
            failed = report.failed.len(),
            "end refresh_session_pool"
        );
        report
    }

    /// Tear the pool down: drop the counter, close every stored session
    /// (continuing past failures) and delete the slots. Safe to repeat.
    pub async fn close_session_pool(&self, capacity: usize) -> SweepReport {
        info!(capacity, "begin close_session_pool");

        self.cache.delete(&self.config.counter_key);

        let mut report = SweepReport::default();
        for (index, token) in self.read_slots(capacity) {
            let outcome = match token {
                Some(token) => {
                    info!(slot = index, token = token.short(), "closing session");
                    Some(self.source.close(&token).await)
                }
                None => None,
            };
            if let Some(Err(err)) = &outcome {
                warn!(slot = index, error = %err, "failed to close session");
            }
            report.record(index, outcome);
        }

        let deleted = self
            .cache
            .delete_many(&Self::slot_ids(capacity), &self.config.slot_prefix);

        info!(deleted, "end close_session_pool");
        report
    }
}
