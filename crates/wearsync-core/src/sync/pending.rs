//! Outstanding weather requests
//!
//! The watch registers every `requestId` it sends. A response is admitted
//! when it names a live id (which is then consumed) or names none at all.
//! Ids older than the TTL are treated as unknown.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::types::CorrelationId;

/// Outcome of checking a response against the outstanding requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Response answered a live request
    Matched(CorrelationId),
    /// Response carried no id
    Uncorrelated,
    /// Response named an id we never sent or already consumed
    Unknown(CorrelationId),
    /// Response named an id that outlived the TTL
    Expired(CorrelationId),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Matched(_) | Admission::Uncorrelated)
    }
}

/// Short-lived map of request ids awaiting a response
#[derive(Debug)]
pub struct PendingRequests {
    ttl: Duration,
    inner: Mutex<HashMap<CorrelationId, Instant>>,
}

impl PendingRequests {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request that was just sent.
    pub fn register(&self, id: CorrelationId) {
        let mut inner = self.inner.lock();
        Self::purge_locked(&mut inner, self.ttl);
        inner.insert(id, Instant::now());
    }

    /// Forget a request whose send failed.
    pub fn cancel(&self, id: &CorrelationId) {
        self.inner.lock().remove(id);
    }

    /// Check a response's id, consuming it on a match.
    pub fn admit(&self, id: Option<CorrelationId>) -> Admission {
        let Some(id) = id else {
            return Admission::Uncorrelated;
        };
        let mut inner = self.inner.lock();
        match inner.remove(&id) {
            Some(sent_at) if sent_at.elapsed() <= self.ttl => Admission::Matched(id),
            Some(_) => {
                trace!(%id, "Request id expired");
                Admission::Expired(id)
            }
            None => Admission::Unknown(id),
        }
    }

    /// Drop every id older than the TTL. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        Self::purge_locked(&mut inner, self.ttl)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn purge_locked(inner: &mut HashMap<CorrelationId, Instant>, ttl: Duration) -> usize {
        let before = inner.len();
        inner.retain(|_, sent_at| sent_at.elapsed() <= ttl);
        before - inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registered_id_matches_once() {
        let pending = PendingRequests::new(Duration::from_secs(60));
        let id = CorrelationId::new();
        pending.register(id);

        assert_eq!(pending.admit(Some(id)), Admission::Matched(id));
        // A duplicate response is no longer outstanding
        assert_eq!(pending.admit(Some(id)), Admission::Unknown(id));
    }

    #[tokio::test]
    async fn test_missing_id_is_accepted() {
        let pending = PendingRequests::new(Duration::from_secs(60));
        let admission = pending.admit(None);
        assert_eq!(admission, Admission::Uncorrelated);
        assert!(admission.is_accepted());
    }

    #[tokio::test]
    async fn test_unknown_id_is_rejected() {
        let pending = PendingRequests::new(Duration::from_secs(60));
        pending.register(CorrelationId::new());
        let stranger = CorrelationId::new();
        assert!(!pending.admit(Some(stranger)).is_accepted());
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_id_is_rejected() {
        let pending = PendingRequests::new(Duration::from_secs(60));
        let id = CorrelationId::new();
        pending.register(id);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(pending.admit(Some(id)), Admission::Expired(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_drops_old_ids() {
        let pending = PendingRequests::new(Duration::from_secs(10));
        pending.register(CorrelationId::new());
        tokio::time::advance(Duration::from_secs(5)).await;
        pending.register(CorrelationId::new());
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(pending.purge_expired(), 1);
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_forgets_id() {
        let pending = PendingRequests::new(Duration::from_secs(60));
        let id = CorrelationId::new();
        pending.register(id);
        pending.cancel(&id);
        assert!(pending.is_empty());
    }
}
