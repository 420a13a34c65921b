//! Background refresh of stale entries.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use tracing::{debug, warn};

use super::Shared;
use super::stats::Counters;
use crate::background::{JobError, JobFuture, JobHandler, Outcome};
use crate::cache::Freshness;

/// One queued refresh. Forced refreshes fetch even when the entry is fresh.
#[derive(Debug)]
pub(crate) struct RefreshJob<K> {
    pub(crate) key: K,
    pub(crate) force: bool,
}

/// Refetches one key per job and writes the result back into the store.
pub(crate) struct Refresher<K, V> {
    pub(crate) shared: Arc<Shared<K, V>>,
}

impl<K, V> JobHandler<RefreshJob<K>> for Refresher<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn handle(&self, job: &RefreshJob<K>) -> JobFuture {
        let shared = Arc::clone(&self.shared);
        let key = job.key.clone();
        let force = job.force;
        Box::pin(async move {
            // A synchronous load may have beaten us to it.
            if !force && matches!(shared.peek(&key), Some((_, Freshness::Fresh))) {
                debug!(key = ?key, "refresh skipped — entry already fresh");
                return Ok(());
            }

            match shared.fetch(&key).await {
                Ok(Some(value)) => {
                    shared.store_value(key.clone(), value);
                    debug!(key = ?key, "entry refreshed");
                    Ok(())
                }
                Ok(None) => {
                    shared.remove(&key);
                    debug!(key = ?key, "origin no longer has key — entry dropped");
                    Ok(())
                }
                Err(e) if e.is_transient() => Err(JobError::Retryable(e.to_string())),
                Err(e) => Err(JobError::Permanent(e.to_string())),
            }
        })
    }

    fn finished(&self, job: RefreshJob<K>, outcome: Outcome) {
        let key = job.key;
        self.shared.pending.lock().remove(&key);
        match outcome {
            Outcome::Completed { .. } => Counters::bump(&self.shared.counters.refreshes_completed),
            Outcome::DeadLettered { attempts, error } => {
                Counters::bump(&self.shared.counters.refreshes_failed);
                warn!(key = ?key, attempts, error = %error, "refresh gave up — stale entry kept");
            }
        }
    }
}
