//! Sync driver: one guarded pass at a time against a remote source.
//!
//! A reconciliation pass moves `Idle → Fetching → Diffing → Applying → Idle`.
//! Pushing the outbox is a separate pass through `Pushing`. A call made while
//! any pass is running fails immediately with [`Error::Busy`]; it never waits
//! and never interleaves with the running pass.

use crate::{error::Result, Batch, Error, Item, ItemId, ReconcileResult, Reconciler, Store};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Phase of the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Fetching,
    Diffing,
    Applying,
    Pushing,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Diffing => "diffing",
            SyncPhase::Applying => "applying",
            SyncPhase::Pushing => "pushing",
        };
        f.write_str(name)
    }
}

/// The remote item store.
///
/// Implementations own the transport. Transport failures should surface as
/// [`Error::Network`].
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch every item the remote holds.
    async fn fetch_all(&self) -> Result<Vec<Item>>;

    /// Store one item remotely and return the remote's canonical version.
    ///
    /// The returned id may differ from the pushed one when the remote
    /// assigns canonical ids to provisional items.
    async fn push(&self, item: &Item) -> Result<Item>;
}

/// Timeouts for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Upper bound on a single `fetch_all`, in milliseconds
    pub fetch_timeout_ms: u64,
    /// Upper bound on a single `push`, in milliseconds
    pub push_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 10_000,
            push_timeout_ms: 10_000,
        }
    }
}

impl SyncConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

/// Outcome of pushing the outbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Items the remote accepted
    pub pushed: usize,
    /// Items whose provisional id was replaced by a canonical one
    pub rekeyed: usize,
    /// Items still queued after the pass
    pub remaining: usize,
    /// The failure that stopped the pass, if any
    pub error: Option<Error>,
}

/// Outcome of a full sync (reconcile, then push).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub reconcile: ReconcileResult,
    pub push: PushReport,
}

/// Holds the synchronizer out of `Idle` until dropped.
struct PassGuard<'a> {
    phase: &'a Mutex<SyncPhase>,
}

impl<'a> PassGuard<'a> {
    fn enter(phase: &'a Mutex<SyncPhase>, first: SyncPhase) -> Result<Self> {
        let mut current = lock(phase);
        if *current != SyncPhase::Idle {
            tracing::debug!(phase = %*current, "rejecting overlapping sync pass");
            return Err(Error::Busy(*current));
        }
        *current = first;
        Ok(Self { phase })
    }

    fn advance(&self, next: SyncPhase) {
        *lock(self.phase) = next;
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        *lock(self.phase) = SyncPhase::Idle;
    }
}

fn lock(phase: &Mutex<SyncPhase>) -> MutexGuard<'_, SyncPhase> {
    phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn read(store: &RwLock<Store>) -> RwLockReadGuard<'_, Store> {
    store.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write(store: &RwLock<Store>) -> RwLockWriteGuard<'_, Store> {
    store.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs sync passes between a store and a remote source.
#[derive(Debug, Default)]
pub struct Synchronizer {
    phase: Mutex<SyncPhase>,
    config: SyncConfig,
}

impl Synchronizer {
    /// Create an idle synchronizer.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            phase: Mutex::new(SyncPhase::Idle),
            config,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        *lock(&self.phase)
    }

    /// The configured timeouts.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fetch remote items and merge them into the store.
    ///
    /// Fetch failures and timeouts return a retryable [`Error::Network`] and
    /// leave the store untouched.
    pub async fn reconcile<R>(&self, store: &RwLock<Store>, remote: &R) -> Result<ReconcileResult>
    where
        R: RemoteSource + ?Sized,
    {
        let guard = PassGuard::enter(&self.phase, SyncPhase::Fetching)?;

        let remote_items =
            match tokio::time::timeout(self.config.fetch_timeout(), remote.fetch_all()).await {
                Ok(Ok(items)) => items,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "fetching remote quotes failed");
                    return Err(e);
                }
                Err(_) => {
                    tracing::warn!(timeout = ?self.config.fetch_timeout(), "fetching remote quotes timed out");
                    return Err(Error::Network(format!(
                        "fetch timed out after {:?}",
                        self.config.fetch_timeout()
                    )));
                }
            };

        tracing::debug!(count = remote_items.len(), "fetched remote quotes");
        Ok(Self::diff_and_apply(&guard, store, remote_items))
    }

    /// Merge an already-fetched remote item set into the store.
    ///
    /// For hosts that do their own fetching. Subject to the same busy guard
    /// as [`Synchronizer::reconcile`].
    pub fn reconcile_items(
        &self,
        store: &RwLock<Store>,
        remote_items: Vec<Item>,
    ) -> Result<ReconcileResult> {
        let guard = PassGuard::enter(&self.phase, SyncPhase::Diffing)?;
        Ok(Self::diff_and_apply(&guard, store, remote_items))
    }

    fn diff_and_apply(
        guard: &PassGuard<'_>,
        store: &RwLock<Store>,
        remote_items: Vec<Item>,
    ) -> ReconcileResult {
        guard.advance(SyncPhase::Diffing);
        let mut store = write(store);
        let (result, batch) = Reconciler::new(&store).reconcile(remote_items);

        guard.advance(SyncPhase::Applying);
        let report = store.apply(batch);

        tracing::info!(
            upserted = result.upserted,
            pushed = result.pushed,
            conflicted = result.conflicted,
            unchanged = result.unchanged,
            skipped = result.skipped,
            flushed = report.flushed,
            "reconciled with remote"
        );
        result
    }

    /// Push every queued item, oldest first.
    ///
    /// Stops at the first failure. Items pushed before the failure stay
    /// dequeued; the rest stay queued for the next call.
    pub async fn push_pending<R>(&self, store: &RwLock<Store>, remote: &R) -> Result<PushReport>
    where
        R: RemoteSource + ?Sized,
    {
        let _guard = PassGuard::enter(&self.phase, SyncPhase::Pushing)?;
        let mut report = PushReport::default();

        let queue: Vec<ItemId> = read(store).outbox().to_vec();
        for id in queue {
            let item = read(store).get(&id).cloned();
            let Some(item) = item else {
                tracing::warn!(%id, "queued item vanished, dropping from outbox");
                let mut batch = Batch::new();
                batch.dequeue_push(id);
                write(store).apply(batch);
                continue;
            };

            let echo = match tokio::time::timeout(self.config.push_timeout(), remote.push(&item))
                .await
            {
                Ok(Ok(echo)) => echo,
                Ok(Err(e)) => {
                    tracing::warn!(%id, error = %e, "push failed");
                    report.error = Some(e);
                    break;
                }
                Err(_) => {
                    tracing::warn!(%id, "push timed out");
                    report.error = Some(Error::Network(format!(
                        "push timed out after {:?}",
                        self.config.push_timeout()
                    )));
                    break;
                }
            };

            let rekeyed = Self::settle_push(&mut write(store), &item, echo);
            report.pushed += 1;
            report.rekeyed += usize::from(rekeyed);
        }

        report.remaining = read(store).outbox().len();
        tracing::info!(
            pushed = report.pushed,
            rekeyed = report.rekeyed,
            remaining = report.remaining,
            "pushed local quotes"
        );
        Ok(report)
    }

    /// Record a push the host performed itself.
    ///
    /// `echo` is the remote's answer for the item stored under `pushed_id`.
    /// The item leaves the outbox, takes the canonical id when the remote
    /// assigned one, and adopts a strictly newer echo. Returns whether the id
    /// changed. Subject to the busy guard.
    pub fn acknowledge_push(
        &self,
        store: &RwLock<Store>,
        pushed_id: &str,
        echo: Item,
    ) -> Result<bool> {
        let _guard = PassGuard::enter(&self.phase, SyncPhase::Pushing)?;
        echo.validate()?;

        let mut store = write(store);
        let pushed = store
            .get(pushed_id)
            .cloned()
            .ok_or_else(|| Error::ItemNotFound(pushed_id.to_string()))?;
        Ok(Self::settle_push(&mut store, &pushed, echo))
    }

    /// Fold a push acknowledgement into the store. Returns whether the id changed.
    fn settle_push(store: &mut Store, pushed: &Item, echo: Item) -> bool {
        let mut batch = Batch::new();

        // The local value may have moved on while the push was in flight.
        let current = store.get(&pushed.id).cloned();
        let unchanged_since_push = current.as_ref() == Some(pushed);
        if unchanged_since_push {
            batch.dequeue_push(pushed.id.clone());
        }

        let rekeyed = echo.id != pushed.id;
        if rekeyed {
            if let Some(mut local) = current {
                tracing::debug!(from = %pushed.id, to = %echo.id, "remote assigned canonical id");
                local.id = echo.id.clone();
                batch.rekey(pushed.id.clone(), local);
            }
        } else if unchanged_since_push && !echo.content_eq(pushed) {
            let echo_is_newer = match (echo.updated_at, pushed.updated_at) {
                (Some(e), Some(p)) => e > p,
                (Some(_), None) => true,
                _ => false,
            };
            if echo_is_newer {
                batch.put(echo.with_origin(crate::Origin::Remote));
            }
        }
        if let Some(ts) = batch.upserts.last().and_then(|i| i.updated_at) {
            batch.observe(ts);
        }

        store.apply(batch);
        rekeyed
    }

    /// Reconcile, then push whatever the reconcile queued.
    pub async fn sync<R>(&self, store: &RwLock<Store>, remote: &R) -> Result<SyncReport>
    where
        R: RemoteSource + ?Sized,
    {
        let reconcile = self.reconcile(store, remote).await?;
        let push = self.push_pending(store, remote).await?;
        Ok(SyncReport { reconcile, push })
    }
}
