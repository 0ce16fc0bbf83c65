//! End-to-end sync passes against in-process remotes.

use async_trait::async_trait;
use quotebook_engine::{
    Choice, Error, Item, MemoryBackend, Origin, Quotebook, ReconcileResult, RemoteSource,
    ResolutionState, Result, SyncConfig, SyncPhase,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

fn item(id: &str, text: &str, category: &str, ts: u64) -> Item {
    Item::new(id, text, category, Some(ts), Origin::Remote)
}

/// A remote holding a fixed item set that accepts every push.
#[derive(Default)]
struct MockRemote {
    items: Mutex<Vec<Item>>,
    next_id: AtomicUsize,
    fail_after: Option<usize>,
    pushes: AtomicUsize,
}

impl MockRemote {
    fn with_items(items: Vec<Item>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    fn failing_after(pushes: usize) -> Self {
        Self {
            fail_after: Some(pushes),
            ..Self::default()
        }
    }

    fn stored(&self) -> Vec<Item> {
        self.items.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSource for MockRemote {
    async fn fetch_all(&self) -> Result<Vec<Item>> {
        Ok(self.stored())
    }

    async fn push(&self, item: &Item) -> Result<Item> {
        let attempt = self.pushes.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| attempt >= limit) {
            return Err(Error::Network("connection reset".into()));
        }

        let mut stored = item.clone().with_origin(Origin::Remote);
        if item.is_provisional() {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            stored.id = format!("srv-{}", n);
        }
        let mut items = self.items.lock().unwrap();
        items.retain(|i| i.id != stored.id);
        items.push(stored.clone());
        Ok(stored)
    }
}

/// A remote whose fetch blocks until released.
struct GatedRemote {
    entered: Notify,
    release: Notify,
    items: Vec<Item>,
}

#[async_trait]
impl RemoteSource for GatedRemote {
    async fn fetch_all(&self) -> Result<Vec<Item>> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.items.clone())
    }

    async fn push(&self, item: &Item) -> Result<Item> {
        Ok(item.clone())
    }
}

/// A remote that never answers.
struct SilentRemote;

#[async_trait]
impl RemoteSource for SilentRemote {
    async fn fetch_all(&self) -> Result<Vec<Item>> {
        std::future::pending().await
    }

    async fn push(&self, _item: &Item) -> Result<Item> {
        std::future::pending().await
    }
}

// ============================================================================
// Merge Scenarios
// ============================================================================

#[tokio::test]
async fn newer_remote_version_wins() {
    let book = Quotebook::in_memory();
    book.import_json(br#"[{"id": "1", "text": "A", "category": "X", "updatedAt": 10}]"#)
        .unwrap();
    let remote = MockRemote::with_items(vec![item("1", "B", "X", 20)]);

    let result = book.reconcile(&remote).await.unwrap();

    assert_eq!(
        result,
        ReconcileResult {
            upserted: 1,
            ..ReconcileResult::default()
        }
    );
    let stored = book.get("1").unwrap();
    assert_eq!(stored.text, "B");
    assert_eq!(stored.origin, Origin::Remote);
    assert_eq!(book.phase(), SyncPhase::Idle);
}

#[tokio::test]
async fn tie_becomes_conflict_until_resolved() {
    let book = Quotebook::in_memory();
    book.import_json(br#"[{"id": "2", "text": "A", "category": "X", "updatedAt": 10}]"#)
        .unwrap();
    let remote = MockRemote::with_items(vec![item("2", "B", "X", 10)]);

    let result = book.reconcile(&remote).await.unwrap();
    assert_eq!(result.conflicted, 1);

    let conflicts = book.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].id, "2");
    assert_eq!(conflicts[0].state, ResolutionState::Pending);
    assert_eq!(book.get("2").unwrap().text, "A");

    // A second pass does not stack another record.
    book.reconcile(&remote).await.unwrap();
    assert_eq!(book.conflicts().len(), 1);

    book.resolve("2", Choice::Local).unwrap();
    let stored = book.get("2").unwrap();
    assert_eq!(stored.text, "A");
    assert_eq!(stored.origin, Origin::Merged);
    assert!(book.conflicts().is_empty());
}

#[tokio::test]
async fn resolved_local_choice_reaches_remote() {
    let book = Quotebook::in_memory();
    book.import_json(br#"[{"id": "2", "text": "A", "category": "X", "updatedAt": 10}]"#)
        .unwrap();
    let remote = MockRemote::with_items(vec![item("2", "B", "X", 10)]);

    book.reconcile(&remote).await.unwrap();
    book.resolve("2", Choice::Local).unwrap();
    let report = book.push_pending(&remote).await.unwrap();

    assert_eq!(report.pushed, 1);
    assert!(report.error.is_none());
    let on_remote = remote.stored();
    assert_eq!(on_remote.len(), 1);
    assert_eq!(on_remote[0].text, "A");

    // Once both sides agree the next pass is a no-op.
    let result = book.reconcile(&remote).await.unwrap();
    assert_eq!(result.unchanged, 1);
    assert!(book.outbox().is_empty());
}

#[tokio::test]
async fn resolved_remote_choice_is_not_pushed() {
    let book = Quotebook::in_memory();
    book.import_json(br#"[{"id": "2", "text": "A", "category": "X", "updatedAt": 10}]"#)
        .unwrap();
    let remote = MockRemote::with_items(vec![item("2", "B", "X", 10)]);

    book.reconcile(&remote).await.unwrap();
    let settled = book.resolve("2", Choice::Remote).unwrap();

    assert_eq!(settled.state, ResolutionState::KeptRemote);
    assert_eq!(book.get("2").unwrap().text, "B");
    assert!(book.outbox().is_empty());
}

#[tokio::test]
async fn resolve_without_conflict_fails() {
    let book = Quotebook::in_memory();
    assert_eq!(
        book.resolve("nope", Choice::Local),
        Err(Error::ConflictNotFound("nope".into()))
    );
}

// ============================================================================
// Full Sync
// ============================================================================

#[tokio::test]
async fn full_sync_assigns_canonical_ids() {
    let book = Quotebook::in_memory();
    let added = book.add_item("Be yourself.", "Inspiration").unwrap();
    let remote = MockRemote::with_items(vec![item("srv-seed", "Seeded", "Life", 1)]);

    let report = book.sync(&remote).await.unwrap();

    assert_eq!(report.reconcile.upserted, 1);
    assert_eq!(report.reconcile.pushed, 1);
    assert_eq!(report.push.pushed, 1);
    assert_eq!(report.push.rekeyed, 1);
    assert_eq!(report.push.remaining, 0);

    assert!(book.get(&added.id).is_none());
    assert!(book.items().iter().all(|i| !i.is_provisional()));
    assert_eq!(book.items().len(), 2);
    assert_eq!(remote.stored().len(), 2);
}

#[tokio::test]
async fn two_clients_converge() {
    let remote = MockRemote::default();
    let alice = Quotebook::in_memory();
    let bob = Quotebook::in_memory();

    alice.add_item_at("From Alice", "Life", 100).unwrap();
    bob.add_item_at("From Bob", "Humor", 200).unwrap();

    alice.sync(&remote).await.unwrap();
    bob.sync(&remote).await.unwrap();
    alice.sync(&remote).await.unwrap();

    let mut a: Vec<String> = alice.items().into_iter().map(|i| i.id).collect();
    let mut b: Vec<String> = bob.items().into_iter().map(|i| i.id).collect();
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert_eq!(a.len(), 2);
}

// ============================================================================
// Failure Paths
// ============================================================================

#[tokio::test]
async fn busy_rejection_leaves_store_alone() {
    let backend = MemoryBackend::new();
    let book = Quotebook::open(backend.clone(), SyncConfig::default());
    book.add_item_at("A", "X", 1).unwrap();

    let slow = GatedRemote {
        entered: Notify::new(),
        release: Notify::new(),
        items: vec![item("srv-1", "Remote", "X", 5)],
    };
    let other = MockRemote::with_items(vec![item("srv-2", "Never applied", "Y", 9)]);

    let (first, second) = tokio::join!(book.reconcile(&slow), async {
        slow.entered.notified().await;
        assert_eq!(book.phase(), SyncPhase::Fetching);

        let before = backend.contents();
        let second = book.reconcile(&other).await;
        assert_eq!(backend.contents(), before);

        slow.release.notify_one();
        second
    });

    assert_eq!(second, Err(Error::Busy(SyncPhase::Fetching)));
    assert!(second.unwrap_err().is_retryable());
    assert_eq!(first.unwrap().upserted, 1);
    assert!(book.get("srv-2").is_none());
    assert_eq!(book.phase(), SyncPhase::Idle);
}

#[tokio::test]
async fn network_failure_leaves_store_byte_identical() {
    struct Down;

    #[async_trait]
    impl RemoteSource for Down {
        async fn fetch_all(&self) -> Result<Vec<Item>> {
            Err(Error::Network("connection refused".into()))
        }

        async fn push(&self, _item: &Item) -> Result<Item> {
            Err(Error::Network("connection refused".into()))
        }
    }

    let backend = MemoryBackend::new();
    let book = Quotebook::open(backend.clone(), SyncConfig::default());
    book.add_item_at("A", "X", 1).unwrap();
    let before = backend.contents();

    let err = book.sync(&Down).await.unwrap_err();

    assert!(matches!(err, Error::Network(_)));
    assert!(err.is_retryable());
    assert_eq!(backend.contents(), before);
    assert_eq!(book.phase(), SyncPhase::Idle);
}

#[tokio::test]
async fn fetch_timeout_is_network_error() {
    let config = SyncConfig {
        fetch_timeout_ms: 20,
        push_timeout_ms: 20,
    };
    let book = Quotebook::open(MemoryBackend::new(), config);

    let result = tokio::time::timeout(Duration::from_secs(5), book.reconcile(&SilentRemote))
        .await
        .expect("timeout must fire inside the pass");

    assert!(matches!(result, Err(Error::Network(_))));
    assert_eq!(book.phase(), SyncPhase::Idle);
}

#[tokio::test]
async fn cancelled_pass_returns_to_idle() {
    let book = Quotebook::in_memory();

    let cancelled = tokio::time::timeout(Duration::from_millis(20), book.reconcile(&SilentRemote))
        .await;
    assert!(cancelled.is_err());

    assert_eq!(book.phase(), SyncPhase::Idle);
    assert!(book.reconcile_items(Vec::new()).is_ok());
}

#[tokio::test]
async fn partial_push_keeps_the_rest_queued() {
    let book = Quotebook::in_memory();
    book.add_item_at("First", "X", 1).unwrap();
    book.add_item_at("Second", "X", 2).unwrap();
    book.add_item_at("Third", "X", 3).unwrap();
    let remote = MockRemote::failing_after(1);

    let report = book.push_pending(&remote).await.unwrap();

    assert_eq!(report.pushed, 1);
    assert_eq!(report.remaining, 2);
    assert!(matches!(report.error, Some(Error::Network(_))));

    let texts: Vec<String> = book
        .outbox()
        .iter()
        .filter_map(|id| book.get(id))
        .map(|i| i.text)
        .collect();
    assert_eq!(texts, vec!["Second", "Third"]);
}
