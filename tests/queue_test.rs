//! Queue service workflows over the in-memory ledger.

use assignq::content::{ContentKey, ContentStore};
use assignq::ledger::{Ledger, MemoryLedger};
use assignq::model::{Actor, ActorId, Item, ItemId, ItemState};
use assignq::{Error, QueueService, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

async fn test_queue() -> (tempfile::TempDir, QueueService<MemoryLedger>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let content = ContentStore::open(dir.path()).await.expect("open store");
    (dir, QueueService::new(Arc::new(MemoryLedger::new()), content))
}

// ---------------------------------------------------------------------------
// A ledger whose writes can be made to fail on demand
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FlakyLedger {
    inner: MemoryLedger,
    fail_create: AtomicBool,
    fail_assign: AtomicBool,
    /// Deleted when an injected assign failure fires, so the restore fails too.
    blob_to_remove: Mutex<Option<PathBuf>>,
}

impl Ledger for FlakyLedger {
    async fn create_item(&self, content_key: &ContentKey) -> Result<Item> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Constraint("injected insert failure".to_string()));
        }
        self.inner.create_item(content_key).await
    }

    async fn get_item(&self, id: ItemId) -> Result<Item> {
        self.inner.get_item(id).await
    }

    async fn claim_next(&self) -> Result<Option<Item>> {
        self.inner.claim_next().await
    }

    async fn assign(&self, id: ItemId, assignee_id: ActorId) -> Result<Item> {
        if self.fail_assign.load(Ordering::SeqCst) {
            let blob = self.blob_to_remove.lock().unwrap().take();
            if let Some(path) = blob {
                std::fs::remove_file(path).unwrap();
            }
            return Err(Error::Other("injected assign failure".to_string()));
        }
        self.inner.assign(id, assignee_id).await
    }

    async fn release(&self, id: ItemId) -> Result<Item> {
        self.inner.release(id).await
    }

    async fn release_expired(&self, lease: Duration) -> Result<Vec<ItemId>> {
        self.inner.release_expired(lease).await
    }

    async fn find_or_create_actor(&self, name: &str) -> Result<Actor> {
        self.inner.find_or_create_actor(name).await
    }

    async fn get_actor(&self, id: ActorId) -> Result<Actor> {
        self.inner.get_actor(id).await
    }
}

async fn flaky_queue() -> (tempfile::TempDir, QueueService<FlakyLedger>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let content = ContentStore::open(dir.path()).await.expect("open store");
    (dir, QueueService::new(Arc::new(FlakyLedger::default()), content))
}

// ---------------------------------------------------------------------------
// Submit / next / edit walkthrough
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hello_world_walkthrough() {
    let (_dir, queue) = test_queue().await;

    let id = queue.submit("hello").await.unwrap();
    assert_eq!(id, ItemId(1));
    let key = queue.ledger().get_item(id).await.unwrap().content_key;
    assert_eq!(queue.content().read(&key).await.unwrap(), "hello");

    let view = queue.next_available().await.unwrap().expect("item 1 available");
    assert_eq!(view.item.id, ItemId(1));
    assert_eq!(view.content, "hello");
    assert_eq!(view.item.state, ItemState::Claimed);

    assert!(queue.next_available().await.unwrap().is_none());

    // Seven actors, so the last one has id 7.
    let mut actor = None;
    for name in ["a", "b", "c", "d", "e", "f", "g"] {
        actor = Some(queue.find_or_create_actor(name).await.unwrap());
    }
    let actor = actor.unwrap();
    assert_eq!(actor.id, ActorId(7));

    let edited = queue
        .edit_and_assign(ItemId(1), "hello world", actor.id)
        .await
        .unwrap();
    assert_eq!(edited, ItemId(1));

    let view = queue.get(ItemId(1)).await.unwrap();
    assert_eq!(view.content, "hello world");
    assert_eq!(view.item.assignee_id, Some(ActorId(7)));
    assert_eq!(view.item.state, ItemState::Assigned);
}

#[tokio::test]
async fn submit_then_get_round_trips_content() {
    let (_dir, queue) = test_queue().await;

    for content in ["plain", "", "multi\nline\n", "emoji 🚀 and ünïcödé"] {
        let id = queue.submit(content).await.unwrap();
        assert_eq!(queue.get(id).await.unwrap().content, content);
    }
}

#[tokio::test]
async fn next_available_on_empty_or_fully_assigned_queue_is_none() {
    let (_dir, queue) = test_queue().await;
    assert!(queue.next_available().await.unwrap().is_none());

    let actor = queue.find_or_create_actor("kelly").await.unwrap();
    let id = queue.submit("only one").await.unwrap();
    queue.edit_and_assign(id, "done", actor.id).await.unwrap();

    assert!(queue.next_available().await.unwrap().is_none());
}

#[tokio::test]
async fn items_are_handed_out_in_creation_order() {
    let (_dir, queue) = test_queue().await;
    for i in 1..=3 {
        queue.submit(&format!("message {i}")).await.unwrap();
    }

    for i in 1..=3 {
        let view = queue.next_available().await.unwrap().unwrap();
        assert_eq!(view.item.id, ItemId(i));
        assert_eq!(view.content, format!("message {i}"));
    }
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_callers_racing_over_three_items_get_distinct_ids() {
    let (_dir, queue) = test_queue().await;
    for content in ["one", "two", "three"] {
        queue.submit(content).await.unwrap();
    }

    let a = tokio::spawn({
        let queue = queue.clone();
        async move { queue.next_available().await }
    });
    let b = tokio::spawn({
        let queue = queue.clone();
        async move { queue.next_available().await }
    });

    let results = tokio::time::timeout(Duration::from_secs(5), async {
        (a.await.unwrap().unwrap(), b.await.unwrap().unwrap())
    })
    .await
    .expect("claims must not block");

    let a = results.0.expect("claim a");
    let b = results.1.expect("claim b");
    assert_ne!(a.item.id, b.item.id);
    for view in [a, b] {
        assert!((1..=3).contains(&view.item.id.0));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_claims_hand_out_each_item_at_most_once() {
    let (_dir, queue) = test_queue().await;
    let items = 8;
    for i in 0..items {
        queue.submit(&format!("message {i}")).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..20 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move { queue.next_available().await }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        if let Some(view) = handle.await.unwrap().unwrap() {
            assert_eq!(view.content, format!("message {}", view.item.id.0 - 1));
            assert!(seen.insert(view.item.id), "item {} handed out twice", view.item.id);
        }
    }
    assert_eq!(seen.len(), items);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_find_or_create_actor_agrees_on_one_id() {
    let (_dir, queue) = test_queue().await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            queue.find_or_create_actor("fresh-name").await.unwrap().id
        }));
    }
    let first = handles.remove(0).await.unwrap();
    let second = handles.remove(0).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(queue.find_or_create_actor("fresh-name").await.unwrap().id, first);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_edits_of_one_item_assign_exactly_once() {
    let (_dir, queue) = test_queue().await;
    let id = queue.submit("original").await.unwrap();
    queue.next_available().await.unwrap().unwrap();

    let mut handles = Vec::new();
    for name in ["alice", "bob", "carol", "dave"] {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let actor = queue.find_or_create_actor(name).await.unwrap();
            let content = format!("edited by {name}");
            queue
                .edit_and_assign(id, &content, actor.id)
                .await
                .map(|_| (actor.id, content))
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(win) => winners.push(win),
            Err(e) => assert!(matches!(e, Error::InvalidTransition { .. }), "got {e:?}"),
        }
    }
    assert_eq!(winners.len(), 1);

    let (winner, content) = winners.remove(0);
    let view = queue.get(id).await.unwrap();
    assert_eq!(view.item.assignee_id, Some(winner));
    assert_eq!(view.content, content);
    assert_eq!(queue.content().held_locks(), 0);
}

// ---------------------------------------------------------------------------
// Edit failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn edit_with_unknown_actor_changes_nothing() {
    let (_dir, queue) = test_queue().await;
    let id = queue.submit("original").await.unwrap();
    queue.next_available().await.unwrap().unwrap();

    let err = queue
        .edit_and_assign(id, "edited", ActorId(404))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");

    let view = queue.get(id).await.unwrap();
    assert_eq!(view.content, "original");
    assert_eq!(view.item.state, ItemState::Claimed);
    assert!(view.item.assignee_id.is_none());
}

#[tokio::test]
async fn edit_of_unknown_item_is_not_found() {
    let (_dir, queue) = test_queue().await;
    let actor = queue.find_or_create_actor("kelly").await.unwrap();

    let err = queue
        .edit_and_assign(ItemId(9), "edited", actor.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn edit_of_assigned_item_is_rejected_before_writing() {
    let (_dir, queue) = test_queue().await;
    let first = queue.find_or_create_actor("first").await.unwrap();
    let second = queue.find_or_create_actor("second").await.unwrap();
    let id = queue.submit("original").await.unwrap();
    queue.edit_and_assign(id, "first edit", first.id).await.unwrap();

    let err = queue
        .edit_and_assign(id, "second edit", second.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }), "got {err:?}");
    assert_eq!(err.status_code(), 409);

    let view = queue.get(id).await.unwrap();
    assert_eq!(view.content, "first edit");
    assert_eq!(view.item.assignee_id, Some(first.id));
}

#[tokio::test]
async fn failed_assignment_restores_previous_content() {
    let (_dir, queue) = flaky_queue().await;
    let actor = queue.find_or_create_actor("kelly").await.unwrap();
    let id = queue.submit("original").await.unwrap();
    queue.next_available().await.unwrap().unwrap();

    queue.ledger().fail_assign.store(true, Ordering::SeqCst);
    let err = queue.edit_and_assign(id, "edited", actor.id).await.unwrap_err();
    assert!(matches!(err, Error::Other(ref msg) if msg.contains("injected")));

    let view = queue.get(id).await.unwrap();
    assert_eq!(view.content, "original");
    assert_eq!(view.item.state, ItemState::Claimed);
    assert!(view.item.assignee_id.is_none());

    // Retrying the whole operation succeeds once the ledger recovers.
    queue.ledger().fail_assign.store(false, Ordering::SeqCst);
    queue.edit_and_assign(id, "edited", actor.id).await.unwrap();
    assert_eq!(queue.get(id).await.unwrap().content, "edited");
}

#[tokio::test]
async fn failed_assignment_with_failed_restore_is_consistency_fault() {
    let (_dir, queue) = flaky_queue().await;
    let actor = queue.find_or_create_actor("lee").await.unwrap();
    let id = queue.submit("original").await.unwrap();
    queue.next_available().await.unwrap().unwrap();

    let key = queue.ledger().get_item(id).await.unwrap().content_key;
    let blob = queue.content().root().join(format!("{key}.txt"));
    *queue.ledger().blob_to_remove.lock().unwrap() = Some(blob.clone());
    queue.ledger().fail_assign.store(true, Ordering::SeqCst);

    let err = queue.edit_and_assign(id, "edited", actor.id).await.unwrap_err();
    assert!(
        matches!(err, Error::ConsistencyFault(ref msg) if msg.contains("injected")),
        "got {err:?}"
    );
    assert_eq!(err.status_code(), 500);

    let item = queue.ledger().get_item(id).await.unwrap();
    assert!(item.assignee_id.is_none());
    assert_eq!(item.state, ItemState::Claimed);
    assert!(!blob.exists());
    assert_eq!(queue.content().held_locks(), 0);
}

// ---------------------------------------------------------------------------
// Ledger/content disagreements
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_ledger_insert_leaves_orphaned_blob_and_reports_error() {
    let (dir, queue) = flaky_queue().await;
    queue.ledger().fail_create.store(true, Ordering::SeqCst);

    let err = queue.submit("lost").await.unwrap_err();
    assert!(matches!(err, Error::Constraint(_)), "got {err:?}");

    let blobs: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(blobs.len(), 1, "blob is written before the ledger row");
    assert!(queue.next_available().await.unwrap().is_none());
}

#[tokio::test]
async fn missing_blob_is_a_consistency_fault() {
    let (dir, queue) = test_queue().await;
    let id = queue.submit("vanishing").await.unwrap();
    let key = queue.ledger().get_item(id).await.unwrap().content_key;
    std::fs::remove_file(dir.path().join(format!("{key}.txt"))).unwrap();

    let err = queue.next_available().await.unwrap_err();
    assert!(matches!(err, Error::ConsistencyFault(_)), "got {err:?}");
    assert_eq!(err.status_code(), 500);

    // The row stays claimed rather than being handed out again.
    assert_eq!(
        queue.ledger().get_item(id).await.unwrap().state,
        ItemState::Claimed
    );
    assert!(queue.next_available().await.unwrap().is_none());

    let err = queue.get(id).await.unwrap_err();
    assert!(matches!(err, Error::ConsistencyFault(_)));
}

// ---------------------------------------------------------------------------
// Actors and releases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn find_or_create_actor_returns_same_id_twice() {
    let (_dir, queue) = test_queue().await;
    let first = queue.find_or_create_actor("kelly").await.unwrap();
    let second = queue.find_or_create_actor("kelly").await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.name, "kelly");
}

#[tokio::test]
async fn blank_actor_name_is_invalid_input() {
    let (_dir, queue) = test_queue().await;
    let err = queue.find_or_create_actor("   ").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn released_item_is_claimable_again() {
    let (_dir, queue) = test_queue().await;
    let id = queue.submit("retry me").await.unwrap();
    queue.next_available().await.unwrap().unwrap();

    let item = queue.release(id).await.unwrap();
    assert_eq!(item.state, ItemState::Unassigned);

    let view = queue.next_available().await.unwrap().unwrap();
    assert_eq!(view.item.id, id);
    assert_eq!(view.content, "retry me");
}

#[tokio::test]
async fn release_expired_returns_stale_claims() {
    let (_dir, queue) = test_queue().await;
    let id = queue.submit("stale").await.unwrap();
    queue.next_available().await.unwrap().unwrap();

    assert!(
        queue
            .release_expired(Duration::from_secs(3600))
            .await
            .unwrap()
            .is_empty()
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    let released = queue.release_expired(Duration::ZERO).await.unwrap();
    assert_eq!(released, vec![id]);
    assert_eq!(queue.next_available().await.unwrap().unwrap().item.id, id);
}

#[tokio::test]
async fn submit_with_unwritable_store_creates_no_item() {
    let (_dir, queue) = test_queue().await;
    std::fs::remove_dir_all(queue.content().root()).unwrap();

    let err = queue.submit("lost").await.unwrap_err();
    assert!(matches!(err, Error::Storage(_)), "got {err:?}");
    assert!(queue.ledger().claim_next().await.unwrap().is_none());
}
