//! Integration tests for sync engine and server.

use cardsync_core::{
    srs_state_id, Collection, EntityType, Grade, Library, LocalStore, Reviewer,
};
use cardsync_sync_engine::{
    HttpFailure, HttpTransport, LoopbackClient, LoopbackServer, RetryConfig, StoreApplier,
    SyncApplier, SyncConfig, SyncEngine, SyncError,
};
use cardsync_sync_protocol::{ConflictPolicy, ConflictResolution, Endpoint};
use cardsync_sync_server::{ServerConfig, SyncServer};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

type PullHook = Box<dyn FnOnce() + Send>;

/// A server reachable over the loopback client, with fault injection.
struct ServerHandle {
    server: Arc<SyncServer>,
    failing_pushes: AtomicU32,
    on_pull: Mutex<Option<PullHook>>,
}

impl ServerHandle {
    fn fail_pushes(&self, times: u32) {
        self.failing_pushes.store(times, Ordering::SeqCst);
    }

    fn before_next_pull(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_pull.lock() = Some(Box::new(hook));
    }
}

struct Link(Arc<ServerHandle>);

impl LoopbackServer for Link {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpFailure> {
        let handle = &self.0;
        if path == Endpoint::Push.path()
            && handle
                .failing_pushes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(HttpFailure::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        if path == Endpoint::Pull.path() {
            if let Some(hook) = handle.on_pull.lock().take() {
                hook();
            }
        }
        handle
            .server
            .handle_post(path, body)
            .map_err(|e| HttpFailure::Status {
                status: e.status_code(),
                body: e.to_string(),
            })
    }
}

type Engine = SyncEngine<HttpTransport<LoopbackClient<Link>>, StoreApplier>;

struct Device {
    store: Arc<LocalStore>,
    engine: Engine,
}

impl Device {
    fn grade(&self, card_id: &str, grade: u8) {
        Reviewer::new(Arc::clone(&self.store))
            .grade(card_id, Grade::new(grade).unwrap(), Utc::now())
            .unwrap();
    }

    fn library(&self) -> Library {
        Library::new(Arc::clone(&self.store))
    }

    fn card_front(&self, card_id: &str) -> Option<String> {
        self.library()
            .cards()
            .into_iter()
            .find(|c| c.id == card_id)
            .map(|c| c.front)
    }
}

fn seeded_server() -> Arc<ServerHandle> {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    server
        .upsert_entity(
            EntityType::Document,
            json!({"id": "d1", "filename": "biology.pdf", "status": "completed",
                   "created_at": "2024-05-01T00:00:00Z"}),
        )
        .unwrap();
    server
        .upsert_entity(
            EntityType::Chapter,
            json!({"id": "ch1", "document_id": "d1", "title": "Cells", "position": 0}),
        )
        .unwrap();
    for (id, front) in [("c1", "What is a cell?"), ("c2", "What is a membrane?")] {
        server
            .upsert_entity(
                EntityType::Card,
                json!({"id": id, "document_id": "d1", "type": "qa", "front": front,
                       "back": "answer", "metadata": {}}),
            )
            .unwrap();
    }
    Arc::new(ServerHandle {
        server,
        failing_pushes: AtomicU32::new(0),
        on_pull: Mutex::new(None),
    })
}

fn connect(handle: &Arc<ServerHandle>, store: &Arc<LocalStore>, config: SyncConfig) -> Engine {
    let transport = HttpTransport::new(
        config.server_url.clone(),
        LoopbackClient::new(Link(Arc::clone(handle))),
    );
    SyncEngine::new(config, transport, StoreApplier::new(Arc::clone(store)).unwrap())
}

fn device(handle: &Arc<ServerHandle>, config: SyncConfig) -> Device {
    let store = Arc::new(LocalStore::open_in_memory());
    let engine = connect(handle, &store, config);
    engine.sync().unwrap();
    Device { store, engine }
}

fn config() -> SyncConfig {
    SyncConfig::new("https://sync.example.com").with_retry(RetryConfig::fixed(Duration::ZERO))
}

#[test]
fn first_sync_downloads_library() {
    let handle = seeded_server();
    let device = device(&handle, config());

    assert_eq!(device.library().documents().len(), 1);
    assert_eq!(device.library().chapters("d1").len(), 1);
    assert_eq!(device.library().cards().len(), 2);
    assert!(device.engine.applier().last_sync_time().is_some());
    assert!(device.engine.status().data_consistent);
}

#[test]
fn offline_grades_are_pushed_on_reconnect() {
    let handle = seeded_server();
    let a = device(&handle, config());
    let b = device(&handle, config());

    a.engine.set_online(false);
    a.grade("c1", 5);
    a.grade("c2", 4);
    assert!(matches!(a.engine.sync(), Err(SyncError::Offline)));
    assert_eq!(a.store.pending_count(), 2);

    assert!(a.engine.set_online(true));
    let result = a.engine.sync().unwrap();
    assert_eq!(result.pushed, 2);
    assert_eq!(a.store.pending_count(), 0);
    assert!(handle
        .server
        .store()
        .get(EntityType::SrsState, &srs_state_id("c1"))
        .is_some());

    b.engine.sync().unwrap();
    let schedule = Reviewer::new(Arc::clone(&b.store)).schedule("c1").unwrap();
    let local = Reviewer::new(Arc::clone(&a.store)).schedule("c1").unwrap();
    assert_eq!(schedule.due_date, local.due_date);
    assert_eq!(schedule.repetitions, 1);

    // the pulled schedule is copied into the card
    let card = b.library().cards().into_iter().find(|c| c.id == "c1").unwrap();
    assert_eq!(card.due_date, Some(local.due_date));
    assert_eq!(card.difficulty, local.ease_factor);
}

#[test]
fn offline_backlog_is_flushed_by_one_trigger() {
    let handle = seeded_server();
    handle
        .server
        .upsert_entity(
            EntityType::Card,
            json!({"id": "c3", "document_id": "d1", "type": "cloze", "front": "_ divides",
                   "back": "mitosis", "metadata": {}}),
        )
        .unwrap();
    let device = device(&handle, config());

    device.engine.set_online(false);
    let plan = [
        ("c1", 5), ("c2", 4), ("c3", 5), ("c1", 4), ("c2", 5),
        ("c1", 5), ("c3", 3), ("c2", 4), ("c1", 5), ("c3", 4),
    ];
    for (card_id, grade) in plan {
        device.grade(card_id, grade);
    }
    let queued: Vec<String> = device.store.pending_changes().into_iter().map(|p| p.id).collect();
    assert_eq!(queued.len(), 10);

    let offline = device.engine.trigger_sync();
    assert!(!offline.success);
    assert_eq!(device.engine.status().pending_changes, 10);

    assert!(device.engine.set_online(true));
    let result = device.engine.trigger_sync();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.pushed, 3);
    assert_eq!(device.engine.status().pending_changes, 0);
    assert!(device.store.pending_changes().is_empty());

    let reviewer = Reviewer::new(Arc::clone(&device.store));
    for (card_id, repetitions) in [("c1", 4), ("c2", 3), ("c3", 3)] {
        let local = reviewer.schedule(card_id).unwrap();
        assert_eq!(local.repetitions, repetitions);
        let remote = handle
            .server
            .store()
            .get(EntityType::SrsState, &srs_state_id(card_id))
            .unwrap();
        assert_eq!(remote["repetitions"], json!(local.repetitions));
        assert_eq!(remote["interval"], json!(local.interval));
        assert_eq!(remote["ease_factor"].as_f64(), Some(local.ease_factor));
    }
}

#[test]
fn concurrent_grades_converge_on_server_version() {
    let handle = seeded_server();
    let a = device(&handle, config());
    let b = device(&handle, config());

    a.grade("c1", 5);
    b.grade("c1", 3);

    a.engine.sync().unwrap();
    let result = b.engine.sync().unwrap();
    assert_eq!(result.conflicts, 1);
    assert!(!result.full_sync_performed);

    let conflicts = b.engine.conflicts();
    assert!(!conflicts.is_empty());
    assert!(conflicts
        .iter()
        .all(|c| c.entity_type == EntityType::SrsState
            && c.resolution == Some(ConflictResolution::ServerWins)));

    a.engine.sync().unwrap();
    let on_a = Reviewer::new(Arc::clone(&a.store)).schedule("c1").unwrap();
    let on_b = Reviewer::new(Arc::clone(&b.store)).schedule("c1").unwrap();
    assert_eq!(on_a.ease_factor, on_b.ease_factor);
    assert_eq!(on_a.interval, on_b.interval);
    assert_eq!(on_a.due_date, on_b.due_date);
    assert_eq!(a.store.pending_count(), 0);
    assert_eq!(b.store.pending_count(), 0);
    assert!(b.engine.status().data_consistent);
}

#[test]
fn client_wins_policy_overrides_server() {
    let handle = seeded_server();
    let a = device(&handle, config());
    let b = device(
        &handle,
        config().with_conflict_policy(ConflictPolicy::ClientWins),
    );

    a.grade("c1", 5);
    b.grade("c1", 3);
    a.engine.sync().unwrap();
    b.engine.sync().unwrap();
    a.engine.sync().unwrap();

    let expected = Reviewer::new(Arc::clone(&b.store)).schedule("c1").unwrap();
    let on_a = Reviewer::new(Arc::clone(&a.store)).schedule("c1").unwrap();
    assert_eq!(on_a.ease_factor, expected.ease_factor);
    assert!(b
        .engine
        .conflicts()
        .iter()
        .all(|c| c.resolution == Some(ConflictResolution::ClientWins)));
}

#[test]
fn manual_resolution_reaches_other_devices() {
    let handle = seeded_server();
    let a = device(&handle, config());
    let b = device(&handle, config().with_conflict_policy(ConflictPolicy::Manual));

    a.grade("c1", 5);
    b.grade("c1", 3);
    a.engine.sync().unwrap();
    b.engine.sync().unwrap();
    assert_eq!(handle.server.store().pending_conflicts(), 1);

    let conflict = b.engine.conflicts().remove(0);
    assert!(conflict.resolution.is_none());
    let merged = json!({
        "id": srs_state_id("c1"), "card_id": "c1", "ease_factor": 2.0, "interval": 3,
        "repetitions": 1, "due_date": "2030-01-01T00:00:00Z", "last_reviewed": "2029-12-29T00:00:00Z"
    });
    b.engine
        .resolve_conflict(&conflict.conflict_id, ConflictResolution::Merge, Some(merged))
        .unwrap();
    assert_eq!(handle.server.store().pending_conflicts(), 0);

    a.engine.sync().unwrap();
    b.engine.sync().unwrap();
    for device in [&a, &b] {
        let schedule = Reviewer::new(Arc::clone(&device.store)).schedule("c1").unwrap();
        assert_eq!(schedule.ease_factor, 2.0);
        assert_eq!(schedule.interval, 3);
    }
}

#[test]
fn failed_push_loses_nothing() {
    let handle = seeded_server();
    let a = device(&handle, config());
    let watermark = a.engine.applier().last_sync_time();

    a.grade("c1", 4);
    handle.fail_pushes(1);
    let err = a.engine.sync().unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(a.store.pending_count(), 1);
    assert_eq!(a.engine.applier().last_sync_time(), watermark);
    assert_eq!(a.engine.stats().cycles_failed, 1);

    let result = a.engine.sync().unwrap();
    assert_eq!(result.pushed, 1);
    assert_eq!(a.store.pending_count(), 0);
}

#[test]
fn sync_with_retry_rides_out_outage() {
    let handle = seeded_server();
    let a = device(&handle, config());

    a.grade("c2", 5);
    handle.fail_pushes(2);
    let result = a.engine.sync_with_retry(3).unwrap();
    assert!(result.success);
    assert_eq!(a.store.pending_count(), 0);
}

#[test]
fn repeated_sync_is_stable() {
    let handle = seeded_server();
    let a = device(&handle, config());
    a.grade("c1", 5);
    a.engine.sync().unwrap();

    let cards = a.store.get_values(Collection::Cards);
    let states = a.store.get_values(Collection::SrsStates);
    let result = a.engine.sync().unwrap();
    assert_eq!(result.pushed, 0);
    assert_eq!(result.pulled, 0);
    assert_eq!(a.store.get_values(Collection::Cards), cards);
    assert_eq!(a.store.get_values(Collection::SrsStates), states);
}

#[test]
fn divergence_triggers_full_sync() {
    let handle = seeded_server();
    let a = device(&handle, config());

    // lose the documents behind the log's back
    a.store.save::<serde_json::Value>(Collection::Documents, &[]).unwrap();
    assert!(a.library().documents().is_empty());

    let result = a.engine.sync().unwrap();
    assert!(result.full_sync_performed);
    assert_eq!(a.engine.stats().full_syncs, 1);
    assert_eq!(a.library().documents().len(), 1);
    assert!(a.engine.status().data_consistent);
}

#[test]
fn local_edit_during_pull_is_deferred() {
    let handle = seeded_server();
    let a = device(&handle, config());
    let b = device(&handle, config());

    a.library()
        .update_card("c1", "edited on a", "answer", Utc::now())
        .unwrap();
    a.engine.sync().unwrap();

    let library = b.library();
    handle.before_next_pull(move || {
        library
            .update_card("c1", "edited on b", "answer", Utc::now())
            .unwrap();
    });
    let result = b.engine.sync().unwrap();
    assert_eq!(result.deferred, 1);
    assert_eq!(b.card_front("c1").as_deref(), Some("edited on b"));
    assert_eq!(b.store.pending_count(), 1);

    // the deferred edit goes out with the next cycle
    let result = b.engine.sync().unwrap();
    assert_eq!(result.pushed, 1);
    assert_eq!(b.store.pending_count(), 0);

    a.engine.sync().unwrap();
    assert_eq!(a.card_front("c1").as_deref(), Some("edited on b"));
}

#[test]
fn document_delete_cascades_to_other_devices() {
    let handle = seeded_server();
    let a = device(&handle, config());
    let b = device(&handle, config());

    b.grade("c1", 5);
    b.engine.sync().unwrap();
    a.engine.sync().unwrap();

    a.library().delete_document("d1", Utc::now()).unwrap();
    a.engine.sync().unwrap();
    assert_eq!(handle.server.entity_count(), 0);

    b.engine.sync().unwrap();
    assert!(b.library().documents().is_empty());
    assert!(b.library().chapters("d1").is_empty());
    assert!(b.library().cards().is_empty());
    assert!(Reviewer::new(Arc::clone(&b.store)).schedule("c1").is_none());
    assert!(b.engine.status().data_consistent);
}

#[test]
fn pending_log_survives_restart() {
    let handle = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let client_id;
    {
        let store = Arc::new(LocalStore::open(dir.path()).unwrap());
        let engine = connect(&handle, &store, config());
        engine.sync().unwrap();
        client_id = engine.applier().client_id().to_string();

        engine.set_online(false);
        Reviewer::new(Arc::clone(&store))
            .grade("c1", Grade::new(4).unwrap(), Utc::now())
            .unwrap();
    }

    let store = Arc::new(LocalStore::open(dir.path()).unwrap());
    assert_eq!(store.pending_count(), 1);
    let engine = connect(&handle, &store, config());
    assert_eq!(engine.applier().client_id(), client_id);

    let result = engine.sync().unwrap();
    assert_eq!(result.pushed, 1);
    assert_eq!(store.pending_count(), 0);
    assert!(handle
        .server
        .store()
        .get(EntityType::SrsState, &srs_state_id("c1"))
        .is_some());
}
