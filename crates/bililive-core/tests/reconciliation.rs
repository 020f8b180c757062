//! End-to-end reconciliation scenarios against in-memory fakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bililive_core::{
    AreaPath, EngineConfig, LiveApi, LiveError, NotificationSink, ReconciliationEngine,
    Result, RoomRecord, RoomSnapshot, RoomUpdate,
};
use bililive_core::api::parse_room_base_info;
use chrono::{TimeZone, Utc};
use tokio::sync::Notify;

/// Upstream whose world state the test edits between ticks.
#[derive(Default)]
struct FakeApi {
    rooms: Mutex<HashMap<String, RoomSnapshot>>,
    fail_next: Mutex<Option<LiveError>>,
    batches: Mutex<Vec<Vec<String>>>,
    /// When set, key frame lookups park until `frame_gate` is notified.
    gate_frames: AtomicBool,
    frame_waiting: Notify,
    frame_gate: Notify,
}

impl FakeApi {
    fn set(&self, snapshot: RoomSnapshot) {
        self.rooms
            .lock()
            .unwrap()
            .insert(snapshot.room_id.clone(), snapshot);
    }

    fn fail_once(&self, error: LiveError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    fn ever_requested(&self, room_id: &str) -> usize {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .filter(|batch| batch.iter().any(|id| id == room_id))
            .count()
    }
}

#[async_trait]
impl LiveApi for FakeApi {
    async fn fetch_rooms(&self, room_ids: &[String]) -> Result<HashMap<String, RoomSnapshot>> {
        self.batches.lock().unwrap().push(room_ids.to_vec());
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }
        let rooms = self.rooms.lock().unwrap();
        Ok(room_ids
            .iter()
            .filter_map(|id| rooms.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }

    async fn key_frame(&self, user_id: &str) -> Result<String> {
        if self.gate_frames.load(Ordering::SeqCst) {
            self.frame_waiting.notify_one();
            self.frame_gate.notified().await;
        }
        Ok(format!("https://frames.example/{}.jpg", user_id))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SinkCall {
    Start { room_id: String, title: String },
    Edit { handle: u32, title: String, history: Vec<String> },
    End { handle: u32, stopped: bool },
    Warning(String),
}

/// Sink that records every call and can be told to fail the next one.
#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    next_handle: AtomicU32,
    fail_next: Mutex<Option<LiveError>>,
    /// When set, edits behave as if the message was gone and hand out a new handle.
    replace_on_edit: AtomicBool,
}

impl RecordingSink {
    fn take_failure(&self) -> Result<()> {
        match self.fail_next.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    type Handle = u32;

    async fn send_start(&self, record: &RoomRecord<u32>) -> Result<u32> {
        self.take_failure()?;
        self.calls.lock().unwrap().push(SinkCall::Start {
            room_id: record.room_id.clone(),
            title: record.current_title.clone().unwrap_or_default(),
        });
        Ok(self.next_handle.fetch_add(1, Ordering::SeqCst) + 100)
    }

    async fn edit_in_place(&self, handle: &u32, record: &RoomRecord<u32>) -> Result<u32> {
        self.take_failure()?;
        self.calls.lock().unwrap().push(SinkCall::Edit {
            handle: *handle,
            title: record.current_title.clone().unwrap_or_default(),
            history: record.title_history.clone(),
        });
        if self.replace_on_edit.load(Ordering::SeqCst) {
            return Ok(self.next_handle.fetch_add(1, Ordering::SeqCst) + 100);
        }
        Ok(*handle)
    }

    async fn mark_ended(&self, handle: &u32, record: &RoomRecord<u32>) -> Result<()> {
        self.take_failure()?;
        self.calls.lock().unwrap().push(SinkCall::End {
            handle: *handle,
            stopped: record.session_stop.is_some(),
        });
        Ok(())
    }

    async fn send_warning(&self, text: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::Warning(text.to_string()));
        Ok(())
    }
}

fn snapshot(room_id: &str, title: &str, living: bool) -> RoomSnapshot {
    RoomSnapshot {
        room_id: room_id.to_string(),
        user_id: "8080".to_string(),
        display_name: "streamer".to_string(),
        title: title.to_string(),
        cover_url: "https://covers.example/a.jpg".to_string(),
        area: AreaPath::new("Games", "Puzzle"),
        is_living: living,
        live_since: living.then(|| Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
    }
}

fn setup() -> (Arc<FakeApi>, ReconciliationEngine<RecordingSink>) {
    let api = Arc::new(FakeApi::default());
    let config = EngineConfig::new()
        .with_poll_interval(Duration::from_secs(1))
        .with_transport_backoff(Duration::from_secs(5))
        .with_destination_backoff(Duration::from_secs(30));
    let engine = ReconciliationEngine::new(api.clone(), RecordingSink::default(), config);
    (api, engine)
}

fn calls(engine: &ReconciliationEngine<RecordingSink>) -> Vec<SinkCall> {
    engine.sink().calls.lock().unwrap().clone()
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_session_lifecycle_start_update_end() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;

    // Tick 1: offline.
    api.set(snapshot("114", "A", false));
    engine.poll_once().await.unwrap();
    assert!(calls(&engine).is_empty());
    let record = engine.room("114").await.unwrap();
    assert_eq!(record.is_living, Some(false));

    // Tick 2: goes live with title A.
    api.set(snapshot("114", "A", true));
    engine.poll_once().await.unwrap();
    assert_eq!(
        calls(&engine),
        vec![SinkCall::Start {
            room_id: "114".into(),
            title: "A".into()
        }]
    );
    let record = engine.room("114").await.unwrap();
    assert_eq!(record.is_living, Some(true));
    assert!(record.session_start.is_some());
    assert!(record.title_history.is_empty());
    assert_eq!(record.message, Some(100));

    // Tick 3: title changes to B.
    api.set(snapshot("114", "B", true));
    engine.poll_once().await.unwrap();
    assert_eq!(
        calls(&engine)[1],
        SinkCall::Edit {
            handle: 100,
            title: "B".into(),
            history: vec!["A".into()]
        }
    );
    let record = engine.room("114").await.unwrap();
    assert_eq!(record.title_history, vec!["A".to_string()]);
    assert_eq!(record.current_title.as_deref(), Some("B"));

    // Tick 4: stream ends.
    api.set(snapshot("114", "B", false));
    engine.poll_once().await.unwrap();
    assert_eq!(
        calls(&engine)[2],
        SinkCall::End {
            handle: 100,
            stopped: true
        }
    );
    let record = engine.room("114").await.unwrap();
    assert_eq!(record.is_living, Some(false));
    assert!(record.session_stop.is_some());
    assert!(record.title_history.is_empty());
    assert!(record.message.is_none());
}

#[tokio::test]
async fn test_unchanged_live_room_sends_nothing() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;

    api.set(snapshot("114", "A", true));
    engine.poll_once().await.unwrap();
    let before = engine.room("114").await.unwrap();

    engine.poll_once().await.unwrap();
    engine.poll_once().await.unwrap();

    assert_eq!(calls(&engine).len(), 1);
    assert_eq!(engine.room("114").await.unwrap(), before);
}

#[tokio::test]
async fn test_repeated_title_is_not_appended_twice() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;

    api.set(snapshot("114", "T1", true));
    engine.poll_once().await.unwrap();
    api.set(snapshot("114", "T2", true));
    engine.poll_once().await.unwrap();
    engine.poll_once().await.unwrap();

    let record = engine.room("114").await.unwrap();
    assert_eq!(record.title_history, vec!["T1".to_string()]);
    assert_eq!(calls(&engine).len(), 2);
}

#[tokio::test]
async fn test_session_start_survives_zero_time() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;

    api.set(snapshot("114", "A", true));
    engine.poll_once().await.unwrap();
    let started = engine.room("114").await.unwrap().session_start;

    let mut zeroed = snapshot("114", "B", true);
    zeroed.live_since = None;
    api.set(zeroed);
    engine.poll_once().await.unwrap();
    engine.poll_once().await.unwrap();

    assert_eq!(engine.room("114").await.unwrap().session_start, started);
}

#[tokio::test]
async fn test_missing_room_is_disabled_and_pruned() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114", "999"])).await;
    api.set(snapshot("114", "A", false));

    assert_eq!(
        engine.update_room_information("999").await.unwrap(),
        RoomUpdate::Disabled
    );
    assert!(!engine.room("999").await.unwrap().is_valid);
    assert!(matches!(
        calls(&engine).as_slice(),
        [SinkCall::Warning(text)] if text.contains("999")
    ));

    assert_eq!(engine.delete_invalid_rooms().await, vec!["999".to_string()]);
    assert!(engine.room("999").await.is_none());
    assert!(!engine.is_subscribed("999").await);

    let requested_before = api.ever_requested("999");
    engine.poll_once().await.unwrap();
    engine.poll_once().await.unwrap();
    assert_eq!(api.ever_requested("999"), requested_before);
}

#[tokio::test]
async fn test_failed_send_leaves_record_untouched() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;
    api.set(snapshot("114", "A", false));
    engine.poll_once().await.unwrap();
    let before = engine.room("114").await.unwrap();

    api.set(snapshot("114", "A", true));
    *engine.sink().fail_next.lock().unwrap() =
        Some(LiveError::DestinationNotFound("chat not found".into()));
    assert_eq!(
        engine.update_room_information("114").await.unwrap(),
        RoomUpdate::Backoff(Duration::from_secs(30))
    );
    assert_eq!(engine.room("114").await.unwrap(), before);
    assert!(calls(&engine).is_empty());

    // The next tick retries the same transition.
    assert_eq!(
        engine.update_room_information("114").await.unwrap(),
        RoomUpdate::Started
    );
    assert_eq!(calls(&engine).len(), 1);
}

#[tokio::test]
async fn test_failed_end_keeps_session_open() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;
    api.set(snapshot("114", "A", true));
    engine.poll_once().await.unwrap();

    api.set(snapshot("114", "A", false));
    *engine.sink().fail_next.lock().unwrap() = Some(LiveError::Transport("reset".into()));
    assert!(matches!(
        engine.update_room_information("114").await.unwrap(),
        RoomUpdate::Backoff(_)
    ));
    let record = engine.room("114").await.unwrap();
    assert_eq!(record.is_living, Some(true));
    assert_eq!(record.message, Some(100));
    assert!(record.session_stop.is_none());

    assert_eq!(
        engine.update_room_information("114").await.unwrap(),
        RoomUpdate::Ended
    );
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_pauses_sweep() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;
    api.set(snapshot("114", "A", true));
    api.fail_once(LiveError::HttpStatus { code: 503 });

    let started = tokio::time::Instant::now();
    engine.poll_once().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(5));

    assert_eq!(engine.room("114").await.unwrap().is_living, None);
    assert!(calls(&engine).is_empty());

    engine.poll_once().await.unwrap();
    assert_eq!(engine.room("114").await.unwrap().is_living, Some(true));
}

#[tokio::test]
async fn test_protocol_error_is_fatal() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;
    api.fail_once(LiveError::RemoteProtocol {
        code: -400,
        message: "bad request".into(),
    });

    let err = engine.poll_once().await.unwrap_err();
    assert!(matches!(err, LiveError::RemoteProtocol { code: -400, .. }));
}

#[tokio::test]
async fn test_client_status_is_fatal() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;
    api.fail_once(LiveError::HttpStatus { code: 412 });
    assert!(engine.run().await.is_err());
}

#[tokio::test]
async fn test_one_batch_per_sweep() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["1", "2", "3"])).await;
    for id in ["1", "2", "3"] {
        api.set(snapshot(id, "A", false));
    }

    engine.poll_once().await.unwrap();
    assert_eq!(api.batch_count(), 1);
    engine.poll_once().await.unwrap();
    assert_eq!(api.batch_count(), 2);
}

#[tokio::test]
async fn test_subscription_management() {
    let (_api, engine) = setup();

    let added = engine
        .subscribe(&ids(&["514", "114", "514", "abc", "0", " 1919 "]))
        .await;
    assert_eq!(added, ids(&["514", "114", "1919"]));
    assert!(engine.subscribe(&ids(&["114"])).await.is_empty());

    let listed: Vec<String> = engine
        .list_rooms()
        .await
        .into_iter()
        .map(|r| r.room_id)
        .collect();
    assert_eq!(listed, ids(&["514", "114", "1919"]));

    assert_eq!(engine.unsubscribe(&ids(&["114", "810"])).await, ids(&["114"]));
    assert!(!engine.is_subscribed("114").await);
    assert_eq!(engine.list_rooms().await.len(), 2);
}

#[tokio::test]
async fn test_poll_interval_get_and_set() {
    let (_api, engine) = setup();
    assert_eq!(engine.poll_interval(), 1);
    assert_eq!(engine.set_poll_interval(30).unwrap(), 1);
    assert_eq!(engine.poll_interval(), 30);
    assert!(engine.set_poll_interval(0).is_err());
    assert_eq!(engine.poll_interval(), 30);
}

#[tokio::test]
async fn test_key_frame_needs_fetched_room() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;

    assert!(matches!(
        engine.key_frame_url("114").await,
        Err(LiveError::RoomNotFound(_))
    ));

    api.set(snapshot("114", "A", false));
    engine.poll_once().await.unwrap();
    assert_eq!(
        engine.key_frame_url("114").await.unwrap(),
        "https://frames.example/8080.jpg"
    );
}

#[tokio::test]
async fn test_unsubscribed_room_is_skipped() {
    let (_api, engine) = setup();
    assert_eq!(
        engine.update_room_information("114").await.unwrap(),
        RoomUpdate::Skipped
    );
}

#[tokio::test]
async fn test_cover_change_edits_without_history() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;
    api.set(snapshot("114", "A", true));
    engine.poll_once().await.unwrap();

    let mut recovered = snapshot("114", "A", true);
    recovered.cover_url = "https://covers.example/b.jpg".to_string();
    api.set(recovered);
    assert_eq!(
        engine.update_room_information("114").await.unwrap(),
        RoomUpdate::Updated
    );

    assert_eq!(
        calls(&engine)[1..],
        [SinkCall::Edit {
            handle: 100,
            title: "A".into(),
            history: Vec::new()
        }]
    );
    let record = engine.room("114").await.unwrap();
    assert!(record.title_history.is_empty());
    assert_eq!(
        record.cover_url.as_deref(),
        Some("https://covers.example/b.jpg")
    );
}

#[tokio::test]
async fn test_replaced_message_handle_is_committed() {
    let (api, engine) = setup();
    engine.subscribe(&ids(&["114"])).await;
    api.set(snapshot("114", "A", true));
    engine.poll_once().await.unwrap();
    assert_eq!(engine.room("114").await.unwrap().message, Some(100));

    engine.sink().replace_on_edit.store(true, Ordering::SeqCst);
    api.set(snapshot("114", "B", true));
    engine.poll_once().await.unwrap();
    assert_eq!(engine.room("114").await.unwrap().message, Some(101));

    api.set(snapshot("114", "B", false));
    engine.poll_once().await.unwrap();
    assert_eq!(
        calls(&engine).last(),
        Some(&SinkCall::End {
            handle: 101,
            stopped: true
        })
    );
}

/// Upstream answering with a fixed raw body, run through the real parser.
struct RawBodyApi(&'static str);

#[async_trait]
impl LiveApi for RawBodyApi {
    async fn fetch_rooms(&self, _room_ids: &[String]) -> Result<HashMap<String, RoomSnapshot>> {
        parse_room_base_info(self.0)
    }

    async fn key_frame(&self, _user_id: &str) -> Result<String> {
        Ok(String::new())
    }
}

#[tokio::test]
async fn test_malformed_entry_disables_only_its_room() {
    let body = r#"{"code": 0, "message": "0", "data": {"by_room_ids": {
        "114": {"room_id": 114, "uid": 8080, "live_status": 0, "title": "ok", "uname": "a"},
        "999": {"room_id": 999, "live_status": 1}
    }}}"#;
    let engine = ReconciliationEngine::new(
        Arc::new(RawBodyApi(body)),
        RecordingSink::default(),
        EngineConfig::new(),
    );
    engine.subscribe(&ids(&["114", "999"])).await;

    engine.poll_once().await.unwrap();

    assert_eq!(engine.room("114").await.unwrap().is_living, Some(false));
    assert!(!engine.is_subscribed("999").await);
    assert!(matches!(
        calls(&engine).as_slice(),
        [SinkCall::Warning(text)] if text.contains("999")
    ));
}

#[tokio::test]
async fn test_key_frame_lookup_releases_engine() {
    let (api, engine) = setup();
    let engine = Arc::new(engine);
    engine.subscribe(&ids(&["114"])).await;
    api.set(snapshot("114", "A", false));
    engine.poll_once().await.unwrap();

    api.gate_frames.store(true, Ordering::SeqCst);
    let lookup = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.key_frame_url("114").await }
    });
    api.frame_waiting.notified().await;

    // The lookup is parked upstream; the engine must stay usable meanwhile.
    let rooms = tokio::time::timeout(Duration::from_secs(1), engine.list_rooms())
        .await
        .expect("engine locked during key frame lookup");
    assert_eq!(rooms.len(), 1);

    api.frame_gate.notify_one();
    assert_eq!(
        lookup.await.unwrap().unwrap(),
        "https://frames.example/8080.jpg"
    );
}
