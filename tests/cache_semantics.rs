/// End-to-end semantics of the caching engine, liveness tracking, and
/// socket bookkeeping, exercised against the in-memory store with
/// injected fetch closures in place of the network.
use concrnt_client::cache::{CacheEngine, CacheOptions, CachePolicy};
use concrnt_client::liveness::LivenessTracker;
use concrnt_client::socket::TimelineSocket;
use concrnt_client::store::{Entry, KvStore, MemoryStore};
use concrnt_client::{Client, ClientError};
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TEST_KEY: &str = "8a2c7b4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f708192a3b4c5d6e7f809";
const CCID: &str = "con1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn engine() -> (Arc<MemoryStore>, Arc<CacheEngine>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(CacheEngine::new(
        store.clone(),
        None,
        Duration::from_secs(300),
    ));
    (store, engine)
}

#[tokio::test]
async fn concurrent_reads_coalesce_into_one_request() {
    let (_, engine) = engine();
    let hits = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let engine = engine.clone();
        let hits = hits.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .fetch::<Value, _>("message:m1", &CacheOptions::default(), move || {
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Some(json!({"v": 1})))
                    }
                    .boxed()
                })
                .await
        }));
    }

    for task in tasks {
        let value = task.await.unwrap().unwrap();
        assert_eq!(value, Some(json!({"v": 1})));
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_hit_is_served_while_revalidating() {
    let (store, engine) = engine();

    // A value well past its freshness window
    store
        .set_raw(
            "message:m1",
            Entry {
                data: Some(json!({"v": 1})),
                timestamp: chrono::Utc::now() - chrono::Duration::seconds(10),
            },
        )
        .await;

    let opts = CacheOptions::<Value>::ttl(Duration::from_secs(5));
    let value = engine
        .fetch("message:m1", &opts, || {
            async { Ok(Some(json!({"v": 2}))) }.boxed()
        })
        .await
        .unwrap();
    // The stale value answers immediately
    assert_eq!(value, Some(json!({"v": 1})));

    // ... while the refresh lands in the background
    tokio::time::sleep(Duration::from_millis(100)).await;
    let entry = store.get("message:m1").await.unwrap().unwrap();
    assert_eq!(entry.data, Some(json!({"v": 2})));

    // A follow-up read gets the fresh value without touching the network
    let value = engine
        .fetch("message:m1", &opts, || {
            panic!("refreshed entry must be served from cache")
        })
        .await
        .unwrap();
    assert_eq!(value, Some(json!({"v": 2})));
}

#[tokio::test]
async fn missing_resource_is_negatively_cached() {
    let (store, engine) = engine();

    let value: Option<Value> = engine
        .fetch("message:gone", &CacheOptions::default(), || {
            async { Ok(None) }.boxed()
        })
        .await
        .unwrap();
    assert_eq!(value, None);
    assert!(store.get("message:gone").await.unwrap().unwrap().is_negative());

    // Within the negative window no network call happens
    let value: Option<Value> = engine
        .fetch("message:gone", &CacheOptions::default(), || {
            panic!("negative entry must suppress the fetch")
        })
        .await
        .unwrap();
    assert_eq!(value, None);

    // Once the window lapses the resource is fetched again
    store
        .set_raw(
            "message:gone",
            Entry {
                data: None,
                timestamp: chrono::Utc::now() - chrono::Duration::seconds(301),
            },
        )
        .await;
    let value: Option<Value> = engine
        .fetch("message:gone", &CacheOptions::default(), || {
            async { Ok(Some(json!({"v": 3}))) }.boxed()
        })
        .await
        .unwrap();
    assert_eq!(value, Some(json!({"v": 3})));
}

#[tokio::test]
async fn offline_host_backs_off_then_recovers() {
    let store = Arc::new(MemoryStore::new());
    let tracker = LivenessTracker::new(store.clone());

    tracker.mark_offline("peer.example").await;

    // Two checks inside the 750ms window refuse the host
    assert!(!tracker.is_online("peer.example").await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!tracker.is_online("peer.example").await);

    // After the window the host is probed again
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(tracker.is_online("peer.example").await);
}

#[tokio::test]
async fn repeated_failures_grow_the_backoff_window() {
    let store = Arc::new(MemoryStore::new());
    let tracker = LivenessTracker::new(store.clone());

    for _ in 0..4 {
        tracker.mark_offline("peer.example").await;
    }

    // 500ms * 1.5^4 is over 2.5s, so a second later it is still offline
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(!tracker.is_online("peer.example").await);

    // A single success clears the state entirely
    tracker.mark_online("peer.example").await;
    assert!(tracker.is_online("peer.example").await);
}

#[tokio::test]
async fn socket_announces_the_full_channel_set() {
    let store = Arc::new(MemoryStore::new());
    let socket = TimelineSocket::new(store, "a.example");

    let listener: concrnt_client::Listener = Arc::new(|_| {});
    socket
        .listen(&["t2".to_string(), "t1".to_string()], listener.clone())
        .await;

    // The refreshed frame carries every current id, deterministically
    assert_eq!(socket.current_channels(), vec!["t1", "t2"]);

    socket.unlisten(&["t1".to_string()], &listener).await;
    assert_eq!(socket.current_channels(), vec!["t2"]);
}

#[tokio::test]
async fn timeline_suffix_resolution_uses_the_entity_record() {
    let client = Client::guest("home.example").unwrap();

    client
        .store()
        .set(
            &format!("entity:{}", CCID),
            Some(json!({
                "ccid": CCID,
                "tag": "",
                "domain": "their.example",
                "cdate": "2024-01-01T00:00:00Z"
            })),
        )
        .await
        .unwrap();

    assert_eq!(
        client
            .resolve_timeline_host(&format!("t1@{}", CCID))
            .await
            .unwrap(),
        "their.example"
    );
    assert_eq!(
        client.resolve_timeline_host("t1@raw.example").await.unwrap(),
        "raw.example"
    );
    assert_eq!(
        client.resolve_timeline_host("t1").await.unwrap(),
        "home.example"
    );
}

#[tokio::test]
async fn cached_message_read_maps_negative_entry_to_not_found() {
    let client = Client::new("home.example", TEST_KEY).unwrap();

    // The socket (or an earlier 404) recorded the message as absent
    client.store().set("message:m1", None).await.unwrap();

    match client.get_message("m1", None).await {
        Err(ClientError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {:?}", other.map(|m| m.id)),
    }
}
