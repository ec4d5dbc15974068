/// Reconnecting realtime subscription socket
///
/// Maintains one WebSocket to a domain's timeline stream. Listeners are
/// registered per timeline id; the server-side channel set is kept in sync
/// with a single idempotent `listen`/`unlisten` set-reset frame whenever
/// the id set changes, and re-announced wholesale after every reconnect.
/// Incoming events update the shared cache before dispatch so a read that
/// follows an event never sees the overwritten state.
use crate::error::{ClientError, ClientResult};
use crate::liveness::backoff_threshold;
use crate::model::{SocketRequest, TimelineEvent};
use crate::store::KvStore;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

const WATCHDOG_INTERVAL_SECS: u64 = 1;
const HEARTBEAT_INTERVAL_SECS: u64 = 30;
const WAIT_OPEN_INTERVAL_MS: u64 = 200;
const WAIT_OPEN_ATTEMPTS: u32 = 10;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Callback invoked for every event on a subscribed timeline
pub type Listener = Arc<dyn Fn(&TimelineEvent) + Send + Sync>;

/// Handle to a realtime subscription socket
///
/// Dropping the handle disposes the connection and terminates the
/// supervisor tasks.
pub struct TimelineSocket {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    host: String,
    store: Arc<dyn KvStore>,
    subscriptions: Mutex<HashMap<String, Vec<Listener>>>,
    sink: AsyncMutex<Option<WsSink>>,
    started: AtomicBool,
    open: AtomicBool,
    fail_count: AtomicU32,
    reconnecting: AtomicBool,
    disposed: AtomicBool,
}

impl TimelineSocket {
    /// Create a socket for `host`, sharing the client's cache store
    ///
    /// No connection is attempted until [`connect`](Self::connect); the
    /// supervisors only act once a connection has been requested.
    pub fn new(store: Arc<dyn KvStore>, host: impl Into<String>) -> Self {
        let inner = Arc::new(SocketInner {
            host: host.into(),
            store,
            subscriptions: Mutex::new(HashMap::new()),
            sink: AsyncMutex::new(None),
            started: AtomicBool::new(false),
            open: AtomicBool::new(false),
            fail_count: AtomicU32::new(0),
            reconnecting: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });

        SocketInner::spawn_watchdog(Arc::downgrade(&inner));
        SocketInner::spawn_heartbeat(Arc::downgrade(&inner));

        Self { inner }
    }

    /// Open the connection (reconnects are handled internally from then on)
    pub async fn connect(&self) {
        self.inner.started.store(true, Ordering::SeqCst);
        SocketInner::connect(self.inner.clone()).await;
    }

    /// Whether the underlying connection is currently open
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Poll until the connection is open
    pub async fn wait_open(&self) -> ClientResult<()> {
        for _ in 0..WAIT_OPEN_ATTEMPTS {
            if self.is_open() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(WAIT_OPEN_INTERVAL_MS)).await;
        }
        Err(ClientError::Internal(format!(
            "timed out waiting for socket to {}",
            self.inner.host
        )))
    }

    /// Subscribe `listener` to each of `timelines`
    ///
    /// Announces the full refreshed channel set when any id is new.
    pub async fn listen(&self, timelines: &[String], listener: Listener) {
        let mut grew = false;
        {
            let mut subscriptions = self.inner.subscriptions.lock().unwrap();
            for timeline in timelines {
                let listeners = subscriptions.entry(timeline.clone()).or_insert_with(|| {
                    grew = true;
                    Vec::new()
                });
                listeners.push(listener.clone());
            }
        }

        if grew {
            let channels = self.inner.current_channels();
            if let Err(e) = self.inner.send_frame(&SocketRequest::Listen { channels }).await {
                debug!("listen frame deferred until reconnect: {}", e);
            }
        }
    }

    /// Remove `listener` from each of `timelines`
    ///
    /// Ids left without listeners are dropped; a shrunken set is announced
    /// to the server.
    pub async fn unlisten(&self, timelines: &[String], listener: &Listener) {
        let mut shrank = false;
        {
            let mut subscriptions = self.inner.subscriptions.lock().unwrap();
            for timeline in timelines {
                if let Some(listeners) = subscriptions.get_mut(timeline) {
                    listeners.retain(|l| !Arc::ptr_eq(l, listener));
                    if listeners.is_empty() {
                        subscriptions.remove(timeline);
                        shrank = true;
                    }
                }
            }
        }

        if shrank {
            let channels = self.inner.current_channels();
            if let Err(e) = self
                .inner
                .send_frame(&SocketRequest::Unlisten { channels })
                .await
            {
                debug!("unlisten frame deferred until reconnect: {}", e);
            }
        }
    }

    /// Send a liveness probe
    pub async fn ping(&self) -> ClientResult<()> {
        self.inner.send_frame(&SocketRequest::Ping).await
    }

    /// Timeline ids currently subscribed
    pub fn current_channels(&self) -> Vec<String> {
        self.inner.current_channels()
    }

    #[cfg(test)]
    async fn deliver(&self, text: &str) {
        self.inner.handle_frame(text).await;
    }
}

impl Drop for TimelineSocket {
    fn drop(&mut self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        let inner = self.inner.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Some(mut sink) = inner.sink.lock().await.take() {
                    let _ = sink.close().await;
                }
            });
        }
    }
}

impl SocketInner {
    fn current_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .subscriptions
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        channels.sort();
        channels
    }

    async fn send_raw(&self, message: Message) -> ClientResult<()> {
        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(ClientError::Internal("socket is not connected".to_string()));
        };
        sink.send(message)
            .await
            .map_err(|e| ClientError::Internal(format!("websocket send failed: {}", e)))
    }

    async fn send_frame(&self, frame: &SocketRequest) -> ClientResult<()> {
        let text = serde_json::to_string(frame)?;
        self.send_raw(Message::Text(text)).await
    }

    /// One connection attempt; failures are picked up by the watchdog
    async fn connect(inner: Arc<SocketInner>) {
        if inner.disposed.load(Ordering::SeqCst) {
            return;
        }

        let url = format!("wss://{}/api/v1/timelines/realtime", inner.host);
        info!("connecting to {}", url);

        let stream = match connect_async(&url).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!("failed to connect to {}: {}", url, e);
                return;
            }
        };

        let (sink, mut read) = stream.split();
        *inner.sink.lock().await = Some(sink);
        inner.open.store(true, Ordering::SeqCst);
        inner.fail_count.store(0, Ordering::SeqCst);
        info!("connected to {}", inner.host);

        // First frame after open: re-announce the whole subscription set
        let channels = inner.current_channels();
        if let Err(e) = inner.send_frame(&SocketRequest::Listen { channels }).await {
            warn!("failed to announce subscriptions: {}", e);
        }

        let weak = Arc::downgrade(&inner);
        drop(inner);
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.disposed.load(Ordering::SeqCst) {
                    return;
                }
                match message {
                    Ok(Message::Text(text)) => inner.handle_frame(&text).await,
                    Ok(Message::Ping(data)) => {
                        let _ = inner.send_raw(Message::Pong(data)).await;
                    }
                    Ok(Message::Close(_)) => {
                        info!("server closed connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("websocket error: {}", e);
                        break;
                    }
                }
            }
            if let Some(inner) = weak.upgrade() {
                inner.open.store(false, Ordering::SeqCst);
                *inner.sink.lock().await = None;
            }
        });
    }

    /// 1s supervisor: schedule a reconnect whenever the socket is down
    fn spawn_watchdog(weak: Weak<SocketInner>) {
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(WATCHDOG_INTERVAL_SECS));
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.disposed.load(Ordering::SeqCst) {
                    return;
                }
                if inner.started.load(Ordering::SeqCst)
                    && !inner.open.load(Ordering::SeqCst)
                    && !inner.reconnecting.load(Ordering::SeqCst)
                {
                    Self::schedule_reconnect(inner);
                }
            }
        });
    }

    /// 30s supervisor: heartbeat on an open socket
    fn spawn_heartbeat(weak: Weak<SocketInner>) {
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.disposed.load(Ordering::SeqCst) {
                    return;
                }
                if inner.open.load(Ordering::SeqCst) {
                    if let Err(e) = inner.send_frame(&SocketRequest::H).await {
                        warn!("heartbeat failed: {}", e);
                    }
                }
            }
        });
    }

    /// Back-off then reconnect; the interval grows with each consecutive
    /// failure and resets only on a successful open
    fn schedule_reconnect(inner: Arc<SocketInner>) {
        if inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let fails = inner.fail_count.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = backoff_threshold(fails)
            .to_std()
            .unwrap_or(Duration::from_secs(300));
        debug!(
            "reconnecting to {} in {:?} (attempt {})",
            inner.host, delay, fails
        );

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.reconnecting.store(false, Ordering::SeqCst);
            if !inner.disposed.load(Ordering::SeqCst) {
                Self::connect(inner).await;
            }
        });
    }

    async fn handle_frame(&self, text: &str) {
        let event: TimelineEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("dropping unparseable frame: {}", e);
                return;
            }
        };

        self.apply_cache_effects(&event).await;
        self.dispatch(&event);
    }

    /// Keep cached messages coherent with what the stream reports
    async fn apply_cache_effects(&self, event: &TimelineEvent) {
        match event.document_type() {
            Some("message") => {
                if let (Some(id), Some(resource)) = (event.resource_id(), event.resource.clone())
                {
                    let key = format!("message:{}", id);
                    if let Err(e) = self.store.set(&key, Some(resource)).await {
                        warn!("failed to upsert {}: {}", key, e);
                    }
                }
            }
            Some("association") => {
                if let Some(target) = event.resource_target() {
                    self.invalidate_message(target).await;
                }
            }
            Some("delete") => {
                let target = event
                    .parsed_doc
                    .as_ref()
                    .and_then(|doc| doc.target.as_deref())
                    .unwrap_or_default();
                match target.chars().next() {
                    Some('m') => self.invalidate_message(target).await,
                    Some('a') => {
                        // The deleted association names the message it hung off
                        if let Some(message) = event.resource_target() {
                            self.invalidate_message(message).await;
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    async fn invalidate_message(&self, id: &str) {
        let key = format!("message:{}", id);
        if let Err(e) = self.store.invalidate(&key).await {
            warn!("failed to invalidate {}: {}", key, e);
        }
    }

    /// Hand the event to every listener for its timeline, in arrival order
    fn dispatch(&self, event: &TimelineEvent) {
        let listeners: Vec<Listener> = {
            let subscriptions = self.subscriptions.lock().unwrap();
            match subscriptions.get(&event.timeline) {
                Some(listeners) => listeners.clone(),
                None => return,
            }
        };
        for listener in listeners {
            listener(event);
        }
    }
}
