//! Notifier Broadcaster (§4.F): long-lived local fan-out of alert messages
//! to wearable devices over a WebSocket server.
//!
//! Grounded on the one WebSocket-server example in the whole corpus (the
//! bambu-lan-viewer CMAF relay's `axum::extract::ws` + `tokio::sync::
//! broadcast` pattern), generalized from a single video-stream subscriber
//! into a keyed device table with registration, heartbeat/staleness, and
//! per-device bounded outboxes.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const STALENESS_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const STALENESS_THRESHOLD: Duration = Duration::from_secs(90);
const DEFAULT_OUTBOX_CAPACITY: usize = 32;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    Register { device_id: String, name: String, firmware: String },
    Heartbeat { device_id: String, uptime: u64, free_heap: u64, rssi: i32 },
    Ack { device_id: String, notification_id: String },
    Pong,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundMessage {
    Welcome { message: String, timestamp: String },
    Registered { device_id: String, message: String },
    Ping,
    Notification(Notification),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub table: String,
    pub alert: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

struct OutboxEntry {
    message: OutboundMessage,
    urgent: bool,
}

struct DeviceEntry {
    outbox: Arc<Mutex<VecDeque<OutboxEntry>>>,
    wake: Arc<Notify>,
    evict: Arc<Notify>,
    last_heartbeat: Arc<Mutex<Instant>>,
}

pub struct NotifierBroadcaster {
    devices: Mutex<HashMap<String, DeviceEntry>>,
    outbox_capacity: usize,
    notifications_sent: AtomicU64,
}

impl NotifierBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(HashMap::new()),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            notifications_sent: AtomicU64::new(0),
        })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/", get(handle_upgrade))
            .with_state(self.clone())
    }

    /// Serializes `notification` once and writes it to every currently
    /// registered device's outbox (§4.F `broadcast`). Best-effort: a full
    /// outbox drops its oldest non-urgent entry to make room, never an
    /// urgent one.
    pub async fn broadcast(&self, notification: Notification) {
        let urgent = notification.priority == NotificationPriority::Urgent;
        let message = OutboundMessage::Notification(notification);

        let devices = self.devices.lock().await;
        for entry in devices.values() {
            let mut outbox = entry.outbox.lock().await;
            enqueue(&mut outbox, message.clone(), urgent, self.outbox_capacity);
            entry.wake.notify_one();
        }
        self.notifications_sent.fetch_add(devices.len() as u64, Ordering::Relaxed);
    }

    async fn register(self: &Arc<Self>, device_id: String) -> (Arc<Mutex<VecDeque<OutboxEntry>>>, Arc<Notify>, Arc<Notify>, Arc<Mutex<Instant>>) {
        let mut devices = self.devices.lock().await;

        // Last-writer-wins: evict any existing connection for this id first.
        if let Some(previous) = devices.remove(&device_id) {
            previous.evict.notify_waiters();
        }

        let outbox = Arc::new(Mutex::new(VecDeque::new()));
        let wake = Arc::new(Notify::new());
        let evict = Arc::new(Notify::new());
        let last_heartbeat = Arc::new(Mutex::new(Instant::now()));

        devices.insert(
            device_id,
            DeviceEntry {
                outbox: outbox.clone(),
                wake: wake.clone(),
                evict: evict.clone(),
                last_heartbeat: last_heartbeat.clone(),
            },
        );

        (outbox, wake, evict, last_heartbeat)
    }

    async fn touch_heartbeat(&self, device_id: &str) {
        let devices = self.devices.lock().await;
        if let Some(entry) = devices.get(device_id) {
            *entry.last_heartbeat.lock().await = Instant::now();
        }
    }

    async fn remove_if_current(&self, device_id: &str, evict: &Arc<Notify>) {
        let mut devices = self.devices.lock().await;
        if let Some(entry) = devices.get(device_id) {
            if Arc::ptr_eq(&entry.evict, evict) {
                devices.remove(device_id);
            }
        }
    }

    /// Evicts any device whose last heartbeat is older than the staleness
    /// threshold (§4.F). Intended to be run on a 60-second ticker.
    pub async fn sweep_stale(&self) {
        let stale: Vec<String> = {
            let devices = self.devices.lock().await;
            let mut stale = Vec::new();
            for (id, entry) in devices.iter() {
                if entry.last_heartbeat.lock().await.elapsed() >= STALENESS_THRESHOLD {
                    stale.push(id.clone());
                }
            }
            stale
        };

        if stale.is_empty() {
            return;
        }

        let mut devices = self.devices.lock().await;
        for id in stale {
            if let Some(entry) = devices.remove(&id) {
                info!(device_id = %id, "evicting stale notifier device");
                entry.evict.notify_waiters();
            }
        }
    }

    pub async fn run_staleness_sweep(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(STALENESS_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            self.sweep_stale().await;
        }
    }

    pub async fn device_count(&self) -> usize {
        self.devices.lock().await.len()
    }
}

fn enqueue(outbox: &mut VecDeque<OutboxEntry>, message: OutboundMessage, urgent: bool, capacity: usize) {
    if outbox.len() >= capacity {
        if let Some(idx) = outbox.iter().position(|entry| !entry.urgent) {
            outbox.remove(idx);
        }
        // If every queued entry is urgent, the queue is allowed to exceed
        // capacity rather than drop one.
    }
    outbox.push_back(OutboxEntry { message, urgent });
}

async fn handle_upgrade(
    State(broadcaster): State<Arc<NotifierBroadcaster>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

async fn handle_socket(mut socket: WebSocket, broadcaster: Arc<NotifierBroadcaster>) {
    let welcome = OutboundMessage::Welcome {
        message: "connected".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    if send(&mut socket, &welcome).await.is_err() {
        return;
    }

    let device_id = match wait_for_register(&mut socket).await {
        Some(id) => id,
        None => return,
    };

    let (outbox, wake, evict, _last_heartbeat) = broadcaster.register(device_id.clone()).await;

    let registered = OutboundMessage::Registered {
        device_id: device_id.clone(),
        message: "registered".to_string(),
    };
    if send(&mut socket, &registered).await.is_err() {
        broadcaster.remove_if_current(&device_id, &evict).await;
        return;
    }

    let mut ping_ticker = tokio::time::interval(PING_INTERVAL);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&broadcaster, &device_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(device_id = %device_id, error = %e, "notifier socket error");
                        break;
                    }
                }
            }
            _ = ping_ticker.tick() => {
                if send(&mut socket, &OutboundMessage::Ping).await.is_err() {
                    break;
                }
            }
            _ = wake.notified() => {
                let mut queue = outbox.lock().await;
                while let Some(entry) = queue.pop_front() {
                    drop(queue);
                    if send(&mut socket, &entry.message).await.is_err() {
                        broadcaster.remove_if_current(&device_id, &evict).await;
                        return;
                    }
                    queue = outbox.lock().await;
                }
            }
            _ = evict.notified() => {
                break;
            }
        }
    }

    broadcaster.remove_if_current(&device_id, &evict).await;
}

async fn wait_for_register(socket: &mut WebSocket) -> Option<String> {
    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            if let Ok(InboundMessage::Register { device_id, .. }) =
                serde_json::from_str::<InboundMessage>(&text)
            {
                return Some(device_id);
            }
        }
    }
    None
}

async fn handle_inbound(broadcaster: &Arc<NotifierBroadcaster>, device_id: &str, text: &str) {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(InboundMessage::Heartbeat { .. }) => broadcaster.touch_heartbeat(device_id).await,
        Ok(InboundMessage::Ack { notification_id, .. }) => {
            info!(device_id, notification_id, "notification acked");
        }
        Ok(InboundMessage::Pong) => broadcaster.touch_heartbeat(device_id).await,
        Ok(InboundMessage::Register { .. }) => {
            // Re-registration mid-connection is treated like any other
            // message from an already-registered device: a no-op here,
            // since eviction/replacement happens at accept time.
        }
        Err(e) => warn!(device_id, error = %e, "unrecognized notifier message"),
    }
}

async fn send(socket: &mut WebSocket, message: &OutboundMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_default();
    socket.send(Message::Text(text)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_notification(priority: NotificationPriority) -> Notification {
        Notification {
            id: Some("n1".to_string()),
            table: "orders".to_string(),
            alert: "waiter_called".to_string(),
            message: "Table 5 needs service".to_string(),
            priority,
            timestamp: "2026-07-26T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn enqueue_drops_oldest_non_urgent_when_full() {
        let mut outbox = VecDeque::new();
        for _ in 0..3 {
            enqueue(
                &mut outbox,
                OutboundMessage::Notification(sample_notification(NotificationPriority::Low)),
                false,
                3,
            );
        }
        enqueue(
            &mut outbox,
            OutboundMessage::Notification(sample_notification(NotificationPriority::Urgent)),
            true,
            3,
        );
        assert_eq!(outbox.len(), 3);
        assert!(outbox.back().unwrap().urgent);
    }

    #[test]
    fn enqueue_never_drops_urgent_entries() {
        let mut outbox = VecDeque::new();
        for _ in 0..3 {
            enqueue(
                &mut outbox,
                OutboundMessage::Notification(sample_notification(NotificationPriority::Urgent)),
                true,
                3,
            );
        }
        enqueue(
            &mut outbox,
            OutboundMessage::Notification(sample_notification(NotificationPriority::Low)),
            false,
            3,
        );
        assert_eq!(outbox.len(), 4);
        assert!(outbox.iter().take(3).all(|e| e.urgent));
    }

    #[tokio::test]
    async fn registering_same_device_twice_evicts_first() {
        let broadcaster = NotifierBroadcaster::new();
        let (_, _, evict_a, _) = broadcaster.register("device-1".to_string()).await;
        assert_eq!(broadcaster.device_count().await, 1);

        let notified = {
            let evict_a = evict_a.clone();
            tokio::spawn(async move {
                evict_a.notified().await;
            })
        };

        let (_, _, _evict_b, _) = broadcaster.register("device-1".to_string()).await;
        assert_eq!(broadcaster.device_count().await, 1);

        tokio::time::timeout(Duration::from_millis(200), notified)
            .await
            .expect("eviction notify should fire")
            .unwrap();
    }
}
