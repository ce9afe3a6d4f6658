//! Unit tests for push-hub

use push_hub::{
    ChannelSink, ClientHandle, ClientRegistry, ClientSink, DeliveryRequest, Frame, NotificationKind,
    OutboundEvent, RegistryConfig, SinkError, SystemUpdateKind, Target,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

fn registry() -> ClientRegistry {
    ClientRegistry::new(RegistryConfig::default())
}

fn connect(registry: &ClientRegistry, user_id: Option<&str>) -> (ClientHandle, mpsc::Receiver<Frame>) {
    let (sink, rx) = ChannelSink::new(16);
    let handle = registry.add_client(sink, user_id.map(str::to_string));
    (handle, rx)
}

/// Connect and swallow the `connected` greeting
fn connect_quiet(
    registry: &ClientRegistry,
    user_id: Option<&str>,
) -> (ClientHandle, mpsc::Receiver<Frame>) {
    let (handle, mut rx) = connect(registry, user_id);
    let greeting = drain(&mut rx);
    assert_eq!(greeting.len(), 1);
    (handle, rx)
}

fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame.to_string());
    }
    frames
}

fn event_type(frame: &str) -> &str {
    frame
        .lines()
        .find_map(|line| line.strip_prefix("event: "))
        .unwrap_or_default()
}

fn data(frame: &str) -> Value {
    let raw = frame
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .expect("frame has a data line");
    serde_json::from_str(raw).expect("data is JSON")
}

struct BrokenSink;

impl ClientSink for BrokenSink {
    fn write(&self, _frame: Frame) -> Result<(), SinkError> {
        Err(SinkError::Closed)
    }
}

// ============== Wire Format Tests ==============

#[test]
fn test_encode_minimal_event() {
    let event = OutboundEvent::new("update", json!({"count": 1}));
    assert_eq!(event.encode(), "event: update\ndata: {\"count\":1}\n\n");
}

#[test]
fn test_encode_with_id_and_retry() {
    let event = OutboundEvent::new("update", json!("hi"))
        .with_id("evt-7")
        .with_retry(3000);
    assert_eq!(
        event.encode(),
        "id: evt-7\nretry: 3000\nevent: update\ndata: \"hi\"\n\n"
    );
}

#[test]
fn test_encode_keeps_multiline_payload_on_one_data_line() {
    let event = OutboundEvent::new("note", json!({"text": "line one\nline two"}));
    let frame = event.encode();
    assert_eq!(frame.matches("data: ").count(), 1);
    assert!(frame.ends_with("\n\n"));
    assert_eq!(data(&frame)["text"], "line one\nline two");
}

#[test]
fn test_encode_skips_zero_retry() {
    let event = OutboundEvent::new("update", json!(1)).with_retry(0);
    assert_eq!(event.encode(), "event: update\ndata: 1\n\n");
}

#[test]
fn test_encode_strips_line_breaks_from_event_type_and_id() {
    let event = OutboundEvent::new("news\ndata: {\"forged\":true}\n\nevent: admin", json!({"real": 1}))
        .with_id("7\r\nevent: admin");
    let frame = event.encode();

    assert_eq!(frame.matches("\n\n").count(), 1);
    assert!(frame.ends_with("\n\n"));
    assert_eq!(frame.lines().filter(|l| l.starts_with("event:")).count(), 1);
    assert_eq!(frame.lines().filter(|l| l.starts_with("data:")).count(), 1);
    assert_eq!(frame.lines().filter(|l| l.starts_with("id:")).count(), 1);
    assert_eq!(data(&frame), json!({"real": 1}));
}

#[tokio::test]
async fn test_broadcast_event_cannot_forge_extra_events() {
    let registry = registry();
    let (_a, mut rx) = connect_quiet(&registry, None);

    registry.broadcast_event("news\ndata: {\"forged\":true}\n\nevent: admin", json!({"real": 1}));

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].matches("\n\n").count(), 1);
    assert_eq!(data(&frames[0]), json!({"real": 1}));
}

#[test]
fn test_reserved_events() {
    let connected = OutboundEvent::connected("c-1", Some("alice"));
    assert_eq!(connected.event_type, "connected");
    assert_eq!(connected.data, json!({"clientId": "c-1", "userId": "alice"}));

    let heartbeat = OutboundEvent::heartbeat();
    assert_eq!(heartbeat.event_type, "heartbeat");
    assert!(heartbeat.data["timestamp"].is_string());

    let disconnected = OutboundEvent::disconnected();
    assert_eq!(disconnected.event_type, "disconnected");
    assert_eq!(disconnected.data["reason"], "server_disconnect");
    assert!(disconnected.data["message"].is_string());
}

// ============== Admission & Removal Tests ==============

#[tokio::test]
async fn test_add_client_sends_connected_event() {
    let registry = registry();
    let (handle, mut rx) = connect(&registry, Some("alice"));

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(event_type(&frames[0]), "connected");
    assert_eq!(data(&frames[0])["clientId"], handle.id());
    assert_eq!(data(&frames[0])["userId"], "alice");
    assert_eq!(handle.user_id(), Some("alice"));
    assert_eq!(registry.connection_count(), 1);
}

#[tokio::test]
async fn test_anonymous_client_has_null_user() {
    let registry = registry();
    let (handle, mut rx) = connect(&registry, None);

    let frames = drain(&mut rx);
    assert_eq!(data(&frames[0])["userId"], Value::Null);
    assert_eq!(handle.user_id(), None);
}

#[tokio::test]
async fn test_client_ids_are_unique() {
    let registry = registry();
    let mut receivers = Vec::new();
    let mut ids = std::collections::HashSet::new();

    for _ in 0..200 {
        let (handle, rx) = connect(&registry, Some("same-user"));
        assert!(ids.insert(handle.id().to_string()));
        receivers.push(rx);
    }
    assert_eq!(registry.connection_count(), 200);
}

#[tokio::test]
async fn test_count_tracks_admits_and_removes() {
    let registry = registry();
    let (a, _rx_a) = connect(&registry, None);
    let (b, _rx_b) = connect(&registry, Some("u"));
    let (_c, _rx_c) = connect(&registry, Some("u"));

    assert!(registry.remove_client(a.id()));
    b.close();

    assert_eq!(registry.connection_count(), 1);
    assert!(!registry.contains(a.id()));
    assert!(!b.is_registered());
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let registry = registry();
    let (handle, _rx) = connect(&registry, Some("alice"));
    let (_other, _rx_other) = connect(&registry, None);

    assert!(registry.remove_client(handle.id()));
    assert!(!registry.remove_client(handle.id()));
    assert!(!registry.remove_client("never-admitted"));
    handle.close();

    assert_eq!(registry.connection_count(), 1);
    assert_eq!(registry.stats().active_users, 0);
}

#[tokio::test]
async fn test_removal_closes_the_stream() {
    let registry = registry();
    let (handle, mut rx) = connect_quiet(&registry, None);

    handle.close();

    assert_eq!(rx.recv().await, None);
}

// ============== Delivery Tests ==============

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let registry = registry();
    let (_a, mut rx_a) = connect_quiet(&registry, Some("alice"));
    let (_b, mut rx_b) = connect_quiet(&registry, None);
    let (c, mut rx_c) = connect_quiet(&registry, Some("bob"));
    c.close();

    let sent = registry.send_message(&DeliveryRequest::broadcast("news", json!({"n": 1})));

    assert_eq!(sent, 2);
    assert_eq!(event_type(&drain(&mut rx_a)[0]), "news");
    assert_eq!(event_type(&drain(&mut rx_b)[0]), "news");
    assert!(drain(&mut rx_c).is_empty());
}

#[tokio::test]
async fn test_target_client_id_ignores_shared_user() {
    let registry = registry();
    let (x, mut rx_x) = connect_quiet(&registry, Some("alice"));
    let (_y, mut rx_y) = connect_quiet(&registry, Some("alice"));

    let request = DeliveryRequest::targeted("ping", json!({}), Target::clients([x.id()]));
    let sent = registry.send_message(&request);

    assert_eq!(sent, 1);
    assert_eq!(drain(&mut rx_x).len(), 1);
    assert!(drain(&mut rx_y).is_empty());
}

#[tokio::test]
async fn test_target_user_id_reaches_all_their_connections() {
    let registry = registry();
    let (_a1, mut rx_a1) = connect_quiet(&registry, Some("alice"));
    let (_a2, mut rx_a2) = connect_quiet(&registry, Some("alice"));
    let (_b, mut rx_b) = connect_quiet(&registry, Some("bob"));
    let (_anon, mut rx_anon) = connect_quiet(&registry, None);

    let sent = registry.send_to_users("hello", json!({"to": "alice"}), ["alice"]);

    assert_eq!(sent, 2);
    assert_eq!(drain(&mut rx_a1).len(), 1);
    assert_eq!(drain(&mut rx_a2).len(), 1);
    assert!(drain(&mut rx_b).is_empty());
    assert!(drain(&mut rx_anon).is_empty());
}

#[tokio::test]
async fn test_target_matching_both_criteria_delivers_once() {
    let registry = registry();
    let (a, mut rx_a) = connect_quiet(&registry, Some("alice"));
    let (b, mut rx_b) = connect_quiet(&registry, Some("bob"));

    let target = Target {
        user_ids: ["alice".to_string()].into(),
        client_ids: [a.id().to_string(), b.id().to_string()].into(),
    };
    let sent = registry.send_message(&DeliveryRequest::targeted("x", json!(1), target));

    assert_eq!(sent, 2);
    assert_eq!(drain(&mut rx_a).len(), 1);
    assert_eq!(drain(&mut rx_b).len(), 1);
}

#[tokio::test]
async fn test_unknown_targets_are_skipped() {
    let registry = registry();
    let (gone, _rx_gone) = connect_quiet(&registry, Some("carol"));
    gone.close();

    let sent = registry.send_to_clients("x", json!(1), [gone.id(), "nobody"]);
    assert_eq!(sent, 0);
    assert_eq!(registry.send_to_users("x", json!(1), ["carol", "dave"]), 0);
}

#[tokio::test]
async fn test_request_without_recipients_is_noop() {
    let registry = registry();
    let (_a, mut rx_a) = connect_quiet(&registry, Some("alice"));

    let request = DeliveryRequest {
        event_type: "lost".into(),
        data: json!({}),
        broadcast: false,
        target: None,
    };

    assert_eq!(registry.send_message(&request), 0);
    assert!(drain(&mut rx_a).is_empty());
    assert_eq!(registry.connection_count(), 1);
}

#[tokio::test]
async fn test_write_failure_removes_only_that_client() {
    let registry = registry();
    let (_a, mut rx_a) = connect_quiet(&registry, None);
    let (b, rx_b) = connect_quiet(&registry, None);
    let (_c, mut rx_c) = connect_quiet(&registry, None);
    drop(rx_b);

    let sent = registry.broadcast(&OutboundEvent::new("news", json!("hi")));

    assert_eq!(sent, 2);
    assert!(!registry.contains(b.id()));
    assert_eq!(registry.connection_count(), 2);
    assert_eq!(drain(&mut rx_a).len(), 1);
    assert_eq!(drain(&mut rx_c).len(), 1);
}

#[tokio::test]
async fn test_broken_sink_is_removed_on_admission() {
    let registry = registry();
    let handle = registry.add_client(BrokenSink, Some("alice".into()));

    assert!(!handle.is_registered());
    assert_eq!(registry.stats().total_connections, 0);
    assert_eq!(registry.stats().active_users, 0);
}

#[tokio::test]
async fn test_full_buffer_counts_as_failed_write() {
    let registry = registry();
    let (sink, _rx) = ChannelSink::new(1);
    // The greeting fills the only slot.
    let handle = registry.add_client(sink, None);

    assert!(!handle.send_event(&OutboundEvent::new("x", json!(1))));
    assert!(!handle.is_registered());
}

#[tokio::test]
async fn test_handle_send_uses_delivery_path() {
    let registry = registry();
    let (handle, mut rx) = connect_quiet(&registry, None);

    assert!(handle.send("event: raw\ndata: 1\n\n"));
    assert_eq!(drain(&mut rx), vec!["event: raw\ndata: 1\n\n".to_string()]);

    handle.close();
    assert!(!handle.send("event: raw\ndata: 2\n\n"));
}

// ============== Notification Helper Tests ==============

#[tokio::test]
async fn test_send_notification() {
    let registry = registry();
    let (_a, mut rx_a) = connect_quiet(&registry, Some("alice"));
    let (_b, mut rx_b) = connect_quiet(&registry, Some("bob"));

    registry.send_notification("alice", "Hi", "You have mail", NotificationKind::Warning);

    let frames = drain(&mut rx_a);
    assert_eq!(event_type(&frames[0]), "notification");
    let payload = data(&frames[0]);
    assert_eq!(payload["title"], "Hi");
    assert_eq!(payload["message"], "You have mail");
    assert_eq!(payload["type"], "warning");
    assert!(payload["timestamp"].is_string());
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn test_send_system_update() {
    let registry = registry();
    let (_a, mut rx_a) = connect_quiet(&registry, None);

    let sent = registry.send_system_update("Going down at noon", SystemUpdateKind::Maintenance);

    assert_eq!(sent, 1);
    let frames = drain(&mut rx_a);
    assert_eq!(event_type(&frames[0]), "system-update");
    assert_eq!(data(&frames[0])["type"], "maintenance");
}

// ============== Stats Tests ==============

#[tokio::test]
async fn test_stats_counts_distinct_users() {
    let registry = registry();
    let _a1 = connect(&registry, Some("A"));
    let _a2 = connect(&registry, Some("A"));
    let _b = connect(&registry, Some("B"));
    let _anon = connect(&registry, None);

    let stats = registry.stats();
    assert_eq!(stats.total_connections, 4);
    assert_eq!(stats.active_users, 2);
}

#[tokio::test]
async fn test_empty_user_id_is_anonymous() {
    let registry = registry();
    let (handle, _rx) = connect(&registry, Some(""));

    assert_eq!(handle.user_id(), None);
    assert_eq!(registry.stats().active_users, 0);
}

#[tokio::test]
async fn test_stats_serialize_camel_case() {
    let registry = registry();
    let _a = connect(&registry, Some("A"));

    let value = serde_json::to_value(registry.stats()).unwrap();
    assert_eq!(value, json!({"totalConnections": 1, "activeUsers": 1}));
}

#[tokio::test]
async fn test_list_clients() {
    let registry = registry();
    let (a, _rx_a) = connect(&registry, Some("A"));
    let _anon = connect(&registry, None);

    let clients = registry.list_clients();
    assert_eq!(clients.len(), 2);
    let listed = clients.iter().find(|c| c.id == a.id()).unwrap();
    assert_eq!(listed.user_id.as_deref(), Some("A"));
    assert!(listed.is_alive);
}

// ============== Bulk Disconnect Tests ==============

#[tokio::test]
async fn test_disconnect_all() {
    let registry = registry();
    let (_a, mut rx_a) = connect_quiet(&registry, Some("A"));
    let (_b, mut rx_b) = connect_quiet(&registry, None);

    assert_eq!(registry.disconnect_all(), 2);

    let stats = registry.stats();
    assert_eq!(stats.total_connections, 0);
    assert_eq!(stats.active_users, 0);

    for rx in [&mut rx_a, &mut rx_b] {
        let frames = drain(rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(event_type(&frames[0]), "disconnected");
        assert_eq!(rx.recv().await, None);
    }
}

#[tokio::test]
async fn test_disconnect_all_on_empty_registry() {
    let registry = registry();
    assert_eq!(registry.disconnect_all(), 0);
    assert_eq!(registry.disconnect_all(), 0);
}

// ============== Liveness Tests ==============

#[tokio::test(start_paused = true)]
async fn test_evict_idle_removes_only_silent_clients() {
    let registry = registry();
    let (quiet, _rx_quiet) = connect_quiet(&registry, None);
    let (busy, _rx_busy) = connect_quiet(&registry, None);

    tokio::time::advance(Duration::from_secs(100)).await;
    assert!(busy.send_event(&OutboundEvent::new("x", json!(1))));
    tokio::time::advance(Duration::from_secs(30)).await;

    assert_eq!(registry.evict_idle(), 1);
    assert!(!quiet.is_registered());
    assert!(busy.is_registered());
}

#[tokio::test(start_paused = true)]
async fn test_evict_idle_keeps_clients_within_timeout() {
    let registry = registry();
    let (handle, _rx) = connect_quiet(&registry, None);

    tokio::time::advance(Duration::from_secs(120)).await;

    assert_eq!(registry.evict_idle(), 0);
    assert!(handle.is_registered());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_refreshes_activity() {
    let registry = registry();
    let (handle, mut rx) = connect_quiet(&registry, None);

    tokio::time::advance(Duration::from_secs(90)).await;
    assert_eq!(registry.send_heartbeat(), 1);
    tokio::time::advance(Duration::from_secs(90)).await;

    assert_eq!(registry.evict_idle(), 0);
    assert!(handle.is_registered());
    assert_eq!(event_type(&drain(&mut rx)[0]), "heartbeat");
}

#[tokio::test(start_paused = true)]
async fn test_liveness_timer_and_destroy() {
    let registry = registry();
    let (_handle, mut rx) = connect_quiet(&registry, Some("A"));

    registry.start_liveness().await;
    tokio::time::sleep(Duration::from_secs(31)).await;

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(event_type(&frames[0]), "heartbeat");

    registry.destroy().await;

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(event_type(&frames[0]), "disconnected");
    assert_eq!(registry.connection_count(), 0);

    // Timer is stopped and cannot be restarted
    registry.start_liveness().await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(registry.connection_count(), 0);
}

#[tokio::test]
async fn test_client_admitted_after_destroy_is_disconnected() {
    let registry = registry();
    registry.destroy().await;
    assert!(registry.is_destroyed());

    let (late, mut rx) = connect(&registry, Some("late"));

    assert!(!late.is_registered());
    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(event_type(&frames[0]), "disconnected");
    assert_eq!(rx.recv().await, None);

    let stats = registry.stats();
    assert_eq!(stats.total_connections, 0);
    assert_eq!(stats.active_users, 0);
}

// ============== Config Tests ==============

#[test]
fn test_registry_config_validation() {
    assert!(RegistryConfig::default().validate().is_ok());

    let too_short = RegistryConfig {
        heartbeat_interval: Duration::from_secs(30),
        client_timeout: Duration::from_secs(30),
    };
    assert!(too_short.validate().is_err());

    let zero = RegistryConfig {
        heartbeat_interval: Duration::ZERO,
        client_timeout: Duration::from_secs(30),
    };
    assert!(zero.validate().is_err());
}

// ============== Concurrency Tests ==============

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admission_removal_and_delivery() {
    const TASKS: usize = 8;
    const PER_TASK: usize = 250;

    let registry = registry();

    let mut workers = Vec::new();
    for _ in 0..TASKS {
        let registry = registry.clone();
        workers.push(tokio::spawn(async move {
            let mut kept = Vec::new();
            for i in 0..PER_TASK {
                let (sink, rx) = ChannelSink::new(1024);
                let handle = registry.add_client(sink, Some(format!("user-{}", i % 3)));
                if i % 50 == 0 {
                    registry.send_heartbeat();
                }
                if i % 2 == 0 {
                    handle.close();
                    handle.close();
                } else {
                    kept.push((handle, rx));
                }
                tokio::task::yield_now().await;
            }
            registry.stats();
            kept
        }));
    }

    let mut kept = Vec::new();
    for worker in workers {
        kept.extend(worker.await.unwrap());
    }

    let ids: std::collections::HashSet<_> = kept.iter().map(|(h, _)| h.id().to_string()).collect();
    assert_eq!(ids.len(), TASKS * PER_TASK / 2);

    let stats = registry.stats();
    assert_eq!(stats.total_connections, TASKS * PER_TASK / 2);
    assert_eq!(stats.active_users, 3);
    assert!(kept.iter().all(|(h, _)| h.is_registered()));

    let mut closers = Vec::new();
    for chunk in kept.chunks(kept.len() / TASKS) {
        let handles: Vec<ClientHandle> = chunk.iter().map(|(h, _)| h.clone()).collect();
        let registry = registry.clone();
        closers.push(tokio::spawn(async move {
            for (i, handle) in handles.into_iter().enumerate() {
                handle.close();
                if i % 25 == 0 {
                    registry.broadcast(&OutboundEvent::new("tick", json!(1)));
                }
            }
        }));
    }
    for closer in closers {
        closer.await.unwrap();
    }

    let stats = registry.stats();
    assert_eq!(stats.total_connections, 0);
    assert_eq!(stats.active_users, 0);
    assert_eq!(registry.send_to_users("x", json!(1), ["user-0", "user-1", "user-2"]), 0);
    assert_eq!(registry.broadcast(&OutboundEvent::new("x", json!(1))), 0);
}
