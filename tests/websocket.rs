#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashboard_realtime::ws::{ConnectionState, ConnectionStatus, WsError};
use dashboard_realtime::{Client, Event, EventKind};
use futures_util::StreamExt as _;
use serde_json::json;
use tokio::time::{sleep, timeout};

use crate::common::{MockWsServer, WAIT, fast_config};

async fn wait_for_state<F>(client: &Client, predicate: F) -> ConnectionState
where
    F: FnMut(&ConnectionState) -> bool,
{
    let mut states = client.state_receiver();
    let state = *timeout(WAIT, states.wait_for(predicate))
        .await
        .expect("state not reached in time")
        .unwrap();
    state
}

fn is_reconnecting(state: &ConnectionState) -> bool {
    matches!(state, ConnectionState::Reconnecting { .. })
}

fn ws_error(error: &dashboard_realtime::error::Error) -> Option<&WsError> {
    error.downcast_ref::<WsError>()
}

mod connection {
    use super::*;

    #[tokio::test]
    async fn concurrent_connects_share_one_socket() {
        let server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();

        let (first, second) = tokio::join!(client.connect(), client.connect());
        first.unwrap();
        second.unwrap();
        client.connect().await.unwrap();

        assert!(server.wait_for_connections(1).await);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(server.connections(), 1, "only one socket may be opened");
        assert_eq!(client.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn state_listener_sees_every_transition() {
        let server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _listener = client.on_connection_change(move |state| {
            sink.lock().unwrap().push(state.status());
        });

        client.connect().await.unwrap();
        client.disconnect().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_closes_normally_and_stays_down() {
        let server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        client.connect().await.unwrap();

        client.disconnect().await.unwrap();
        sleep(Duration::from_millis(300)).await;

        assert_eq!(server.close_codes(), vec![1000]);
        assert_eq!(server.connections(), 1, "no reconnect after a manual disconnect");
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_cancels_timers_and_drops_queue() {
        let server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        client.connect().await.unwrap();

        server.set_accepting(false);
        server.drop_connections();
        wait_for_state(&client, is_reconnecting).await;
        client
            .send(None, &json!({ "action": "noop" }))
            .unwrap();
        assert_eq!(client.diagnostics().await.unwrap().queued, 1);

        client.disconnect().await.unwrap();

        let diagnostics = client.diagnostics().await.unwrap();
        assert_eq!(diagnostics.state, ConnectionState::Disconnected);
        assert_eq!(diagnostics.queued, 0);
        assert_eq!(diagnostics.pending_timers, 0);

        server.set_accepting(true);
        sleep(Duration::from_millis(300)).await;
        assert_eq!(server.connections(), 1);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn destroy_stops_the_connection_task() {
        let server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        let observer = client.clone();
        client.connect().await.unwrap();

        client.destroy().await.unwrap();
        sleep(Duration::from_millis(50)).await;

        assert!(observer.connect().await.is_err(), "connection task is gone");
        assert_eq!(server.close_codes(), vec![1000]);
    }
}

mod channels {
    use super::*;

    #[tokio::test]
    async fn second_handler_does_not_resubscribe() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        client.connect().await.unwrap();

        let _first = client.subscribe("sessions", |_| {}).unwrap();
        let _second = client.subscribe("sessions", |_| {}).unwrap();

        server.expect_subscribe("sessions").await;
        assert!(server.drain_frames(Duration::from_millis(200)).await.is_empty());
        assert_eq!(client.channel_count(), 1);
    }

    #[tokio::test]
    async fn subscriptions_made_offline_are_sent_on_open() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        let _subscription = client.subscribe("dashboard_updates", |_| {}).unwrap();

        client.connect().await.unwrap();

        server.expect_subscribe("dashboard_updates").await;
        assert!(server.drain_frames(Duration::from_millis(200)).await.is_empty());
    }

    #[tokio::test]
    async fn only_last_handler_unsubscribes() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        client.connect().await.unwrap();
        let first = client.subscribe("sessions", |_| {}).unwrap();
        let second = client.subscribe("sessions", |_| {}).unwrap();
        server.expect_subscribe("sessions").await;

        drop(first);
        assert!(
            server.drain_frames(Duration::from_millis(200)).await.is_empty(),
            "remaining handler keeps the channel"
        );

        second.unsubscribe();
        assert_eq!(
            server.next_frame().await.unwrap(),
            json!({ "action": "unsubscribe", "channel": "sessions" })
        );
        assert_eq!(client.channel_count(), 0);
    }

    #[tokio::test]
    async fn batch_is_routed_by_session_id_in_order() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        client.connect().await.unwrap();
        let mut stream = Box::pin(client.subscribe_stream("session:42").unwrap());
        server.expect_subscribe("session:42").await;

        server.send(&json!({
            "type": "message_batch",
            "messages": [
                { "type": "stage_update", "session_id": 42, "id": 1, "stage": "triage" },
                { "type": "chat_message", "session_id": "42", "id": 2, "content": "hello" },
                { "type": "session_update", "channel": "session:42", "id": 3 }
            ]
        }));

        let mut events: Vec<Event> = Vec::new();
        for _ in 0..3 {
            events.push(timeout(WAIT, stream.next()).await.unwrap().unwrap());
        }

        let ids: Vec<_> = events.iter().map(|event| event.id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
        assert_eq!(events[0].kind, EventKind::StageUpdate);
        assert_eq!(events[1].get("content"), Some(&json!("hello")));
        assert_eq!(client.last_event_id("session:42"), Some(3));
    }

    #[tokio::test]
    async fn global_listener_receives_events_for_any_channel() {
        let server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _listener = client.on_event(EventKind::SessionCompleted, move |event| {
            drop(tx.send(event.session_id.clone()));
        });
        client.connect().await.unwrap();

        server.send(&json!({ "type": "session_completed", "session_id": 9, "id": 11 }));

        let session_id = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(session_id.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn application_messages_are_sent_when_connected() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        client.connect().await.unwrap();

        client
            .send(Some("session:42"), &json!({ "action": "chat", "content": "hi" }))
            .unwrap();

        assert_eq!(
            server.next_frame().await.unwrap(),
            json!({ "action": "chat", "content": "hi" })
        );
    }
}

mod reconnection {
    use super::*;

    #[tokio::test]
    async fn normal_close_from_server_does_not_reconnect() {
        let server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        client.connect().await.unwrap();

        server.close_connections();
        wait_for_state(&client, |state| *state == ConnectionState::Disconnected).await;
        sleep(Duration::from_millis(300)).await;

        assert_eq!(server.connections(), 1, "a normal close is not link loss");
        let diagnostics = client.diagnostics().await.unwrap();
        assert_eq!(diagnostics.state, ConnectionState::Disconnected);
        assert_eq!(diagnostics.pending_timers, 0);

        client.connect().await.unwrap();
        assert!(server.wait_for_connections(2).await);
    }

    #[tokio::test]
    async fn resubscribes_with_catchup_after_reconnect() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        client.connect().await.unwrap();
        let mut stream = Box::pin(client.subscribe_stream("session:42").unwrap());
        server.expect_subscribe("session:42").await;

        server.send(&json!({ "type": "chat_message", "session_id": "42", "id": 7 }));
        let event = timeout(WAIT, stream.next()).await.unwrap().unwrap();
        assert_eq!(event.id, Some(7));

        server.drop_connections();

        server.expect_subscribe("session:42").await;
        assert_eq!(
            server.next_frame().await.unwrap(),
            json!({ "action": "catchup", "channel": "session:42", "last_event_id": 7 })
        );
        assert!(server.wait_for_connections(2).await);

        server.send(&json!({ "type": "chat_message", "session_id": "42", "id": 8 }));
        let event = timeout(WAIT, stream.next()).await.unwrap().unwrap();
        assert_eq!(event.id, Some(8), "subscription is live on the new socket");
    }

    #[tokio::test]
    async fn queued_messages_are_flushed_after_reconnect() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        client.connect().await.unwrap();
        let _subscription = client.subscribe("sessions", |_| {}).unwrap();
        server.expect_subscribe("sessions").await;

        server.set_accepting(false);
        server.drop_connections();
        wait_for_state(&client, is_reconnecting).await;
        client
            .send(None, &json!({ "action": "chat", "content": "while offline" }))
            .unwrap();
        assert_eq!(client.diagnostics().await.unwrap().queued, 1);

        server.set_accepting(true);

        server.expect_subscribe("sessions").await;
        assert_eq!(
            server.next_frame().await.unwrap(),
            json!({ "action": "chat", "content": "while offline" })
        );
        assert_eq!(client.diagnostics().await.unwrap().queued, 0);
    }

    #[tokio::test]
    async fn missing_pong_replaces_stale_connection() {
        let mut server = MockWsServer::start().await;
        server.set_answer_pings(false);
        let mut config = fast_config();
        config.keepalive.ping_interval = Duration::from_secs(1);
        config.keepalive.pong_timeout = Duration::from_millis(100);
        let client = Client::new(server.endpoint(), config).unwrap();
        let _subscription = client.subscribe("sessions", |_| {}).unwrap();

        client.connect().await.unwrap();
        server.expect_subscribe("sessions").await;

        assert!(server.wait_for_connections(2).await, "stale socket was replaced");
        server.expect_subscribe("sessions").await;
        assert!(server.pings() >= 2);
    }

    #[tokio::test]
    async fn answered_pings_keep_the_connection() {
        let server = MockWsServer::start().await;
        let mut config = fast_config();
        config.keepalive.ping_interval = Duration::from_millis(100);
        config.keepalive.pong_timeout = Duration::from_millis(100);
        let client = Client::new(server.endpoint(), config).unwrap();

        client.connect().await.unwrap();
        sleep(Duration::from_millis(550)).await;

        assert!(server.pings() >= 3, "pings: {}", server.pings());
        assert_eq!(server.connections(), 1);
        assert!(client.connection_state().is_connected());
    }
}

mod resilience {
    use dashboard_realtime::error::Kind;
    use dashboard_realtime::ws::BreakerState;
    use dashboard_realtime::ws::config::ReconnectConfig;

    use super::*;
    use crate::common::dead_endpoint;

    #[cfg(feature = "health-check")]
    #[tokio::test]
    async fn exhausted_connection_is_revived_by_health_check() {
        use dashboard_realtime::types::Url;
        use dashboard_realtime::ws::config::HealthCheckConfig;
        use httpmock::MockServer;
        use reqwest::StatusCode;

        let health = MockServer::start();
        let mock = health.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/health");
            then.status(StatusCode::OK);
        });

        let server = MockWsServer::start().await;
        server.set_accepting(false);
        let mut config = fast_config();
        config.reconnect = ReconnectConfig::bounded(2)
            .with_backoff(Duration::from_millis(20), Duration::from_millis(50))
            .with_jitter(0.0);
        config.health_check = Some(
            HealthCheckConfig::url(Url::parse(&health.url("/health")).unwrap())
                .with_interval(Duration::from_millis(200)),
        );
        let client = Client::new(server.endpoint(), config).unwrap();
        let exhausted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&exhausted);
        let _on_error = client.on_error(move |error| {
            if let Some(WsError::ReconnectExhausted { attempts }) = ws_error(error) {
                sink.lock().unwrap().push(*attempts);
            }
        });

        let err = client.connect().await.unwrap_err();
        assert!(matches!(ws_error(&err), Some(WsError::ConnectFailed { .. })));

        wait_for_state(&client, |state| *state == ConnectionState::Disabled).await;
        assert_eq!(client.status(), ConnectionStatus::Error);
        assert_eq!(*exhausted.lock().unwrap(), vec![2]);

        server.set_accepting(true);
        wait_for_state(&client, |state| state.is_connected()).await;

        mock.assert();
        let diagnostics = client.diagnostics().await.unwrap();
        assert_eq!(diagnostics.breaker, BreakerState::Closed);
        assert_eq!(diagnostics.reconnect_attempt, 0);
    }

    #[tokio::test]
    async fn connect_after_disconnect_gets_a_fresh_reconnect_budget() {
        let mut config = fast_config();
        config.reconnect = ReconnectConfig::bounded(3)
            .with_backoff(Duration::from_millis(20), Duration::from_millis(50))
            .with_jitter(0.0);
        let client = Client::new(dead_endpoint().await, config).unwrap();

        client.connect().await.unwrap_err();
        wait_for_state(&client, |state| *state == ConnectionState::Disabled).await;
        assert_eq!(client.diagnostics().await.unwrap().reconnect_attempt, 3);

        client.disconnect().await.unwrap();
        assert_eq!(client.diagnostics().await.unwrap().reconnect_attempt, 0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _listener = client.on_connection_change(move |state| {
            sink.lock().unwrap().push(state);
        });

        let err = client.connect().await.unwrap_err();
        assert!(matches!(ws_error(&err), Some(WsError::ConnectFailed { .. })));
        assert!(
            is_reconnecting(&client.connection_state()),
            "first failure after a fresh connect must retry, got {:?}",
            client.connection_state()
        );

        wait_for_state(&client, |state| *state == ConnectionState::Disabled).await;
        let seen = seen.lock().unwrap();
        let retries = seen.iter().filter(|state| is_reconnecting(state)).count();
        assert!(retries >= 3, "expected the full budget again, saw {seen:?}");
    }

    #[tokio::test]
    async fn breaker_opens_after_repeated_failures() {
        let mut config = fast_config();
        config.reconnect = ReconnectConfig::unbounded()
            .with_backoff(Duration::from_millis(20), Duration::from_millis(50))
            .with_jitter(0.0);
        config.circuit_breaker.failure_threshold = 2;
        config.circuit_breaker.reset_timeout = Duration::from_secs(60);
        let client = Client::new(dead_endpoint().await, config).unwrap();

        let err = client.connect().await.unwrap_err();
        assert!(matches!(ws_error(&err), Some(WsError::ConnectFailed { .. })));

        timeout(WAIT, async {
            while client.diagnostics().await.unwrap().breaker != BreakerState::Open {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let err = client.connect().await.unwrap_err();
        let Some(WsError::CircuitOpen { retry_after }) = ws_error(&err) else {
            panic!("expected an open circuit, got {err}");
        };
        assert!(*retry_after <= Duration::from_secs(60));
        assert!(is_reconnecting(&client.connection_state()));
    }

    #[tokio::test]
    async fn server_ping_is_answered() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        client.connect().await.unwrap();

        server.send(&json!({ "type": "ping" }));

        assert_eq!(server.next_frame().await.unwrap(), json!({ "action": "pong" }));
    }

    #[tokio::test]
    async fn malformed_frame_is_reported_and_ignored() {
        let server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _on_error = client.on_error(move |error| drop(tx.send(error.kind())));
        client.connect().await.unwrap();

        server.send_raw("{not json");

        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(Kind::Protocol));
        assert!(client.connection_state().is_connected());
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(server.endpoint(), fast_config()).unwrap();
        let (tx, mut errors) = tokio::sync::mpsc::unbounded_channel();
        let _on_error = client.on_error(move |error| {
            let panicked = matches!(ws_error(error), Some(WsError::HandlerPanicked { .. }));
            drop(tx.send(panicked));
        });
        client.connect().await.unwrap();

        let _bad = client
            .subscribe("session:1", |_| panic!("handler bug"))
            .unwrap();
        let mut good = Box::pin(client.subscribe_stream("session:1").unwrap());
        server.expect_subscribe("session:1").await;

        server.send(&json!({ "type": "chat_message", "channel": "session:1", "id": 1 }));
        server.send(&json!({ "type": "chat_message", "channel": "session:1", "id": 2 }));

        for id in [1, 2] {
            let event = timeout(WAIT, good.next()).await.unwrap().unwrap();
            assert_eq!(event.id, Some(id));
        }
        assert_eq!(timeout(WAIT, errors.recv()).await.unwrap(), Some(true));
        assert!(client.connection_state().is_connected());
    }
}
