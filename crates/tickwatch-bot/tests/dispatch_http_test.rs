//! Channel dispatch over the real HTTP transport.
//!
//! Tests:
//! - Token reuse within its lifetime and refresh after expiry
//! - Stale-token recovery
//! - Partial and total delivery failure
//! - Webhook payload truncation

mod integration;
use integration::common::mock_http::MockHttpServer;

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use tickwatch_core::{DirectConfig, ManualClock, WebhookConfig};
use tickwatch_notify::{
    ChannelDispatcher, ChannelStore, DeliveryOutcome, FailureKind, HttpTransport, SendOptions,
    TransportConfig,
};

struct Fixture {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    store: Arc<ChannelStore>,
    dispatcher: ChannelDispatcher,
}

fn fixture(server: &MockHttpServer) -> Fixture {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap(),
    ));
    let store = Arc::new(ChannelStore::open(dir.path().join("channels.json")).unwrap());
    let transport = HttpTransport::new(TransportConfig {
        api_base: server.base_url(),
        ..TransportConfig::default()
    })
    .unwrap();
    let dispatcher = ChannelDispatcher::new(store.clone(), Arc::new(transport), clock.clone());

    Fixture {
        _dir: dir,
        clock,
        store,
        dispatcher,
    }
}

fn direct_config(corp_id: &str) -> DirectConfig {
    DirectConfig {
        corp_id: corp_id.to_string(),
        corp_secret: "secret".to_string(),
        agent_id: "1000002".to_string(),
        recipient: "@all".to_string(),
    }
}

fn webhook(server: &MockHttpServer, key: &str) -> WebhookConfig {
    WebhookConfig {
        endpoint_url: server.webhook_url(key),
    }
}

#[tokio::test]
async fn test_direct_send_reuses_token_until_expiry() {
    let server = MockHttpServer::start().await;
    // Usable for 100 s after the 300 s safety margin.
    server.set_token_lifetime(400);
    let f = fixture(&server);
    let ch = f.store.add_direct("ops", direct_config("corp"), true);

    let opts = SendOptions::default();
    assert!(f.dispatcher.dispatch("first", &opts).await.any_sent());
    assert!(f.dispatcher.dispatch("second", &opts).await.any_sent());
    assert_eq!(server.token_calls(), 1);

    f.clock.advance(Duration::seconds(101));
    let report = f.dispatcher.dispatch("third", &opts).await;
    assert_eq!(report.outcome(&ch.id), Some(&DeliveryOutcome::Sent));
    assert_eq!(server.token_calls(), 2);

    let sent = server.received_on("/cgi-bin/message/send");
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].access_token.as_deref(), Some("token-1"));
    assert_eq!(sent[2].access_token.as_deref(), Some("token-2"));
    assert_eq!(sent[0].body["msgtype"], "text");
    assert_eq!(sent[0].body["agentid"], 1000002);
    assert_eq!(sent[0].body["touser"], "@all");
    assert_eq!(sent[0].body["text"]["content"], "first");

    server.shutdown();
}

#[tokio::test]
async fn test_stale_token_is_dropped_and_refetched() {
    let server = MockHttpServer::start().await;
    let f = fixture(&server);
    let ch = f.store.add_direct("ops", direct_config("corp"), true);
    let opts = SendOptions::default();

    assert!(f.dispatcher.dispatch("one", &opts).await.any_sent());
    server.expire_token("token-1");

    let report = f.dispatcher.dispatch("two", &opts).await;
    match report.outcome(&ch.id) {
        Some(DeliveryOutcome::Failed(failure)) => assert_eq!(failure.kind, FailureKind::Rejected),
        other => panic!("expected rejection, got {other:?}"),
    }

    assert!(f.dispatcher.dispatch("three", &opts).await.any_sent());
    assert_eq!(server.token_calls(), 2);

    server.shutdown();
}

#[tokio::test]
async fn test_auth_failure_is_channel_scoped() {
    let server = MockHttpServer::start().await;
    server.fail_corp("badcorp");
    let f = fixture(&server);
    let bad = f.store.add_direct("bad", direct_config("badcorp"), true);
    let good = f.store.add_webhook("room", webhook(&server, "room"), true);

    let report = f.dispatcher.dispatch("hello", &SendOptions::default()).await;
    assert_eq!(report.len(), 2);
    assert_eq!(report.outcome(&good.id), Some(&DeliveryOutcome::Sent));
    match report.outcome(&bad.id) {
        Some(DeliveryOutcome::Failed(failure)) => {
            assert_eq!(failure.kind, FailureKind::Auth);
            assert!(failure.message.contains("40013"));
        }
        other => panic!("expected auth failure, got {other:?}"),
    }
    assert!(server.received_on("/cgi-bin/message/send").is_empty());

    server.shutdown();
}

#[tokio::test]
async fn test_partial_and_total_webhook_failure() {
    let server = MockHttpServer::start().await;
    server.fail_hook("broken");
    let f = fixture(&server);
    let a = f.store.add_webhook("a", webhook(&server, "a"), true);
    let b = f.store.add_webhook("b", webhook(&server, "b"), true);
    let broken = f.store.add_webhook("broken", webhook(&server, "broken"), true);

    let report = f.dispatcher.dispatch("alert", &SendOptions::default()).await;
    assert_eq!(report.len(), 3);
    assert_eq!(report.sent_count(), 2);
    assert_eq!(report.failed_count(), 1);
    assert!(report.outcome(&a.id).unwrap().is_sent());
    assert!(report.outcome(&b.id).unwrap().is_sent());
    assert!(!report.outcome(&broken.id).unwrap().is_sent());

    f.store.set_enabled(&a.id, false).unwrap();
    f.store.set_enabled(&b.id, false).unwrap();
    let report = f.dispatcher.dispatch("alert", &SendOptions::default()).await;
    assert_eq!(report.len(), 1);
    assert!(!report.any_sent());

    server.shutdown();
}

#[tokio::test]
async fn test_webhook_payload_is_markdown_and_truncated() {
    let server = MockHttpServer::start().await;
    let f = fixture(&server);
    f.store.add_webhook("room", webhook(&server, "room"), true);

    let long: String = "价格提醒 ".repeat(1_000);
    let report = f
        .dispatcher
        .dispatch(&long, &SendOptions::titled("Daily report"))
        .await;
    assert!(report.any_sent());

    let received = server.received_on("/webhook/room");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body["msgtype"], "markdown");
    let content = received[0].body["markdown"]["content"].as_str().unwrap();
    assert!(content.len() <= 3500);
    assert!(content.starts_with("**Daily report**"));

    server.shutdown();
}

#[tokio::test]
async fn test_connection_checks() {
    let server = MockHttpServer::start().await;
    server.fail_corp("badcorp");
    let f = fixture(&server);
    let good = f.store.add_direct("ops", direct_config("corp"), true);
    let bad = f.store.add_direct("bad", direct_config("badcorp"), false);
    let hook = f.store.add_webhook("room", webhook(&server, "room"), true);

    let results = f.dispatcher.test_all_connections().await;
    assert_eq!(results.len(), 3);
    assert!(results[&good.id].success);
    assert!(!results[&bad.id].success);
    assert!(results[&hook.id].success);

    let canary = server.received_on("/webhook/room");
    assert_eq!(canary.len(), 1);
    assert_eq!(
        canary[0].body["markdown"]["content"],
        tickwatch_notify::dispatcher::CONNECTION_TEST_MESSAGE
    );

    server.shutdown();
}
