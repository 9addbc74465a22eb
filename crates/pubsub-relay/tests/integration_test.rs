// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use mockito::{Matcher, Mock, Server, ServerGuard};
use pubsub_relay::{
    config::RelayConfig,
    errors::RelayError,
    pubsub::{PubSubClient, PubSubClientConfig},
    relay::Relay,
};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

const SUB_PATH: &str = "/v1/projects/p1/subscriptions/splunk";

fn relay_config(hec_url: String, purge: bool) -> RelayConfig {
    RelayConfig {
        project_id: Some("p1".to_string()),
        splunk_url: Some(hec_url),
        splunk_token: Some("mock-token".to_string()),
        purge_subscription: purge,
        purge_settle_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

fn pubsub_client(server: &ServerGuard) -> Arc<PubSubClient> {
    let config = PubSubClientConfig::emulator(&server.host_with_port(), Duration::from_secs(5));
    Arc::new(PubSubClient::new(config).expect("failed to create Pub/Sub client"))
}

async fn mock_topic(server: &mut ServerGuard) -> Mock {
    server
        .mock("GET", "/v1/projects/p1/topics")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"topics":[{"name":"projects/p1/topics/splunk"}]}"#)
        .create_async()
        .await
}

async fn wait_for(mock: &Mock) {
    timeout(Duration::from_secs(10), async {
        while !mock.matched_async().await {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for request");
}

#[tokio::test]
async fn relay_forwards_pulled_messages_to_splunk() {
    let mut pubsub = Server::new_async().await;
    let mut hec = Server::new_async().await;

    let topics = mock_topic(&mut pubsub).await;
    let subscriptions = pubsub
        .mock("GET", "/v1/projects/p1/subscriptions")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let create = pubsub
        .mock("PUT", SUB_PATH)
        .match_body(Matcher::Json(json!({"topic": "projects/p1/topics/splunk"})))
        .with_status(200)
        .with_body(r#"{"name":"projects/p1/subscriptions/splunk"}"#)
        .expect(1)
        .create_async()
        .await;
    let first_pull = pubsub
        .mock("POST", format!("{SUB_PATH}:pull").as_str())
        .with_status(200)
        .with_body(
            json!({
                "receivedMessages": [
                    {
                        "ackId": "ack-good",
                        "message": {"data": "eyJtc2ciOiJoZWxsbyJ9", "messageId": "1"}
                    },
                    {
                        "ackId": "ack-bad",
                        "message": {"data": "bm90LWpzb24=", "messageId": "2"}
                    }
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let _later_pulls = pubsub
        .mock("POST", format!("{SUB_PATH}:pull").as_str())
        .with_status(200)
        .with_body("{}")
        .expect_at_least(1)
        .create_async()
        .await;
    let acks = pubsub
        .mock("POST", format!("{SUB_PATH}:acknowledge").as_str())
        .with_status(200)
        .with_body("{}")
        .expect_at_least(1)
        .create_async()
        .await;
    let nacks = pubsub
        .mock("POST", format!("{SUB_PATH}:modifyAckDeadline").as_str())
        .expect(0)
        .create_async()
        .await;
    let seek = pubsub
        .mock("POST", format!("{SUB_PATH}:seek").as_str())
        .expect(0)
        .create_async()
        .await;

    let delivered = hec
        .mock("POST", "/services/collector/event")
        .match_header("authorization", "Splunk mock-token")
        .match_body(Matcher::Json(json!({"event": {"msg": "hello"}})))
        .with_status(200)
        .with_body(r#"{"text":"Success","code":0}"#)
        .expect(1)
        .create_async()
        .await;

    let relay = Arc::new(Relay::new(
        pubsub_client(&pubsub),
        relay_config(format!("{}/services/collector/event", hec.url()), false),
    ));
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let relay = Arc::clone(&relay);
        let cancel = cancel.clone();
        async move { relay.run(cancel).await }
    });

    wait_for(&delivered).await;
    wait_for(&acks).await;
    cancel.cancel();
    timeout(Duration::from_secs(10), task)
        .await
        .expect("relay did not stop")
        .expect("relay task panicked")
        .expect("relay stopped with error");

    topics.assert_async().await;
    subscriptions.assert_async().await;
    create.assert_async().await;
    first_pull.assert_async().await;
    acks.assert_async().await;
    nacks.assert_async().await;
    seek.assert_async().await;
    delivered.assert_async().await;
}

#[tokio::test]
async fn relay_purges_existing_subscription_before_consuming() {
    let mut pubsub = Server::new_async().await;
    let hec = Server::new_async().await;

    let _topics = mock_topic(&mut pubsub).await;
    let _subscriptions = pubsub
        .mock("GET", "/v1/projects/p1/subscriptions")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"subscriptions":[{"name":"projects/p1/subscriptions/SPLUNK"}]}"#)
        .create_async()
        .await;
    let create = pubsub
        .mock("PUT", SUB_PATH)
        .expect(0)
        .create_async()
        .await;
    let seek = pubsub
        .mock("POST", format!("{SUB_PATH}:seek").as_str())
        .match_body(Matcher::Regex(r#"^\{"time":"\d{4}-\d{2}-\d{2}T"#.to_string()))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let pulls = pubsub
        .mock("POST", format!("{SUB_PATH}:pull").as_str())
        .with_status(200)
        .with_body("{}")
        .expect_at_least(1)
        .create_async()
        .await;

    let relay = Relay::new(
        pubsub_client(&pubsub),
        relay_config(hec.url(), true),
    );
    let cancel = CancellationToken::new();
    let run = relay.run(cancel.clone());
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => panic!("relay stopped early: {result:?}"),
        _ = wait_for(&pulls) => {}
    }
    cancel.cancel();
    run.await.expect("relay stopped with error");

    create.assert_async().await;
    seek.assert_async().await;
    pulls.assert_async().await;
}

#[tokio::test]
async fn relay_refuses_to_start_without_topic() {
    let mut pubsub = Server::new_async().await;
    let hec = Server::new_async().await;

    let _topics = pubsub
        .mock("GET", "/v1/projects/p1/topics")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let subscriptions = pubsub
        .mock("GET", "/v1/projects/p1/subscriptions")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let relay = Relay::new(pubsub_client(&pubsub), relay_config(hec.url(), false));
    let err = relay
        .run(CancellationToken::new())
        .await
        .expect_err("topic is missing");

    assert!(matches!(err, RelayError::TopicNotFound(_)));
    subscriptions.assert_async().await;
}
