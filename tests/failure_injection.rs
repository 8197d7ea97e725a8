//! Failure injection tests for the gateway.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use sdk_rust::BoshClient;

mod common;

#[tokio::test]
async fn test_out_of_order_request_is_rejected_without_ending_session() {
    let gateway = common::start_gateway(common::test_config()).await;
    let (client, _) = BoshClient::connect(&gateway.url, 1, &[]).await.unwrap();

    let response = client.request(3, &[], "").await.unwrap();
    assert_eq!(response.status, 400);
    assert!(response.is_error());
    assert_eq!(response.condition().as_deref(), Some("bad-request"));

    let response = client.send("<still-here/>").await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.payload(), "<still-here/>");

    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_replayed_rid_terminates_session() {
    let gateway = common::start_gateway(common::test_config()).await;
    let (client, _) = BoshClient::connect(&gateway.url, 1, &[]).await.unwrap();

    assert_eq!(client.send("<one/>").await.unwrap().payload(), "<one/>");
    assert_eq!(client.send("<two/>").await.unwrap().payload(), "<two/>");

    // rid 2 is now outside the retransmission window.
    let response = client.request(2, &[], "").await.unwrap();
    assert_eq!(response.status, 403);
    assert!(response.is_terminate());
    assert_eq!(response.condition().as_deref(), Some("policy-violation"));

    let response = client.poll().await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.condition().as_deref(), Some("item-not-found"));

    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_retransmission_replays_last_response() {
    let gateway = common::start_gateway(common::test_config()).await;
    let (client, _) = BoshClient::connect(&gateway.url, 1, &[]).await.unwrap();

    let rid = client.next_rid();
    let first = client.send("<once/>").await.unwrap();
    assert_eq!(first.payload(), "<once/>");

    let replay = client.request(rid, &[], "<once/>").await.unwrap();
    assert_eq!(replay.status, 200);
    assert_eq!(replay.payload(), "<once/>");

    let session = gateway.registry.lookup_raw(client.sid()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.queued_packets(), 0, "replayed payload was routed again");

    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_inactive_session_is_swept() {
    let mut config = common::test_config();
    config.bosh.max_inactivity_secs = 1;
    let gateway = common::start_gateway(config).await;
    let (client, _) = BoshClient::connect(&gateway.url, 1, &[]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert!(gateway.registry.is_empty());

    let response = client.poll().await.unwrap();
    assert_eq!(response.status, 404);
    assert!(response.is_terminate());
    assert_eq!(response.condition().as_deref(), Some("item-not-found"));

    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_held_request_keeps_session_alive() {
    let mut config = common::test_config();
    config.bosh.max_inactivity_secs = 1;
    config.bosh.max_wait_secs = 2;
    let gateway = common::start_gateway(config).await;
    let (client, _) = BoshClient::connect(&gateway.url, 1, &[]).await.unwrap();

    // Held for longer than the inactivity limit.
    let response = client.poll().await.unwrap();
    assert_eq!(response.status, 200);

    let response = client.send("<alive/>").await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.payload(), "<alive/>");

    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_request_timeout_answers_408() {
    let mut config = common::test_config();
    config.bosh.max_wait_secs = 5;
    config.timeouts.request_secs = 1;
    let gateway = common::start_gateway(config).await;
    let (client, _) = BoshClient::connect(&gateway.url, 1, &[]).await.unwrap();

    let response = client.poll().await.unwrap();
    assert_eq!(response.status, 408);
    assert_eq!(response.condition().as_deref(), Some("internal-server-error"));

    // The abandoned hold does not end the session.
    gateway.registry.lookup_raw(client.sid()).unwrap();

    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_garbage_requests() {
    let gateway = common::start_gateway(common::test_config()).await;
    let client = common::http_client();

    for body in ["", "not xml", "<iq/>", "<body rid='abc'/>", "<body rid='1'"] {
        let res = client.post(&gateway.url).body(body).send().await.unwrap();
        assert_eq!(res.status(), 400, "body {body:?}");
        let text = res.text().await.unwrap();
        assert!(text.contains("condition='bad-request'"), "body {body:?}: {text}");
    }

    let res = client
        .post(&gateway.url)
        .body("<body rid='5' sid='00000000000000000000000000000000'/>")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    let res = client
        .post(&gateway.url)
        .body("<body sid='missing-rid'/>")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    let res = client.get(&gateway.url).send().await.unwrap();
    assert_eq!(res.status(), 405);

    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_missing_rid_on_live_session() {
    let gateway = common::start_gateway(common::test_config()).await;
    let (client, _) = BoshClient::connect(&gateway.url, 1, &[]).await.unwrap();

    let res = common::http_client()
        .post(&gateway.url)
        .body(format!("<body sid='{}'/>", client.sid()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    assert!(res.text().await.unwrap().contains("condition='bad-request'"));

    gateway.shutdown.trigger();
}

#[tokio::test]
async fn test_admin_api() {
    let mut config = common::test_config();
    config.bosh.max_wait_secs = 10;
    config.admin.enabled = true;
    config.admin.bind_address = "127.0.0.1:28381".into();
    config.admin.api_key = "test-key".into();
    let gateway = common::start_gateway(config).await;
    let admin = "http://127.0.0.1:28381";
    let http = common::http_client();

    let (client, _) = BoshClient::connect(&gateway.url, 1, &[]).await.unwrap();
    let held = tokio::spawn(async move { client.poll().await.unwrap() });
    gateway.wait_for_held(1).await;

    // The admin listener is bound inside the server task.
    let mut status = None;
    for _ in 0..50 {
        if let Ok(res) = http.get(format!("{admin}/admin/status")).send().await {
            status = Some(res.status());
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, Some(reqwest::StatusCode::UNAUTHORIZED));

    let sessions: serde_json::Value = http
        .get(format!("{admin}/admin/sessions"))
        .header(AUTHORIZATION, "Bearer test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["held_slots"], 1);
    assert_eq!(sessions[0]["state"], "active");
    let sid = sessions[0]["id"].as_str().unwrap().to_string();

    let res = http
        .delete(format!("{admin}/admin/sessions/{sid}"))
        .header(AUTHORIZATION, "Bearer test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 204);

    let response = held.await.unwrap();
    assert!(response.is_terminate());
    assert_eq!(response.condition().as_deref(), Some("other-request"));

    let res = http
        .get(format!("{admin}/admin/sessions/{sid}"))
        .header(AUTHORIZATION, "Bearer test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    gateway.shutdown.trigger();
}
