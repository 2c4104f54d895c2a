//! Integration tests for the push channel through the facade.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tractive::{ChannelConfig, Tractive, TractiveError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer) -> Result<Tractive> {
    Mock::given(method("POST"))
        .and(path("/4/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_id": "USER1",
            "access_token": "TOKEN1",
            "expires_at": Utc::now().timestamp() + 7200,
        })))
        .mount(server)
        .await;

    Ok(Tractive::builder()
        .login("pet@example.com")
        .password("hunter2")
        .api_url(format!("{}/4/", server.uri()))
        .aps_api_url(format!("{}/aps/1/", server.uri()))
        .channel_url(format!("{}/3/channel", server.uri()))
        .build()?)
}

fn fast_watchdog() -> ChannelConfig {
    ChannelConfig {
        keep_alive_timeout: Duration::from_millis(100),
        check_interval: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn events_stream_through_the_facade() -> Result<()> {
    let server = MockServer::start().await;
    let client = client_for(&server).await?;

    let body = concat!(
        "{\"message\":\"handshake\",\"keep_alive_ttl\":60}\n",
        "{\"message\":\"keep-alive\"}\n",
        "{\"message\":\"tracker_status\",\"tracker_id\":\"TRACKER1\",\"position\":{\"latlong\":[48.2,16.4]}}\n",
    );
    Mock::given(method("POST"))
        .and(path("/3/channel"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let mut channel = client.events_with_config(fast_watchdog());
    let event = channel.next_event().await?;
    assert_eq!(event["message"], "tracker_status");
    assert_eq!(event["tracker_id"], "TRACKER1");
    channel.close().await;
    Ok(())
}

#[tokio::test]
async fn watchdog_teardown_surfaces_as_disconnected() -> Result<()> {
    let server = MockServer::start().await;
    let client = client_for(&server).await?;

    Mock::given(method("POST"))
        .and(path("/3/channel"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("{\"message\":\"keep-alive\"}\n"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/3/channel"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let mut channel = client.events_with_config(fast_watchdog());
    let err = channel.next_event().await.expect_err("should disconnect");
    match err {
        TractiveError::Disconnected { cause } => {
            assert!(cause.contains("keep-alive"), "{cause}");
        }
        other => panic!("expected Disconnected, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn channel_auth_failure_surfaces_as_unauthorized() -> Result<()> {
    let server = MockServer::start().await;
    // Token endpoint rejects outright; the channel cannot even connect.
    Mock::given(method("POST"))
        .and(path("/4/auth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = Tractive::builder()
        .login("pet@example.com")
        .password("wrong")
        .api_url(format!("{}/4/", server.uri()))
        .aps_api_url(format!("{}/aps/1/", server.uri()))
        .channel_url(format!("{}/3/channel", server.uri()))
        .build()?;

    let mut channel = client.events_with_config(fast_watchdog());
    let err = channel.next_event().await.expect_err("should fail");
    assert!(matches!(err, TractiveError::Unauthorized));
    Ok(())
}
