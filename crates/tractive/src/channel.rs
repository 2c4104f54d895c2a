//! Long-lived push channel for tracker events.
//!
//! The vendor exposes a streaming POST endpoint that emits newline-delimited
//! JSON frames: a handshake, periodic keep-alives, and actual events. A
//! [`Channel`] runs two background tasks on top of it:
//!
//! - the *reader* holds the streaming request open, parses frames, and
//!   silently reconnects when the server ends the stream or a read times
//!   out;
//! - the *watchdog* tracks keep-alive arrivals and tears the reader down
//!   when the stream has gone quiet for too long.
//!
//! Consumers pull events with [`Channel::next_event`]. A watchdog teardown
//! surfaces as [`TractiveError::Disconnected`]; protocol and credential
//! failures end the channel with the corresponding error. Both cases leave
//! no tasks behind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::error::{Result, TractiveError};

/// Default silence tolerated before the watchdog declares the stream dead.
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(60);
/// Default watchdog poll interval.
pub const CHECK_CONNECTION_INTERVAL: Duration = Duration::from_secs(5);

/// Sentinel liveness value meaning "no keep-alive seen yet".
const NEVER: u64 = u64::MAX;

/// Timing knobs for the channel's liveness watchdog.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Silence after the last keep-alive at which the watchdog disconnects.
    pub keep_alive_timeout: Duration,
    /// How often the watchdog checks liveness.
    pub check_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout: KEEP_ALIVE_TIMEOUT,
            check_interval: CHECK_CONNECTION_INTERVAL,
        }
    }
}

/// Queue message from the background tasks to the consumer.
enum ChannelEvent {
    /// A non-administrative frame from the stream.
    Event(Value),
    /// A fatal reader failure; the channel is done.
    Error(TractiveError),
    /// The reader observed its cancellation, normally watchdog-initiated.
    Cancelled,
}

/// Open push channel. Dropped or [`close`](Channel::close)d, it stops its
/// background tasks.
pub struct Channel {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
    reader_token: CancellationToken,
    watchdog_token: CancellationToken,
    reader: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl Channel {
    /// Open the channel and start its background tasks.
    ///
    /// No traffic is guaranteed to have happened when this returns; the
    /// first [`next_event`](Channel::next_event) call observes connection
    /// problems.
    #[must_use]
    pub fn open(api: ApiClient, config: ChannelConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader_token = CancellationToken::new();
        let watchdog_token = CancellationToken::new();
        let started = Instant::now();
        let liveness = Arc::new(AtomicU64::new(NEVER));

        let reader = tokio::spawn(run_reader(
            api,
            tx,
            Arc::clone(&liveness),
            started,
            reader_token.clone(),
        ));
        let watchdog = tokio::spawn(run_watchdog(
            liveness,
            started,
            config,
            reader_token.clone(),
            watchdog_token.clone(),
        ));

        Self {
            rx,
            reader_token,
            watchdog_token,
            reader: Some(reader),
            watchdog: Some(watchdog),
        }
    }

    /// Wait for the next event.
    ///
    /// Keep-alives and the handshake are consumed internally and never show
    /// up here. On any error the background tasks are fully stopped before
    /// the error is returned, so the channel can simply be dropped.
    pub async fn next_event(&mut self) -> Result<Value> {
        match self.rx.recv().await {
            Some(ChannelEvent::Event(event)) => Ok(event),
            Some(ChannelEvent::Error(err)) => {
                self.shutdown().await;
                Err(err)
            }
            Some(ChannelEvent::Cancelled) => {
                self.shutdown().await;
                Err(TractiveError::disconnected(
                    "no keep-alive within the liveness timeout",
                ))
            }
            None => {
                self.shutdown().await;
                Err(TractiveError::disconnected("channel tasks ended"))
            }
        }
    }

    /// Stop both background tasks and wait for them to finish.
    pub async fn close(&mut self) {
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        self.watchdog_token.cancel();
        self.reader_token.cancel();
        if let Some(watchdog) = self.watchdog.take() {
            let _ = watchdog.await;
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // Tasks notice the cancellation and exit; awaiting them requires an
        // async context, which close() provides for orderly teardown.
        self.watchdog_token.cancel();
        self.reader_token.cancel();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("reader_alive", &self.reader.is_some())
            .field("watchdog_alive", &self.watchdog.is_some())
            .finish()
    }
}

/// Outcome of one streaming cycle.
enum CycleOutcome {
    /// Stream ended cleanly or a transport timeout hit: reconnect without
    /// backoff.
    Reconnect,
    /// Unrecoverable failure: report and stop.
    Fatal(TractiveError),
}

async fn run_reader(
    api: ApiClient,
    tx: mpsc::UnboundedSender<ChannelEvent>,
    liveness: Arc<AtomicU64>,
    started: Instant,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = token.cancelled() => {
                let _ = tx.send(ChannelEvent::Cancelled);
                return;
            }
            outcome = stream_once(&api, &tx, &liveness, started) => match outcome {
                CycleOutcome::Reconnect => {
                    debug!("channel stream ended, reconnecting");
                }
                CycleOutcome::Fatal(err) => {
                    warn!(error = %err, "channel reader stopping");
                    let _ = tx.send(ChannelEvent::Error(err));
                    return;
                }
            }
        }
    }
}

/// Hold one streaming request open and forward its frames.
async fn stream_once(
    api: &ApiClient,
    tx: &mpsc::UnboundedSender<ChannelEvent>,
    liveness: &AtomicU64,
    started: Instant,
) -> CycleOutcome {
    let headers = match api.auth_headers().await {
        Ok(headers) => headers,
        Err(err) => return CycleOutcome::Fatal(err),
    };

    // Deliberately no request timeout: the stream is expected to stay open
    // indefinitely. Liveness is the watchdog's job.
    let response = match api
        .http()
        .post(api.channel_url().clone())
        .headers(headers)
        .send()
        .await
    {
        Ok(response) => response,
        // The vendor stream idle-times-out periodically; only that is
        // transient. Anything else (refused, DNS, TLS) ends the channel.
        Err(err) if err.is_timeout() => {
            debug!(error = %err, "channel connect timed out, reconnecting");
            return CycleOutcome::Reconnect;
        }
        Err(err) => return CycleOutcome::Fatal(err.into()),
    };

    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return CycleOutcome::Fatal(TractiveError::Unauthorized);
        }
        s if !s.is_success() => {
            return CycleOutcome::Fatal(TractiveError::request(format!(
                "channel endpoint returned {s}"
            )));
        }
        _ => {}
    }

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        match stream.next().await {
            Some(Ok(chunk)) => {
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = &line[..line.len() - 1];
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    if let Some(outcome) = handle_frame(line, tx, liveness, started) {
                        return outcome;
                    }
                }
            }
            Some(Err(err)) if err.is_timeout() => {
                debug!(error = %err, "channel read timed out, reconnecting");
                return CycleOutcome::Reconnect;
            }
            Some(Err(err)) => return CycleOutcome::Fatal(err.into()),
            None => return CycleOutcome::Reconnect,
        }
    }
}

/// Dispatch one complete frame. Returns `Some` to end the cycle.
fn handle_frame(
    line: &[u8],
    tx: &mpsc::UnboundedSender<ChannelEvent>,
    liveness: &AtomicU64,
    started: Instant,
) -> Option<CycleOutcome> {
    let frame: Value = match serde_json::from_slice(line) {
        Ok(frame) => frame,
        Err(err) => {
            return Some(CycleOutcome::Fatal(TractiveError::request(format!(
                "undecodable channel frame: {err}"
            ))));
        }
    };

    let Some(message) = frame.get("message").and_then(Value::as_str) else {
        return Some(CycleOutcome::Fatal(TractiveError::request(
            "channel frame without a `message` field",
        )));
    };

    match message {
        "keep-alive" => {
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(NEVER - 1);
            liveness.store(elapsed, Ordering::Relaxed);
        }
        "handshake" => debug!("channel handshake received"),
        _ => {
            let _ = tx.send(ChannelEvent::Event(frame));
        }
    }
    None
}

async fn run_watchdog(
    liveness: Arc<AtomicU64>,
    started: Instant,
    config: ChannelConfig,
    reader_token: CancellationToken,
    own_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = own_token.cancelled() => return,
            () = tokio::time::sleep(config.check_interval) => {
                let last = liveness.load(Ordering::Relaxed);
                if last == NEVER {
                    // Nothing to measure until the first keep-alive.
                    continue;
                }
                let silence = started.elapsed().saturating_sub(Duration::from_millis(last));
                if silence > config.keep_alive_timeout {
                    warn!(?silence, "keep-alive timeout, disconnecting channel");
                    reader_token.cancel();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api::{ApiConfig, RetryPolicy};

    use super::*;

    fn frames(lines: &[Value]) -> String {
        let mut body = String::new();
        for line in lines {
            body.push_str(&line.to_string());
            body.push('\n');
        }
        body
    }

    async fn api_for(server: &MockServer) -> ApiClient {
        Mock::given(method("POST"))
            .and(path("/4/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user_id": "USER1",
                "access_token": "TOKEN1",
                "expires_at": chrono::Utc::now().timestamp() + 7200,
            })))
            .mount(server)
            .await;

        let config = ApiConfig {
            api_url: format!("{}/4/", server.uri()),
            aps_api_url: format!("{}/aps/1/", server.uri()),
            channel_url: format!("{}/3/channel", server.uri()),
            retry: RetryPolicy::fixed(0, Duration::from_millis(1)),
            ..ApiConfig::default()
        };
        ApiClient::new("a", "b", config).expect("client")
    }

    fn fast_watchdog() -> ChannelConfig {
        ChannelConfig {
            keep_alive_timeout: Duration::from_millis(100),
            check_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn delivers_events_and_swallows_administrative_frames() {
        let server = MockServer::start().await;
        let api = api_for(&server).await;

        let body = frames(&[
            json!({"message": "handshake", "keep_alive_ttl": 60}),
            json!({"message": "keep-alive"}),
            json!({"message": "tracker_status", "tracker_id": "T1"}),
            json!({"message": "position_update", "tracker_id": "T1"}),
        ]);
        Mock::given(method("POST"))
            .and(path("/3/channel"))
            .and(header("authorization", "Bearer TOKEN1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let mut channel = Channel::open(api, fast_watchdog());
        let first = channel.next_event().await.expect("first event");
        assert_eq!(first["message"], "tracker_status");
        let second = channel.next_event().await.expect("second event");
        assert_eq!(second["message"], "position_update");
        channel.close().await;
    }

    #[tokio::test]
    async fn reconnects_silently_when_the_stream_ends() {
        let server = MockServer::start().await;
        let api = api_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/3/channel"))
            .respond_with(ResponseTemplate::new(200).set_body_string(frames(&[
                json!({"message": "tracker_status", "seq": 1}),
            ])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/3/channel"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(frames(&[json!({"message": "tracker_status", "seq": 2})]))
                    .set_delay(Duration::from_millis(20)),
            )
            .mount(&server)
            .await;

        let mut channel = Channel::open(api, fast_watchdog());
        let first = channel.next_event().await.expect("event before reconnect");
        assert_eq!(first["seq"], 1);
        // The first response ended; the reader reconnects without surfacing
        // anything to the consumer.
        let second = channel.next_event().await.expect("event after reconnect");
        assert_eq!(second["seq"], 2);
        channel.close().await;
    }

    #[tokio::test]
    async fn frame_without_message_field_is_fatal() {
        let server = MockServer::start().await;
        let api = api_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/3/channel"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(frames(&[json!({"event": "no message key"})])),
            )
            .mount(&server)
            .await;

        let mut channel = Channel::open(api, fast_watchdog());
        let err = channel.next_event().await.expect_err("should fail");
        match err {
            TractiveError::Request { message } => {
                assert!(message.contains("`message` field"), "{message}");
            }
            other => panic!("expected Request, got {other:?}"),
        }
        // Teardown completed before the error was returned.
        assert!(channel.reader.is_none());
        assert!(channel.watchdog.is_none());
    }

    #[tokio::test]
    async fn undecodable_frame_is_fatal() {
        let server = MockServer::start().await;
        let api = api_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/3/channel"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json}\n"))
            .mount(&server)
            .await;

        let mut channel = Channel::open(api, fast_watchdog());
        let err = channel.next_event().await.expect_err("should fail");
        assert!(matches!(err, TractiveError::Request { .. }));
    }

    #[tokio::test]
    async fn unreachable_channel_endpoint_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/4/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user_id": "USER1",
                "access_token": "TOKEN1",
                "expires_at": chrono::Utc::now().timestamp() + 7200,
            })))
            .mount(&server)
            .await;

        // Auth still works, but the channel host refuses connections.
        let config = ApiConfig {
            api_url: format!("{}/4/", server.uri()),
            aps_api_url: format!("{}/aps/1/", server.uri()),
            channel_url: "http://127.0.0.1:9/3/channel".to_string(),
            ..ApiConfig::default()
        };
        let api = ApiClient::new("a", "b", config).expect("client");

        let mut channel = Channel::open(api, fast_watchdog());
        let err = tokio::time::timeout(Duration::from_secs(5), channel.next_event())
            .await
            .expect("must not spin reconnecting")
            .expect_err("should fail");
        assert!(matches!(err, TractiveError::Request { .. }));
        assert!(channel.reader.is_none());
        assert!(channel.watchdog.is_none());
    }

    #[tokio::test]
    async fn server_error_on_connect_is_fatal() {
        let server = MockServer::start().await;
        let api = api_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/3/channel"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut channel = Channel::open(api, fast_watchdog());
        let err = channel.next_event().await.expect_err("should fail");
        assert!(matches!(err, TractiveError::Request { .. }));
        assert!(channel.reader.is_none());
        assert!(channel.watchdog.is_none());
    }

    #[tokio::test]
    async fn rejected_credentials_end_the_channel() {
        let server = MockServer::start().await;
        let api = api_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/3/channel"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut channel = Channel::open(api, fast_watchdog());
        let err = channel.next_event().await.expect_err("should fail");
        assert!(matches!(err, TractiveError::Unauthorized));
        assert!(channel.reader.is_none());
        assert!(channel.watchdog.is_none());
    }

    #[tokio::test]
    async fn watchdog_disconnects_after_keep_alive_silence() {
        let server = MockServer::start().await;
        let api = api_for(&server).await;

        // First cycle delivers a keep-alive and ends; the reconnect then
        // stalls far past the liveness timeout.
        Mock::given(method("POST"))
            .and(path("/3/channel"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(frames(&[json!({"message": "keep-alive"})])),
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

        let mut channel = Channel::open(api, fast_watchdog());
        let err = channel.next_event().await.expect_err("should disconnect");
        assert!(matches!(err, TractiveError::Disconnected { .. }));
        assert!(channel.reader.is_none());
        assert!(channel.watchdog.is_none());
    }

    #[tokio::test]
    async fn close_stops_both_tasks() {
        let server = MockServer::start().await;
        let api = api_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/3/channel"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("")
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let mut channel = Channel::open(api, fast_watchdog());
        channel.close().await;
        assert!(channel.reader.is_none());
        assert!(channel.watchdog.is_none());
    }
}
