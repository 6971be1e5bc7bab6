//! End-to-end pipeline tests: config load → route → format → dispatch,
//! with delivery scripted through a recording dispatcher.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use vigil_core::config::{load_route_table, Destination};
use vigil_core::envelope::{
    EnvelopeSink, MediaFetch, MediaHandle, MediaKind, MessageEnvelope, SendOutcome, SourceKind,
    META_SOURCE_URL,
};
use vigil_core::metrics::{self, MetricsCollector};
use vigil_core::route::Router;
use vigil_daemon::dispatch::Dispatch;
use vigil_daemon::orchestrator::Orchestrator;
use vigil_daemon::retry::RetryQueue;
use vigil_rss::{FeedCursorLog, FeedPoller};

#[derive(Debug, Clone)]
struct DispatchCall {
    destination: String,
    payload: String,
    media: Option<PathBuf>,
    media_existed: bool,
}

#[derive(Default)]
struct RecordingDispatch {
    calls: Mutex<Vec<DispatchCall>>,
    fail_all: AtomicBool,
}

impl RecordingDispatch {
    fn calls(&self) -> Vec<DispatchCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatch for RecordingDispatch {
    async fn dispatch(
        &self,
        destination: &Destination,
        payload: &str,
        media_path: Option<&Path>,
    ) -> SendOutcome {
        self.calls.lock().unwrap().push(DispatchCall {
            destination: destination.name.clone(),
            payload: payload.to_string(),
            media: media_path.map(Path::to_path_buf),
            media_existed: media_path.map(Path::exists).unwrap_or(false),
        });
        if self.fail_all.load(Ordering::SeqCst) {
            SendOutcome::Failed
        } else {
            SendOutcome::Sent
        }
    }
}

struct FakeMedia;

#[async_trait]
impl MediaFetch for FakeMedia {
    async fn fetch(&self, dir: &Path) -> Option<PathBuf> {
        let path = dir.join("downloaded-media.bin");
        std::fs::write(&path, b"media bytes").ok()?;
        Some(path)
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    dispatch: Arc<RecordingDispatch>,
    metrics: Arc<MetricsCollector>,
    retry: Arc<RetryQueue>,
    dir: tempfile::TempDir,
}

fn harness(config_body: &str, env: &[(&str, &str)]) -> Harness {
    for (key, value) in env {
        std::env::set_var(key, value);
    }
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("vigil.json");
    std::fs::write(&config_path, config_body).unwrap();

    let table = Arc::new(load_route_table(&config_path).unwrap());
    let metrics = Arc::new(MetricsCollector::new(dir.path().join("metrics.json")));
    let retry = Arc::new(RetryQueue::new(Arc::clone(&metrics)));
    let dispatch = Arc::new(RecordingDispatch::default());

    let orchestrator = Arc::new(Orchestrator::new(
        Router::new(table),
        Arc::clone(&metrics),
        Arc::clone(&retry),
        Arc::clone(&dispatch) as Arc<dyn Dispatch>,
        dir.path().join("attachments"),
    ));

    Harness {
        orchestrator,
        dispatch,
        metrics,
        retry,
        dir,
    }
}

fn chat_envelope(channel: &str, text: &str) -> MessageEnvelope {
    let mut envelope =
        MessageEnvelope::new(SourceKind::Chat, channel, channel, "@reporter", Utc::now());
    envelope.text = text.to_string();
    envelope
}

#[tokio::test]
async fn restricted_destination_filters_unsafe_media() {
    let fx = harness(
        r#"{ "destinations": [
            { "name": "locked-down", "type": "webhook", "env_key": "PIPE_HOOK_A1",
              "channels": [ { "id": "@intel", "restricted_mode": true } ] },
            { "name": "open", "type": "webhook", "env_key": "PIPE_HOOK_A2",
              "channels": [ { "id": "@intel" } ] }
        ] }"#,
        &[
            ("PIPE_HOOK_A1", "https://hooks.test/a1"),
            ("PIPE_HOOK_A2", "https://hooks.test/a2"),
        ],
    );

    // Executable masquerading with a safe MIME type: extension check fails.
    let mut envelope = chat_envelope("@intel", "free sample inside");
    envelope.has_media = true;
    envelope.media_kind = MediaKind::Document;
    envelope.media_filename = Some("malware.exe".to_string());
    envelope.media_mime = Some("text/csv".to_string());
    envelope.original = Some(MediaHandle::new(FakeMedia));

    let routed = fx.orchestrator.handle(envelope).await;
    assert!(routed);

    let calls = fx.dispatch.calls();
    assert_eq!(calls.len(), 2);

    let locked = calls.iter().find(|c| c.destination == "locked-down").unwrap();
    assert!(locked.media.is_none(), "restricted destination must not get media");
    assert!(locked.payload.contains("[Media filtered]"));
    assert!(locked.payload.contains("free sample inside"), "text still delivered");

    let open = calls.iter().find(|c| c.destination == "open").unwrap();
    assert!(open.media_existed, "open destination gets the downloaded file");
    assert!(!open.payload.contains("[Media filtered]"));

    // Cleanup ran: the downloaded file is gone after the handler returns.
    let media_path = open.media.clone().unwrap();
    assert!(!media_path.exists());
    assert_eq!(fx.metrics.get(metrics::ROUTED_SUCCESS), 1);
}

#[tokio::test]
async fn restricted_destination_passes_safe_documents() {
    let fx = harness(
        r#"{ "destinations": [
            { "name": "locked-down", "type": "webhook", "env_key": "PIPE_HOOK_B1",
              "channels": [ { "id": "@intel", "restricted_mode": true } ] }
        ] }"#,
        &[("PIPE_HOOK_B1", "https://hooks.test/b1")],
    );

    let mut envelope = chat_envelope("@intel", "combo list");
    envelope.has_media = true;
    envelope.media_kind = MediaKind::Document;
    envelope.media_filename = Some("combo.txt".to_string());
    envelope.media_mime = Some("text/plain".to_string());
    envelope.original = Some(MediaHandle::new(FakeMedia));

    fx.orchestrator.handle(envelope).await;

    let calls = fx.dispatch.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].media_existed);
    assert!(!calls[0].payload.contains("[Media filtered]"));
}

#[tokio::test]
async fn failed_download_yields_undeliverable_note() {
    struct BrokenMedia;

    #[async_trait]
    impl MediaFetch for BrokenMedia {
        async fn fetch(&self, _dir: &Path) -> Option<PathBuf> {
            None
        }
    }

    let fx = harness(
        r#"{ "destinations": [
            { "name": "open", "type": "webhook", "env_key": "PIPE_HOOK_C1",
              "channels": [ { "id": "@intel" } ] }
        ] }"#,
        &[("PIPE_HOOK_C1", "https://hooks.test/c1")],
    );

    let mut envelope = chat_envelope("@intel", "screenshot");
    envelope.has_media = true;
    envelope.media_kind = MediaKind::Image;
    envelope.original = Some(MediaHandle::new(BrokenMedia));

    fx.orchestrator.handle(envelope).await;

    let calls = fx.dispatch.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].media.is_none());
    assert!(calls[0].payload.contains("[Media could not be forwarded]"));
}

#[tokio::test]
async fn send_failure_queues_retry_and_counts_routed_failed() {
    let fx = harness(
        r#"{ "destinations": [
            { "name": "flaky", "type": "webhook", "env_key": "PIPE_HOOK_D1",
              "channels": [ { "id": "@intel" } ] }
        ] }"#,
        &[("PIPE_HOOK_D1", "https://hooks.test/d1")],
    );
    fx.dispatch.fail_all.store(true, Ordering::SeqCst);

    let routed = fx.orchestrator.handle(chat_envelope("@intel", "hello")).await;
    assert!(!routed);

    assert_eq!(fx.metrics.get(metrics::QUEUED_RETRY), 1);
    assert_eq!(fx.metrics.get(metrics::ROUTED_FAILED), 1);
    assert_eq!(fx.metrics.get(metrics::ROUTED_SUCCESS), 0);
    assert_eq!(fx.retry.len(), 1);
}

#[tokio::test]
async fn unmatched_channel_counts_no_destination() {
    let fx = harness(
        r#"{ "destinations": [
            { "name": "open", "type": "webhook", "env_key": "PIPE_HOOK_E1",
              "channels": [ { "id": "@intel" } ] }
        ] }"#,
        &[("PIPE_HOOK_E1", "https://hooks.test/e1")],
    );

    let routed = fx
        .orchestrator
        .handle(chat_envelope("@somewhere-else", "hello"))
        .await;
    assert!(!routed);
    assert_eq!(fx.metrics.get(metrics::NO_DESTINATION), 1);
    assert!(fx.dispatch.calls().is_empty());
}

#[tokio::test]
async fn source_url_is_defanged_into_the_payload() {
    let fx = harness(
        r#"{ "destinations": [
            { "name": "open", "type": "webhook", "env_key": "PIPE_HOOK_F1",
              "channels": [ { "id": "@intel" } ] }
        ] }"#,
        &[("PIPE_HOOK_F1", "https://hooks.test/f1")],
    );

    let mut envelope = chat_envelope("@intel", "hello");
    envelope.metadata.insert(
        META_SOURCE_URL.to_string(),
        "https://t.me/intel/5".to_string(),
    );

    fx.orchestrator.handle(envelope).await;
    let calls = fx.dispatch.calls();
    assert!(calls[0].payload.contains("hxxps://t[.]me/intel/5"));
    assert!(!calls[0].payload.contains("https://t.me/intel/5"));
}

#[tokio::test]
async fn per_destination_parser_does_not_leak_across_destinations() {
    let fx = harness(
        r#"{ "destinations": [
            { "name": "trimmed", "type": "webhook", "env_key": "PIPE_HOOK_G1",
              "channels": [ { "id": "@intel", "parser": { "trim_front": 1 } } ] },
            { "name": "full", "type": "webhook", "env_key": "PIPE_HOOK_G2",
              "channels": [ { "id": "@intel" } ] }
        ] }"#,
        &[
            ("PIPE_HOOK_G1", "https://hooks.test/g1"),
            ("PIPE_HOOK_G2", "https://hooks.test/g2"),
        ],
    );

    fx.orchestrator
        .handle(chat_envelope("@intel", "AD BANNER\nreal content"))
        .await;

    let calls = fx.dispatch.calls();
    let trimmed = calls.iter().find(|c| c.destination == "trimmed").unwrap();
    let full = calls.iter().find(|c| c.destination == "full").unwrap();
    assert!(!trimmed.payload.contains("AD BANNER"));
    assert!(trimmed.payload.contains("real content"));
    assert!(full.payload.contains("AD BANNER"));
}

#[tokio::test]
async fn shared_feed_fans_out_by_keyword() {
    use httpmock::prelude::*;

    // The feed URL doubles as the routing key, so the config must name the
    // mock server's URL.
    let server = MockServer::start_async().await;
    let config = format!(
        r#"{{ "destinations": [
            {{ "name": "cve-only", "type": "webhook", "env_key": "PIPE_HOOK_H1",
              "rss": [ {{ "url": "{url}", "name": "X",
                         "keywords": {{ "inline": ["CVE"] }} }} ] }},
            {{ "name": "everything", "type": "webhook", "env_key": "PIPE_HOOK_H2",
              "rss": [ {{ "url": "{url}", "name": "X" }} ] }}
        ] }}"#,
        url = server.url("/x.xml")
    );
    let fx = harness(
        &config,
        &[
            ("PIPE_HOOK_H1", "https://hooks.test/h1"),
            ("PIPE_HOOK_H2", "https://hooks.test/h2"),
        ],
    );
    let dispatch = Arc::clone(&fx.dispatch);

    let config_path = fx.dir.path().join("vigil.json");
    let table = Arc::new(load_route_table(&config_path).unwrap());
    assert_eq!(table.feeds().len(), 1, "shared URL deduplicates to one poller");

    let cursors = FeedCursorLog::new(fx.dir.path().join("rsslog"));
    let feed = table.feeds()[0].clone();
    cursors
        .write(&feed.name, Utc::now() - chrono::Duration::hours(6))
        .unwrap();
    let poller = FeedPoller::new(
        cursors,
        Arc::clone(&fx.orchestrator) as Arc<dyn EnvelopeSink>,
    );

    let rss = |title: &str, ts: chrono::DateTime<Utc>| {
        format!(
            "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>X</title>\
             <item><title>{title}</title><link>http://x/{title}</link>\
             <pubDate>{}</pubDate></item></channel></rss>",
            ts.to_rfc2822()
        )
    };

    // Cycle 1: an entry mentioning CVE reaches both destinations.
    let mut mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/x.xml");
            then.status(200)
                .body(rss("CVE-2026-0001", Utc::now() - chrono::Duration::hours(2)));
        })
        .await;
    poller.poll_once(&feed).await.unwrap();
    mock.assert_async().await; // fetched exactly once this cycle
    mock.delete_async().await;

    let names: Vec<String> = dispatch.calls().iter().map(|c| c.destination.clone()).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"cve-only".to_string()));
    assert!(names.contains(&"everything".to_string()));

    // Cycle 2: an entry without the keyword reaches only the match-all
    // destination.
    server
        .mock_async(|when, then| {
            when.method(GET).path("/x.xml");
            then.status(200)
                .body(rss("foo release", Utc::now() - chrono::Duration::hours(1)));
        })
        .await;
    poller.poll_once(&feed).await.unwrap();

    let calls = dispatch.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].destination, "everything");
}
