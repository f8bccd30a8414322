mod common;

use std::time::Duration;

use agents::connector::{Connector, Cost};
use agents::transport::TransportRequest;
use common::{limiter, ScriptedTransport};
use gateway_core::{config, LimitRule, RetryPolicy, TransportError};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn calls_and_retries_are_counted() {
    std::env::set_var("ENABLE_METRICS", "1");
    config::load().unwrap();

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let _ = recorder.install();

    let transport = ScriptedTransport::new(vec![
        Err(TransportError::new("Too Many Requests").with_status(429)),
        Ok(json!({"ok": true})),
    ]);
    let rules = vec![LimitRule::new("weight", 100, Duration::from_secs(60))];
    let c = Connector::new("metered", transport, limiter("metered", rules))
        .with_retry(RetryPolicy { max_retries: 3 });

    let env = c
        .call("get_balance", Cost::new("weight", 1), TransportRequest::get("/b"), Ok)
        .await;
    assert!(env.is_ok());

    let counter = |name: &str| {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(k, _, _, _)| k.key().name() == name)
            .map(|(_, _, _, v)| match v {
                DebugValue::Counter(n) => n,
                _ => 0,
            })
            .sum::<u64>()
    };
    assert_eq!(counter("gateway_requests_total"), 2);
    assert_eq!(counter("gateway_retries_total"), 1);
    assert_eq!(counter("gateway_failures_total"), 0);
}
