use gateway_core::{Envelope, Reply, Stage, TimeProfile, UsageEntry};
use serde_json::json;

fn usage() -> Vec<UsageEntry> {
    vec![UsageEntry::new("weight", 0.25)]
}

#[test]
fn ok_envelope_has_data_and_null_reason() {
    let profile = TimeProfile::new();
    let env = Reply::new(usage(), profile).ok(vec![1, 2, 3]);
    assert!(env.is_ok());
    let v = serde_json::to_value(&env).unwrap();
    assert_eq!(v["status"], "OK");
    assert_eq!(v["data"], json!([1, 2, 3]));
    assert!(v["reason"].is_null());
    assert_eq!(v["usage"], json!([{ "type": "weight", "value": 0.25 }]));
    assert_eq!(v["timeProfile"]["attempts"], 1);
    assert!(v["timeProfile"]["outcomingTime"].as_u64().unwrap() >= v["timeProfile"]["incomingTime"].as_u64().unwrap());
}

#[test]
fn fail_envelope_has_reason_and_null_data() {
    let env: Envelope<u32> = Reply::new(usage(), TimeProfile::new()).fail("method not supported");
    assert!(!env.is_ok());
    assert_eq!(env.reason(), Some("method not supported"));
    assert!(env.data().is_none());
    let v = serde_json::to_value(&env).unwrap();
    assert_eq!(v["status"], "NOTOK");
    assert!(v["data"].is_null());
    assert_eq!(v["reason"], "method not supported");
}

#[test]
fn time_profile_serializes_camel_case_fields() {
    let profile = TimeProfile::started_at(100);
    profile.open_at(Stage::Queue, 100);
    profile.close_at(Stage::Queue, 110);
    profile.open_at(Stage::Exchange, 110);
    profile.close_at(Stage::Exchange, 150);
    profile.finish_at(160);
    let v = serde_json::to_value(profile.snapshot()).unwrap();
    assert_eq!(
        v,
        json!({
            "attempts": 1,
            "incomingTime": 100,
            "outcomingTime": 160,
            "queueStartTime": 100,
            "queueEndTime": 110,
            "exchangeRequestStartTime": 110,
            "exchangeRequestEndTime": 150
        })
    );
}

#[test]
fn retried_profile_stays_monotonic() {
    let profile = TimeProfile::started_at(0);
    profile.open_at(Stage::Exchange, 10);
    // attempt failed without closing its phase
    profile.next_attempt();
    profile.open_at(Stage::Exchange, 50);
    profile.close_at(Stage::Exchange, 70);
    let snap = profile.snapshot();
    assert_eq!(snap.attempts, 2);
    let start = snap.exchange_request_start_time.unwrap();
    let end = snap.exchange_request_end_time.unwrap();
    assert!(end >= start);
}

#[test]
fn map_preserves_failure() {
    let env: Envelope<u32> = Reply::new(vec![], TimeProfile::new()).fail("boom");
    let mapped = env.map(|n| n * 2);
    assert_eq!(mapped.into_result(), Err("boom".to_string()));
}
