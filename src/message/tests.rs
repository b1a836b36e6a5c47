use super::body::{self, Body};
use super::{Message, Payload, VERSION, bad_request, generate_id, internal_error};
use crate::client::{ClientInfo, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Reading {
    room: String,
    celsius: f64,
}

fn full_message() -> Message {
    let mut msg = Message {
        version: VERSION.to_string(),
        id: generate_id(),
        action: "location/update".to_string(),
        source: "phone".to_string(),
        destination: "server".to_string(),
        corr_id: generate_id(),
        text: "arrived at home".to_string(),
        ..Message::default()
    };
    msg.encode_payload(&json!({"lat": 52.5, "lng": 13.4})).unwrap();
    msg
}

#[test]
fn test_encode_decode_preserves_every_field() {
    let msg = full_message();
    let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
    assert_eq!(decoded, msg);
}

#[test]
fn test_wire_uses_short_field_names() {
    let msg = full_message();
    let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
    assert_eq!(value["sarif"], VERSION);
    assert_eq!(value["src"], "phone");
    assert_eq!(value["dst"], "server");
    assert_eq!(value["corr"], msg.corr_id.as_str());
    assert_eq!(value["p"]["lat"], 52.5);
    assert!(value.get("source").is_none());
}

#[test]
fn test_decode_accepts_long_field_names() {
    let raw = json!({
        "stark": "0.4",
        "id": "abc",
        "action": "ping",
        "source": "old-device",
        "destination": "new-device",
        "corrId": "xyz",
        "payload": {"room": "kitchen", "celsius": 21.5}
    });
    let msg = Message::decode(raw.to_string().as_bytes()).unwrap();
    assert_eq!(msg.version, "0.4");
    assert_eq!(msg.source, "old-device");
    assert_eq!(msg.destination, "new-device");
    assert_eq!(msg.corr_id, "xyz");
    let reading: Reading = msg.decode_payload().unwrap();
    assert_eq!(reading.room, "kitchen");
}

#[test]
fn test_empty_fields_are_omitted() {
    let msg = Message::new("ping");
    let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
    let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys.len(), 3, "unexpected keys: {keys:?}");
    assert!(value.get("p").is_none());
}

#[test]
fn test_is_valid() {
    assert!(Message::new("testaction").is_valid().is_ok());

    let mut msg = Message::new("");
    assert!(msg.is_valid().is_err());

    msg = Message::new("testaction");
    msg.id.clear();
    assert!(msg.is_valid().is_err());
}

#[test]
fn test_reply_correlates_and_addresses_source() {
    let mut orig = Message::new("ping");
    orig.source = "originaldevice".to_string();
    let reply = orig.reply(Message::new("ack"));

    assert_ne!(reply.id, orig.id);
    assert_eq!(reply.corr_id, orig.id);
    assert_eq!(reply.destination, orig.source);
}

#[test]
fn test_reply_keeps_existing_correlation_chain() {
    let mut orig = Message::new("forwarded");
    orig.corr_id = "first-request".to_string();
    let reply = orig.reply(Message::new("answer").with_destination("elsewhere"));
    assert_eq!(reply.corr_id, "first-request");
    assert_eq!(reply.destination, "elsewhere");
}

#[test]
fn test_is_action_is_segment_aware() {
    let msg = Message::new("location/update");
    assert!(msg.is_action(""));
    assert!(msg.is_action("location"));
    assert!(msg.is_action("location/update"));
    assert!(!msg.is_action("loc"));
    assert!(!msg.is_action("location/update/more"));
    assert_eq!(msg.action_suffix("location"), "update");
    assert_eq!(msg.action_suffix("loc"), "");
}

#[test]
fn test_payload_round_trip() {
    let reading = Reading {
        room: "bath".to_string(),
        celsius: 23.0,
    };
    let msg = Message::with_payload("sensor/temp", &reading).unwrap();
    let decoded: Reading = msg.decode_payload().unwrap();
    assert_eq!(decoded, reading);
}

#[test]
fn test_null_payload_is_a_no_op() {
    let mut msg = Message::new("ack");
    msg.encode_payload(&Option::<Reading>::None).unwrap();
    assert!(msg.payload.is_empty());

    let decoded: Reading = msg.decode_payload().unwrap();
    assert_eq!(decoded, Reading::default());
    assert_eq!(Payload::default().decode_opt::<Reading>().unwrap(), None);
}

#[test]
fn test_payload_type_mismatch_is_an_error() {
    let msg = Message::with_payload("sensor/temp", &json!({"room": 5})).unwrap();
    assert!(msg.decode_payload::<Reading>().is_err());
}

#[test]
fn test_error_helpers() {
    let msg = bad_request("no location given");
    assert_eq!(msg.action, "err/badrequest");
    assert!(msg.is_error());
    assert!(msg.text.contains("no location given"));
    assert!(internal_error("disk full").is_error());
    assert!(!Message::new("error/log").is_error());
}

#[test]
fn test_body_parses_control_actions() {
    let sub = Subscription::new("hello", "dev1");
    let msg = Body::Subscribe(sub.clone()).into_message().unwrap();
    assert_eq!(msg.action, body::SUBSCRIBE);
    assert_eq!(Body::parse(&msg).unwrap(), Body::Subscribe(sub.clone()));

    let subs = vec![sub, Subscription::new("", "dev1")];
    let msg = Body::Subscriptions(subs.clone()).into_message().unwrap();
    assert_eq!(Body::parse(&msg).unwrap(), Body::Subscriptions(subs));

    let info = ClientInfo {
        name: "kitchen".to_string(),
        auth: "secret".to_string(),
        ..ClientInfo::default()
    };
    let msg = Body::Hello(info.clone()).into_message().unwrap();
    assert_eq!(Body::parse(&msg).unwrap(), Body::Hello(info));

    let msg = Body::Discover("location/update".to_string())
        .into_message()
        .unwrap();
    assert_eq!(msg.action, "proto/discover/location/update");
    assert_eq!(
        Body::parse(&msg).unwrap(),
        Body::Discover("location/update".to_string())
    );
}

#[test]
fn test_body_errors_and_unknown_pass_through() {
    let parsed = Body::parse(&bad_request("nope")).unwrap();
    match parsed {
        Body::Error { kind, text } => {
            assert_eq!(kind, "badrequest");
            assert!(text.contains("nope"));
        }
        other => panic!("expected error body, got {other:?}"),
    }

    let msg = Message::with_payload("meals/add", &json!({"name": "soup", "kcal": 300})).unwrap();
    let body = Body::parse(&msg).unwrap();
    let rebuilt = body.into_message().unwrap();
    assert_eq!(rebuilt.action, "meals/add");
    assert_eq!(rebuilt.payload, msg.payload);
}
