//! Mapping between (action, device) pairs and hierarchical topic strings.
//!
//! Transports that route on topics (MQTT, AMQP, the broker's routing table)
//! address a message as `dev/<device>/action/<action>`, leaving out whichever
//! half is empty.
//!
//! The mapping is only reversible when neither the action nor the device
//! contains a literal `dev` or `action` segment: [`from_topic`] treats the
//! first `dev` and the first `action` segment as markers, so the action
//! `dev/x` comes back from `get_topic("dev/x", "")` as just `x`.

const DEVICE_MARKER: &str = "dev";
const ACTION_MARKER: &str = "action";

/// Encodes `action` and `device` as a `/`-separated topic.
pub fn get_topic(action: &str, device: &str) -> String {
    join_topic(action, device, '/')
}

/// Splits a `/`-separated topic back into `(action, device)`.
pub fn from_topic(topic: &str) -> (String, String) {
    split_topic(topic, '/')
}

/// `.`-separated variant for AMQP style routing keys.
pub fn get_dotted_topic(action: &str, device: &str) -> String {
    join_topic(&action.replace('/', "."), &device.replace('/', "."), '.')
}

/// Inverse of [`get_dotted_topic`]; returns `/`-separated action and device.
pub fn from_dotted_topic(topic: &str) -> (String, String) {
    from_topic(&topic.replace('.', "/"))
}

/// The segments of a `/`-separated topic; empty for an empty topic.
pub fn topic_parts(topic: &str) -> Vec<&str> {
    let topic = topic.trim_start_matches('/');
    if topic.is_empty() {
        return Vec::new();
    }
    topic.split('/').collect()
}

/// Whether `topic` lies in the subtree named by `filter`. The empty filter
/// matches every topic; segments are compared whole, never by prefix.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter = topic_parts(filter);
    let topic = topic_parts(topic);
    filter.len() <= topic.len() && filter.iter().zip(&topic).all(|(f, t)| f == t)
}

fn join_topic(action: &str, device: &str, sep: char) -> String {
    let mut topic = String::new();
    if !device.is_empty() {
        topic.push(sep);
        topic.push_str(DEVICE_MARKER);
        topic.push(sep);
        topic.push_str(device);
    }
    if !action.is_empty() {
        topic.push(sep);
        topic.push_str(ACTION_MARKER);
        topic.push(sep);
        topic.push_str(action);
    }
    topic.trim_start_matches(sep).to_string()
}

fn split_topic(topic: &str, sep: char) -> (String, String) {
    let mut action: Vec<&str> = Vec::new();
    let mut device: Vec<&str> = Vec::new();
    let (mut found_dev, mut found_action) = (false, false);

    for part in topic.trim_start_matches(sep).split(sep).filter(|p| !p.is_empty()) {
        if part == DEVICE_MARKER && !found_dev {
            found_dev = true;
            continue;
        }
        if part == ACTION_MARKER && !found_action {
            found_action = true;
            continue;
        }
        if found_action {
            action.push(part);
        } else {
            device.push(part);
        }
    }

    let join = sep.to_string();
    (action.join(&join), device.join(&join))
}
