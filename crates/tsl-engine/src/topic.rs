//! Structured business topic parsing.
//!
//! Topics follow
//! `<prefix>/<productKey>/<deviceName>/<classify1>/<classify2>[/<subdir>...][_reply]`
//! with the known prefixes `/sys/` and `/ext/session/`.

use thiserror::Error;

/// Recognized topic prefixes, checked in order
pub const TOPIC_PREFIXES: &[&str] = &["/sys/", "/ext/session/"];

/// Suffix marking a reply topic
pub const TOPIC_REPLY_SUFFIX: &str = "_reply";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("invalid topic prefix")]
    InvalidPrefix,

    #[error("invalid topic")]
    InvalidTopic,
}

/// A parsed business topic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topic {
    pub orig_topic: String,
    pub prefix: String,
    pub product_key: String,
    pub device_name: String,
    pub classify1: String,
    pub classify2: String,
    pub sub_dirs: Vec<String>,
    pub is_reply: bool,
}

/// Parse a structured topic. The remainder after prefix stripping and
/// optional `_reply` removal must have at least four `/`-separated fields.
pub fn parse_topic(topic: &str) -> Result<Topic, TopicError> {
    let mut parsed = Topic {
        orig_topic: topic.to_string(),
        ..Topic::default()
    };

    let mut rest = "";
    for prefix in TOPIC_PREFIXES {
        if let Some(tail) = topic.strip_prefix(prefix) {
            parsed.prefix = prefix.to_string();
            rest = tail;
            break;
        }
    }
    if parsed.prefix.is_empty() {
        return Err(TopicError::InvalidPrefix);
    }

    let rest = match rest.strip_suffix(TOPIC_REPLY_SUFFIX) {
        Some(stripped) => {
            parsed.is_reply = true;
            stripped
        }
        None => rest,
    };

    let fields: Vec<&str> = rest.split('/').collect();
    if fields.len() < 4 {
        return Err(TopicError::InvalidTopic);
    }
    parsed.product_key = fields[0].to_string();
    parsed.device_name = fields[1].to_string();
    parsed.classify1 = fields[2].to_string();
    parsed.classify2 = fields[3].to_string();
    parsed.sub_dirs = fields[4..].iter().map(|s| s.to_string()).collect();
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sys_topic() {
        let topic = parse_topic("/sys/pk100/dev-a/thing/service/property/set").unwrap();
        assert_eq!(topic.prefix, "/sys/");
        assert_eq!(topic.product_key, "pk100");
        assert_eq!(topic.device_name, "dev-a");
        assert_eq!(topic.classify1, "thing");
        assert_eq!(topic.classify2, "service");
        assert_eq!(topic.sub_dirs, vec!["property", "set"]);
        assert!(!topic.is_reply);
    }

    #[test]
    fn test_ext_session_topic() {
        let topic = parse_topic("/ext/session/pk100/dev-a/combine/login").unwrap();
        assert_eq!(topic.prefix, "/ext/session/");
        assert_eq!(topic.classify1, "combine");
        assert_eq!(topic.classify2, "login");
        assert!(topic.sub_dirs.is_empty());
    }

    #[test]
    fn test_reply_suffix() {
        let topic = parse_topic("/sys/pk100/dev-a/thing/service/reset_reply").unwrap();
        assert!(topic.is_reply);
        assert_eq!(topic.sub_dirs, vec!["reset"]);
    }

    #[test]
    fn test_unknown_prefix() {
        assert_eq!(
            parse_topic("/device/pk/dev/thing/service"),
            Err(TopicError::InvalidPrefix)
        );
    }

    #[test]
    fn test_too_few_fields() {
        assert_eq!(
            parse_topic("/sys/pk100/dev-a/thing"),
            Err(TopicError::InvalidTopic)
        );
    }

    #[test]
    fn test_original_topic_preserved() {
        let raw = "/sys/pk/dev/thing/event/property/post";
        assert_eq!(parse_topic(raw).unwrap().orig_topic, raw);
    }
}
