//! Parser for `thing.{event|service}.[property.]{action}` method strings.

use crate::error::TslError;

const METHOD_MIN_SEGMENTS: usize = 3;
const METHOD_MAX_SEGMENTS: usize = 4;
const PROPERTY_SEGMENT: &str = "property";

/// Whether a method addresses an event or a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClassify {
    Event,
    Service,
}

/// A parsed method identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThingMethod {
    pub original: String,
    pub classify: MethodClassify,
    /// set, get, post or a spec-defined identifier
    pub action: String,
    pub is_property: bool,
    pub is_set: bool,
    pub is_get: bool,
}

impl ThingMethod {
    /// Parse a dotted method string. Accepts three segments
    /// (`thing.service.reset`) or four when the third is `property`
    /// (`thing.service.property.set`).
    pub fn parse(method: &str) -> Result<Self, TslError> {
        let segments: Vec<&str> = method.split('.').collect();
        if segments.len() < METHOD_MIN_SEGMENTS || segments.len() > METHOD_MAX_SEGMENTS {
            return Err(TslError::method(method));
        }
        let classify = match segments[1] {
            "event" => MethodClassify::Event,
            "service" => MethodClassify::Service,
            _ => return Err(TslError::method(method)),
        };
        let mut action = segments[2];
        let mut is_property = false;
        if action == PROPERTY_SEGMENT {
            if segments.len() < METHOD_MAX_SEGMENTS {
                return Err(TslError::method(method));
            }
            action = segments[3];
            is_property = true;
        }
        Ok(Self {
            original: method.to_string(),
            classify,
            action: action.to_string(),
            is_property,
            is_set: is_property && action == "set",
            is_get: is_property && action == "get",
        })
    }

    pub fn is_service(&self) -> bool {
        self.classify == MethodClassify::Service
    }

    pub fn is_event(&self) -> bool {
        self.classify == MethodClassify::Event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_set() {
        let method = ThingMethod::parse("thing.service.property.set").unwrap();
        assert!(method.is_service());
        assert_eq!(method.action, "set");
        assert!(method.is_property);
        assert!(method.is_set);
        assert!(!method.is_get);
    }

    #[test]
    fn test_property_post_event() {
        let method = ThingMethod::parse("thing.event.property.post").unwrap();
        assert!(method.is_event());
        assert_eq!(method.action, "post");
        assert!(method.is_property);
        assert!(!method.is_set);
    }

    #[test]
    fn test_plain_service_action() {
        let method = ThingMethod::parse("thing.service.reset").unwrap();
        assert!(method.is_service());
        assert_eq!(method.action, "reset");
        assert!(!method.is_property);
    }

    #[test]
    fn test_invalid_methods() {
        // too short
        assert!(ThingMethod::parse("thing.event").is_err());
        // property without an action
        assert!(ThingMethod::parse("thing.service.property").is_err());
        // unknown classify
        assert!(ThingMethod::parse("thing.command.reset").is_err());
        // too long
        assert!(ThingMethod::parse("thing.service.property.set.extra").is_err());
    }
}
