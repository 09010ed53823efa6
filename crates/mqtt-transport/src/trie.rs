//! Radix-style trie for MQTT topic pattern matching.
//!
//! Registered patterns can contain two kinds of named wildcards:
//! - `:name` matches exactly one topic segment and binds it to `name`
//! - `*name` matches the whole remainder and binds it (must be last)
//!
//! The broker-native wildcards `+` and `#` are accepted as anonymous
//! variants of the same two kinds; they match without binding a value.
//! Static children are always tried before wildcard children.

use crate::error::TransportError;
use crate::router::Params;

/// One segment of a registered pattern, classified at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PatternSegment {
    /// Literal segment
    Static(String),
    /// Single-segment wildcard; empty name for a bare `+`
    Param(String),
    /// Remainder wildcard; empty name for a bare `#`
    CatchAll(String),
}

/// Split a normalized pattern (leading `/` guaranteed) into classified
/// segments, rejecting malformed wildcards.
pub(crate) fn parse_segments(pattern: &str) -> Result<Vec<PatternSegment>, TransportError> {
    let raw = pattern.strip_prefix('/').unwrap_or(pattern);
    let mut segments = Vec::new();
    for part in raw.split('/') {
        let segment = if part == "+" {
            PatternSegment::Param(String::new())
        } else if part == "#" {
            PatternSegment::CatchAll(String::new())
        } else if let Some(name) = part.strip_prefix(':') {
            if name.is_empty() {
                return Err(TransportError::UnnamedWildcard {
                    pattern: pattern.to_string(),
                });
            }
            PatternSegment::Param(name.to_string())
        } else if let Some(name) = part.strip_prefix('*') {
            if name.is_empty() {
                return Err(TransportError::UnnamedWildcard {
                    pattern: pattern.to_string(),
                });
            }
            PatternSegment::CatchAll(name.to_string())
        } else {
            PatternSegment::Static(part.to_string())
        };
        segments.push(segment);
    }
    // a catch-all consumes the remainder, nothing may follow it
    if let Some(pos) = segments
        .iter()
        .position(|s| matches!(s, PatternSegment::CatchAll(_)))
    {
        if pos != segments.len() - 1 {
            return Err(TransportError::CatchAllPosition {
                pattern: pattern.to_string(),
            });
        }
    }
    Ok(segments)
}

/// Number of binding wildcards in a parsed pattern
pub(crate) fn count_params(segments: &[PatternSegment]) -> usize {
    segments
        .iter()
        .filter(|s| match s {
            PatternSegment::Param(name) | PatternSegment::CatchAll(name) => !name.is_empty(),
            PatternSegment::Static(_) => false,
        })
        .count()
}

/// Derive the broker subscription filter from a parsed pattern:
/// `:name` becomes `+`, `*name` becomes `#`.
pub(crate) fn subscribe_filter(segments: &[PatternSegment]) -> String {
    let mut filter = String::new();
    for segment in segments {
        filter.push('/');
        match segment {
            PatternSegment::Static(s) => filter.push_str(s),
            PatternSegment::Param(_) => filter.push('+'),
            PatternSegment::CatchAll(_) => filter.push('#'),
        }
    }
    filter
}

/// Trie node. Each node holds its static children in insertion order plus
/// at most one param child and at most one catch-all child; the catch-all
/// child is always terminal. The node's position (static child, `param`
/// slot or `catch_all` slot) encodes its kind; `segment` is the literal
/// text for static nodes and the binding name for wildcard nodes.
pub(crate) struct Node<T> {
    segment: String,
    children: Vec<Node<T>>,
    param: Option<Box<Node<T>>>,
    catch_all: Option<Box<Node<T>>>,
    value: Option<T>,
}

impl<T> Node<T> {
    pub(crate) fn root() -> Self {
        Self::new(String::new())
    }

    fn new(segment: String) -> Self {
        Self {
            segment,
            children: Vec::new(),
            param: None,
            catch_all: None,
            value: None,
        }
    }

    /// Insert a parsed pattern. Rejects duplicate terminals and wildcard
    /// name conflicts at the same position.
    pub(crate) fn insert(
        &mut self,
        segments: &[PatternSegment],
        pattern: &str,
        value: T,
    ) -> Result<(), TransportError> {
        let Some((first, rest)) = segments.split_first() else {
            if self.value.is_some() {
                return Err(TransportError::DuplicateRoute {
                    pattern: pattern.to_string(),
                });
            }
            self.value = Some(value);
            return Ok(());
        };
        match first {
            PatternSegment::Static(s) => {
                let position = self.children.iter().position(|c| c.segment == *s);
                let child = match position {
                    Some(i) => &mut self.children[i],
                    None => {
                        self.children.push(Node::new(s.clone()));
                        self.children.last_mut().expect("just pushed")
                    }
                };
                child.insert(rest, pattern, value)
            }
            PatternSegment::Param(name) => {
                match &mut self.param {
                    Some(existing) if existing.segment != *name => {
                        Err(TransportError::WildcardConflict {
                            pattern: pattern.to_string(),
                            existing: format!(":{}", existing.segment),
                        })
                    }
                    Some(existing) => existing.insert(rest, pattern, value),
                    None => {
                        let mut node = Box::new(Node::new(name.clone()));
                        let result = node.insert(rest, pattern, value);
                        self.param = Some(node);
                        result
                    }
                }
            }
            PatternSegment::CatchAll(name) => {
                // parse_segments guarantees rest is empty here
                match &mut self.catch_all {
                    Some(existing) if existing.segment != *name => {
                        Err(TransportError::WildcardConflict {
                            pattern: pattern.to_string(),
                            existing: format!("*{}", existing.segment),
                        })
                    }
                    Some(existing) => existing.insert(rest, pattern, value),
                    None => {
                        let mut node = Box::new(Node::new(name.clone()));
                        let result = node.insert(rest, pattern, value);
                        self.catch_all = Some(node);
                        result
                    }
                }
            }
        }
    }

    /// Match a topic split into segments, filling `params` with bindings in
    /// pattern order. Static children win over the param child, which wins
    /// over the catch-all. Bindings from failed branches are rolled back.
    ///
    /// A catch-all requires at least one remaining segment; a topic that
    /// ends exactly at the catch-all's parent does not match.
    pub(crate) fn find(&self, segments: &[&str], params: &mut Params) -> Option<&T> {
        let Some((first, rest)) = segments.split_first() else {
            return self.value.as_ref();
        };

        if let Some(child) = self.children.iter().find(|c| c.segment == *first) {
            if let Some(value) = child.find(rest, params) {
                return Some(value);
            }
        }

        if let Some(param) = &self.param {
            let bound = !param.segment.is_empty();
            if bound {
                params.push(param.segment.clone(), (*first).to_string());
            }
            if let Some(value) = param.find(rest, params) {
                return Some(value);
            }
            if bound {
                params.pop();
            }
        }

        if let Some(catch_all) = &self.catch_all {
            if catch_all.value.is_some() {
                if !catch_all.segment.is_empty() {
                    params.push(catch_all.segment.clone(), segments.join("/"));
                }
                return catch_all.value.as_ref();
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(pattern: &str) -> Vec<PatternSegment> {
        parse_segments(pattern).unwrap()
    }

    fn lookup<'a>(node: &'a Node<u32>, topic: &str) -> Option<(&'a u32, Params)> {
        let mut params = Params::default();
        let parts: Vec<&str> = topic
            .strip_prefix('/')
            .unwrap_or(topic)
            .split('/')
            .collect();
        node.find(&parts, &mut params).map(|v| (v, params))
    }

    #[test]
    fn test_static_match() {
        let mut root = Node::root();
        root.insert(&segs("/sys/pk/dev/thing/service/get"), "p", 1).unwrap();

        assert!(lookup(&root, "/sys/pk/dev/thing/service/get").is_some());
        assert!(lookup(&root, "/sys/pk/dev/thing/service/set").is_none());
        assert!(lookup(&root, "/sys/pk/dev/thing/service").is_none());
    }

    #[test]
    fn test_param_binding_order() {
        let mut root = Node::root();
        root.insert(&segs("/blog/:category/:post"), "p", 1).unwrap();

        let (_, params) = lookup(&root, "/blog/go/routers").unwrap();
        let pairs: Vec<_> = params.iter().collect();
        assert_eq!(pairs, vec![("category", "go"), ("post", "routers")]);

        // one segment too many
        assert!(lookup(&root, "/blog/go/routers/comments").is_none());
        // one segment short
        assert!(lookup(&root, "/blog/go").is_none());
    }

    #[test]
    fn test_static_wins_over_param() {
        let mut root = Node::root();
        root.insert(&segs("/device/reset"), "p1", 1).unwrap();
        root.insert(&segs("/device/:action"), "p2", 2).unwrap();

        let (value, params) = lookup(&root, "/device/reset").unwrap();
        assert_eq!(*value, 1);
        assert!(params.is_empty());

        let (value, params) = lookup(&root, "/device/reboot").unwrap();
        assert_eq!(*value, 2);
        assert_eq!(params.by_name("action"), Some("reboot"));
    }

    #[test]
    fn test_backtrack_rolls_back_bindings() {
        let mut root = Node::root();
        root.insert(&segs("/a/:x/end"), "p1", 1).unwrap();
        root.insert(&segs("/a/*rest"), "p2", 2).unwrap();

        // :x binds "b", fails on "other", unwinds, catch-all takes over
        let (value, params) = lookup(&root, "/a/b/other").unwrap();
        assert_eq!(*value, 2);
        assert_eq!(params.by_name("x"), None);
        assert_eq!(params.by_name("rest"), Some("b/other"));
    }

    #[test]
    fn test_catch_all_needs_a_segment() {
        let mut root = Node::root();
        root.insert(&segs("/logs/*path"), "p", 1).unwrap();

        let (_, params) = lookup(&root, "/logs/a/b/c").unwrap();
        assert_eq!(params.by_name("path"), Some("a/b/c"));

        // remainder is empty, no match
        assert!(lookup(&root, "/logs").is_none());
    }

    #[test]
    fn test_anonymous_wildcards_bind_nothing() {
        let mut root = Node::root();
        root.insert(&segs("/device/:id/+/post"), "p", 1).unwrap();

        let (_, params) = lookup(&root, "/device/42/temp/post").unwrap();
        let pairs: Vec<_> = params.iter().collect();
        assert_eq!(pairs, vec![("id", "42")]);
    }

    #[test]
    fn test_duplicate_static_rejected() {
        let mut root = Node::root();
        root.insert(&segs("/a/b"), "/a/b", 1).unwrap();
        let err = root.insert(&segs("/a/b"), "/a/b", 2).unwrap_err();
        assert!(matches!(err, TransportError::DuplicateRoute { .. }));
    }

    #[test]
    fn test_wildcard_name_conflict_rejected() {
        let mut root = Node::root();
        root.insert(&segs("/a/:x/b"), "/a/:x/b", 1).unwrap();
        let err = root.insert(&segs("/a/:y/c"), "/a/:y/c", 2).unwrap_err();
        assert!(matches!(err, TransportError::WildcardConflict { .. }));
    }

    #[test]
    fn test_catch_all_must_be_last() {
        let err = parse_segments("/a/*rest/b").unwrap_err();
        assert!(matches!(err, TransportError::CatchAllPosition { .. }));
    }

    #[test]
    fn test_unnamed_wildcard_rejected() {
        assert!(matches!(
            parse_segments("/a/:"),
            Err(TransportError::UnnamedWildcard { .. })
        ));
        assert!(matches!(
            parse_segments("/a/*"),
            Err(TransportError::UnnamedWildcard { .. })
        ));
    }

    #[test]
    fn test_subscribe_filter_translation() {
        assert_eq!(
            subscribe_filter(&segs("/device/:id/+/post")),
            "/device/+/+/post"
        );
        assert_eq!(subscribe_filter(&segs("/logs/*path")), "/logs/#");
        assert_eq!(subscribe_filter(&segs("/sys/a/b")), "/sys/a/b");
    }

    #[test]
    fn test_count_params_ignores_anonymous() {
        assert_eq!(count_params(&segs("/device/:id/+/post")), 1);
        assert_eq!(count_params(&segs("/a/:x/*y")), 2);
        assert_eq!(count_params(&segs("/a/+/#")), 0);
    }
}
