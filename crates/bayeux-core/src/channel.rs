//! Channel names and the subscription registry.
//!
//! Channel names are `/`-separated segments. Subscription patterns may use
//! `*` for exactly one segment and a trailing `**` for one or more segments.
//! The registry is a trie over segments so publish-time matching walks at
//! most one path per wildcard branch instead of scanning every pattern.

use crate::message::ClientId;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Meta channel prefix segment.
pub const META_SEGMENT: &str = "meta";

/// Service channel prefix segment.
pub const SERVICE_SEGMENT: &str = "service";

/// Single-segment wildcard.
pub const WILDCARD: &str = "*";

/// Trailing multi-segment wildcard.
pub const GLOBSTAR: &str = "**";

/// Meta channel names.
pub mod meta {
    pub const HANDSHAKE: &str = "/meta/handshake";
    pub const CONNECT: &str = "/meta/connect";
    pub const DISCONNECT: &str = "/meta/disconnect";
    pub const SUBSCRIBE: &str = "/meta/subscribe";
    pub const UNSUBSCRIBE: &str = "/meta/unsubscribe";
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '!' | '~' | '(' | ')' | '$' | '@')
}

fn is_literal_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(is_segment_char)
}

/// Split a channel name into its segments.
///
/// Returns `None` if the name does not start with `/` or has an empty
/// segment. Segment contents are not checked.
fn segments(name: &str) -> Option<Vec<&str>> {
    let rest = name.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();
    if parts.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(parts)
}

fn first_segment(name: &str) -> Option<&str> {
    name.strip_prefix('/')?.split('/').next()
}

/// Whether `name` is a concrete channel name without wildcards.
#[must_use]
pub fn is_concrete(name: &str) -> bool {
    segments(name).is_some_and(|parts| parts.iter().all(|s| is_literal_segment(s)))
}

/// Whether `name` is a well-formed channel name or subscription pattern.
///
/// `*` may stand for any whole segment; `**` is only allowed last.
#[must_use]
pub fn is_valid(name: &str) -> bool {
    let Some(parts) = segments(name) else {
        return false;
    };
    let last = parts.len() - 1;
    parts.iter().enumerate().all(|(i, s)| {
        is_literal_segment(s) || *s == WILDCARD || (*s == GLOBSTAR && i == last)
    })
}

/// Whether `name` is in the `/meta/**` namespace.
#[must_use]
pub fn is_meta(name: &str) -> bool {
    first_segment(name) == Some(META_SEGMENT)
}

/// Whether `name` is in the `/service/**` namespace.
#[must_use]
pub fn is_service(name: &str) -> bool {
    first_segment(name) == Some(SERVICE_SEGMENT)
}

/// Whether clients may subscribe to `name`.
#[must_use]
pub fn is_subscribable(name: &str) -> bool {
    is_valid(name) && !is_meta(name) && !is_service(name)
}

/// A trie node for one pattern prefix.
#[derive(Debug, Default)]
pub struct Node {
    subscribers: HashSet<ClientId>,
    children: HashMap<String, Node>,
}

impl Node {
    /// Clients subscribed to the pattern ending at this node.
    pub fn subscribers(&self) -> impl Iterator<Item = &ClientId> {
        self.subscribers.iter()
    }

    /// Number of clients subscribed to the pattern ending at this node.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a client is subscribed to the pattern ending at this node.
    #[must_use]
    pub fn is_subscribed(&self, client_id: &str) -> bool {
        self.subscribers.contains(client_id)
    }

    fn is_prunable(&self) -> bool {
        self.subscribers.is_empty() && self.children.is_empty()
    }

    fn collect(&self, remaining: &[&str], out: &mut HashSet<ClientId>) {
        let Some((head, rest)) = remaining.split_first() else {
            out.extend(self.subscribers.iter().cloned());
            return;
        };
        if let Some(globstar) = self.children.get(GLOBSTAR) {
            out.extend(globstar.subscribers.iter().cloned());
        }
        if let Some(wildcard) = self.children.get(WILDCARD) {
            wildcard.collect(rest, out);
        }
        if let Some(child) = self.children.get(*head) {
            child.collect(rest, out);
        }
    }

    /// Remove `client_id` along `path`, dropping emptied nodes on the way back.
    fn remove(&mut self, path: &[&str], client_id: &str) -> bool {
        match path.split_first() {
            None => self.subscribers.remove(client_id),
            Some((head, rest)) => {
                let Some(child) = self.children.get_mut(*head) else {
                    return false;
                };
                let removed = child.remove(rest, client_id);
                if child.is_prunable() {
                    self.children.remove(*head);
                }
                removed
            }
        }
    }

    fn count_patterns(&self) -> (usize, usize) {
        let own = usize::from(!self.subscribers.is_empty());
        self.children
            .values()
            .map(Node::count_patterns)
            .fold((own, self.subscribers.len()), |(p, s), (cp, cs)| {
                (p + cp, s + cs)
            })
    }
}

/// Registry mapping subscription patterns to subscribed clients.
///
/// Callers validate patterns before registering them.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    root: Node,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn path(pattern: &str) -> Vec<&str> {
        pattern.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Get the node for an exact pattern, if it exists.
    #[must_use]
    pub fn lookup(&self, pattern: &str) -> Option<&Node> {
        Self::path(pattern)
            .into_iter()
            .try_fold(&self.root, |node, segment| node.children.get(segment))
    }

    /// Get the node for an exact pattern, creating it if needed.
    pub fn ensure(&mut self, pattern: &str) -> &mut Node {
        Self::path(pattern)
            .into_iter()
            .fold(&mut self.root, |node, segment| {
                node.children.entry(segment.to_string()).or_default()
            })
    }

    /// Subscribe a client to a pattern.
    ///
    /// Returns `true` if the client was not already subscribed.
    pub fn register(&mut self, pattern: &str, client_id: &str) -> bool {
        self.ensure(pattern).subscribers.insert(client_id.to_string())
    }

    /// Unsubscribe a client from a pattern.
    ///
    /// Returns `true` if the client was subscribed.
    pub fn unregister(&mut self, pattern: &str, client_id: &str) -> bool {
        self.root.remove(&Self::path(pattern), client_id)
    }

    /// Clients whose patterns match a concrete channel.
    #[must_use]
    pub fn matching_subscribers(&self, channel: &str) -> HashSet<ClientId> {
        let mut out = HashSet::new();
        let path = Self::path(channel);
        if !path.is_empty() {
            self.root.collect(&path, &mut out);
        }
        trace!(channel = %channel, matched = out.len(), "Resolved subscribers");
        out
    }

    /// Number of patterns with at least one subscriber.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.root.count_patterns().0
    }

    /// Total number of (pattern, client) registrations.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.root.count_patterns().1
    }

    /// Check if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_prunable()
    }

    /// Drop every registration.
    pub fn clear(&mut self) {
        self.root = Node::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(registry: &ChannelRegistry, channel: &str, client: &str) -> bool {
        registry.matching_subscribers(channel).contains(client)
    }

    #[test]
    fn test_channel_name_validation() {
        assert!(is_valid("/foo"));
        assert!(is_valid("/foo/bar-baz_1"));
        assert!(is_valid("/foo/*"));
        assert!(is_valid("/foo/**"));
        assert!(is_valid("/foo/*/bar"));
        assert!(is_valid("/**"));

        assert!(!is_valid(""));
        assert!(!is_valid("/"));
        assert!(!is_valid("foo"));
        assert!(!is_valid("/foo//bar"));
        assert!(!is_valid("/foo/"));
        assert!(!is_valid("/foo/**/bar"));
        assert!(!is_valid("/foo/ba*"));
        assert!(!is_valid("/foo/***"));
        assert!(!is_valid("/foo bar"));
    }

    #[test]
    fn test_concrete_and_pattern() {
        assert!(is_concrete("/foo/bar"));
        assert!(!is_concrete("/foo/*"));
        assert!(is_valid("/foo/**"));
        assert!(!is_concrete("/foo/**"));
        assert!(!is_valid("/foo//*"));
    }

    #[test]
    fn test_reserved_namespaces() {
        assert!(is_meta("/meta/handshake"));
        assert!(is_meta("/meta/*"));
        assert!(!is_meta("/metadata"));
        assert!(is_service("/service/echo"));
        assert!(!is_service("/services"));

        assert!(is_subscribable("/chat/room"));
        assert!(!is_subscribable("/meta/connect"));
        assert!(!is_subscribable("/service/echo"));
        assert!(!is_subscribable("/chat//room"));
    }

    #[test]
    fn test_literal_matching() {
        let mut registry = ChannelRegistry::new();
        registry.register("/foo/bar", "c1");

        assert!(matches(&registry, "/foo/bar", "c1"));
        assert!(!matches(&registry, "/foo", "c1"));
        assert!(!matches(&registry, "/foo/bar/baz", "c1"));
        assert!(!matches(&registry, "/foo/baz", "c1"));
    }

    #[test]
    fn test_wildcard_matching() {
        let mut registry = ChannelRegistry::new();
        registry.register("/foo/*", "c1");

        assert!(matches(&registry, "/foo/bar", "c1"));
        assert!(!matches(&registry, "/foo/bar/baz", "c1"));
        assert!(!matches(&registry, "/foo", "c1"));
    }

    #[test]
    fn test_inner_wildcard_matching() {
        let mut registry = ChannelRegistry::new();
        registry.register("/foo/*/baz", "c1");

        assert!(matches(&registry, "/foo/bar/baz", "c1"));
        assert!(matches(&registry, "/foo/qux/baz", "c1"));
        assert!(!matches(&registry, "/foo/bar", "c1"));
        assert!(!matches(&registry, "/foo/bar/baz/x", "c1"));
    }

    #[test]
    fn test_globstar_matching() {
        let mut registry = ChannelRegistry::new();
        registry.register("/foo/**", "c1");

        assert!(matches(&registry, "/foo/bar", "c1"));
        assert!(matches(&registry, "/foo/bar/baz", "c1"));
        assert!(!matches(&registry, "/foo", "c1"));
        assert!(!matches(&registry, "/other/bar", "c1"));
    }

    #[test]
    fn test_matching_deduplicates() {
        let mut registry = ChannelRegistry::new();
        registry.register("/foo/bar", "c1");
        registry.register("/foo/*", "c1");
        registry.register("/foo/**", "c1");
        registry.register("/**", "c2");

        let matched = registry.matching_subscribers("/foo/bar");
        assert_eq!(matched.len(), 2);
        assert!(matched.contains("c1"));
        assert!(matched.contains("c2"));
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = ChannelRegistry::new();
        assert!(registry.register("/foo", "c1"));
        assert!(!registry.register("/foo", "c1"));
        assert_eq!(registry.subscription_count(), 1);
    }

    #[test]
    fn test_unregister_prunes_nodes() {
        let mut registry = ChannelRegistry::new();
        registry.register("/foo/bar/baz", "c1");
        registry.register("/foo", "c2");

        assert!(registry.unregister("/foo/bar/baz", "c1"));
        assert!(!registry.unregister("/foo/bar/baz", "c1"));
        assert!(registry.lookup("/foo/bar").is_none());
        assert!(registry.lookup("/foo").is_some());

        assert!(registry.unregister("/foo", "c2"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let mut registry = ChannelRegistry::new();
        registry.register("/foo", "c1");

        assert!(!registry.unregister("/bar", "c1"));
        assert!(!registry.unregister("/foo", "c2"));
        assert!(matches(&registry, "/foo", "c1"));
    }

    #[test]
    fn test_ensure_and_lookup() {
        let mut registry = ChannelRegistry::new();
        assert!(registry.lookup("/foo/*").is_none());

        registry.ensure("/foo/*");
        let node = registry.lookup("/foo/*").unwrap();
        assert_eq!(node.subscriber_count(), 0);

        // Empty nodes never produce matches.
        assert!(registry.matching_subscribers("/foo/bar").is_empty());

        registry.register("/foo/*", "c1");
        let node = registry.lookup("/foo/*").unwrap();
        assert!(node.is_subscribed("c1"));
        assert_eq!(node.subscribers().collect::<Vec<_>>(), vec!["c1"]);
    }

    #[test]
    fn test_counts() {
        let mut registry = ChannelRegistry::new();
        registry.register("/a", "c1");
        registry.register("/a", "c2");
        registry.register("/a/*", "c1");

        assert_eq!(registry.pattern_count(), 2);
        assert_eq!(registry.subscription_count(), 3);

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.pattern_count(), 0);
    }
}
