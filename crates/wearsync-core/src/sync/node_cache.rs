//! Cached companion node id
//!
//! A cache, not a source of truth: the watch reuses the last node it talked
//! to and drops it as soon as a send to that node fails.

use parking_lot::RwLock;
use tracing::debug;

use crate::types::NodeId;

#[derive(Debug, Default)]
pub struct NodeCache {
    node: RwLock<Option<NodeId>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<NodeId> {
        self.node.read().clone()
    }

    pub fn set(&self, node: NodeId) {
        let mut slot = self.node.write();
        if slot.as_ref() != Some(&node) {
            debug!(node = %node.short(), "Caching companion node");
            *slot = Some(node);
        }
    }

    /// Drop the cached id, but only if it is still `node`.
    ///
    /// Another cycle may already have cached a fresh id.
    pub fn invalidate(&self, node: &NodeId) -> bool {
        let mut slot = self.node.write();
        if slot.as_ref() == Some(node) {
            debug!(node = %node.short(), "Invalidating cached node");
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        *self.node.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let cache = NodeCache::new();
        assert!(cache.get().is_none());
        cache.set(NodeId::from("phone-1"));
        assert_eq!(cache.get(), Some(NodeId::from("phone-1")));
    }

    #[test]
    fn test_invalidate_only_matching_node() {
        let cache = NodeCache::new();
        cache.set(NodeId::from("phone-2"));

        assert!(!cache.invalidate(&NodeId::from("phone-1")));
        assert_eq!(cache.get(), Some(NodeId::from("phone-2")));

        assert!(cache.invalidate(&NodeId::from("phone-2")));
        assert!(cache.get().is_none());
    }
}
