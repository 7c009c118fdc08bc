//! Process-wide GUID duplicate index.
//!
//! Centralizes what the original implementation tracked ad hoc across
//! plugins and the search-folder (vfolder) engine (spec §9's design note).
//! Every writer that creates or removes an item with a `valid_guid` goes
//! through here instead of scanning the store.

use std::collections::{HashMap, HashSet};

use crate::node::NodeId;

/// Maps a feed-supplied GUID to the set of nodes holding an item with that
/// GUID (spec §3, "GUID duplicate index").
#[derive(Debug, Default)]
pub struct GuidIndex {
    index: HashMap<String, HashSet<NodeId>>,
}

impl GuidIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `node` holds an item with `guid`.
    pub fn insert(&mut self, guid: &str, node: NodeId) {
        self.index.entry(guid.to_string()).or_default().insert(node);
    }

    /// Forgets that `node` holds an item with `guid`. Removes the GUID
    /// entirely once no node references it.
    pub fn remove(&mut self, guid: &str, node: NodeId) {
        if let Some(nodes) = self.index.get_mut(guid) {
            nodes.remove(&node);
            if nodes.is_empty() {
                self.index.remove(guid);
            }
        }
    }

    /// Returns every node (other than `excluding`, if given) known to hold
    /// an item with `guid`.
    #[must_use]
    pub fn find_duplicates(&self, guid: &str, excluding: Option<NodeId>) -> Vec<NodeId> {
        self.index
            .get(guid)
            .into_iter()
            .flatten()
            .copied()
            .filter(|id| Some(*id) != excluding)
            .collect()
    }

    /// Whether any node other than `excluding` holds an item with `guid`.
    #[must_use]
    pub fn has_duplicates(&self, guid: &str, excluding: Option<NodeId>) -> bool {
        !self.find_duplicates(guid, excluding).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_duplicates_across_nodes() {
        let mut idx = GuidIndex::new();
        idx.insert("g1", NodeId(1));
        idx.insert("g1", NodeId(2));
        assert_eq!(idx.find_duplicates("g1", Some(NodeId(1))), vec![NodeId(2)]);
        assert!(idx.has_duplicates("g1", Some(NodeId(1))));
    }

    #[test]
    fn removing_last_reference_drops_the_entry() {
        let mut idx = GuidIndex::new();
        idx.insert("g1", NodeId(1));
        idx.remove("g1", NodeId(1));
        assert!(idx.find_duplicates("g1", None).is_empty());
    }
}
