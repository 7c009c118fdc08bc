//! The in-memory subscription tree.
//!
//! Nodes used to be connected by C-style parent/child/source pointers with
//! cycles back to their owning source (`node_type.h`'s vtable-dispatch
//! struct). Here the tree lives in a single arena (`NodeArena`) and all
//! cross-references are integer `NodeId` handles, so there is no cycle to
//! manage and no lifetime to thread through the scheduler or merge engine.

use std::collections::HashMap;

use crate::item::rules::RuleSet;
use crate::subscription::Subscription;

/// Opaque, stable node identifier. Assigned at creation and never reused or
/// changed for the lifetime of the node tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The identifier always assigned to the single root node.
    pub const ROOT: Self = Self(0);
}

/// The polymorphic kind of a node, replacing the original's runtime type
/// system. Each variant owns the payload only that kind needs.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A subtree container. Aggregates descendant counters.
    Folder,
    /// A syndication feed subscription.
    Feed(FeedPayload),
    /// A node containing user-copied items, independent of any feed.
    NewsBin,
    /// A node whose contents are computed by evaluating a rule set.
    SearchFolder(RuleSet),
    /// The insertion point of a node-source provider's subtree.
    NodeSourceRoot(NodeSourcePayload),
}

impl NodeKind {
    /// Short discriminator string, used for OPML serialization and logging.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Feed(_) => "feed",
            Self::NewsBin => "newsbin",
            Self::SearchFolder(_) => "searchfolder",
            Self::NodeSourceRoot(_) => "source",
        }
    }

    /// Whether this kind aggregates its children's counters (folders do;
    /// search folders and leaves do not — see spec §3 counter invariant).
    #[must_use]
    pub const fn aggregates_children(&self) -> bool {
        matches!(self, Self::Folder | Self::NodeSourceRoot(_))
    }
}

/// Feed-kind payload.
#[derive(Debug, Clone, Default)]
pub struct FeedPayload {
    /// Parser-assigned format tag, used on serialization (`"rss2"`, `"atom1.0"`, ...).
    pub format: Option<String>,
    /// Feed homepage URL, if declared.
    pub html_url: Option<String>,
    /// Feed icon/image URL, if declared.
    pub image_url: Option<String>,
    /// Cache eviction policy for this feed's items.
    pub cache_limit: CacheLimit,
    /// Drop items not re-seen on the next fetch (feeds with no history guarantee).
    pub merge_drop_old: bool,
    /// Accumulated non-fatal parse diagnostics from the most recent fetch.
    pub parse_errors: Vec<String>,
}

/// Cache eviction policy, spec §4.6 step 5.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CacheLimit {
    /// Keep only unread and flagged items.
    Disable,
    /// Use the process-global default.
    #[default]
    Default,
    /// Never evict.
    Unlimited,
    /// Evict to keep at most this many items.
    Count(u32),
}

/// Node-source-root payload: which provider owns this subtree and its
/// runtime state. The provider's own state machine lives in
/// `crate::nodesource`; this is just the tree-side handle.
#[derive(Debug, Clone)]
pub struct NodeSourcePayload {
    /// Identifier of the registered `NodeSourceProvider` that owns this subtree.
    pub provider_id: String,
}

/// A single vertex of the subscription tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// Stable identifier; used as a filesystem/db path component.
    pub id: NodeId,
    /// Parent node, `None` only for the root.
    pub parent: Option<NodeId>,
    /// Ordered list of children.
    pub children: Vec<NodeId>,
    /// Polymorphic kind/payload.
    pub kind: NodeKind,
    /// Display title.
    pub title: String,
    /// Optional icon reference (favicon cache path or similar).
    pub icon: Option<String>,
    /// Unread item counter (aggregated for folders/sources).
    pub unread: u32,
    /// New item counter (aggregated).
    pub new: u32,
    /// Total item counter (aggregated for folders/sources).
    pub item_count: u32,
    /// Present for feed and source-root kinds; absent for folders/news bins/search folders.
    pub subscription: Option<Subscription>,
    /// Set when a remote node source has not yet finalized removal of this node.
    pub pending_removal: bool,
}

impl Node {
    fn leaf(id: NodeId, parent: NodeId, title: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id,
            parent: Some(parent),
            children: Vec::new(),
            kind,
            title: title.into(),
            icon: None,
            unread: 0,
            new: 0,
            item_count: 0,
            subscription: None,
            pending_removal: false,
        }
    }
}

/// Error returned by tree mutation operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TreeError {
    /// The referenced node does not exist.
    #[error("no such node: {0:?}")]
    NoSuchNode(NodeId),
    /// The parent's provider capabilities (or read-only status) forbid this child kind.
    #[error("node kind not permitted under this parent")]
    KindNotPermitted,
    /// The operation would create a cycle.
    #[error("operation would create a cycle")]
    WouldCycle,
}

/// Owns every node in the tree. All cross-references are `NodeId`s; there
/// are no pointers and therefore no cycles to worry about freeing.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
}

impl NodeArena {
    /// Creates an arena with a single root node of kind `NodeSourceRoot`
    /// for the "default local" provider, per spec §3's root-node invariant.
    #[must_use]
    pub fn new_with_root(root_provider_id: impl Into<String>) -> Self {
        let mut arena = Self {
            nodes: HashMap::new(),
            next_id: 1,
        };
        let root = Node {
            id: NodeId::ROOT,
            parent: None,
            children: Vec::new(),
            kind: NodeKind::NodeSourceRoot(NodeSourcePayload {
                provider_id: root_provider_id.into(),
            }),
            title: "root".to_string(),
            icon: None,
            unread: 0,
            new: 0,
            item_count: 0,
            subscription: None,
            pending_removal: false,
        };
        arena.nodes.insert(NodeId::ROOT, root);
        arena
    }

    /// Returns the root node.
    #[must_use]
    pub fn root(&self) -> &Node {
        self.nodes.get(&NodeId::ROOT).expect("root always present")
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Looks up a node by id, mutably.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Adds `kind` as a new child of `parent` at `position` (clamped to the
    /// end of the existing child list). Fails with `KindNotPermitted` if the
    /// caller has already determined the parent's provider forbids it —
    /// that capability check happens in `nodesource`, not here; this method
    /// only enforces tree-shape invariants (parent must exist, no cycles).
    pub fn add_child(
        &mut self,
        parent: NodeId,
        title: impl Into<String>,
        kind: NodeKind,
        position: Option<usize>,
    ) -> Result<NodeId, TreeError> {
        if !self.nodes.contains_key(&parent) {
            return Err(TreeError::NoSuchNode(parent));
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let node = Node::leaf(id, parent, title, kind);
        self.nodes.insert(id, node);
        let parent_node = self.nodes.get_mut(&parent).expect("checked above");
        let pos = position.unwrap_or(parent_node.children.len()).min(parent_node.children.len());
        parent_node.children.insert(pos, id);
        Ok(id)
    }

    /// Removes a node and all of its descendants, dropping their items'
    /// ownership (actual item deletion from the store is the caller's
    /// responsibility — this only mutates the tree).
    pub fn remove(&mut self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        if id == NodeId::ROOT {
            return Err(TreeError::KindNotPermitted);
        }
        let parent = self.nodes.get(&id).ok_or(TreeError::NoSuchNode(id))?.parent;
        let mut removed = Vec::new();
        self.collect_subtree(id, &mut removed);
        for node_id in &removed {
            self.nodes.remove(node_id);
        }
        if let Some(parent) = parent
            && let Some(parent_node) = self.nodes.get_mut(&parent)
        {
            parent_node.children.retain(|c| *c != id);
        }
        Ok(removed)
    }

    fn collect_subtree(&self, id: NodeId, out: &mut Vec<NodeId>) {
        out.push(id);
        if let Some(node) = self.nodes.get(&id) {
            for child in node.children.clone() {
                self.collect_subtree(child, out);
            }
        }
    }

    /// Moves `node` to become a child of `new_parent` at `position`.
    pub fn move_node(
        &mut self,
        node: NodeId,
        new_parent: NodeId,
        position: Option<usize>,
    ) -> Result<(), TreeError> {
        if node == NodeId::ROOT {
            return Err(TreeError::KindNotPermitted);
        }
        if !self.nodes.contains_key(&new_parent) {
            return Err(TreeError::NoSuchNode(new_parent));
        }
        if new_parent == node || self.is_descendant(new_parent, node) {
            return Err(TreeError::WouldCycle);
        }
        let old_parent = self.nodes.get(&node).ok_or(TreeError::NoSuchNode(node))?.parent;
        if let Some(old_parent) = old_parent
            && let Some(p) = self.nodes.get_mut(&old_parent)
        {
            p.children.retain(|c| *c != node);
        }
        {
            let n = self.nodes.get_mut(&node).expect("checked above");
            n.parent = Some(new_parent);
        }
        let new_parent_node = self.nodes.get_mut(&new_parent).expect("checked above");
        let pos = position.unwrap_or(new_parent_node.children.len()).min(new_parent_node.children.len());
        new_parent_node.children.insert(pos, node);
        Ok(())
    }

    fn is_descendant(&self, candidate: NodeId, ancestor: NodeId) -> bool {
        let Some(node) = self.nodes.get(&candidate) else {
            return false;
        };
        match node.parent {
            Some(p) if p == ancestor => true,
            Some(p) => self.is_descendant(p, ancestor),
            None => false,
        }
    }

    /// Pre-order depth-first walk starting at `node`. The callback must not
    /// structurally mutate the walked subtree (spec §4.1); it receives an
    /// immutable reference.
    pub fn foreach_child(&self, node: NodeId, mut f: impl FnMut(&Node)) {
        let Some(start) = self.nodes.get(&node) else {
            return;
        };
        let mut stack: Vec<NodeId> = start.children.clone();
        stack.reverse();
        while let Some(id) = stack.pop() {
            if let Some(n) = self.nodes.get(&id) {
                f(n);
                let mut children = n.children.clone();
                children.reverse();
                stack.extend(children);
            }
        }
    }

    /// Recomputes aggregated counters bottom-up for every ancestor of
    /// `changed`, up to and including the root. Folders and node-source
    /// roots sum descendant counters; news bins and search folders
    /// contribute only their own (spec §3).
    pub fn propagate_counters(&mut self, changed: NodeId) {
        let mut current = self.nodes.get(&changed).and_then(|n| n.parent);
        while let Some(id) = current {
            self.recompute_aggregate(id);
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
    }

    fn recompute_aggregate(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else { return };
        if !node.kind.aggregates_children() {
            return;
        }
        let children = node.children.clone();
        let (mut unread, mut new, mut item_count) = (0u32, 0u32, 0u32);
        for child in children {
            if let Some(c) = self.nodes.get(&child) {
                unread += c.unread;
                new += c.new;
                item_count += c.item_count;
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.unread = unread;
            node.new = new;
            node.item_count = item_count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_counter_is_sum_of_descendants() {
        let mut arena = NodeArena::new_with_root("local");
        let folder = arena
            .add_child(NodeId::ROOT, "Tech", NodeKind::Folder, None)
            .unwrap();
        let feed = arena
            .add_child(folder, "Blog", NodeKind::Feed(FeedPayload::default()), None)
            .unwrap();
        arena.node_mut(feed).unwrap().unread = 5;
        arena.node_mut(feed).unwrap().new = 2;
        arena.node_mut(feed).unwrap().item_count = 10;
        arena.propagate_counters(feed);
        assert_eq!(arena.node(folder).unwrap().unread, 5);
        assert_eq!(arena.root().unread, 5);
        assert_eq!(arena.root().new, 2);
    }

    #[test]
    fn remove_cascades_to_children() {
        let mut arena = NodeArena::new_with_root("local");
        let folder = arena
            .add_child(NodeId::ROOT, "Tech", NodeKind::Folder, None)
            .unwrap();
        let feed = arena
            .add_child(folder, "Blog", NodeKind::Feed(FeedPayload::default()), None)
            .unwrap();
        let removed = arena.remove(folder).unwrap();
        assert!(removed.contains(&folder));
        assert!(removed.contains(&feed));
        assert!(arena.node(feed).is_none());
        assert!(arena.root().children.is_empty());
    }

    #[test]
    fn move_into_own_descendant_is_rejected() {
        let mut arena = NodeArena::new_with_root("local");
        let folder = arena
            .add_child(NodeId::ROOT, "Tech", NodeKind::Folder, None)
            .unwrap();
        let sub = arena
            .add_child(folder, "Sub", NodeKind::Folder, None)
            .unwrap();
        assert_eq!(arena.move_node(folder, sub, None), Err(TreeError::WouldCycle));
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut arena = NodeArena::new_with_root("local");
        assert_eq!(arena.remove(NodeId::ROOT), Err(TreeError::KindNotPermitted));
    }
}
