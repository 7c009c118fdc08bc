//! Item merge engine (spec §4.6): reconciles freshly parsed candidate items
//! against a node's stored items, preserving read/flag state, then
//! re-evaluates search folders against whatever changed.
//!
//! The matching cascade (GUID, then exact title+source_url, then a content
//! hash) runs against a working copy of the node's stored items that grows
//! as candidates are merged in-order, so two candidates in the same batch
//! that both lack a GUID but share `(title, source_url, description)`
//! collapse onto a single stored row rather than creating two.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::item::guid::GuidIndex;
use crate::item::rules::RuleSet;
use crate::item::{Item, ItemFlags};
use crate::node::{CacheLimit, NodeArena, NodeId, NodeKind};
use crate::parser::RawItem;
use crate::store::{ItemStore, StoreResult};

/// Metadata keys exempt from the non-trivial-change unread-flip (DESIGN.md
/// Open Question #1: comment counters are the canonical "noisy metadata").
const VOLATILE_METADATA_KEYS: &[&str] = &["comments", "slash:comments", "thr:total"];

/// Per-node merge policy (spec §4.6 "Inputs: ... merge policy").
#[derive(Debug, Clone, Copy)]
pub struct MergePolicy {
    /// Drop stored items not re-seen in this batch (feeds with no history guarantee).
    pub merge_drop_old: bool,
    /// This node's cache eviction setting.
    pub cache_limit: CacheLimit,
    /// Process-global default used when `cache_limit` is `Default`.
    pub default_cache_limit: u32,
    /// Whether to mark cross-node GUID duplicates read once one copy is read.
    pub propagate_duplicate_read: bool,
}

/// Counter delta plus the ids touched, for counter propagation and
/// search-folder rematch (spec §4.6 steps 6, 8).
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Net change in the node's `new` counter.
    pub delta_new: i32,
    /// Net change in the node's `unread` counter.
    pub delta_unread: i32,
    /// Ids of items created this merge.
    pub new_item_ids: Vec<i64>,
    /// Ids of items created or content-updated this merge (input to search-folder rematch).
    pub changed_item_ids: Vec<i64>,
    /// Ids of items dropped (merge_drop_old or cache eviction) this merge.
    pub removed_item_ids: Vec<i64>,
}

/// Runs the merge algorithm for `node` against `candidates` (spec §4.6
/// steps 1-7; step 8, search-folder rematch, is `rematch_search_folders`
/// below since it needs the node arena, not just the store).
pub fn merge(
    store: &mut ItemStore,
    guid_index: &mut GuidIndex,
    node: NodeId,
    candidates: Vec<RawItem>,
    policy: MergePolicy,
) -> StoreResult<MergeOutcome> {
    let existing_ids = store.load_items(node)?;
    let mut existing: Vec<Item> = Vec::with_capacity(existing_ids.len());
    for id in existing_ids {
        if let Some(item) = store.get_item(id)? {
            existing.push(item);
        }
    }

    let mut outcome = MergeOutcome::default();
    let mut seen = vec![false; existing.len()];

    for candidate in candidates {
        match find_match(&existing, &candidate) {
            Some(idx) => {
                seen[idx] = true;
                if fields_literally_equal(&existing[idx], &candidate) {
                    continue;
                }
                let was_read = existing[idx].flags.read;
                let trivial = is_trivial_change(&existing[idx], &candidate);
                apply_candidate_to_item(&mut existing[idx], &candidate, guid_index, node);
                existing[idx].flags.updated = true;
                if was_read && !trivial {
                    existing[idx].flags.read = false;
                    outcome.delta_unread += 1;
                }
                store.put_item(&mut existing[idx])?;
                outcome.changed_item_ids.push(existing[idx].id.expect("persisted"));
            }
            None => {
                let mut item = new_item_from_candidate(node, &candidate);
                let id = store.put_item(&mut item)?;
                if item.valid_guid {
                    guid_index.insert(&item.guid, node);
                }
                outcome.delta_new += 1;
                outcome.delta_unread += 1;
                outcome.new_item_ids.push(id);
                outcome.changed_item_ids.push(id);
                existing.push(item);
                seen.push(true);
            }
        }
    }

    if policy.merge_drop_old {
        for (idx, item) in existing.iter().enumerate() {
            if seen[idx] {
                continue;
            }
            let Some(id) = item.id else { continue };
            if !item.flags.read {
                outcome.delta_unread -= 1;
            }
            if item.flags.new {
                outcome.delta_new -= 1;
            }
            store.remove_item(id)?;
            if item.valid_guid {
                guid_index.remove(&item.guid, node);
            }
            outcome.removed_item_ids.push(id);
        }
    }

    evict_cache(store, guid_index, node, policy, &mut outcome)?;

    if policy.propagate_duplicate_read {
        propagate_duplicate_reads(store, guid_index, node, &mut outcome)?;
    }

    Ok(outcome)
}

fn find_match(existing: &[Item], candidate: &RawItem) -> Option<usize> {
    if candidate.valid_guid
        && let Some(idx) = existing
            .iter()
            .position(|i| i.valid_guid && i.guid == candidate.guid)
    {
        return Some(idx);
    }
    if let Some(idx) = existing.iter().position(|i| {
        i.title == candidate.title && i.source_url.as_deref() == candidate.source_url.as_deref()
    }) {
        return Some(idx);
    }
    let target = content_hash(&candidate.title, candidate.source_url.as_deref(), candidate.description.as_deref());
    existing
        .iter()
        .position(|i| content_hash(&i.title, i.source_url.as_deref(), i.description.as_deref()) == target)
}

fn content_hash(title: &str, source_url: Option<&str>, description: Option<&str>) -> u64 {
    let mut hasher = DefaultHasher::new();
    title.hash(&mut hasher);
    source_url.unwrap_or_default().hash(&mut hasher);
    description.unwrap_or_default().hash(&mut hasher);
    hasher.finish()
}

fn fields_literally_equal(item: &Item, candidate: &RawItem) -> bool {
    item.title == candidate.title
        && item.description.as_deref() == candidate.description.as_deref()
        && item.source_url.as_deref() == candidate.source_url.as_deref()
        && item.metadata == candidate.metadata
}

/// Whether a (known-unequal) candidate differs from `item` only in
/// whitespace or in a volatile metadata key (spec §4.6 step 3).
fn is_trivial_change(item: &Item, candidate: &RawItem) -> bool {
    let text_equal = normalize_ws(&item.title) == normalize_ws(&candidate.title)
        && item.description.as_deref().map(normalize_ws) == candidate.description.as_deref().map(normalize_ws)
        && item.source_url.as_deref() == candidate.source_url.as_deref();
    if !text_equal {
        return false;
    }
    non_volatile_metadata(&item.metadata) == non_volatile_metadata(&candidate.metadata)
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_volatile_metadata(metadata: &[(String, String)]) -> Vec<(String, String)> {
    let mut filtered: Vec<(String, String)> = metadata
        .iter()
        .filter(|(k, _)| !VOLATILE_METADATA_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    filtered.sort();
    filtered
}

fn apply_candidate_to_item(item: &mut Item, candidate: &RawItem, guid_index: &mut GuidIndex, node: NodeId) {
    if candidate.valid_guid && !item.valid_guid {
        guid_index.remove(&item.guid, node);
        item.guid.clone_from(&candidate.guid);
        item.valid_guid = true;
        guid_index.insert(&item.guid, node);
    }
    item.title.clone_from(&candidate.title);
    item.source_url.clone_from(&candidate.source_url);
    item.description.clone_from(&candidate.description);
    item.content_type.clone_from(&candidate.content_type);
    item.time = candidate.time;
    item.metadata.clone_from(&candidate.metadata);
}

fn new_item_from_candidate(node: NodeId, candidate: &RawItem) -> Item {
    Item {
        id: None,
        node_id: node,
        guid: candidate.guid.clone(),
        valid_guid: candidate.valid_guid,
        title: candidate.title.clone(),
        source_url: candidate.source_url.clone(),
        real_source_url: None,
        real_source_title: None,
        description: candidate.description.clone(),
        content_type: candidate.content_type.clone(),
        time: candidate.time,
        flags: ItemFlags::new_item(),
        metadata: candidate.metadata.clone(),
        source_node_id: None,
        source_item_nr: None,
    }
}

fn cache_limit_count(policy: MergePolicy) -> Option<u32> {
    match policy.cache_limit {
        CacheLimit::Unlimited => None,
        CacheLimit::Disable => Some(0),
        CacheLimit::Default => Some(policy.default_cache_limit),
        CacheLimit::Count(n) => Some(n),
    }
}

/// Evicts oldest read, unflagged items until the node's item count is at or
/// under the effective cache limit (spec §4.6 step 5).
fn evict_cache(
    store: &mut ItemStore,
    guid_index: &mut GuidIndex,
    node: NodeId,
    policy: MergePolicy,
    outcome: &mut MergeOutcome,
) -> StoreResult<()> {
    let Some(limit) = cache_limit_count(policy) else { return Ok(()) };
    let ids = store.load_items(node)?; // newest-first
    let mut total = ids.len() as u32;
    if total <= limit {
        return Ok(());
    }
    for id in ids.into_iter().rev() {
        if total <= limit {
            break;
        }
        let Some(item) = store.get_item(id)? else { continue };
        if item.flags.flag || !item.flags.read {
            continue;
        }
        store.remove_item(id)?;
        if item.valid_guid {
            guid_index.remove(&item.guid, node);
        }
        outcome.removed_item_ids.push(id);
        total -= 1;
    }
    Ok(())
}

/// Marks newly created items read if another node already holds a read copy
/// of the same GUID (spec §4.6 step 7, "optional by subscription flag").
fn propagate_duplicate_reads(
    store: &mut ItemStore,
    guid_index: &GuidIndex,
    node: NodeId,
    outcome: &mut MergeOutcome,
) -> StoreResult<()> {
    for &id in &outcome.new_item_ids {
        let Some(mut item) = store.get_item(id)? else { continue };
        if !item.valid_guid || item.flags.read {
            continue;
        }
        let mut any_read = false;
        for dup_node in guid_index.find_duplicates(&item.guid, Some(node)) {
            for dup_id in store.load_items(dup_node)? {
                if let Some(dup_item) = store.get_item(dup_id)?
                    && dup_item.guid == item.guid
                    && dup_item.flags.read
                {
                    any_read = true;
                    break;
                }
            }
            if any_read {
                break;
            }
        }
        if any_read {
            // A read duplicate elsewhere means this copy is neither new nor
            // unread to the user (spec §8: "new ⇒ unread" must hold after
            // every store write) — clear both flags and reverse the
            // new/unread counter deltas this item contributed when created.
            item.flags.read = true;
            item.flags.new = false;
            store.put_item(&mut item)?;
            outcome.delta_unread -= 1;
            outcome.delta_new -= 1;
        }
    }
    Ok(())
}

/// Re-evaluates every search folder's rule set against the whole store and
/// updates its counters (spec §4.6 step 8). Called after any node's merge
/// completes with a non-empty `changed_item_ids`.
pub fn rematch_search_folders(arena: &mut NodeArena, store: &ItemStore) -> StoreResult<Vec<NodeId>> {
    let mut search_folders = Vec::new();
    arena.foreach_child(NodeId::ROOT, |node| {
        if matches!(node.kind, NodeKind::SearchFolder(_)) {
            search_folders.push(node.id);
        }
    });

    let mut touched = Vec::new();
    for id in search_folders {
        let rules: RuleSet = match arena.node(id).map(|n| n.kind.clone()) {
            Some(NodeKind::SearchFolder(rules)) => rules,
            _ => continue,
        };
        let matches = store.search_folder_rescan(&rules, |owner| {
            arena.node(owner).map(|n| n.title.clone()).unwrap_or_default()
        })?;
        let mut unread = 0u32;
        let mut new = 0u32;
        for &item_id in &matches {
            if let Some(item) = store.get_item(item_id)? {
                if !item.flags.read {
                    unread += 1;
                }
                if item.flags.new {
                    new += 1;
                }
            }
        }
        if let Some(node) = arena.node_mut(id) {
            node.item_count = matches.len() as u32;
            node.unread = unread;
            node.new = new;
        }
        touched.push(id);
    }
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    fn policy() -> MergePolicy {
        MergePolicy {
            merge_drop_old: false,
            cache_limit: CacheLimit::Unlimited,
            default_cache_limit: 200,
            propagate_duplicate_read: false,
        }
    }

    fn candidate(guid: &str, valid_guid: bool, title: &str, description: &str) -> RawItem {
        RawItem {
            guid: guid.to_string(),
            valid_guid,
            title: title.to_string(),
            source_url: Some("https://example.test/a".to_string()),
            description: Some(description.to_string()),
            content_type: Some("text/html".to_string()),
            time: 100,
            metadata: Vec::new(),
        }
    }

    #[test]
    fn fresh_subscribe_creates_unread_new_items() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut guids = GuidIndex::new();
        let outcome = merge(
            &mut store,
            &mut guids,
            NodeId(1),
            vec![candidate("g1", true, "First", "body1"), candidate("g2", true, "Second", "body2")],
            policy(),
        )
        .unwrap();
        assert_eq!(outcome.delta_new, 2);
        assert_eq!(outcome.delta_unread, 2);
        let ids = store.load_items(NodeId(1)).unwrap();
        assert_eq!(ids.len(), 2);
        for id in ids {
            let item = store.get_item(id).unwrap().unwrap();
            assert!(item.valid_guid);
            assert!(!item.flags.read);
        }
    }

    #[test]
    fn unchanged_refetch_produces_no_writes() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut guids = GuidIndex::new();
        merge(&mut store, &mut guids, NodeId(1), vec![candidate("g1", true, "First", "body1")], policy()).unwrap();
        let outcome = merge(&mut store, &mut guids, NodeId(1), vec![candidate("g1", true, "First", "body1")], policy()).unwrap();
        assert_eq!(outcome.delta_new, 0);
        assert_eq!(outcome.delta_unread, 0);
        assert!(outcome.changed_item_ids.is_empty());
    }

    #[test]
    fn non_trivial_description_change_reunreads_a_read_item() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut guids = GuidIndex::new();
        merge(&mut store, &mut guids, NodeId(1), vec![candidate("g1", true, "First", "body1")], policy()).unwrap();
        let id = store.load_items(NodeId(1)).unwrap()[0];
        store.set_read(id, true).unwrap();

        let outcome = merge(&mut store, &mut guids, NodeId(1), vec![candidate("g1", true, "First", "a completely different body")], policy()).unwrap();
        assert_eq!(outcome.delta_unread, 1);
        let item = store.get_item(id).unwrap().unwrap();
        assert!(!item.flags.read);
        assert!(item.flags.updated);
    }

    #[test]
    fn whitespace_only_change_does_not_reunread() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut guids = GuidIndex::new();
        merge(&mut store, &mut guids, NodeId(1), vec![candidate("g1", true, "First", "a  body")], policy()).unwrap();
        let id = store.load_items(NodeId(1)).unwrap()[0];
        store.set_read(id, true).unwrap();

        let outcome = merge(&mut store, &mut guids, NodeId(1), vec![candidate("g1", true, "First", "a body")], policy()).unwrap();
        assert_eq!(outcome.delta_unread, 0);
        assert!(store.get_item(id).unwrap().unwrap().flags.read);
    }

    #[test]
    fn guid_missing_duplicates_collapse_to_one_stored_item() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut guids = GuidIndex::new();
        let dup_a = candidate("", false, "Same Title", "same body");
        let dup_b = candidate("", false, "Same Title", "same body");
        let outcome = merge(&mut store, &mut guids, NodeId(1), vec![dup_a, dup_b], policy()).unwrap();
        assert_eq!(outcome.delta_new, 1);
        assert_eq!(store.load_items(NodeId(1)).unwrap().len(), 1);
    }

    #[test]
    fn merge_drop_old_removes_unseen_items() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut guids = GuidIndex::new();
        merge(&mut store, &mut guids, NodeId(1), vec![candidate("g1", true, "First", "body1")], policy()).unwrap();
        let mut drop_policy = policy();
        drop_policy.merge_drop_old = true;
        let outcome = merge(&mut store, &mut guids, NodeId(1), vec![candidate("g2", true, "Second", "body2")], drop_policy).unwrap();
        assert_eq!(outcome.removed_item_ids.len(), 1);
        assert_eq!(store.load_items(NodeId(1)).unwrap().len(), 1);
    }

    #[test]
    fn cache_limit_evicts_oldest_read_unflagged_items() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut guids = GuidIndex::new();
        let mut limited = policy();
        limited.cache_limit = CacheLimit::Count(1);

        let mut c1 = candidate("g1", true, "First", "body1");
        c1.time = 1;
        let mut c2 = candidate("g2", true, "Second", "body2");
        c2.time = 2;
        merge(&mut store, &mut guids, NodeId(1), vec![c1, c2], policy()).unwrap();
        let ids = store.load_items(NodeId(1)).unwrap();
        let oldest_id = *ids.last().unwrap();
        store.set_read(oldest_id, true).unwrap();

        let outcome = merge(&mut store, &mut guids, NodeId(1), vec![], limited).unwrap();
        assert_eq!(outcome.removed_item_ids, vec![oldest_id]);
        assert_eq!(store.load_items(NodeId(1)).unwrap().len(), 1);
    }

    #[test]
    fn propagated_duplicate_read_clears_new_flag_and_counter_deltas() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut guids = GuidIndex::new();
        merge(&mut store, &mut guids, NodeId(1), vec![candidate("shared-guid", true, "First", "body1")], policy()).unwrap();
        let original_id = store.load_items(NodeId(1)).unwrap()[0];
        store.set_read(original_id, true).unwrap();

        let mut propagate_policy = policy();
        propagate_policy.propagate_duplicate_read = true;
        let outcome = merge(
            &mut store,
            &mut guids,
            NodeId(2),
            vec![candidate("shared-guid", true, "First", "body1")],
            propagate_policy,
        )
        .unwrap();

        // The propagated copy nets to zero: it was never actually new or
        // unread to a user who already read the other copy.
        assert_eq!(outcome.delta_new, 0);
        assert_eq!(outcome.delta_unread, 0);
        let new_id = store.load_items(NodeId(2)).unwrap()[0];
        let item = store.get_item(new_id).unwrap().unwrap();
        assert!(item.flags.read);
        assert!(!item.flags.new);
    }

    #[test]
    fn flagged_item_survives_cache_eviction() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut guids = GuidIndex::new();
        let mut limited = policy();
        limited.cache_limit = CacheLimit::Count(0);

        merge(&mut store, &mut guids, NodeId(1), vec![candidate("g1", true, "First", "body1")], policy()).unwrap();
        let id = store.load_items(NodeId(1)).unwrap()[0];
        store.set_read(id, true).unwrap();
        store.set_flag(id, true).unwrap();

        merge(&mut store, &mut guids, NodeId(1), vec![], limited).unwrap();
        assert_eq!(store.load_items(NodeId(1)).unwrap().len(), 1);
    }
}
