//! The persistent item store (spec §4.2).
//!
//! Grounded on `deeflect-dee-ink/crates/dee-feed`'s `rusqlite_migration`
//! usage (`migrations()` / `open_db()` / `INSERT OR IGNORE`-style dedup)
//! rather than the teacher's plain-JSON `FeedCache` — a JSON blob rewritten
//! wholesale on every save cannot give the crash-consistency guarantee spec
//! §4.2 demands ("a crash before a clean shutdown must leave the store in a
//! self-consistent state"); SQLite's WAL mode does.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use crate::item::{Item, ItemFlags, MetadataEntry};
use crate::item::rules::RuleSet;
use crate::node::NodeId;
use crate::nodesource::{ActionQueue, EditAction};

/// Errors returned by the item store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying SQLite driver reported an error.
    #[error("item store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Migration to the latest schema failed at open time.
    #[error("item store migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),
    /// The referenced item does not exist.
    #[error("no such item: {0}")]
    NoSuchItem(i64),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(include_str!("migrations/001_initial.sql")),
        M::up(include_str!("migrations/002_node_source_pending_actions.sql")),
    ])
}

/// Durable storage for items, their metadata, and per-subscription polling
/// state (spec §4.2, §4.8 — `liferea.db`).
pub struct ItemStore {
    conn: Connection,
}

impl ItemStore {
    /// Opens (creating and migrating if necessary) the item store at
    /// `path`. Enables WAL mode so a crash mid-write leaves either the old
    /// or the new row readable, never a torn one.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations().to_latest(&mut conn)?;
        Ok(Self { conn })
    }

    /// Opens an in-memory store, used by tests and by the CLI driver's
    /// dry-run mode.
    pub fn open_in_memory() -> StoreResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations().to_latest(&mut conn)?;
        Ok(Self { conn })
    }

    /// Loads item ids for `node`, newest-first by item time then id (spec
    /// §4.2: "`load_items(node)` -> ordered list of ids, newest-first").
    pub fn load_items(&self, node: NodeId) -> StoreResult<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM items WHERE node_id = ?1 ORDER BY time DESC, id DESC",
        )?;
        let ids = stmt
            .query_map(params![node.0 as i64], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Fetches a full item by id.
    pub fn get_item(&self, id: i64) -> StoreResult<Option<Item>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, node_id, guid, valid_guid, title, source_url, real_source_url,
                        real_source_title, description, content_type, time, read, new,
                        popup, updated, flag, has_enclosure, source_node_id, source_item_nr
                 FROM items WHERE id = ?1",
                params![id],
                Self::row_to_item_without_metadata,
            )
            .optional()?;
        let Some(mut item) = row else { return Ok(None) };
        item.metadata = self.load_metadata(id)?;
        Ok(Some(item))
    }

    fn load_metadata(&self, item_id: i64) -> StoreResult<Vec<MetadataEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM item_metadata WHERE item_id = ?1 ORDER BY position")?;
        let rows = stmt
            .query_map(params![item_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_item_without_metadata(row: &rusqlite::Row) -> rusqlite::Result<Item> {
        Ok(Item {
            id: Some(row.get(0)?),
            node_id: NodeId(row.get::<_, i64>(1)? as u64),
            guid: row.get(2)?,
            valid_guid: row.get::<_, i64>(3)? != 0,
            title: row.get(4)?,
            source_url: row.get(5)?,
            real_source_url: row.get(6)?,
            real_source_title: row.get(7)?,
            description: row.get(8)?,
            content_type: row.get(9)?,
            time: row.get(10)?,
            flags: ItemFlags {
                read: row.get::<_, i64>(11)? != 0,
                new: row.get::<_, i64>(12)? != 0,
                popup: row.get::<_, i64>(13)? != 0,
                updated: row.get::<_, i64>(14)? != 0,
                flag: row.get::<_, i64>(15)? != 0,
                has_enclosure: row.get::<_, i64>(16)? != 0,
            },
            metadata: Vec::new(),
            source_node_id: row
                .get::<_, Option<i64>>(17)?
                .map(|v| NodeId(v as u64)),
            source_item_nr: row.get(18)?,
        })
    }

    /// Persists `item`. Assigns `item.id` on create. Runs as a single
    /// transaction so a crash mid-write leaves either the previous row or
    /// the fully-written new one (spec §4.2 crash-consistency guarantee).
    pub fn put_item(&mut self, item: &mut Item) -> StoreResult<i64> {
        let tx = self.conn.transaction()?;
        let id = match item.id {
            Some(id) => {
                tx.execute(
                    "UPDATE items SET node_id=?1, guid=?2, valid_guid=?3, title=?4,
                        source_url=?5, real_source_url=?6, real_source_title=?7,
                        description=?8, content_type=?9, time=?10, read=?11, new=?12,
                        popup=?13, updated=?14, flag=?15, has_enclosure=?16,
                        source_node_id=?17, source_item_nr=?18
                     WHERE id=?19",
                    params![
                        item.node_id.0 as i64,
                        item.guid,
                        i64::from(item.valid_guid),
                        item.title,
                        item.source_url,
                        item.real_source_url,
                        item.real_source_title,
                        item.description,
                        item.content_type,
                        item.time,
                        i64::from(item.flags.read),
                        i64::from(item.flags.new),
                        i64::from(item.flags.popup),
                        i64::from(item.flags.updated),
                        i64::from(item.flags.flag),
                        i64::from(item.flags.has_enclosure),
                        item.source_node_id.map(|n| n.0 as i64),
                        item.source_item_nr,
                        id,
                    ],
                )?;
                tx.execute("DELETE FROM item_metadata WHERE item_id = ?1", params![id])?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO items (node_id, guid, valid_guid, title, source_url,
                        real_source_url, real_source_title, description, content_type,
                        time, read, new, popup, updated, flag, has_enclosure,
                        source_node_id, source_item_nr)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
                    params![
                        item.node_id.0 as i64,
                        item.guid,
                        i64::from(item.valid_guid),
                        item.title,
                        item.source_url,
                        item.real_source_url,
                        item.real_source_title,
                        item.description,
                        item.content_type,
                        item.time,
                        i64::from(item.flags.read),
                        i64::from(item.flags.new),
                        i64::from(item.flags.popup),
                        i64::from(item.flags.updated),
                        i64::from(item.flags.flag),
                        i64::from(item.flags.has_enclosure),
                        item.source_node_id.map(|n| n.0 as i64),
                        item.source_item_nr,
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };
        for (pos, (key, value)) in item.metadata.iter().enumerate() {
            tx.execute(
                "INSERT INTO item_metadata (item_id, position, key, value) VALUES (?1,?2,?3,?4)",
                params![id, pos as i64, key, value],
            )?;
        }
        if item.valid_guid {
            tx.execute(
                "INSERT OR IGNORE INTO guid_index (guid, node_id) VALUES (?1, ?2)",
                params![item.guid, item.node_id.0 as i64],
            )?;
        }
        tx.commit()?;
        item.id = Some(id);
        Ok(id)
    }

    /// Deletes an item and its metadata/guid-index entries.
    pub fn remove_item(&mut self, id: i64) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        let row: Option<(i64, String, i64)> = tx
            .query_row(
                "SELECT node_id, guid, valid_guid FROM items WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        if let Some((node_id, guid, valid_guid)) = row {
            if valid_guid != 0 {
                tx.execute(
                    "DELETE FROM guid_index WHERE guid = ?1 AND node_id = ?2",
                    params![guid, node_id],
                )?;
            }
        }
        tx.execute("DELETE FROM item_metadata WHERE item_id = ?1", params![id])?;
        tx.execute("DELETE FROM items WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn set_flag_column(&mut self, id: i64, column: &str, value: bool) -> StoreResult<()> {
        let sql = format!("UPDATE items SET {column} = ?1 WHERE id = ?2");
        let changed = self.conn.execute(&sql, params![i64::from(value), id])?;
        if changed == 0 {
            return Err(StoreError::NoSuchItem(id));
        }
        Ok(())
    }

    /// Sets the `read` flag.
    pub fn set_read(&mut self, id: i64, value: bool) -> StoreResult<()> {
        self.set_flag_column(id, "read", value)
    }

    /// Sets the `flag` (starred) bit. Flagged items are exempt from cache
    /// eviction (spec §3 item invariant).
    pub fn set_flag(&mut self, id: i64, value: bool) -> StoreResult<()> {
        self.set_flag_column(id, "flag", value)
    }

    /// Sets the `updated` bit.
    pub fn set_updated(&mut self, id: i64, value: bool) -> StoreResult<()> {
        self.set_flag_column(id, "updated", value)
    }

    /// Sets the `popup` (pending notification) bit.
    pub fn set_popup(&mut self, id: i64, value: bool) -> StoreResult<()> {
        self.set_flag_column(id, "popup", value)
    }

    /// Nodes known to hold an item with `guid` (spec §4.2
    /// `find_duplicates`).
    pub fn find_duplicates(&self, guid: &str) -> StoreResult<Vec<NodeId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT node_id FROM guid_index WHERE guid = ?1")?;
        let ids = stmt
            .query_map(params![guid], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|v| NodeId(v as u64))
            .collect();
        Ok(ids)
    }

    /// Re-scans every item in the store against `rules`, returning matching
    /// ids. `node_title` resolves a node id to the title used by the
    /// feed-title rule kind. O(total items); acceptable per spec §4.6 step
    /// 8, which calls for a rematch, not a bounded-cost one.
    pub fn search_folder_rescan(
        &self,
        rules: &RuleSet,
        node_title: impl Fn(NodeId) -> String,
    ) -> StoreResult<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM items")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut matches = Vec::new();
        for id in ids {
            if let Some(item) = self.get_item(id)? {
                let title = node_title(item.node_id);
                if rules.matches(&item, &title) {
                    matches.push(id);
                }
            }
        }
        Ok(matches)
    }

    /// Loads a subscription's runtime polling state, if any has been saved.
    pub fn load_subscription_state(&self, node: NodeId) -> StoreResult<Option<SubscriptionStateRow>> {
        self.conn
            .query_row(
                "SELECT last_modified, etag, last_poll_ts, last_favicon_poll_ts,
                        max_weekly_count, cookies_json, update_error, http_error_code,
                        filter_error, discontinued, consecutive_failures, next_due
                 FROM subscription_state WHERE node_id = ?1",
                params![node.0 as i64],
                |row| {
                    Ok(SubscriptionStateRow {
                        last_modified: row.get(0)?,
                        etag: row.get(1)?,
                        last_poll_ts: row.get(2)?,
                        last_favicon_poll_ts: row.get(3)?,
                        max_weekly_count: row.get(4)?,
                        cookies_json: row.get(5)?,
                        update_error: row.get(6)?,
                        http_error_code: row.get(7)?,
                        filter_error: row.get(8)?,
                        discontinued: row.get::<_, i64>(9)? != 0,
                        consecutive_failures: row.get(10)?,
                        next_due: row.get(11)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Persists a subscription's runtime polling state (upsert).
    pub fn save_subscription_state(
        &mut self,
        node: NodeId,
        state: &SubscriptionStateRow,
    ) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO subscription_state (node_id, last_modified, etag, last_poll_ts,
                last_favicon_poll_ts, max_weekly_count, cookies_json, update_error,
                http_error_code, filter_error, discontinued, consecutive_failures, next_due)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
             ON CONFLICT(node_id) DO UPDATE SET
                last_modified=excluded.last_modified, etag=excluded.etag,
                last_poll_ts=excluded.last_poll_ts,
                last_favicon_poll_ts=excluded.last_favicon_poll_ts,
                max_weekly_count=excluded.max_weekly_count,
                cookies_json=excluded.cookies_json, update_error=excluded.update_error,
                http_error_code=excluded.http_error_code, filter_error=excluded.filter_error,
                discontinued=excluded.discontinued,
                consecutive_failures=excluded.consecutive_failures, next_due=excluded.next_due",
            params![
                node.0 as i64,
                state.last_modified,
                state.etag,
                state.last_poll_ts,
                state.last_favicon_poll_ts,
                state.max_weekly_count,
                state.cookies_json,
                state.update_error,
                state.http_error_code,
                state.filter_error,
                i64::from(state.discontinued),
                state.consecutive_failures,
                state.next_due,
            ],
        )?;
        Ok(())
    }

    /// Deletes all items and state rows for `node`, used when a node is
    /// removed from the tree.
    pub fn remove_node_data(&mut self, node: NodeId) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        let ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM items WHERE node_id = ?1")?;
            stmt.query_map(params![node.0 as i64], |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()?
        };
        for id in ids {
            tx.execute("DELETE FROM item_metadata WHERE item_id = ?1", params![id])?;
        }
        tx.execute(
            "DELETE FROM guid_index WHERE node_id = ?1",
            params![node.0 as i64],
        )?;
        tx.execute("DELETE FROM items WHERE node_id = ?1", params![node.0 as i64])?;
        tx.execute(
            "DELETE FROM subscription_state WHERE node_id = ?1",
            params![node.0 as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Persists a node source's pending action queue (spec §4.7), replacing
    /// whatever was previously stored for `root` so the on-disk order
    /// always matches the in-memory queue's send order.
    pub fn save_pending_actions(&mut self, root: NodeId, queue: &ActionQueue) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM node_source_pending_actions WHERE root_id = ?1",
            params![root.0 as i64],
        )?;
        for (seq, action) in queue.iter().enumerate() {
            let payload = serde_json::to_string(action).unwrap_or_default();
            tx.execute(
                "INSERT INTO node_source_pending_actions (root_id, sequence, kind, payload, created_ts)
                 VALUES (?1,?2,?3,?4,?5)",
                params![root.0 as i64, seq as i64, action.kind_tag(), payload, 0i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Loads a node source's persisted pending action queue, in send order,
    /// so a restart resumes an at-least-once retry rather than dropping
    /// unsent edits.
    pub fn load_pending_actions(&self, root: NodeId) -> StoreResult<ActionQueue> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM node_source_pending_actions WHERE root_id = ?1 ORDER BY sequence")?;
        let actions = stmt
            .query_map(params![root.0 as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|json| serde_json::from_str::<EditAction>(&json).ok())
            .collect();
        Ok(ActionQueue::from_actions(actions))
    }
}

/// Runtime polling state row, mirrors `crate::subscription::UpdateState`
/// plus the error/backoff fields OPML doesn't carry.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionStateRow {
    /// `Last-Modified` from the most recent 200 response.
    pub last_modified: Option<String>,
    /// `ETag` from the most recent 200 response.
    pub etag: Option<String>,
    /// Unix timestamp of the last poll attempt.
    pub last_poll_ts: i64,
    /// Unix timestamp of the last favicon poll.
    pub last_favicon_poll_ts: i64,
    /// Rolling weekly item count.
    pub max_weekly_count: i64,
    /// JSON-encoded cookie jar contents.
    pub cookies_json: String,
    /// Last observed update error text.
    pub update_error: Option<String>,
    /// Last observed HTTP status code.
    pub http_error_code: Option<i64>,
    /// Last observed filter error text.
    pub filter_error: Option<String>,
    /// Whether the feed reported a permanent failure.
    pub discontinued: bool,
    /// Consecutive failed fetches.
    pub consecutive_failures: i64,
    /// Unix timestamp this subscription next becomes due.
    pub next_due: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemFlags;

    fn sample_item(node: NodeId, guid: &str) -> Item {
        Item {
            id: None,
            node_id: node,
            guid: guid.to_string(),
            valid_guid: true,
            title: "Title".into(),
            source_url: Some("http://example.test/a".into()),
            real_source_url: None,
            real_source_title: None,
            description: Some("body".into()),
            content_type: Some("text/html".into()),
            time: 100,
            flags: ItemFlags::new_item(),
            metadata: vec![("category".into(), "rust".into())],
            source_node_id: None,
            source_item_nr: None,
        }
    }

    #[test]
    fn put_then_get_roundtrips() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut item = sample_item(NodeId(1), "g1");
        let id = store.put_item(&mut item).unwrap();
        let fetched = store.get_item(id).unwrap().unwrap();
        assert_eq!(fetched.guid, "g1");
        assert_eq!(fetched.metadata, vec![("category".to_string(), "rust".to_string())]);
    }

    #[test]
    fn load_items_orders_newest_first() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut older = sample_item(NodeId(1), "g1");
        older.time = 1;
        let mut newer = sample_item(NodeId(1), "g2");
        newer.time = 2;
        store.put_item(&mut older).unwrap();
        store.put_item(&mut newer).unwrap();
        let ids = store.load_items(NodeId(1)).unwrap();
        assert_eq!(ids, vec![newer.id.unwrap(), older.id.unwrap()]);
    }

    #[test]
    fn find_duplicates_across_nodes() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut a = sample_item(NodeId(1), "shared");
        let mut b = sample_item(NodeId(2), "shared");
        store.put_item(&mut a).unwrap();
        store.put_item(&mut b).unwrap();
        let mut dups = store.find_duplicates("shared").unwrap();
        dups.sort();
        assert_eq!(dups, vec![NodeId(1), NodeId(2)]);
    }

    #[test]
    fn set_read_updates_and_rejects_missing_id() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut item = sample_item(NodeId(1), "g1");
        let id = store.put_item(&mut item).unwrap();
        store.set_read(id, true).unwrap();
        assert!(store.get_item(id).unwrap().unwrap().flags.read);
        assert!(matches!(store.set_read(id + 999, true), Err(StoreError::NoSuchItem(_))));
    }

    #[test]
    fn pending_actions_roundtrip_in_order() {
        let mut store = ItemStore::open_in_memory().unwrap();
        let mut queue = ActionQueue::new();
        queue.push(EditAction::MarkRead { item_id: "1".into() });
        queue.push(EditAction::Subscribe {
            feed_url: "https://example.test/feed.xml".into(),
            category: None,
        });
        store.save_pending_actions(NodeId(1), &queue).unwrap();

        let reloaded = store.load_pending_actions(NodeId(1)).unwrap();
        let actions: Vec<_> = reloaded.iter().cloned().collect();
        assert_eq!(
            actions,
            vec![
                EditAction::Subscribe {
                    feed_url: "https://example.test/feed.xml".into(),
                    category: None
                },
                EditAction::MarkRead { item_id: "1".into() },
            ]
        );
    }

    #[test]
    fn pending_actions_empty_for_unknown_root() {
        let store = ItemStore::open_in_memory().unwrap();
        assert!(store.load_pending_actions(NodeId(99)).unwrap().is_empty());
    }
}
