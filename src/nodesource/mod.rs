//! Node-source runtime (spec §4.7): the activation state machine, the
//! persisted edit-action queue, and the reconciliation pass that keeps a
//! `NodeSourceRoot`'s feed subtree in sync with a remote Google-Reader-API-
//! compatible server.
//!
//! Grounded on `original_source/src/fl_sources/google_reader_api.c`'s
//! lifecycle (`node_source_new` -> login -> `node_source_auto_update` ->
//! `node_source_update`) generalized from that file's callback-table
//! dispatch to a plain struct since `super::client::GReaderClient` already
//! provides every request the table's function pointers used to wrap.

pub mod client;
pub mod endpoints;
pub mod types;

pub use client::GReaderClient;
pub use endpoints::GReaderEndpoints;
pub use types::{AuthToken, Provider, RemoteSubscription, StreamContents, StreamItem, SubscriptionList};

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::{FeedPayload, NodeArena, NodeId, NodeKind};
use crate::subscription::Subscription;

/// A node source's activation state (spec §4.7: `none -> in_progress ->
/// active`, with `migrate` reachable from `active` when the user points an
/// existing source at a different server/account).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Never logged in.
    None,
    /// Login request outstanding.
    InProgress,
    /// Authenticated and syncing normally.
    Active,
    /// Re-pointing at a different account; the old subtree is being torn
    /// down as the new one is built.
    Migrate,
}

/// One local edit queued for the next sync with the remote provider.
/// Subscribe/unsubscribe are queued at the head (spec §4.7: structural
/// edits should reach the server before item-level ones that might
/// reference a feed being added this same sync); item-level edits are
/// queued at the tail in the order the user made them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditAction {
    /// Subscribe to `feed_url`, optionally filed under `category`.
    Subscribe { feed_url: String, category: Option<String> },
    /// Unsubscribe from `feed_id` (the `feed/{url}` form).
    Unsubscribe { feed_id: String },
    /// Mark one item read.
    MarkRead { item_id: String },
    /// Mark one item unread.
    MarkUnread { item_id: String },
    /// Star (flag) one item.
    Star { item_id: String },
    /// Unstar (unflag) one item.
    Unstar { item_id: String },
}

impl EditAction {
    /// Short discriminator used for store persistence (`kind` column of
    /// `node_source_pending_actions`).
    #[must_use]
    pub const fn kind_tag(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::MarkRead { .. } => "mark_read",
            Self::MarkUnread { .. } => "mark_unread",
            Self::Star { .. } => "star",
            Self::Unstar { .. } => "unstar",
        }
    }

    /// Whether this action is a structural (subscribe/unsubscribe) edit,
    /// which jumps the queue ahead of item-level edits.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Subscribe { .. } | Self::Unsubscribe { .. })
    }
}

/// The per-root FIFO of pending edits, ordered per spec §4.7: structural
/// edits at the head, item edits at the tail, each group preserving
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct ActionQueue {
    actions: VecDeque<EditAction>,
}

impl ActionQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconstructs a queue from persisted rows, in the order they were
    /// stored (store-side `ORDER BY sequence` already reflects the head/tail
    /// split, since `push` enforces it at insertion time).
    #[must_use]
    pub fn from_actions(actions: Vec<EditAction>) -> Self {
        Self {
            actions: actions.into(),
        }
    }

    /// Enqueues `action`, placing structural edits at the head (but after
    /// any structural edits already queued, to preserve their relative
    /// order) and item edits at the tail.
    pub fn push(&mut self, action: EditAction) {
        if action.is_structural() {
            let split = self.actions.iter().take_while(|a| a.is_structural()).count();
            self.actions.insert(split, action);
        } else {
            self.actions.push_back(action);
        }
    }

    /// Removes and returns the next action to send, if any.
    pub fn pop_front(&mut self) -> Option<EditAction> {
        self.actions.pop_front()
    }

    /// Number of queued actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the queue has no pending actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Iterates queued actions in send order, for persistence.
    pub fn iter(&self) -> impl Iterator<Item = &EditAction> {
        self.actions.iter()
    }
}

/// Owns one node source's remote session: client, auth state, and the
/// pending-action queue. The tree-side handle (`NodeSourceRoot`'s
/// `provider_id`) lives in `crate::node`; this is the provider's runtime.
pub struct NodeSourceRuntime {
    /// The `NodeSourceRoot` node this runtime feeds.
    pub root: NodeId,
    provider: Provider,
    client: GReaderClient,
    state: SourceState,
    auth: Option<AuthToken>,
    write_token: Option<String>,
    queue: ActionQueue,
}

impl NodeSourceRuntime {
    /// Creates a runtime for `root`, targeting `base_url` through
    /// `provider`'s endpoint table.
    #[must_use]
    pub fn new(root: NodeId, provider: Provider, base_url: impl Into<String>) -> Self {
        let endpoints = match provider {
            Provider::FreshRss => GReaderEndpoints::freshrss(),
            Provider::Miniflux => GReaderEndpoints::miniflux(),
            Provider::Generic => GReaderEndpoints::generic(),
        };
        Self {
            root,
            provider,
            client: GReaderClient::new(base_url, endpoints),
            state: SourceState::None,
            auth: None,
            write_token: None,
            queue: ActionQueue::new(),
        }
    }

    /// Current activation state.
    #[must_use]
    pub const fn state(&self) -> SourceState {
        self.state
    }

    /// Which provider this runtime targets.
    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }

    /// Queues a local edit for the next flush.
    pub fn enqueue(&mut self, action: EditAction) {
        self.queue.push(action);
    }

    /// Pending-action count, for diagnostics and tests.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Reloads a persisted queue (e.g. after process restart), replacing
    /// whatever was queued in memory.
    pub fn restore_queue(&mut self, queue: ActionQueue) {
        self.queue = queue;
    }

    /// Drains the in-memory queue for persistence; leaves it empty.
    pub fn take_queue(&mut self) -> ActionQueue {
        std::mem::take(&mut self.queue)
    }

    /// Authenticates against the remote (spec §4.7: `none -> in_progress`,
    /// settling at `active` on success). A failure leaves the state at
    /// `None` so a caller can retry.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), CoreError> {
        self.state = SourceState::InProgress;
        match self.client.login(username, password).await {
            Ok(token) => {
                self.auth = Some(token);
                self.state = SourceState::Active;
                Ok(())
            }
            Err(e) => {
                self.state = SourceState::None;
                Err(e)
            }
        }
    }

    /// Begins a migration to a different account/server, keeping the old
    /// auth token live until the new login succeeds (spec §4.7 `migrate`).
    pub fn begin_migrate(&mut self) {
        self.state = SourceState::Migrate;
    }

    fn require_auth(&self) -> Result<&AuthToken, CoreError> {
        self.auth.as_ref().ok_or_else(|| CoreError::AuthRequired {
            url: "node-source session".to_string(),
        })
    }

    async fn ensure_token(&mut self) -> Result<String, CoreError> {
        let auth = self.require_auth()?.clone();
        let token = self.client.token(&auth).await?;
        self.write_token = Some(token.clone());
        Ok(token)
    }

    /// Fetches the remote subscription list and reconciles it against the
    /// source root's existing feed children: new remote feeds are added,
    /// locally-known feeds the remote no longer reports are marked
    /// `pending_removal` (spec §4.7 "Subscription list sync" — removal is
    /// deferred, not immediate, so an in-flight local edit referencing the
    /// node isn't orphaned mid-flush). Returns the ids of nodes added.
    pub async fn sync_subscription_list(&mut self, arena: &mut NodeArena) -> Result<Vec<NodeId>, CoreError> {
        let auth = self.require_auth()?.clone();
        let remote = self.client.subscription_list(&auth).await?;
        self.reconcile(arena, remote.subscriptions)
    }

    /// Reconciles a fetched remote subscription list against this source
    /// root's existing children. Public so a caller driving the network
    /// fetch on a separate worker (see `fetch_subscription_list`) can apply
    /// the result against the tree on the control thread.
    pub fn reconcile(&self, arena: &mut NodeArena, remote: Vec<RemoteSubscription>) -> Result<Vec<NodeId>, CoreError> {
        let Some(root_node) = arena.node(self.root) else {
            return Err(CoreError::Fatal(format!("node source root {:?} missing from tree", self.root)));
        };
        let existing: Vec<(NodeId, String)> = root_node
            .children
            .iter()
            .filter_map(|&id| {
                arena
                    .node(id)
                    .and_then(|n| n.subscription.as_ref())
                    .map(|s| (id, s.source_url.clone()))
            })
            .collect();

        let mut added = Vec::new();
        for sub in &remote {
            if existing.iter().any(|(_, url)| *url == sub.url) {
                continue;
            }
            let id = arena.add_child(self.root, sub.title.clone(), NodeKind::Feed(FeedPayload::default()), None)?;
            if let Some(node) = arena.node_mut(id) {
                node.subscription = Some(Subscription::new_feed(sub.url.clone()));
            }
            added.push(id);
        }

        let remote_urls: Vec<&str> = remote.iter().map(|s| s.url.as_str()).collect();
        for (id, url) in &existing {
            if !remote_urls.contains(&url.as_str())
                && let Some(node) = arena.node_mut(*id)
            {
                node.pending_removal = true;
            }
        }

        Ok(added)
    }

    /// Returns a cloned handle to this source's HTTP client, for a caller
    /// that wants to drive network calls on a spawned worker instead of
    /// holding `&mut self` across an `.await` (spec §5: "the control loop
    /// must never block on I/O").
    #[must_use]
    pub fn client_handle(&self) -> GReaderClient {
        self.client.clone()
    }

    /// The current auth token, if logged in.
    #[must_use]
    pub fn auth_token(&self) -> Option<AuthToken> {
        self.auth.clone()
    }

    /// The cached write token, if one has already been fetched this
    /// session.
    #[must_use]
    pub fn write_token_cached(&self) -> Option<String> {
        self.write_token.clone()
    }

    /// Applies the result of a login performed on a worker (see
    /// `perform_login`): settles the state machine and records the token.
    pub fn apply_login_result(&mut self, result: Result<AuthToken, CoreError>) -> Result<(), CoreError> {
        match result {
            Ok(token) => {
                self.auth = Some(token);
                self.state = SourceState::Active;
                Ok(())
            }
            Err(e) => {
                self.state = SourceState::None;
                Err(e)
            }
        }
    }

    /// Drains the queue into an owned snapshot for a worker to flush over
    /// the network, without holding `&mut self` across the request.
    #[must_use]
    pub fn snapshot_queue(&mut self) -> VecDeque<EditAction> {
        std::mem::take(&mut self.queue.actions)
    }

    /// Restores actions a flush attempt didn't get to (and records the
    /// write token it used), placing them ahead of anything enqueued while
    /// the flush was in flight.
    pub fn apply_flush_outcome(&mut self, outcome: FlushOutcome) {
        if !outcome.token.is_empty() {
            self.write_token = Some(outcome.token);
        }
        for action in outcome.remaining.into_iter().rev() {
            self.queue.actions.push_front(action);
        }
    }

    /// Sends every queued action to the remote, in order, stopping at the
    /// first failure so retried actions stay in front-of-queue order. A
    /// transient failure leaves the unsent remainder (including the one
    /// that failed) in the queue for the next flush.
    pub async fn flush_pending_actions(&mut self) -> Result<usize, CoreError> {
        let auth = self.require_auth()?.clone();
        let token = match &self.write_token {
            Some(t) => t.clone(),
            None => self.ensure_token().await?,
        };

        let mut sent = 0;
        while let Some(action) = self.queue.pop_front() {
            let result = match &action {
                EditAction::Subscribe { feed_url, category } => {
                    self.client.add_subscription(&auth, &token, feed_url, category.as_deref()).await
                }
                EditAction::Unsubscribe { feed_id } => self.client.remove_subscription(&auth, &token, feed_id).await,
                EditAction::MarkRead { item_id } => self.client.mark_read(&auth, &token, item_id).await,
                EditAction::MarkUnread { item_id } => {
                    self.client
                        .unmark_read(&auth, &token, item_id)
                        .await
                        .and(self.client.mark_kept_unread(&auth, &token, item_id).await)
                }
                EditAction::Star { item_id } => self.client.star(&auth, &token, item_id).await,
                EditAction::Unstar { item_id } => self.client.unstar(&auth, &token, item_id).await,
            };
            if let Err(e) = result {
                self.queue.push(action);
                return Err(e);
            }
            sent += 1;
        }
        Ok(sent)
    }
}

/// Performs the login round trip with only owned inputs, so a caller can run
/// it on a spawned worker and apply the result back on the control thread
/// via `NodeSourceRuntime::apply_login_result`.
pub async fn perform_login(client: GReaderClient, username: String, password: String) -> Result<AuthToken, CoreError> {
    client.login(&username, &password).await
}

/// Fetches the remote subscription list with only owned inputs, for the
/// same reason as `perform_login`. The caller reconciles the result against
/// the tree with `NodeSourceRuntime::reconcile` on the control thread.
pub async fn fetch_subscription_list(client: GReaderClient, auth: AuthToken) -> Result<SubscriptionList, CoreError> {
    client.subscription_list(&auth).await
}

/// What a background flush attempt accomplished, returned to the control
/// thread so it can fold the outcome back into the runtime's queue.
#[derive(Debug)]
pub struct FlushOutcome {
    /// The write token used (possibly freshly fetched this attempt).
    pub token: String,
    /// Number of actions successfully applied.
    pub sent: usize,
    /// Actions not yet applied, in original order, including the one that
    /// failed (if any).
    pub remaining: Vec<EditAction>,
    /// The error that stopped the flush, if it stopped early.
    pub error: Option<CoreError>,
}

/// Sends `actions` to the remote in order over owned inputs (no `&mut self`
/// held across an `.await`), stopping at the first failure. Intended to run
/// on a spawned worker; the caller applies the result via
/// `NodeSourceRuntime::apply_flush_outcome`.
pub async fn perform_flush(
    client: GReaderClient,
    auth: AuthToken,
    cached_token: Option<String>,
    mut actions: VecDeque<EditAction>,
) -> FlushOutcome {
    let token = match cached_token {
        Some(t) => t,
        None => match client.token(&auth).await {
            Ok(t) => t,
            Err(e) => {
                return FlushOutcome {
                    token: String::new(),
                    sent: 0,
                    remaining: actions.into(),
                    error: Some(e),
                };
            }
        },
    };

    let mut sent = 0;
    while let Some(action) = actions.pop_front() {
        let result = match &action {
            EditAction::Subscribe { feed_url, category } => {
                client.add_subscription(&auth, &token, feed_url, category.as_deref()).await
            }
            EditAction::Unsubscribe { feed_id } => client.remove_subscription(&auth, &token, feed_id).await,
            EditAction::MarkRead { item_id } => client.mark_read(&auth, &token, item_id).await,
            EditAction::MarkUnread { item_id } => {
                client.unmark_read(&auth, &token, item_id).await.and(client.mark_kept_unread(&auth, &token, item_id).await)
            }
            EditAction::Star { item_id } => client.star(&auth, &token, item_id).await,
            EditAction::Unstar { item_id } => client.unstar(&auth, &token, item_id).await,
        };
        if let Err(e) = result {
            actions.push_front(action);
            return FlushOutcome {
                token,
                sent,
                remaining: actions.into(),
                error: Some(e),
            };
        }
        sent += 1;
    }
    FlushOutcome { token, sent, remaining: Vec::new(), error: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_edits_jump_ahead_of_item_edits() {
        let mut queue = ActionQueue::new();
        queue.push(EditAction::MarkRead {
            item_id: "1".to_string(),
        });
        queue.push(EditAction::Subscribe {
            feed_url: "https://example.test/feed.xml".to_string(),
            category: None,
        });
        assert_eq!(
            queue.pop_front(),
            Some(EditAction::Subscribe {
                feed_url: "https://example.test/feed.xml".to_string(),
                category: None,
            })
        );
        assert_eq!(
            queue.pop_front(),
            Some(EditAction::MarkRead {
                item_id: "1".to_string()
            })
        );
    }

    #[test]
    fn structural_edits_preserve_relative_order() {
        let mut queue = ActionQueue::new();
        queue.push(EditAction::Subscribe {
            feed_url: "a".to_string(),
            category: None,
        });
        queue.push(EditAction::Unsubscribe { feed_id: "b".to_string() });
        assert_eq!(
            queue.pop_front(),
            Some(EditAction::Subscribe {
                feed_url: "a".to_string(),
                category: None
            })
        );
        assert_eq!(queue.pop_front(), Some(EditAction::Unsubscribe { feed_id: "b".to_string() }));
    }

    #[test]
    fn reconcile_adds_new_remote_feeds_and_flags_removed_ones() {
        let mut arena = NodeArena::new_with_root("greader");
        let existing_id = arena
            .add_child(NodeId::ROOT, "Old Feed", NodeKind::Feed(FeedPayload::default()), None)
            .unwrap();
        arena.node_mut(existing_id).unwrap().subscription = Some(Subscription::new_feed("https://example.test/old.xml"));

        let runtime = NodeSourceRuntime::new(NodeId::ROOT, Provider::Generic, "https://example.test");
        let remote = vec![RemoteSubscription {
            id: "feed/https://example.test/new.xml".to_string(),
            title: "New Feed".to_string(),
            url: "https://example.test/new.xml".to_string(),
            html_url: None,
            categories: Vec::new(),
        }];

        let added = runtime.reconcile(&mut arena, remote).unwrap();
        assert_eq!(added.len(), 1);
        assert!(arena.node(existing_id).unwrap().pending_removal);
        assert!(!arena.node(added[0]).unwrap().pending_removal);
    }

    #[test]
    fn runtime_starts_in_none_state() {
        let runtime = NodeSourceRuntime::new(NodeId::ROOT, Provider::Generic, "https://example.test");
        assert_eq!(runtime.state(), SourceState::None);
    }
}
