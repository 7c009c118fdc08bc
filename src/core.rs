//! Control loop and external interface (spec §5, §6).
//!
//! `Core` owns the node arena, item store, GUID index, and scheduler —
//! everything spec §5 calls the single-writer state. It runs on one task;
//! fetches happen on separate `tokio::spawn`ed workers that report back over
//! an mpsc channel, matching the teacher's `app::run` cooperative-loop shape
//! (`examples/ricardodantas-feedo/src/app/mod.rs`) generalized from a
//! keyboard/redraw loop to a worker-completion/tick loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::CoreError;
use crate::item::guid::GuidIndex;
use crate::merge::{self, MergeOutcome, MergePolicy};
use crate::node::{CacheLimit, NodeArena, NodeId, NodeKind};
use crate::nodesource::{self, NodeSourceRuntime, SourceState};
use crate::parser;
use crate::request::{Priority, RequestLayer, UpdateResult};
use crate::scheduler::{self, Scheduler};
use crate::store::ItemStore;
use crate::subscription::Subscription;

/// The default node-source provider id for the root of a plain (no
/// remote-aggregator) feed list.
const LOCAL_PROVIDER_ID: &str = "local";

/// One worker's report back to the control loop (spec §5 "typed completion
/// messages").
#[derive(Debug)]
enum WorkerCompletion {
    Fetched { node: NodeId, result: Result<UpdateResult, CoreError> },
    NodeSourceLogin { idx: usize, result: Result<crate::nodesource::AuthToken, CoreError> },
    NodeSourceList { idx: usize, result: Result<crate::nodesource::SubscriptionList, CoreError> },
    NodeSourceFlush { idx: usize, outcome: nodesource::FlushOutcome },
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Owns the single-writer state (spec §5) and exposes the control-channel
/// RPC surface (spec §6) as plain async methods.
pub struct Core {
    arena: NodeArena,
    store: ItemStore,
    guid_index: GuidIndex,
    scheduler: Scheduler,
    request_layer: RequestLayer,
    config: Config,
    /// Registered remote node-source runtimes (spec §4.7). Driven once per
    /// node-source tick by `sync_node_sources`, indexed by position for
    /// completion routing.
    node_sources: Vec<NodeSourceRuntime>,
    /// Supplies credentials for the one automatic auth retry (spec §4.3,
    /// §7 `auth-required`).
    auth_provider: Arc<dyn AuthProvider>,
    /// Nodes whose in-flight request has already been retried once with a
    /// fetched credential, so a second `AuthRequired` for the same node
    /// falls straight through to failure handling (spec §8 scenario 5:
    /// "exactly two requests").
    auth_retry_attempted: HashSet<NodeId>,
    completions: mpsc::UnboundedSender<WorkerCompletion>,
    inbox: mpsc::UnboundedReceiver<WorkerCompletion>,
}

impl Core {
    /// Loads configuration, the feed list, and the item store from their
    /// conventional locations (spec §4.8), and rebuilds the in-memory GUID
    /// index from whatever the store already holds.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded, the feed list is
    /// present but not well-formed, or the item store cannot be opened.
    pub fn new() -> Result<Self> {
        let config = Config::load()?;

        let feedlist_path = Config::feedlist_path().ok_or_else(|| color_eyre::eyre::eyre!("no feed list path"))?;
        let arena = if feedlist_path.exists() {
            crate::opml::import(&feedlist_path, LOCAL_PROVIDER_ID)?
        } else {
            NodeArena::new_with_root(LOCAL_PROVIDER_ID)
        };

        let store_path = Config::store_path().ok_or_else(|| color_eyre::eyre::eyre!("no store path"))?;
        let mut store = ItemStore::open(&store_path)?;

        let guid_index = rebuild_guid_index(&arena, &mut store)?;

        let proxy = config.proxy.clone().unwrap_or_default();
        let request_layer = RequestLayer::new(&proxy)?;
        let mut scheduler = Scheduler::new(config.scheduler.clone());
        scheduler.set_offline(config.offline);

        let (tx, rx) = mpsc::unbounded_channel();
        let node_sources = discover_node_sources(&arena);
        let auth_provider: Arc<dyn AuthProvider> =
            Arc::new(LocalAuthProvider::new(Config::config_dir().unwrap_or_else(|| std::path::PathBuf::from("."))));

        Ok(Self {
            arena,
            store,
            guid_index,
            scheduler,
            request_layer,
            config,
            node_sources,
            auth_provider,
            auth_retry_attempted: HashSet::new(),
            completions: tx,
            inbox: rx,
        })
    }

    /// Overrides the auth provider used for the auth-retry path (spec §6
    /// `AuthActivatable`), for embedders and tests that want a provider
    /// other than the default local encrypted credential store.
    pub fn set_auth_provider(&mut self, provider: Arc<dyn AuthProvider>) {
        self.auth_provider = provider;
    }

    /// Registers a remote node-source runtime to be driven by the control
    /// loop's periodic node-source tick (login when `None`, subscription-list
    /// sync plus edit-action flush when `Active`).
    pub fn register_node_source(&mut self, runtime: NodeSourceRuntime) {
        self.node_sources.push(runtime);
    }

    /// Constructs a `Core` directly from its parts, for tests and embedders
    /// that don't want the default file-backed config/store/feed-list.
    #[must_use]
    pub fn from_parts(arena: NodeArena, store: ItemStore, config: Config) -> Self {
        let request_layer = RequestLayer::new(&config.proxy.clone().unwrap_or_default())
            .expect("reqwest client with static config must build");
        let mut scheduler = Scheduler::new(config.scheduler.clone());
        scheduler.set_offline(config.offline);
        let guid_index = GuidIndex::new();
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            arena,
            store,
            guid_index,
            scheduler,
            request_layer,
            config,
            node_sources: Vec::new(),
            auth_provider: Arc::new(NullAuthProvider),
            auth_retry_attempted: HashSet::new(),
            completions: tx,
            inbox: rx,
        }
    }

    /// Runs the control loop, alternating between dispatching due fetches
    /// and draining worker completions (spec §5: "the control loop must
    /// never block on I/O"), until interrupted.
    pub async fn run(&mut self) -> Result<()> {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(30));
        let mut node_source_tick = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            tokio::select! {
                Some(completion) = self.inbox.recv() => {
                    self.handle_completion(completion);
                }
                _ = tick.tick() => {
                    self.run_tick();
                }
                _ = node_source_tick.tick() => {
                    self.sync_node_sources();
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    return Ok(());
                }
            }
            self.drain_queue();
        }
    }

    /// Enqueues every node the scheduler considers due, then flushes the
    /// request queue.
    fn run_tick(&mut self) {
        let enqueued = self.scheduler.tick(&self.arena, now_unix());
        if !enqueued.is_empty() {
            debug!(count = enqueued.len(), "scheduler tick enqueued fetches");
        }
    }

    /// Pops every dispatchable request off the scheduler's queue and spawns
    /// a worker task per request (spec §5: "I/O runs on separate workers").
    fn drain_queue(&mut self) {
        while let Some(queued) = self.scheduler.dispatch_next() {
            let layer = self.request_layer.clone();
            let node = queued.node_id;
            let request = queued.request;
            let tx = self.completions.clone();
            tokio::spawn(async move {
                let result = layer.execute(&request).await;
                let _ = tx.send(WorkerCompletion::Fetched { node, result });
            });
        }
    }

    fn handle_completion(&mut self, completion: WorkerCompletion) {
        match completion {
            WorkerCompletion::Fetched { node, result } => {
                self.scheduler.complete(node);
                match result {
                    Ok(update) => self.apply_update(node, update),
                    Err(CoreError::AuthRequired { url }) => self.handle_auth_required(node, url),
                    Err(CoreError::RedirectPermanent { to, .. }) => self.apply_redirect(node, to),
                    Err(err) => self.apply_failure(node, &err),
                }
            }
            WorkerCompletion::NodeSourceLogin { idx, result } => {
                if let Some(runtime) = self.node_sources.get_mut(idx) {
                    match runtime.apply_login_result(result) {
                        Ok(()) => info!(idx, "node source authenticated"),
                        Err(err) => warn!(idx, error = %err, "node source login failed"),
                    }
                }
            }
            WorkerCompletion::NodeSourceList { idx, result } => match result {
                Ok(list) => {
                    let reconciled = self
                        .node_sources
                        .get(idx)
                        .map(|runtime| runtime.reconcile(&mut self.arena, list.subscriptions));
                    match reconciled {
                        Some(Ok(added)) if !added.is_empty() => {
                            debug!(idx, count = added.len(), "node source sync added feeds");
                        }
                        Some(Err(err)) => warn!(idx, error = %err, "node source reconcile failed"),
                        _ => {}
                    }
                }
                Err(err) => warn!(idx, error = %err, "node source subscription list fetch failed"),
            },
            WorkerCompletion::NodeSourceFlush { idx, outcome } => {
                if let Some(err) = &outcome.error {
                    warn!(idx, sent = outcome.sent, error = %err, "node source edit-action flush stopped early");
                } else if outcome.sent > 0 {
                    debug!(idx, sent = outcome.sent, "node source edit-action queue flushed");
                }
                if let Some(runtime) = self.node_sources.get_mut(idx) {
                    runtime.apply_flush_outcome(outcome);
                }
            }
        }
    }

    /// Drives every registered node source one step: logs in if not yet
    /// authenticated, otherwise kicks off a subscription-list sync and (if
    /// anything is queued) an edit-action flush. Network calls run on
    /// spawned workers; only their plain-data results come back through
    /// `handle_completion` (spec §5: tree mutation stays on the control
    /// thread, I/O does not).
    fn sync_node_sources(&mut self) {
        for (idx, runtime) in self.node_sources.iter_mut().enumerate() {
            match runtime.state() {
                SourceState::None => {
                    let Some(sub) = self.arena.node(runtime.root).and_then(|n| n.subscription.as_ref()) else {
                        continue;
                    };
                    let Some(username) = sub.update_options.username.clone() else {
                        debug!(idx, "node source has no stored credentials, skipping login");
                        continue;
                    };
                    let password = sub.update_options.password.clone().unwrap_or_default();
                    let client = runtime.client_handle();
                    let tx = self.completions.clone();
                    tokio::spawn(async move {
                        let result = nodesource::perform_login(client, username, password).await;
                        let _ = tx.send(WorkerCompletion::NodeSourceLogin { idx, result });
                    });
                }
                SourceState::Active => {
                    let Some(auth) = runtime.auth_token() else { continue };

                    let list_client = runtime.client_handle();
                    let list_auth = auth.clone();
                    let tx = self.completions.clone();
                    tokio::spawn(async move {
                        let result = nodesource::fetch_subscription_list(list_client, list_auth).await;
                        let _ = tx.send(WorkerCompletion::NodeSourceList { idx, result });
                    });

                    if runtime.pending_len() > 0 {
                        let flush_client = runtime.client_handle();
                        let cached_token = runtime.write_token_cached();
                        let actions = runtime.snapshot_queue();
                        let tx = self.completions.clone();
                        tokio::spawn(async move {
                            let outcome = nodesource::perform_flush(flush_client, auth, cached_token, actions).await;
                            let _ = tx.send(WorkerCompletion::NodeSourceFlush { idx, outcome });
                        });
                    }
                }
                SourceState::InProgress | SourceState::Migrate => {}
            }
        }
    }

    fn apply_update(&mut self, node: NodeId, update: UpdateResult) {
        let now = now_unix();
        if update.status == 304 {
            if let Some(n) = self.arena.node_mut(node)
                && let Some(sub) = n.subscription.as_mut()
            {
                scheduler::on_success(sub, now, self.scheduler.config());
            }
            self.save_subscription_state(node);
            return;
        }

        let base_url = self
            .arena
            .node(node)
            .and_then(|n| n.subscription.as_ref())
            .map(|s| s.source_url.clone())
            .unwrap_or_default();
        let (meta, items, errors) = parser::parse(&update.body, update.content_type.as_deref(), &base_url);
        if !errors.is_empty() {
            warn!(node = node.0, count = errors.len(), "feed parser reported item-level errors");
        }

        let policy = self.merge_policy(node);
        let outcome = match merge::merge(&mut self.store, &mut self.guid_index, node, items, policy) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(node = node.0, error = %err, "merge failed, treating as transient fetch failure");
                self.apply_failure(node, &CoreError::Fatal(err.to_string()));
                return;
            }
        };

        if let Some(n) = self.arena.node_mut(node) {
            apply_counters(n, &outcome);
            if let NodeKind::Feed(payload) = &mut n.kind
                && let Some(meta) = &meta
            {
                if let Some(title) = &meta.title
                    && !title.is_empty()
                {
                    n.title = title.clone();
                }
                payload.format = Some(format_tag(meta.format).to_string());
                payload.parse_errors = errors;
                if payload.html_url.is_none() {
                    payload.html_url = meta.html_url.clone();
                }
            }
            if let Some(sub) = n.subscription.as_mut() {
                sub.update_state.last_modified = update.last_modified.clone();
                sub.update_state.etag = update.etag.clone();
                sub.update_state.last_poll_ts = now;
                sub.update_error = None;
                sub.http_error_code = None;
                sub.filter_error = update.filter_error.clone();
                scheduler::on_success(sub, now, self.scheduler.config());
            }
        }
        self.arena.propagate_counters(node);
        if let Err(err) = merge::rematch_search_folders(&mut self.arena, &self.store) {
            warn!(error = %err, "search folder rematch failed");
        }
        self.save_subscription_state(node);
    }

    /// Handles a 301 Moved Permanently: updates the subscription's stored
    /// URL and schedules a normal next-interval fetch, rather than treating
    /// the redirect as a failure (spec §4.3, §7).
    fn apply_redirect(&mut self, node: NodeId, to: String) {
        let now = now_unix();
        if let Some(n) = self.arena.node_mut(node)
            && let Some(sub) = n.subscription.as_mut()
        {
            sub.source_url = to;
            sub.update_error = None;
            scheduler::on_success(sub, now, self.scheduler.config());
        }
        self.save_subscription_state(node);
    }

    /// Handles a 401/407 response (spec §4.3, §7 `auth-required`, §8
    /// scenario 5): queries the auth provider for credentials and
    /// re-dispatches the same request once with a computed `Authorization`
    /// header. A node gets at most one such retry per failed fetch — if the
    /// retried request also comes back `AuthRequired`, or no credentials are
    /// available, this falls through to ordinary failure handling instead.
    fn handle_auth_required(&mut self, node: NodeId, url: String) {
        if self.auth_retry_attempted.remove(&node) {
            self.apply_failure(node, &CoreError::AuthRequired { url });
            return;
        }

        let Some(sub) = self.arena.node(node).and_then(|n| n.subscription.as_ref()) else {
            return;
        };
        let Some((username, password)) = self.auth_provider.query(&sub.source_url) else {
            self.apply_failure(node, &CoreError::AuthRequired { url });
            return;
        };

        let mut request = scheduler::build_request(sub);
        request.options.auth_header_override = Some(basic_auth_header(&username, &password));

        self.auth_retry_attempted.insert(node);
        if !self.scheduler.enqueue_request(node, Priority::Interactive, request) {
            self.auth_retry_attempted.remove(&node);
        }
    }

    fn apply_failure(&mut self, node: NodeId, err: &CoreError) {
        let now = now_unix();
        if let Some(n) = self.arena.node_mut(node)
            && let Some(sub) = n.subscription.as_mut()
        {
            sub.update_error = Some(err.to_string());
            if err.is_permanent() {
                scheduler::on_permanent_failure(sub, now, self.scheduler.config());
            } else if err.counts_as_failure() {
                scheduler::on_failure(sub, now, self.scheduler.config());
            }
        }
        self.save_subscription_state(node);
    }

    fn merge_policy(&self, node: NodeId) -> MergePolicy {
        let Some(n) = self.arena.node(node) else {
            return MergePolicy {
                merge_drop_old: false,
                cache_limit: CacheLimit::Default,
                default_cache_limit: self.config.default_cache_limit,
                propagate_duplicate_read: true,
            };
        };
        let (merge_drop_old, cache_limit) = match &n.kind {
            NodeKind::Feed(payload) => (payload.merge_drop_old, payload.cache_limit),
            _ => (false, CacheLimit::Default),
        };
        MergePolicy {
            merge_drop_old,
            cache_limit,
            default_cache_limit: self.config.default_cache_limit,
            propagate_duplicate_read: true,
        }
    }

    fn save_subscription_state(&mut self, node: NodeId) {
        let Some(n) = self.arena.node(node) else { return };
        let Some(sub) = &n.subscription else { return };
        let row = crate::store::SubscriptionStateRow {
            last_modified: sub.update_state.last_modified.clone(),
            etag: sub.update_state.etag.clone(),
            last_poll_ts: sub.update_state.last_poll_ts,
            last_favicon_poll_ts: sub.update_state.last_favicon_poll_ts,
            max_weekly_count: i64::from(sub.update_state.max_weekly_count),
            cookies_json: serde_json::to_string(&sub.update_state.cookies).unwrap_or_default(),
            update_error: sub.update_error.clone(),
            http_error_code: sub.http_error_code.map(i64::from),
            filter_error: sub.filter_error.clone(),
            discontinued: sub.discontinued,
            consecutive_failures: i64::from(sub.consecutive_failures),
            next_due: sub.next_due,
        };
        if let Err(err) = self.store.save_subscription_state(node, &row) {
            warn!(node = node.0, error = %err, "failed to persist subscription state");
        }
    }

    /// Persists the feed list (item writes are committed transactionally
    /// per call in `crate::store`, so there is no separate flush step —
    /// spec §5's "queue flushed on idle" is satisfied by SQLite's own WAL).
    pub fn save(&mut self) -> Result<()> {
        if let Some(path) = Config::feedlist_path() {
            crate::opml::export(&self.arena, &path, true)?;
        }
        self.config.save()?;
        Ok(())
    }

    // --- Control-channel RPC surface (spec §6) -----------------------------

    /// `Ping() -> bool`.
    #[must_use]
    pub const fn ping(&self) -> bool {
        true
    }

    /// `SetOnline(bool) -> bool`. Returns the flag's new value.
    pub fn set_online(&mut self, online: bool) -> bool {
        self.config.offline = !online;
        self.scheduler.set_offline(!online);
        online
    }

    /// `Subscribe(url) -> bool`: adds a feed under the root with an
    /// immediate, reset-title update (spec §6).
    pub fn subscribe(&mut self, url: &str) -> bool {
        let subscription = Subscription::new_feed(url);
        let kind = NodeKind::Feed(crate::node::FeedPayload::default());
        let Ok(id) = self.arena.add_child(NodeId::ROOT, url, kind, None) else {
            return false;
        };
        if let Some(n) = self.arena.node_mut(id) {
            n.subscription = Some(subscription);
        }
        self.scheduler.refresh(&self.arena, id)
    }

    /// `GetUnreadItems() -> i32`: the root's aggregated unread counter.
    #[must_use]
    pub fn unread_items(&self) -> i32 {
        i32::try_from(self.arena.root().unread).unwrap_or(i32::MAX)
    }

    /// `GetNewItems() -> i32`: the root's aggregated new counter. Per spec
    /// §6 ("resets popup state on query per caller policy") this also
    /// clears every item's popup-pending flag, since the only caller-visible
    /// effect of `new` is the new-item popup.
    pub fn new_items(&mut self) -> i32 {
        let count = self.arena.root().new;
        if let Err(err) = self.clear_popups() {
            warn!(error = %err, "failed to clear popup flags on GetNewItems");
        }
        i32::try_from(count).unwrap_or(i32::MAX)
    }

    fn clear_popups(&mut self) -> crate::store::StoreResult<()> {
        let mut node_ids = Vec::new();
        self.arena.foreach_child(NodeId::ROOT, |n| node_ids.push(n.id));
        for node_id in node_ids {
            for item_id in self.store.load_items(node_id)? {
                self.store.set_popup(item_id, false)?;
            }
        }
        Ok(())
    }

    /// `Refresh() -> bool`: explicit, recursive refresh of every subscribed
    /// node under the root (spec §6).
    pub fn refresh(&mut self) -> bool {
        let mut node_ids = Vec::new();
        self.arena.foreach_child(NodeId::ROOT, |n| {
            if n.subscription.is_some() {
                node_ids.push(n.id);
            }
        });
        if node_ids.is_empty() {
            return false;
        }
        let mut any = false;
        for node_id in node_ids {
            any |= self.scheduler.refresh(&self.arena, node_id);
        }
        info!(count = any as u8, "explicit refresh requested");
        any
    }
}

/// Computes an HTTP `Authorization: Basic` header value, reused by the
/// auth-retry path for the header the request layer's own basic-auth branch
/// would otherwise compute only from `RequestOptions::username`/`password`.
fn basic_auth_header(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
}

/// Maps a sniffed wire format to the tag recorded on `FeedPayload::format`
/// (teacher-style short codes: `"rss"`, `"atom"`, ...).
const fn format_tag(format: parser::DetectedFormat) -> &'static str {
    match format {
        parser::DetectedFormat::Unknown => "unknown",
        parser::DetectedFormat::Rss => "rss",
        parser::DetectedFormat::Atom => "atom",
        parser::DetectedFormat::Rdf => "rdf",
        parser::DetectedFormat::Cdf => "cdf",
        parser::DetectedFormat::JsonFeed => "json",
    }
}

fn apply_counters(node: &mut crate::node::Node, outcome: &MergeOutcome) {
    node.new = node.new.saturating_add_signed(outcome.delta_new);
    node.unread = node.unread.saturating_add_signed(outcome.delta_unread);
    node.item_count = node
        .item_count
        .saturating_add(u32::try_from(outcome.new_item_ids.len()).unwrap_or(u32::MAX))
        .saturating_sub(u32::try_from(outcome.removed_item_ids.len()).unwrap_or(0));
}

/// Scans the tree for remote node-source roots (a `NodeKind::NodeSourceRoot`
/// child whose `provider_id` resolves to a remote `Provider` and which
/// carries a `Subscription` pointing at the provider's base URL) and builds
/// a runtime for each, so `Core::new` alone is enough to resume syncing them
/// without the embedder re-registering sources by hand on every start. The
/// tree's own root (the local/default provider, spec §3) never matches —
/// `Provider::from_id` only recognizes remote provider ids.
fn discover_node_sources(arena: &NodeArena) -> Vec<NodeSourceRuntime> {
    let mut runtimes = Vec::new();
    arena.foreach_child(NodeId::ROOT, |n| {
        let NodeKind::NodeSourceRoot(payload) = &n.kind else { return };
        let Some(provider) = crate::nodesource::Provider::from_id(&payload.provider_id) else {
            return;
        };
        let Some(sub) = n.subscription.as_ref() else { return };
        runtimes.push(NodeSourceRuntime::new(n.id, provider, sub.source_url.clone()));
    });
    runtimes
}

fn rebuild_guid_index(arena: &NodeArena, store: &mut ItemStore) -> Result<GuidIndex> {
    let mut index = GuidIndex::new();
    let mut node_ids = Vec::new();
    arena.foreach_child(NodeId::ROOT, |n| node_ids.push(n.id));
    for node_id in node_ids {
        for item_id in store.load_items(node_id)? {
            if let Some(item) = store.get_item(item_id)?
                && item.valid_guid
            {
                index.insert(&item.guid, node_id);
            }
        }
    }
    Ok(index)
}

/// The capability a credentials-backed `AuthProvider` supplies to the core
/// for a given node source instance (spec §6 `AuthActivatable`).
pub trait AuthProvider: Send + Sync {
    /// Looks up stored credentials for `auth_id`, if any.
    fn query(&self, auth_id: &str) -> Option<(String, String)>;
    /// Persists credentials for `auth_id`.
    fn store(&self, auth_id: &str, username: &str, password: &str) -> crate::error::CoreResult<()>;
}

/// Default `AuthProvider` backed by the local encrypted credential store
/// (`crate::credentials`), grounded on the teacher's own credential module
/// with the key-derivation fix recorded in DESIGN.md.
pub struct LocalAuthProvider {
    config_dir: std::path::PathBuf,
}

impl LocalAuthProvider {
    /// Creates a provider rooted at `config_dir`.
    #[must_use]
    pub const fn new(config_dir: std::path::PathBuf) -> Self {
        Self { config_dir }
    }
}

impl AuthProvider for LocalAuthProvider {
    fn query(&self, auth_id: &str) -> Option<(String, String)> {
        crate::credentials::get_credentials(&self.config_dir, auth_id)
    }

    fn store(&self, auth_id: &str, username: &str, password: &str) -> crate::error::CoreResult<()> {
        crate::credentials::store_credentials(&self.config_dir, auth_id, username, password)
            .map_err(|e| CoreError::Fatal(e.to_string()))
    }
}

/// An `AuthProvider` that never has credentials, used by `Core::from_parts`
/// for embedders and tests that haven't wired one in.
struct NullAuthProvider;

impl AuthProvider for NullAuthProvider {
    fn query(&self, _auth_id: &str) -> Option<(String, String)> {
        None
    }

    fn store(&self, _auth_id: &str, _username: &str, _password: &str) -> crate::error::CoreResult<()> {
        Ok(())
    }
}

/// Operations a remote node-source provider must answer to drive the local
/// tree/store representation of its remote state (spec §6
/// `NodeSourceActivatable`). The core calls through this trait; it does not
/// host a dynamic plugin loader (out of scope, spec §1).
pub trait NodeSourceProvider {
    /// Stable provider identifier (e.g. `"fr.feedo.greader"`).
    fn id(&self) -> &'static str;
    /// Human-readable provider name.
    fn name(&self) -> &'static str;
    /// Whether this provider supports editing (subscribe/unsubscribe/mark)
    /// from the local side, as opposed to read-only mirroring.
    fn supports_editing(&self) -> bool;
}

/// A sink for enclosure playback, handed the owning node and its
/// enclosures (spec §6 `MediaPlayerActivatable`). The core only defines the
/// interface it calls through; no in-process player is implemented.
pub trait MediaPlayerHandler {
    /// Begins playback of `enclosures` attached to `parent`.
    fn load(&self, parent: NodeId, enclosures: &[crate::item::Enclosure]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_core() -> Core {
        let arena = NodeArena::new_with_root(LOCAL_PROVIDER_ID);
        let store = ItemStore::open_in_memory().expect("in-memory store");
        Core::from_parts(arena, store, Config::default())
    }

    #[test]
    fn ping_is_always_true() {
        assert!(test_core().ping());
    }

    #[test]
    fn set_online_flips_offline_flag() {
        let mut core = test_core();
        assert!(!core.set_online(false));
        assert!(core.scheduler.is_offline());
        assert!(core.set_online(true));
        assert!(!core.scheduler.is_offline());
    }

    #[test]
    fn subscribe_adds_a_feed_node_under_root() {
        let mut core = test_core();
        assert!(core.subscribe("https://example.test/feed.xml"));
        assert_eq!(core.arena.root().children.len(), 1);
        let child = core.arena.node(core.arena.root().children[0]).unwrap();
        assert!(child.subscription.is_some());
    }

    #[test]
    fn redirect_permanent_updates_source_url_and_schedules_next_due() {
        let mut core = test_core();
        assert!(core.subscribe("https://example.test/old-feed.xml"));
        let node = core.arena.root().children[0];

        core.apply_redirect(node, "https://example.test/new-feed.xml".to_string());

        let sub = core.arena.node(node).unwrap().subscription.as_ref().unwrap();
        assert_eq!(sub.source_url, "https://example.test/new-feed.xml");
        assert!(sub.update_error.is_none());
        assert_eq!(sub.consecutive_failures, 0);
        assert!(!sub.discontinued);
        assert!(sub.next_due.is_some());
    }

    struct FakeAuthProvider {
        credentials: Option<(String, String)>,
    }

    impl AuthProvider for FakeAuthProvider {
        fn query(&self, _auth_id: &str) -> Option<(String, String)> {
            self.credentials.clone()
        }

        fn store(&self, _auth_id: &str, _username: &str, _password: &str) -> crate::error::CoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn auth_required_queries_credentials_and_retries_once_with_auth_header() {
        let mut core = test_core();
        assert!(core.subscribe("https://example.test/private.xml"));
        let node = core.arena.root().children[0];
        core.set_auth_provider(Arc::new(FakeAuthProvider {
            credentials: Some(("bob".to_string(), "secret".to_string())),
        }));

        // First 401: queries credentials, enqueues exactly one retry with an
        // auth header, and does not touch failure/backoff state yet.
        core.handle_auth_required(node, "https://example.test/private.xml".to_string());
        let sub = core.arena.node(node).unwrap().subscription.as_ref().unwrap();
        assert!(sub.update_error.is_none());
        assert!(core.scheduler.is_busy(node));
        let queued = core.scheduler.dispatch_next().unwrap();
        assert_eq!(queued.node_id, node);
        assert_eq!(
            queued.request.options.auth_header_override,
            Some(basic_auth_header("bob", "secret"))
        );

        // A second 401 for the same node (the retry also failed) falls
        // through to ordinary failure handling instead of retrying again.
        core.scheduler.complete(node);
        core.handle_auth_required(node, "https://example.test/private.xml".to_string());
        let sub = core.arena.node(node).unwrap().subscription.as_ref().unwrap();
        assert!(sub.update_error.is_some());
        assert_eq!(sub.consecutive_failures, 1);
    }

    #[test]
    fn auth_required_without_credentials_falls_through_to_failure() {
        let mut core = test_core();
        assert!(core.subscribe("https://example.test/private.xml"));
        let node = core.arena.root().children[0];
        core.set_auth_provider(Arc::new(FakeAuthProvider { credentials: None }));

        core.handle_auth_required(node, "https://example.test/private.xml".to_string());
        let sub = core.arena.node(node).unwrap().subscription.as_ref().unwrap();
        assert!(sub.update_error.is_some());
        assert!(!core.scheduler.is_busy(node));
    }

    #[test]
    fn unread_items_reflects_root_counter() {
        let mut core = test_core();
        assert_eq!(core.unread_items(), 0);
        core.arena.node_mut(NodeId::ROOT).unwrap().unread = 3;
        assert_eq!(core.unread_items(), 3);
    }

    #[test]
    fn refresh_with_no_subscriptions_returns_false() {
        let mut core = test_core();
        assert!(!core.refresh());
    }

    #[test]
    fn register_node_source_adds_a_runtime() {
        let mut core = test_core();
        assert!(core.node_sources.is_empty());
        core.register_node_source(NodeSourceRuntime::new(NodeId::ROOT, crate::nodesource::Provider::Generic, "https://example.test"));
        assert_eq!(core.node_sources.len(), 1);
    }

    #[test]
    fn discover_node_sources_finds_remote_source_roots_but_not_the_local_root() {
        let mut arena = NodeArena::new_with_root(LOCAL_PROVIDER_ID);
        let id = arena
            .add_child(
                NodeId::ROOT,
                "My GReader",
                NodeKind::NodeSourceRoot(crate::node::NodeSourcePayload {
                    provider_id: "greader".to_string(),
                }),
                None,
            )
            .unwrap();
        arena.node_mut(id).unwrap().subscription = Some(Subscription::new_feed("https://reader.example.test"));

        let runtimes = discover_node_sources(&arena);
        assert_eq!(runtimes.len(), 1);
        assert_eq!(runtimes[0].root, id);
        assert_eq!(runtimes[0].provider(), crate::nodesource::Provider::Generic);
    }
}
