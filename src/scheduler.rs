//! Subscription scheduler (spec §4.4): due-ness computation, exponential
//! backoff on failure, and the priority queue of requests a tick produces.
//!
//! The actual tick *loop* (waking periodically, dispatching to the request
//! layer, feeding results back into the merge engine) is `crate::core`'s
//! concern (spec §5's single control-loop thread); this module is the pure
//! due/backoff arithmetic plus the per-tick enqueue pass, so it can be unit
//! tested without an executor.

use crate::node::{NodeArena, NodeId};
use crate::request::{Priority, QueuedRequest, RequestOptions, RequestQueue, UpdateRequest};
use crate::subscription::Subscription;

/// Exponential-backoff and discontinuation constants (DESIGN.md Open
/// Question #3): base interval doubles per consecutive failure, capped at
/// 24h; discontinued after 10 consecutive failures.
pub const DEFAULT_MAX_BACKOFF_MINUTES: u32 = 24 * 60;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;
/// Process-global fallback when neither the subscription nor the feed's
/// declared TTL supplies an interval.
pub const DEFAULT_UPDATE_INTERVAL_MINUTES: u32 = 60;

/// Process-global scheduling parameters, overridable via `Config`.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct SchedulerConfig {
    /// Used when `update_interval == -1` and no feed-declared TTL exists.
    pub default_update_interval_minutes: u32,
    /// Backoff ceiling.
    pub max_backoff_minutes: u32,
    /// Consecutive failures before a subscription is marked `discontinued`.
    pub max_consecutive_failures: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_update_interval_minutes: DEFAULT_UPDATE_INTERVAL_MINUTES,
            max_backoff_minutes: DEFAULT_MAX_BACKOFF_MINUTES,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// Whether `subscription` should be queued for an auto-update as of `now`
/// (spec §4.4 "Due computation").
#[must_use]
pub fn is_due(subscription: &Subscription, now: i64) -> bool {
    if subscription.discontinued || subscription.update_interval == 0 {
        return false;
    }
    match subscription.next_due {
        Some(due) => now >= due,
        None => true,
    }
}

/// The interval this subscription polls at absent any failure backoff (spec
/// §4.4: "-1: use default_update_interval if positive; else process-global
/// default").
#[must_use]
pub fn effective_interval_minutes(subscription: &Subscription, config: &SchedulerConfig) -> u32 {
    if subscription.update_interval > 0 {
        return subscription.update_interval as u32;
    }
    subscription
        .default_update_interval
        .filter(|v| *v > 0)
        .unwrap_or(config.default_update_interval_minutes)
}

/// Applies a successful fetch: clears failure/backoff state and schedules
/// the next regular-interval due time. A subscription that had gone
/// `discontinued` is un-discontinued by a successful explicit refresh.
pub fn on_success(subscription: &mut Subscription, now: i64, config: &SchedulerConfig) {
    subscription.consecutive_failures = 0;
    subscription.discontinued = false;
    let interval = effective_interval_minutes(subscription, config);
    subscription.next_due = Some(now + i64::from(interval) * 60);
}

/// Applies a failed fetch: increments the failure counter, doubles the
/// backoff interval (capped), and marks `discontinued` once the failure cap
/// is reached (spec §4.4 "exponential backoff bounded by a ceiling", §7
/// "repeated 404 -> sets discontinued").
pub fn on_failure(subscription: &mut Subscription, now: i64, config: &SchedulerConfig) {
    subscription.consecutive_failures += 1;
    if subscription.consecutive_failures >= config.max_consecutive_failures {
        subscription.discontinued = true;
    }
    let base = effective_interval_minutes(subscription, config);
    let exponent = subscription.consecutive_failures.min(20);
    let backoff = base.saturating_mul(1u32 << exponent).min(config.max_backoff_minutes);
    subscription.next_due = Some(now + i64::from(backoff) * 60);
}

/// Marks a permanent failure (410 Gone) discontinued immediately,
/// regardless of the consecutive-failure count (spec §7 "network-permanent
/// ... sets discontinued").
pub fn on_permanent_failure(subscription: &mut Subscription, now: i64, config: &SchedulerConfig) {
    subscription.discontinued = true;
    let backoff = config.max_backoff_minutes;
    subscription.next_due = Some(now + i64::from(backoff) * 60);
}

/// Builds the default `UpdateRequest` for a subscription's stored fields
/// (spec §4.3 "Inputs per request"). Node-source login/token requests are
/// constructed separately by `crate::nodesource`, which does not go through
/// this helper.
#[must_use]
pub fn build_request(subscription: &Subscription) -> UpdateRequest {
    UpdateRequest {
        source: subscription.source_url.clone(),
        source_type: subscription.source_type,
        options: RequestOptions {
            username: subscription.update_options.username.clone(),
            password: subscription.update_options.password.clone(),
            cookies: subscription.update_state.cookies.clone(),
            dont_use_proxy: subscription.update_options.dont_use_proxy,
            auth_header_override: None,
        },
        prior_etag: subscription.update_state.etag.clone(),
        prior_last_modified: subscription.update_state.last_modified.clone(),
        post_body: None,
        post_content_type: None,
        filter_cmd: subscription.filter_cmd.clone(),
    }
}

/// Walks the tree collecting every node whose subscription is due (spec
/// §4.4 "Tick loop").
fn due_nodes(arena: &NodeArena, now: i64) -> Vec<NodeId> {
    let mut ids = Vec::new();
    arena.foreach_child(NodeId::ROOT, |node| {
        if let Some(sub) = &node.subscription
            && is_due(sub, now)
        {
            ids.push(node.id);
        }
    });
    ids
}

/// Owns the priority queue of pending fetches and the process-global
/// offline flag (spec §4.4, §5).
#[derive(Debug)]
pub struct Scheduler {
    queue: RequestQueue,
    offline: bool,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Creates a scheduler with the given configuration, online by default.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self { queue: RequestQueue::new(), offline: false, config }
    }

    /// Current scheduling configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sets the global offline flag (spec §6 `SetOnline`). While offline,
    /// `tick` enqueues nothing; already-running requests are unaffected.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Whether the offline flag is set.
    #[must_use]
    pub const fn is_offline(&self) -> bool {
        self.offline
    }

    /// Enqueues every due, not-already-busy subscription at `Scheduled`
    /// priority. No-op while offline (spec §4.4, §5: "global offline flag
    /// ... inhibits all network enqueues"). Returns the nodes enqueued this
    /// tick.
    pub fn tick(&mut self, arena: &NodeArena, now: i64) -> Vec<NodeId> {
        if self.offline {
            return Vec::new();
        }
        let mut enqueued = Vec::new();
        for id in due_nodes(arena, now) {
            let Some(node) = arena.node(id) else { continue };
            let Some(sub) = &node.subscription else { continue };
            let request = build_request(sub);
            if self.queue.enqueue(id, Priority::Scheduled, request) {
                enqueued.push(id);
            }
        }
        enqueued
    }

    /// Explicit refresh: bypasses due-ness but still coalesces with any
    /// in-flight or queued request for this node (spec §4.4 "Explicit
    /// refresh path bypasses due-ness but still respects in_flight
    /// coalescing").
    pub fn refresh(&mut self, arena: &NodeArena, node: NodeId) -> bool {
        let Some(n) = arena.node(node) else { return false };
        let Some(sub) = &n.subscription else { return false };
        let request = build_request(sub);
        self.queue.enqueue(node, Priority::Interactive, request)
    }

    /// Enqueues a caller-built `request` directly, bypassing `build_request`
    /// (used by the auth-retry path to attach a computed `Authorization`
    /// header to an otherwise-identical re-fetch; spec §4.3, §7
    /// `auth-required`). Still subject to the usual in-flight/queued
    /// coalescing.
    pub fn enqueue_request(&mut self, node: NodeId, priority: Priority, request: UpdateRequest) -> bool {
        self.queue.enqueue(node, priority, request)
    }

    /// Pops the next request to dispatch, marking its node in flight.
    pub fn dispatch_next(&mut self) -> Option<QueuedRequest> {
        self.queue.dispatch_next()
    }

    /// Marks a node's request complete, allowing it to be enqueued again.
    pub fn complete(&mut self, node: NodeId) {
        self.queue.complete(node);
    }

    /// Cancels a pending (not yet dispatched) request, best-effort (spec §5).
    pub fn cancel(&mut self, node: NodeId) {
        self.queue.cancel(node);
    }

    /// Number of requests waiting to be dispatched.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    /// Whether `node` has a request queued or in flight.
    #[must_use]
    pub fn is_busy(&self, node: NodeId) -> bool {
        self.queue.is_busy(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FeedPayload, NodeKind};
    use crate::subscription::Subscription;

    #[test]
    fn never_scheduled_subscription_is_immediately_due() {
        let sub = Subscription::new_feed("https://example.test/feed.xml");
        assert!(is_due(&sub, 1_000));
    }

    #[test]
    fn zero_interval_is_never_auto_due() {
        let mut sub = Subscription::new_feed("https://example.test/feed.xml");
        sub.update_interval = 0;
        assert!(!is_due(&sub, i64::MAX));
    }

    #[test]
    fn discontinued_subscription_is_never_due() {
        let mut sub = Subscription::new_feed("https://example.test/feed.xml");
        sub.discontinued = true;
        sub.next_due = Some(0);
        assert!(!is_due(&sub, 1_000_000));
    }

    #[test]
    fn on_failure_doubles_backoff_and_caps_at_ceiling() {
        let config = SchedulerConfig { default_update_interval_minutes: 10, ..SchedulerConfig::default() };
        let mut sub = Subscription::new_feed("https://example.test/feed.xml");
        let now = 0;
        on_failure(&mut sub, now, &config);
        assert_eq!(sub.next_due, Some(20 * 60)); // 10 * 2^1
        on_failure(&mut sub, now, &config);
        assert_eq!(sub.next_due, Some(40 * 60)); // 10 * 2^2
    }

    #[test]
    fn discontinued_after_max_consecutive_failures() {
        let config = SchedulerConfig { max_consecutive_failures: 3, ..SchedulerConfig::default() };
        let mut sub = Subscription::new_feed("https://example.test/feed.xml");
        for _ in 0..3 {
            on_failure(&mut sub, 0, &config);
        }
        assert!(sub.discontinued);
    }

    #[test]
    fn on_success_resets_failures_and_schedules_next_interval() {
        let config = SchedulerConfig::default();
        let mut sub = Subscription::new_feed("https://example.test/feed.xml");
        sub.consecutive_failures = 4;
        sub.update_interval = 15;
        on_success(&mut sub, 1000, &config);
        assert_eq!(sub.consecutive_failures, 0);
        assert_eq!(sub.next_due, Some(1000 + 15 * 60));
    }

    #[test]
    fn tick_enqueues_due_feeds_and_skips_not_due() {
        let mut arena = NodeArena::new_with_root("local");
        let due_id = arena.add_child(NodeId::ROOT, "Due", NodeKind::Feed(FeedPayload::default()), None).unwrap();
        arena.node_mut(due_id).unwrap().subscription = Some(Subscription::new_feed("https://example.test/a.xml"));

        let not_due_id = arena.add_child(NodeId::ROOT, "NotDue", NodeKind::Feed(FeedPayload::default()), None).unwrap();
        let mut not_due_sub = Subscription::new_feed("https://example.test/b.xml");
        not_due_sub.next_due = Some(10_000);
        arena.node_mut(not_due_id).unwrap().subscription = Some(not_due_sub);

        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let enqueued = scheduler.tick(&arena, 0);
        assert_eq!(enqueued, vec![due_id]);
        assert!(scheduler.is_busy(due_id));
    }

    #[test]
    fn offline_tick_enqueues_nothing() {
        let mut arena = NodeArena::new_with_root("local");
        let id = arena.add_child(NodeId::ROOT, "Feed", NodeKind::Feed(FeedPayload::default()), None).unwrap();
        arena.node_mut(id).unwrap().subscription = Some(Subscription::new_feed("https://example.test/a.xml"));

        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.set_offline(true);
        assert!(scheduler.tick(&arena, 0).is_empty());
    }

    #[test]
    fn refresh_coalesces_with_busy_node() {
        let mut arena = NodeArena::new_with_root("local");
        let id = arena.add_child(NodeId::ROOT, "Feed", NodeKind::Feed(FeedPayload::default()), None).unwrap();
        arena.node_mut(id).unwrap().subscription = Some(Subscription::new_feed("https://example.test/a.xml"));

        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        assert!(scheduler.refresh(&arena, id));
        assert!(!scheduler.refresh(&arena, id));
    }
}
