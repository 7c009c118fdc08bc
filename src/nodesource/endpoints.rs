//! Per-provider Google-Reader-compatible API endpoint table (spec §4.7).
//!
//! Grounded on `original_source/src/fl_sources/google_reader_api.c`'s
//! `googleReaderApi` struct: a flat table of mandatory endpoint paths,
//! asserted non-null there (`google_reader_api_check`), modeled here as a
//! plain `const fn`-constructed struct instead of function pointers — every
//! field is a path relative to a provider's base URL, not a callback, since
//! the request shapes themselves (form fields, auth header) are identical
//! across providers and live in `super::client`.

/// The full set of endpoint paths a Google-Reader-API-compatible provider
/// must expose (spec §4.7's `{ login, login_post, ... }` tuple).
#[derive(Debug, Clone, Copy)]
pub struct GReaderEndpoints {
    /// `ClientLogin`-style authentication endpoint.
    pub login: &'static str,
    /// Form field name carrying the password/API key in the login POST.
    pub login_post: &'static str,
    /// Unread item counts per subscription/category.
    pub unread_count: &'static str,
    /// Subscription (feed) listing.
    pub subscription_list: &'static str,
    /// Subscription add/remove/rename edit endpoint.
    pub add_subscription: &'static str,
    /// Form action value that means "subscribe" on `add_subscription`.
    pub add_subscription_post: &'static str,
    /// Same edit endpoint used for removal (providers that split it differ
    /// here; defaults match `add_subscription`).
    pub remove_subscription: &'static str,
    /// Form action value that means "unsubscribe".
    pub remove_subscription_post: &'static str,
    /// Tag-edit endpoint (read/unread/star/unstar).
    pub edit_tag: &'static str,
    /// Form field name for the tag being added.
    pub edit_tag_add_post: &'static str,
    /// Form field name used by the two-call mark-unread sequence's second
    /// ("add tracking-kept-unread") request.
    pub edit_tag_ar_tag_post: &'static str,
    /// Form field name for the tag being removed.
    pub edit_tag_remove_post: &'static str,
    /// Label (category/folder) edit endpoint.
    pub edit_label: &'static str,
    /// Form field name for the label being added.
    pub edit_add_label_post: &'static str,
    /// Form field name for the label being removed.
    pub edit_remove_label_post: &'static str,
    /// CSRF/write-token endpoint.
    pub token: &'static str,
}

impl GReaderEndpoints {
    /// The generic/reference Google Reader API path layout. Every built-in
    /// provider starts from this and overrides only what differs.
    #[must_use]
    pub const fn generic() -> Self {
        Self {
            login: "/accounts/ClientLogin",
            login_post: "Passwd",
            unread_count: "/reader/api/0/unread-count",
            subscription_list: "/reader/api/0/subscription/list",
            add_subscription: "/reader/api/0/subscription/edit",
            add_subscription_post: "subscribe",
            remove_subscription: "/reader/api/0/subscription/edit",
            remove_subscription_post: "unsubscribe",
            edit_tag: "/reader/api/0/edit-tag",
            edit_tag_add_post: "a",
            edit_tag_ar_tag_post: "a",
            edit_tag_remove_post: "r",
            edit_label: "/reader/api/0/edit-tag",
            edit_add_label_post: "a",
            edit_remove_label_post: "r",
            token: "/reader/api/0/token",
        }
    }

    /// FreshRSS's `greader.php` compatibility endpoint; path layout matches
    /// the generic table exactly (FreshRSS implements the reference API
    /// faithfully), kept as a distinct constructor so a future divergence
    /// has somewhere to land without touching callers.
    #[must_use]
    pub const fn freshrss() -> Self {
        Self::generic()
    }

    /// Miniflux's Google-Reader-compatible surface; identical paths to the
    /// reference layout as of Miniflux's current `/v1/` GReader shim.
    #[must_use]
    pub const fn miniflux() -> Self {
        Self::generic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_table_has_nonempty_mandatory_paths() {
        let e = GReaderEndpoints::generic();
        assert!(!e.login.is_empty());
        assert!(!e.token.is_empty());
        assert!(!e.subscription_list.is_empty());
    }
}
