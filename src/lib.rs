//! # feedcore
//!
//! A headless feed-aggregation core: the subscription tree, item store,
//! update pipeline, and node-source (remote aggregator) runtime that sit
//! behind a feed reader's UI, without the UI itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Core                               │
//! │   Single-writer control loop; owns everything below it        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!     ┌──────────┬─────────────┼─────────────┬──────────────┐
//!     ▼          ▼             ▼              ▼              ▼
//! ┌────────┐ ┌────────┐  ┌───────────┐  ┌───────────┐  ┌────────────┐
//! │  node  │ │ store  │  │ scheduler │  │  request  │  │ nodesource │
//! │ (tree) │ │(sqlite)│  │(due/backoff)│ │ (fetch)  │  │ (GReader)  │
//! └────────┘ └────────┘  └───────────┘  └───────────┘  └────────────┘
//!                              │
//!                    ┌───────────────────┐
//!                    │  parser + merge   │
//!                    │ dispatch/reconcile│
//!                    └───────────────────┘
//!                              │
//!                    ┌───────────────────┐
//!                    │       opml        │
//!                    │ feed-list layout  │
//!                    └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`core`] — Control loop and the external RPC surface (`Ping`,
//!   `Subscribe`, `Refresh`, ...)
//! - [`node`] — The arena-backed subscription tree
//! - [`subscription`] — The update-able descriptor attached to feed nodes
//! - [`item`] — Items, enclosures, and the GUID duplicate index
//! - [`store`] — SQLite-backed item persistence
//! - [`request`] — Conditional-GET HTTP/file/command fetch layer
//! - [`scheduler`] — Due-ness and exponential-backoff arithmetic
//! - [`parser`] — Format sniffing and RSS/Atom/CDF parsing
//! - [`merge`] — Reconciles freshly parsed items against stored ones
//! - [`opml`] — Feed-list persistence (Liferea-namespaced OPML)
//! - [`nodesource`] — Google-Reader-API-compatible remote aggregator runtime
//! - [`credentials`] — Local encrypted credential storage
//! - [`config`] — Process-global configuration and directory resolution
//! - [`error`] — The shared error taxonomy
//!
//! ## Example
//!
//! ```no_run
//! use feedcore::core::Core;
//!
//! #[tokio::main]
//! async fn main() -> color_eyre::Result<()> {
//!     let mut core = Core::new()?;
//!     core.run().await
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod core;
pub mod credentials;
pub mod error;
pub mod item;
pub mod merge;
pub mod node;
pub mod nodesource;
pub mod opml;
pub mod parser;
pub mod request;
pub mod scheduler;
pub mod store;
pub mod subscription;

pub use config::Config;
pub use core::Core;
pub use error::{CoreError, CoreResult};
