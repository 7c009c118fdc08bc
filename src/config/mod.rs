//! Process configuration management.
//!
//! Handles loading, saving, and directory resolution for the process-global
//! settings. The node tree (feeds/folders/search folders) lives separately
//! in `crate::opml` and `crate::store`.

mod data;

pub use data::Config;
