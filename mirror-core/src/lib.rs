pub mod chain;
pub mod config;
pub mod logging;
pub mod paths;
pub mod reachability;
pub mod redirect;
pub mod releases;
pub mod rewrite;
pub mod service;
pub mod types;

pub use service::{fetch_releases, initiate_download, rewrite_mirror_url};
