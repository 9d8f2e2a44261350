//! Operations exposed to host applications.
//!
//! Configuration is pulled from a [`ConfigProvider`] at call time, so a chain
//! that is already running keeps the snapshot it started with.

use crate::chain::{
  self, api_candidates, download_candidates, run_api_chain, run_download_chain, AttemptRecord,
  ChainError, DenyListHeuristic, HttpClient, NavigationTimeouts, TabNavigator,
};
use crate::config::{self, Config};
use crate::releases::{self, VersionGroup};
use crate::rewrite;
use serde::Serialize;
use std::path::PathBuf;

pub trait ConfigProvider {
  fn mirror_config(&self) -> anyhow::Result<Config>;
}

impl ConfigProvider for Config {
  fn mirror_config(&self) -> anyhow::Result<Config> {
    Ok(self.clone())
  }
}

/// Re-reads the config file on every call without ever writing it.
pub struct FileConfigProvider {
  path: PathBuf,
}

impl FileConfigProvider {
  pub fn new(path: PathBuf) -> Self {
    Self { path }
  }
}

impl ConfigProvider for FileConfigProvider {
  fn mirror_config(&self) -> anyhow::Result<Config> {
    config::load_readonly(&self.path)
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FetchReleasesResponse {
  #[serde(rename_all = "camelCase")]
  Success {
    success: bool,
    groups: Vec<VersionGroup>,
    total_count: usize,
    group_count: usize,
    source: String,
  },
  #[serde(rename_all = "camelCase")]
  Failure {
    success: bool,
    error: String,
    attempted_endpoints: Vec<AttemptRecord>,
  },
}

impl FetchReleasesResponse {
  fn success(groups: Vec<VersionGroup>, source: String) -> Self {
    let total_count = groups.iter().map(|g| g.releases.len()).sum();
    let group_count = groups.len();
    FetchReleasesResponse::Success {
      success: true,
      groups,
      total_count,
      group_count,
      source,
    }
  }

  fn failure(error: String, attempted_endpoints: Vec<AttemptRecord>) -> Self {
    FetchReleasesResponse::Failure {
      success: false,
      error,
      attempted_endpoints,
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, FetchReleasesResponse::Success { .. })
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum InitiateDownloadResponse {
  /// `initiated` is false for a dry run, where no real tab was opened.
  #[serde(rename_all = "camelCase")]
  Success {
    success: bool,
    initiated: bool,
    dry_run: bool,
    source: String,
    url: String,
  },
  #[serde(rename_all = "camelCase")]
  Failure {
    success: bool,
    error: String,
    attempted_endpoints: Vec<AttemptRecord>,
  },
}

impl InitiateDownloadResponse {
  fn failure(error: String, attempted_endpoints: Vec<AttemptRecord>) -> Self {
    InitiateDownloadResponse::Failure {
      success: false,
      error,
      attempted_endpoints,
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, InitiateDownloadResponse::Success { .. })
  }
}

pub fn fetch_releases(
  provider: &dyn ConfigProvider,
  client: &dyn HttpClient,
  owner: &str,
  repo: &str,
) -> FetchReleasesResponse {
  let repo_ref = match chain::validate_repo(owner, repo) {
    Ok(r) => r,
    Err(e) => return FetchReleasesResponse::failure(e.to_string(), Vec::new()),
  };
  let cfg = match provider.mirror_config() {
    Ok(c) => c,
    Err(e) => return FetchReleasesResponse::failure(format!("{e:#}"), Vec::new()),
  };

  let execution_id = chain::new_execution_id();
  tracing::info!(
    execution_id = %execution_id,
    owner = %repo_ref.owner,
    repo = %repo_ref.repo,
    "fetching releases"
  );

  let candidates = api_candidates(&cfg, &repo_ref);
  match run_api_chain(client, &candidates, &cfg.api, &execution_id) {
    Ok(found) => {
      let groups = releases::normalize_payload(&found.value, &cfg);
      FetchReleasesResponse::success(groups, found.source)
    }
    Err(e) => chain_failure(e, FetchReleasesResponse::failure),
  }
}

pub fn initiate_download(
  provider: &dyn ConfigProvider,
  navigator: &dyn TabNavigator,
  original_url: &str,
) -> InitiateDownloadResponse {
  let url = match chain::validate_download_url(original_url) {
    Ok(u) => u,
    Err(e) => return InitiateDownloadResponse::failure(e.to_string(), Vec::new()),
  };
  let cfg = match provider.mirror_config() {
    Ok(c) => c,
    Err(e) => return InitiateDownloadResponse::failure(format!("{e:#}"), Vec::new()),
  };
  let heuristic = match DenyListHeuristic::from_config(&cfg.download) {
    Ok(h) => h,
    Err(e) => return InitiateDownloadResponse::failure(format!("{e:#}"), Vec::new()),
  };

  let execution_id = chain::new_execution_id();
  tracing::info!(execution_id = %execution_id, url = %url, "initiating download");

  let candidates = download_candidates(&cfg, &url);
  let timeouts = NavigationTimeouts::from_config(&cfg.download);
  match run_download_chain(navigator, &heuristic, &candidates, timeouts, &execution_id) {
    Ok(found) => {
      let dry_run = navigator.is_dry_run();
      InitiateDownloadResponse::Success {
        success: true,
        initiated: !dry_run,
        dry_run,
        source: found.source,
        url: found.url,
      }
    }
    Err(e) => chain_failure(e, InitiateDownloadResponse::failure),
  }
}

fn chain_failure<R>(e: ChainError, make: impl FnOnce(String, Vec<AttemptRecord>) -> R) -> R {
  let attempted = e.attempted().to_vec();
  make(e.to_string(), attempted)
}

/// For "test this rule" in settings UIs.
pub fn rewrite_mirror_url(original_url: &str, pattern: &str) -> Option<String> {
  rewrite::rewrite(original_url, pattern)
}
