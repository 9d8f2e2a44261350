//! Ordered first-success probing across the official host and its mirrors.

pub mod api;
pub mod navigate;

use crate::config::Config;
use crate::rewrite;
use crate::types::{CandidateEndpoint, EndpointKind, RepoRef, PRIMARY_HOST};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

pub use api::{run_api_chain, ApiRequest, HttpClient, HttpResponse, ReqwestClient};
pub use navigate::{
  run_download_chain, DenyListHeuristic, NavigationHeuristic, NavigationTimeouts, TabId, TabNavigator,
};

/// Malformed caller input. Raised before any pattern or network work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
  #[error("repository owner is required")]
  MissingOwner,

  #[error("repository name is required")]
  MissingRepo,

  #[error("invalid repository owner `{0}`")]
  InvalidOwner(String),

  #[error("invalid repository name `{0}`")]
  InvalidRepo(String),

  #[error("original URL is required")]
  MissingUrl,

  #[error("invalid original URL `{0}`")]
  InvalidUrl(String),
}

/// Why a single candidate failed. The chain records it and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
  #[error("network error: {0}")]
  Network(String),

  #[error("request timed out")]
  Timeout,

  #[error("unexpected HTTP status {0}")]
  Status(u16),

  #[error("invalid JSON body: {0}")]
  Parse(String),

  #[error("unexpected payload: {0}")]
  UnexpectedPayload(String),

  #[error("could not open tab: {0}")]
  OpenFailed(String),

  #[error("navigated to failure page {0}")]
  FailurePage(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
  pub source_name: String,
  pub url: String,
  pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
  #[error(transparent)]
  Input(#[from] InputError),

  #[error("all endpoints unavailable{}", last_error_suffix(.last_error))]
  Exhausted {
    attempted: Vec<AttemptRecord>,
    last_error: Option<EndpointError>,
  },
}

fn last_error_suffix(last_error: &Option<EndpointError>) -> String {
  last_error
    .as_ref()
    .map(|e| format!(": {e}"))
    .unwrap_or_default()
}

impl ChainError {
  pub fn attempted(&self) -> &[AttemptRecord] {
    match self {
      ChainError::Input(_) => &[],
      ChainError::Exhausted { attempted, .. } => attempted,
    }
  }
}

#[derive(Debug, Clone)]
pub struct ChainSuccess<T> {
  pub source: String,
  pub url: String,
  pub value: T,
  pub attempts: Vec<AttemptRecord>,
}

/// Tries `candidates` in order, one at a time, until `attempt` succeeds.
pub fn run_chain<T, F>(
  execution_id: &str,
  candidates: &[CandidateEndpoint],
  mut attempt: F,
) -> Result<ChainSuccess<T>, ChainError>
where
  F: FnMut(&CandidateEndpoint) -> Result<T, EndpointError>,
{
  let mut attempts = Vec::with_capacity(candidates.len());
  let mut last_error = None;

  for candidate in candidates {
    tracing::debug!(
      execution_id = %execution_id,
      source = %candidate.source_name,
      url = %candidate.url,
      "trying endpoint"
    );

    match attempt(candidate) {
      Ok(value) => {
        attempts.push(AttemptRecord {
          source_name: candidate.source_name.clone(),
          url: candidate.url.clone(),
          error: None,
        });
        tracing::info!(
          execution_id = %execution_id,
          source = %candidate.source_name,
          attempts = attempts.len(),
          "endpoint succeeded"
        );
        return Ok(ChainSuccess {
          source: candidate.source_name.clone(),
          url: candidate.url.clone(),
          value,
          attempts,
        });
      }
      Err(e) => {
        tracing::warn!(
          execution_id = %execution_id,
          source = %candidate.source_name,
          error = %e,
          "endpoint failed"
        );
        attempts.push(AttemptRecord {
          source_name: candidate.source_name.clone(),
          url: candidate.url.clone(),
          error: Some(e.to_string()),
        });
        last_error = Some(e);
      }
    }
  }

  tracing::warn!(
    execution_id = %execution_id,
    attempts = attempts.len(),
    "all endpoints unavailable"
  );
  Err(ChainError::Exhausted {
    attempted: attempts,
    last_error,
  })
}

pub fn new_execution_id() -> String {
  uuid::Uuid::new_v4().to_string()
}

fn is_valid_repo_part(s: &str) -> bool {
  s.chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    && s != "."
    && s != ".."
}

pub fn validate_repo(owner: &str, repo: &str) -> Result<RepoRef, InputError> {
  let owner = owner.trim();
  let repo = repo.trim();
  if owner.is_empty() {
    return Err(InputError::MissingOwner);
  }
  if repo.is_empty() {
    return Err(InputError::MissingRepo);
  }
  if !is_valid_repo_part(owner) {
    return Err(InputError::InvalidOwner(owner.to_string()));
  }
  if !is_valid_repo_part(repo) {
    return Err(InputError::InvalidRepo(repo.to_string()));
  }
  Ok(RepoRef {
    owner: owner.to_string(),
    repo: repo.to_string(),
  })
}

pub fn validate_download_url(original_url: &str) -> Result<String, InputError> {
  let trimmed = original_url.trim();
  if trimmed.is_empty() {
    return Err(InputError::MissingUrl);
  }
  match reqwest::Url::parse(trimmed) {
    Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
      Ok(trimmed.to_string())
    }
    _ => Err(InputError::InvalidUrl(trimmed.to_string())),
  }
}

/// Keeps the first candidate for each distinct URL.
fn dedupe(candidates: Vec<CandidateEndpoint>) -> Vec<CandidateEndpoint> {
  let mut seen = HashSet::new();
  candidates
    .into_iter()
    .filter(|c| seen.insert(c.url.clone()))
    .collect()
}

pub fn official_api_url(cfg: &Config, repo: &RepoRef) -> String {
  format!(
    "{}/repos/{}/{}/releases",
    cfg.api.official_base.trim_end_matches('/'),
    repo.owner,
    repo.repo
  )
}

/// Official releases endpoint first, then one per usable mirror.
pub fn api_candidates(cfg: &Config, repo: &RepoRef) -> Vec<CandidateEndpoint> {
  let mut out = vec![CandidateEndpoint::official(
    official_api_url(cfg, repo),
    EndpointKind::Api,
  )];

  let primary_form = format!(
    "https://{PRIMARY_HOST}/repos/{}/{}/releases",
    repo.owner, repo.repo
  );

  for mirror in cfg.enabled_mirrors() {
    let url = match mirror.api_url.as_deref().filter(|t| !t.trim().is_empty()) {
      Some(template) => Some(
        template
          .replace("{owner}", &repo.owner)
          .replace("{repo}", &repo.repo),
      ),
      None => rewrite::rewrite(&primary_form, &mirror.pattern).filter(|u| *u != primary_form),
    };

    match url {
      Some(url) => out.push(CandidateEndpoint::mirror(&mirror.name, url, EndpointKind::Api)),
      None => tracing::debug!(mirror = %mirror.name, "mirror has no usable API endpoint"),
    }
  }

  dedupe(out)
}

/// The original URL first, then every mirror rewrite that changes it.
pub fn download_candidates(cfg: &Config, original_url: &str) -> Vec<CandidateEndpoint> {
  let mut out = vec![CandidateEndpoint::official(
    original_url,
    EndpointKind::Download,
  )];

  for mirror in cfg.enabled_mirrors() {
    match rewrite::rewrite(original_url, &mirror.pattern) {
      Some(url) if url != original_url => {
        out.push(CandidateEndpoint::mirror(&mirror.name, url, EndpointKind::Download));
      }
      _ => tracing::debug!(mirror = %mirror.name, "mirror skipped for download"),
    }
  }

  dedupe(out)
}
