use serde::{Deserialize, Serialize};

/// Provenance tag of the primary host in candidate lists and download links.
pub const OFFICIAL_SOURCE: &str = "official";

pub const PRIMARY_HOST: &str = "github.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
  Api,
  Download,
}

/// One fully-resolved URL in a fallback chain. Built fresh per chain run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEndpoint {
  pub source_name: String,
  pub url: String,
  pub kind: EndpointKind,
}

impl CandidateEndpoint {
  pub fn official(url: impl Into<String>, kind: EndpointKind) -> Self {
    Self {
      source_name: OFFICIAL_SOURCE.to_string(),
      url: url.into(),
      kind,
    }
  }

  pub fn mirror(name: &str, url: impl Into<String>, kind: EndpointKind) -> Self {
    Self {
      source_name: name.to_string(),
      url: url.into(),
      kind,
    }
  }

  pub fn is_official(&self) -> bool {
    self.source_name == OFFICIAL_SOURCE
  }
}

/// Owner/repo pair identifying a repository on the primary host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
  pub owner: String,
  pub repo: String,
}

impl RepoRef {
  /// First two non-empty path segments of a primary-host page URL.
  pub fn from_page_url(page_url: &str) -> Option<Self> {
    let url = reqwest::Url::parse(page_url).ok()?;
    if url.host_str() != Some(PRIMARY_HOST) {
      return None;
    }
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?.to_string();
    let repo = segments.next()?.to_string();
    Some(Self { owner, repo })
  }
}

pub fn now_unix_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}

pub fn format_size(bytes: u64) -> String {
  const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
  if bytes == 0 {
    return "0 Bytes".to_string();
  }

  let mut value = bytes as f64;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }

  let rounded = format!("{value:.2}");
  let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
  format!("{trimmed} {}", UNITS[unit])
}
