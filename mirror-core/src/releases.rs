use crate::config::Config;
use crate::rewrite;
use crate::types::{format_size, OFFICIAL_SOURCE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const OTHER_GROUP: &str = "Other";

const OFFICIAL_LINK_NAME: &str = "GitHub";

/// One release as the API returns it. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRelease {
  #[serde(default)]
  pub tag_name: Option<String>,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub body: Option<String>,
  #[serde(default)]
  pub published_at: Option<String>,
  #[serde(default)]
  pub html_url: Option<String>,
  #[serde(default)]
  pub prerelease: Option<bool>,
  #[serde(default)]
  pub draft: Option<bool>,
  #[serde(default)]
  pub assets: Option<Vec<RawAsset>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAsset {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub size: Option<u64>,
  #[serde(default)]
  pub download_count: Option<u64>,
  #[serde(default)]
  pub content_type: Option<String>,
  #[serde(default)]
  pub browser_download_url: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadLink {
  pub source: String,
  pub name: String,
  pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
  pub name: String,
  pub size: u64,
  pub formatted_size: String,
  pub download_count: u64,
  pub content_type: String,
  pub browser_download_url: String,
  pub download_links: Vec<DownloadLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Release {
  pub tag_name: String,
  pub name: String,
  pub body: String,
  pub published_at: Option<String>,
  pub html_url: String,
  pub prerelease: bool,
  pub draft: bool,
  pub assets: Vec<Asset>,
  #[serde(skip)]
  published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionGroup {
  /// Major version digits, or `Other`.
  pub key: String,
  pub label: String,
  pub releases: Vec<Release>,
}

impl VersionGroup {
  pub fn is_other(&self) -> bool {
    self.key == OTHER_GROUP
  }
}

/// Decodes each array element on its own; elements that are not objects are dropped.
pub fn parse_releases(items: &[serde_json::Value]) -> Vec<RawRelease> {
  items
    .iter()
    .enumerate()
    .filter_map(|(i, item)| match RawRelease::deserialize(item) {
      Ok(r) => Some(r),
      Err(e) => {
        tracing::warn!(index = i, error = %e, "skipping malformed release record");
        None
      }
    })
    .collect()
}

/// Major-version key of a tag: the first run of decimal digits, kept as written.
/// `v07` and `v7` therefore land in different groups.
pub fn major_version_key(tag: &str) -> Option<String> {
  let start = tag.find(|c: char| c.is_ascii_digit())?;
  let rest = &tag[start..];
  let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
  Some(rest[..end].to_string())
}

// Compares digit strings by value without overflowing on long runs.
fn cmp_numeric_keys(a: &str, b: &str) -> Ordering {
  let (a, b) = (a.trim_start_matches('0'), b.trim_start_matches('0'));
  a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

pub fn normalize_release(raw: RawRelease, cfg: &Config) -> Release {
  let tag_name = raw.tag_name.unwrap_or_default();
  let name = raw
    .name
    .filter(|n| !n.trim().is_empty())
    .unwrap_or_else(|| tag_name.clone());
  let published = raw
    .published_at
    .as_deref()
    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    .map(|d| d.with_timezone(&Utc));

  let assets = raw
    .assets
    .unwrap_or_default()
    .into_iter()
    .map(|a| normalize_asset(a, cfg))
    .collect();

  Release {
    tag_name,
    name,
    body: raw.body.unwrap_or_default(),
    published_at: raw.published_at,
    html_url: raw.html_url.unwrap_or_default(),
    prerelease: raw.prerelease.unwrap_or(false),
    draft: raw.draft.unwrap_or(false),
    assets,
    published,
  }
}

fn normalize_asset(raw: RawAsset, cfg: &Config) -> Asset {
  let size = raw.size.unwrap_or(0);
  let url = raw.browser_download_url.unwrap_or_default();
  Asset {
    name: raw.name.unwrap_or_default(),
    size,
    formatted_size: format_size(size),
    download_count: raw.download_count.unwrap_or(0),
    content_type: raw.content_type.unwrap_or_default(),
    download_links: download_links(&url, cfg),
    browser_download_url: url,
  }
}

/// Official link first, then every usable mirror that actually changes the URL.
pub fn download_links(official_url: &str, cfg: &Config) -> Vec<DownloadLink> {
  if official_url.is_empty() {
    return Vec::new();
  }

  let mut links = vec![DownloadLink {
    source: OFFICIAL_SOURCE.to_string(),
    name: OFFICIAL_LINK_NAME.to_string(),
    url: official_url.to_string(),
  }];

  for mirror in cfg.enabled_mirrors() {
    let Some(url) = rewrite::rewrite(official_url, &mirror.pattern) else {
      continue;
    };
    if url == official_url {
      continue;
    }
    links.push(DownloadLink {
      source: mirror.name.clone(),
      name: mirror.name.clone(),
      url,
    });
  }
  links
}

/// Groups by major version, newest first inside each group, `Other` last.
pub fn group_releases(releases: Vec<Release>) -> Vec<VersionGroup> {
  let mut groups: Vec<VersionGroup> = Vec::new();

  for release in releases {
    let key = major_version_key(&release.tag_name).unwrap_or_else(|| OTHER_GROUP.to_string());
    match groups.iter_mut().find(|g| g.key == key) {
      Some(group) => group.releases.push(release),
      None => {
        let label = if key == OTHER_GROUP {
          OTHER_GROUP.to_string()
        } else {
          format!("v{key}")
        };
        groups.push(VersionGroup {
          key,
          label,
          releases: vec![release],
        });
      }
    }
  }

  for group in &mut groups {
    // Undated releases sink to the bottom of their group.
    group
      .releases
      .sort_by(|a, b| b.published.cmp(&a.published));
  }

  groups.sort_by(|a, b| match (a.is_other(), b.is_other()) {
    (true, true) => Ordering::Equal,
    (true, false) => Ordering::Greater,
    (false, true) => Ordering::Less,
    (false, false) => cmp_numeric_keys(&b.key, &a.key),
  });
  groups
}

pub fn normalize_payload(items: &[serde_json::Value], cfg: &Config) -> Vec<VersionGroup> {
  let releases = parse_releases(items)
    .into_iter()
    .map(|r| normalize_release(r, cfg))
    .collect();
  group_releases(releases)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn release(tag: &str, published_at: &str) -> serde_json::Value {
    json!({ "tag_name": tag, "published_at": published_at, "assets": [] })
  }

  #[test]
  fn groups_by_major_version_with_other_last() {
    let items = vec![
      release("v2.0", "2024-01-01T00:00:00Z"),
      release("1.9", "2023-06-01T00:00:00Z"),
      release("v2.1", "2024-03-01T00:00:00Z"),
      release("nightly", "2024-05-01T00:00:00Z"),
    ];
    let groups = normalize_payload(&items, &Config::default());

    let keys: Vec<_> = groups.iter().map(|g| g.key.as_str()).collect();
    assert_eq!(keys, ["2", "1", "Other"]);
    assert_eq!(groups[0].label, "v2");

    let tags: Vec<_> = groups[0].releases.iter().map(|r| r.tag_name.as_str()).collect();
    assert_eq!(tags, ["v2.1", "v2.0"]);
  }

  #[test]
  fn numeric_ordering_is_not_lexicographic() {
    let items = vec![
      release("v9.0", "2020-01-01T00:00:00Z"),
      release("v10.0", "2021-01-01T00:00:00Z"),
      release("V100", "2022-01-01T00:00:00Z"),
    ];
    let groups = normalize_payload(&items, &Config::default());
    let keys: Vec<_> = groups.iter().map(|g| g.key.as_str()).collect();
    assert_eq!(keys, ["100", "10", "9"]);
  }

  #[test]
  fn zero_padded_major_keeps_its_own_group() {
    let items = vec![
      release("v07", "2020-01-01T00:00:00Z"),
      release("v7", "2021-01-01T00:00:00Z"),
      release("v010", "2022-01-01T00:00:00Z"),
    ];
    let groups = normalize_payload(&items, &Config::default());
    let keys: Vec<_> = groups.iter().map(|g| (g.key.as_str(), g.releases.len())).collect();
    assert_eq!(keys, [("010", 1), ("07", 1), ("7", 1)]);
    assert_eq!(groups[1].label, "v07");
  }

  #[test]
  fn major_key_takes_first_digit_run() {
    assert_eq!(major_version_key("release-12.3").as_deref(), Some("12"));
    assert_eq!(major_version_key("v007").as_deref(), Some("007"));
    assert_eq!(major_version_key("v0.1").as_deref(), Some("0"));
    assert_eq!(major_version_key("latest"), None);
  }

  #[test]
  fn missing_fields_default_instead_of_failing() {
    let items = vec![json!({
      "tag_name": "v1.0",
      "assets": [{ "name": "a.zip", "browser_download_url": "https://github.com/o/r/releases/download/v1.0/a.zip" }]
    })];
    let groups = normalize_payload(&items, &Config::default());
    let r = &groups[0].releases[0];
    assert_eq!(r.name, "v1.0");
    assert_eq!(r.body, "");
    assert_eq!(r.assets[0].download_count, 0);
    assert_eq!(r.assets[0].content_type, "");
    assert_eq!(r.assets[0].formatted_size, "0 Bytes");
  }

  #[test]
  fn non_object_entries_are_skipped() {
    let items = vec![json!(42), release("v1", "2024-01-01T00:00:00Z")];
    assert_eq!(parse_releases(&items).len(), 1);
  }

  #[test]
  fn download_links_official_first_then_changed_mirrors() {
    let mut cfg = Config::default();
    cfg.mirrors[1].enabled = false;
    cfg.mirrors.push(crate::config::MirrorRule::new("Same", "${url}", ""));
    cfg.mirrors.push(crate::config::MirrorRule::new("Broken", "nonsense", ""));

    let links = download_links("https://github.com/o/r/releases/download/v1/f.zip", &cfg);
    let names: Vec<_> = links.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, ["GitHub", "KKGitHub", "GitFun"]);
    assert_eq!(links[0].source, OFFICIAL_SOURCE);
    assert_eq!(
      links[2].url,
      "https://github.ur1.fun/o/r/releases/download/v1/f.zip"
    );
  }
}
