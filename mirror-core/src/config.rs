use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
  pub mirrors: Vec<MirrorRule>,
  pub auto_redirect: AutoRedirectConfig,
  pub api: ApiConfig,
  pub download: DownloadConfig,
  pub reachability: ReachabilityConfig,
  pub logging: LoggingConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      mirrors: default_mirrors(),
      auto_redirect: AutoRedirectConfig::default(),
      api: ApiConfig::default(),
      download: DownloadConfig::default(),
      reachability: ReachabilityConfig::default(),
      logging: LoggingConfig::default(),
    }
  }
}

impl Config {
  pub fn enabled_mirrors(&self) -> impl Iterator<Item = &MirrorRule> {
    self.mirrors.iter().filter(|m| m.is_usable())
  }

  /// Last entry wins when two mirrors share a name.
  pub fn mirror_named(&self, name: &str) -> Option<&MirrorRule> {
    self.mirrors.iter().rev().find(|m| m.name == name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRule {
  pub name: String,

  #[serde(default = "default_true")]
  pub enabled: bool,

  #[serde(alias = "urlPattern", alias = "rule")]
  pub pattern: String,

  #[serde(default)]
  pub description: String,

  /// Release API template with `{owner}` and `{repo}`.
  #[serde(default, alias = "apiUrl", skip_serializing_if = "Option::is_none")]
  pub api_url: Option<String>,
}

impl MirrorRule {
  pub fn new(name: &str, pattern: &str, description: &str) -> Self {
    Self {
      name: name.to_string(),
      enabled: true,
      pattern: pattern.to_string(),
      description: description.to_string(),
      api_url: None,
    }
  }

  pub fn is_usable(&self) -> bool {
    self.enabled && !self.pattern.trim().is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoRedirectConfig {
  #[serde(default)]
  pub enabled: bool,

  #[serde(default = "default_preferred_mirror", alias = "preferredMirror")]
  pub preferred_mirror: String,

  /// Period of the primary host reachability checks.
  #[serde(default = "default_check_interval_ms", alias = "checkInterval", alias = "checkIntervalMs")]
  pub check_interval_ms: u64,

  /// Mirror help pages that trigger a failover to another mirror. Unlike the
  /// download deny-list these also match a whole `help` path segment.
  #[serde(default = "default_help_page_patterns")]
  pub help_page_patterns: Vec<String>,
}

impl Default for AutoRedirectConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      preferred_mirror: default_preferred_mirror(),
      check_interval_ms: default_check_interval_ms(),
      help_page_patterns: default_help_page_patterns(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_official_api_base")]
  pub official_base: String,

  #[serde(default = "default_accept")]
  pub accept: String,

  #[serde(default = "default_user_agent")]
  pub user_agent: String,

  #[serde(default = "default_api_timeout_seconds")]
  pub timeout_seconds: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      official_base: default_official_api_base(),
      accept: default_accept(),
      user_agent: default_user_agent(),
      timeout_seconds: default_api_timeout_seconds(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
  #[serde(default = "default_grace_ms")]
  pub grace_ms: u64,

  #[serde(default = "default_total_timeout_ms")]
  pub total_timeout_ms: u64,

  /// Regular expressions matched against navigated tab URLs.
  #[serde(default = "default_failure_patterns")]
  pub failure_patterns: Vec<String>,
}

impl Default for DownloadConfig {
  fn default() -> Self {
    Self {
      grace_ms: default_grace_ms(),
      total_timeout_ms: default_total_timeout_ms(),
      failure_patterns: default_failure_patterns(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityConfig {
  #[serde(default = "default_probe_url")]
  pub probe_url: String,

  #[serde(default = "default_probe_timeout_seconds")]
  pub probe_timeout_seconds: u64,

  #[serde(default = "default_failure_threshold")]
  pub failure_threshold: u32,
}

impl Default for ReachabilityConfig {
  fn default() -> Self {
    Self {
      probe_url: default_probe_url(),
      probe_timeout_seconds: default_probe_timeout_seconds(),
      failure_threshold: default_failure_threshold(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_preferred_mirror() -> String {
  "KKGitHub".to_string()
}

fn default_check_interval_ms() -> u64 {
  300_000
}

fn default_official_api_base() -> String {
  "https://api.github.com".to_string()
}

fn default_accept() -> String {
  "application/vnd.github.v3+json".to_string()
}

fn default_user_agent() -> String {
  format!("GitHub-Enhanced-Downloader/{}", env!("CARGO_PKG_VERSION"))
}

fn default_api_timeout_seconds() -> u64 {
  10
}

fn default_grace_ms() -> u64 {
  5_000
}

fn default_total_timeout_ms() -> u64 {
  10_000
}

const HELP_PAGE_HOSTS: [&str; 3] = ["kkgithub.com", "bgithub.xyz", "github.ur1.fun"];

fn help_host_pattern(host: &str) -> String {
  format!(r"^https?://help\.{}(:\d+)?([/?#]|$)", regex::escape(host))
}

fn default_failure_patterns() -> Vec<String> {
  HELP_PAGE_HOSTS.iter().map(|host| help_host_pattern(host)).collect()
}

fn default_help_page_patterns() -> Vec<String> {
  HELP_PAGE_HOSTS
    .iter()
    .flat_map(|host| {
      let segment = format!(
        r"^https?://([^/?#]+\.)?{}(:\d+)?/([^?#]*/)?help([/?#]|$)",
        regex::escape(host)
      );
      [help_host_pattern(host), segment]
    })
    .collect()
}

fn default_probe_url() -> String {
  "https://github.com/favicon.ico".to_string()
}

fn default_probe_timeout_seconds() -> u64 {
  8
}

fn default_failure_threshold() -> u32 {
  2
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

pub fn default_mirrors() -> Vec<MirrorRule> {
  [
    ("KKGitHub", "kkgithub.com", "KKGitHub mirror"),
    ("BGitHub", "bgithub.xyz", "BGitHub mirror"),
    ("GitFun", "github.ur1.fun", "GitFun mirror"),
  ]
  .iter()
  .map(|(name, host, description)| MirrorRule {
    api_url: Some(format!("https://api.{host}/repos/{{owner}}/{{repo}}/releases")),
    ..MirrorRule::new(
      name,
      &format!(r#"${{url}}.replace("github.com", "{host}")"#),
      description,
    )
  })
  .collect()
}

/// Names the split legacy shape used for the entry that stood for the primary host.
const LEGACY_OFFICIAL_NAMES: &[&str] = &["GitHub官方", "GitHub Official", "GitHub"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyMirrorSettings {
  #[serde(default, alias = "presetMirrors")]
  pub preset_mirrors: Vec<LegacyMirror>,

  #[serde(default, alias = "customMirrors")]
  pub custom_mirrors: Vec<LegacyMirror>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyMirror {
  pub name: String,

  #[serde(default = "default_true")]
  pub enabled: bool,

  #[serde(default, alias = "urlPattern", alias = "pattern")]
  pub rule: String,

  #[serde(default)]
  pub description: Option<String>,
}

impl LegacyMirror {
  fn into_rule(self) -> MirrorRule {
    let description = self
      .description
      .filter(|d| !d.trim().is_empty())
      .unwrap_or_else(|| self.name.clone());
    MirrorRule {
      name: self.name,
      enabled: self.enabled,
      pattern: self.rule,
      description,
      api_url: None,
    }
  }
}

/// Any stored configuration shape, canonical or legacy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
  #[serde(default)]
  pub mirrors: Option<Vec<MirrorRule>>,

  #[serde(default, alias = "autoRedirect")]
  pub auto_redirect: Option<AutoRedirectConfig>,

  #[serde(default)]
  pub api: Option<ApiConfig>,

  #[serde(default)]
  pub download: Option<DownloadConfig>,

  #[serde(default)]
  pub reachability: Option<ReachabilityConfig>,

  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  // Back-compat: split preset/custom lists at the top level.
  #[serde(default, alias = "presetMirrors")]
  pub preset_mirrors: Option<Vec<LegacyMirror>>,

  #[serde(default, alias = "customMirrors")]
  pub custom_mirrors: Option<Vec<LegacyMirror>>,

  // Back-compat: the same split lists nested under `mirrorSettings`.
  #[serde(default, alias = "mirrorSettings")]
  pub mirror_settings: Option<LegacyMirrorSettings>,

  // Back-compat: the whole canonical blob stored under `mirrorConfig`.
  #[serde(default, alias = "mirrorConfig")]
  pub mirror_config: Option<Box<ConfigFile>>,
}

impl ConfigFile {
  pub fn needs_upgrade(&self) -> bool {
    self.mirror_config.is_some()
      || self.preset_mirrors.is_some()
      || self.custom_mirrors.is_some()
      || self.mirror_settings.is_some()
      || self.mirrors.is_none()
      || self.auto_redirect.is_none()
      || self.api.is_none()
      || self.download.is_none()
      || self.reachability.is_none()
      || self.logging.is_none()
  }
}

/// Upgrades any stored shape into the canonical one. Pure apart from warnings.
pub fn normalize_config(raw: ConfigFile) -> Config {
  if let Some(inner) = raw.mirror_config {
    let mut merged = *inner;
    merged.logging = merged.logging.or(raw.logging);
    return normalize_config(merged);
  }

  let mut cfg = Config::default();

  let mut legacy = raw.mirror_settings.unwrap_or_default();
  if let Some(p) = raw.preset_mirrors {
    legacy.preset_mirrors.extend(p);
  }
  if let Some(c) = raw.custom_mirrors {
    legacy.custom_mirrors.extend(c);
  }
  let has_legacy = !legacy.preset_mirrors.is_empty() || !legacy.custom_mirrors.is_empty();

  if let Some(mirrors) = raw.mirrors {
    cfg.mirrors = mirrors;
  } else if has_legacy {
    cfg.mirrors = legacy
      .preset_mirrors
      .into_iter()
      .filter(|m| !LEGACY_OFFICIAL_NAMES.contains(&m.name.as_str()))
      .chain(legacy.custom_mirrors)
      .map(LegacyMirror::into_rule)
      .collect();
  }

  if let Some(a) = raw.auto_redirect {
    cfg.auto_redirect = a;
  }
  if let Some(a) = raw.api {
    cfg.api = a;
  }
  if let Some(d) = raw.download {
    cfg.download = d;
  }
  if let Some(r) = raw.reachability {
    cfg.reachability = r;
  }
  if let Some(l) = raw.logging {
    cfg.logging = l;
  }

  repair(&mut cfg);
  cfg
}

fn repair(cfg: &mut Config) {
  if let Some(reason) = validate_api_config(&cfg.api) {
    tracing::warn!(reason = %reason, "api config invalid; using defaults");
    cfg.api = ApiConfig::default();
  }

  if let Some(reason) = validate_download_config(&cfg.download) {
    tracing::warn!(reason = %reason, "download config invalid; using defaults");
    cfg.download = DownloadConfig::default();
  }

  if let Some(reason) = validate_reachability_config(&cfg.reachability) {
    tracing::warn!(reason = %reason, "reachability config invalid; using defaults");
    cfg.reachability = ReachabilityConfig::default();
  }

  if cfg.auto_redirect.check_interval_ms == 0 {
    tracing::warn!("auto_redirect.check_interval_ms must be > 0; using default");
    cfg.auto_redirect.check_interval_ms = default_check_interval_ms();
  }

  if let Some(reason) = first_invalid_pattern(&cfg.auto_redirect.help_page_patterns) {
    tracing::warn!(reason = %reason, "help page patterns invalid; using defaults");
    cfg.auto_redirect.help_page_patterns = default_help_page_patterns();
  }
}

fn first_invalid_pattern(patterns: &[String]) -> Option<String> {
  patterns.iter().find_map(|p| {
    regex::Regex::new(p)
      .err()
      .map(|e| format!("invalid pattern `{p}`: {e}"))
  })
}

fn validate_api_config(api: &ApiConfig) -> Option<String> {
  if api.timeout_seconds == 0 {
    return Some("timeout_seconds must be > 0".to_string());
  }
  let Ok(url) = reqwest::Url::parse(&api.official_base) else {
    return Some(format!("invalid official_base URL: {}", api.official_base));
  };
  if url.scheme() != "https" && url.scheme() != "http" {
    return Some(format!("official_base must be http(s): {}", api.official_base));
  }
  None
}

fn validate_download_config(d: &DownloadConfig) -> Option<String> {
  if d.grace_ms == 0 || d.total_timeout_ms == 0 {
    return Some("download timeouts must be > 0".to_string());
  }
  if d.grace_ms >= d.total_timeout_ms {
    return Some("grace_ms must be shorter than total_timeout_ms".to_string());
  }
  first_invalid_pattern(&d.failure_patterns)
}

fn validate_reachability_config(r: &ReachabilityConfig) -> Option<String> {
  if r.probe_timeout_seconds == 0 {
    return Some("probe_timeout_seconds must be > 0".to_string());
  }
  if r.failure_threshold == 0 {
    return Some("failure_threshold must be > 0".to_string());
  }
  if reqwest::Url::parse(&r.probe_url).is_err() {
    return Some(format!("invalid probe_url: {}", r.probe_url));
  }
  None
}

pub fn from_toml_str(raw: &str) -> anyhow::Result<Config> {
  let file: ConfigFile = toml::from_str(raw).context("parse config TOML")?;
  Ok(normalize_config(file))
}

/// Parses a JSON storage export (camelCase keys accepted).
pub fn from_json_str(raw: &str) -> anyhow::Result<Config> {
  let file: ConfigFile = serde_json::from_str(raw).context("parse config JSON")?;
  Ok(normalize_config(file))
}

/// Loads without ever touching the file. Missing or invalid files yield defaults.
pub fn load_readonly(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, false)
}

/// Seeds a missing file with defaults; existing files are read but never rewritten.
pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, true)
}

fn load_impl(path: &Path, seed_missing: bool) -> anyhow::Result<Config> {
  if !path.exists() {
    let cfg = Config::default();
    if seed_missing {
      save(path, &cfg)?;
      tracing::info!(path = %path.display(), "default mirror config written");
    } else {
      tracing::debug!(path = %path.display(), "config missing; using defaults");
    }
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      if file.needs_upgrade() {
        tracing::info!(
          path = %path.display(),
          "config uses a legacy or partial shape; upgraded in memory only"
        );
      }
      Ok(normalize_config(file))
    }
    Err(e) => {
      tracing::warn!(
        path = %path.display(),
        error = %e,
        "invalid config; using defaults without modifying the file"
      );
      Ok(Config::default())
    }
  }
}

/// Explicit user save. The only writer of the config file.
pub fn save(path: &Path, cfg: &Config) -> anyhow::Result<()> {
  let raw = toml::to_string_pretty(cfg).context("serialize config")?;
  write_atomic(path, &raw)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;

  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));
  fs::write(&tmp, contents).with_context(|| format!("write {}", tmp.display()))?;
  fs::rename(&tmp, path).with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir()
      .join(format!("mirror-core-test-{}", uuid::Uuid::new_v4()))
      .join(name)
  }

  #[test]
  fn defaults_seed_three_mirrors_with_api_templates() {
    let cfg = Config::default();
    let names: Vec<_> = cfg.mirrors.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["KKGitHub", "BGitHub", "GitFun"]);
    assert_eq!(
      cfg.mirrors[0].pattern,
      r#"${url}.replace("github.com", "kkgithub.com")"#
    );
    assert_eq!(
      cfg.mirrors[1].api_url.as_deref(),
      Some("https://api.bgithub.xyz/repos/{owner}/{repo}/releases")
    );
    assert!(!cfg.auto_redirect.enabled);
  }

  #[test]
  fn default_failure_patterns_only_match_help_hosts() {
    let set = regex::RegexSet::new(default_failure_patterns()).unwrap();
    assert!(set.is_match("https://help.kkgithub.com/"));
    assert!(set.is_match("https://help.github.ur1.fun"));
    assert!(!set.is_match("https://bgithub.xyz/some/help"));
    assert!(!set.is_match("https://kkgithub.com/o/r/releases/download/v1/f.zip"));
    assert!(!set.is_match("https://kkgithub.com/helpscout/cli/releases/download/v1/a.zip"));
    assert!(!set.is_match("https://help.kkgithub.com.evil.io/"));
  }

  #[test]
  fn help_page_patterns_match_whole_help_segment() {
    let set = regex::RegexSet::new(default_help_page_patterns()).unwrap();
    assert!(set.is_match("https://help.bgithub.xyz/"));
    assert!(set.is_match("https://bgithub.xyz/some/help"));
    assert!(set.is_match("https://bgithub.xyz/o/r/help?tab=1"));
    assert!(set.is_match("https://kkgithub.com/help/"));
    assert!(!set.is_match("https://kkgithub.com/helpscout/cli"));
    assert!(!set.is_match("https://kkgithub.com/o/helpy/releases"));
    assert!(!set.is_match("https://github.com/o/r/help"));
  }

  #[test]
  fn invalid_help_page_patterns_fall_back_to_defaults() {
    let cfg = from_toml_str("[auto_redirect]\nhelp_page_patterns = [\"(\"]\n").unwrap();
    assert_eq!(cfg.auto_redirect.help_page_patterns, default_help_page_patterns());
  }

  #[test]
  fn flat_legacy_mirrors_with_url_pattern() {
    let raw = r#"{
      "mirrors": [
        {"name": "A", "enabled": true, "urlPattern": "url.replace('github.com','a.com')", "description": "a"},
        {"name": "B", "enabled": false, "urlPattern": "https://b.${domain}${path}"}
      ],
      "autoRedirect": {"enabled": true, "preferredMirror": "B", "checkInterval": 60000}
    }"#;
    let cfg = from_json_str(raw).unwrap();
    assert_eq!(cfg.mirrors.len(), 2);
    assert_eq!(cfg.mirrors[0].pattern, "url.replace('github.com','a.com')");
    assert!(!cfg.mirrors[1].enabled);
    assert_eq!(cfg.mirrors[1].description, "");
    assert!(cfg.auto_redirect.enabled);
    assert_eq!(cfg.auto_redirect.preferred_mirror, "B");
    assert_eq!(cfg.auto_redirect.check_interval_ms, 60_000);
  }

  #[test]
  fn split_legacy_lists_drop_official_entry_and_keep_order() {
    let raw = r#"{
      "mirrorSettings": {
        "presetMirrors": [
          {"name": "GitHub官方", "enabled": true, "rule": "${url}"},
          {"name": "P1", "enabled": true, "rule": "url.replace('github.com','p1.com')"}
        ],
        "customMirrors": [
          {"name": "C1", "enabled": true, "rule": "https://c1.${domain}${path}", "description": "mine"}
        ]
      }
    }"#;
    let cfg = from_json_str(raw).unwrap();
    let names: Vec<_> = cfg.mirrors.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["P1", "C1"]);
    assert_eq!(cfg.mirrors[0].description, "P1");
    assert_eq!(cfg.mirrors[1].description, "mine");
  }

  #[test]
  fn wrapped_mirror_config_blob_is_unwrapped() {
    let raw = r#"{"mirrorConfig": {"mirrors": [{"name": "X", "pattern": "url.replace('a','b')"}]}}"#;
    let cfg = from_json_str(raw).unwrap();
    assert_eq!(cfg.mirrors.len(), 1);
    assert!(cfg.mirrors[0].enabled);
  }

  #[test]
  fn invalid_sections_are_repaired() {
    let raw = r#"
[download]
grace_ms = 10000
total_timeout_ms = 5000

[reachability]
failure_threshold = 0
"#;
    let cfg = from_toml_str(raw).unwrap();
    assert_eq!(cfg.download, DownloadConfig::default());
    assert_eq!(cfg.reachability, ReachabilityConfig::default());
    assert_eq!(cfg.mirrors, default_mirrors());
  }

  #[test]
  fn mirror_named_last_write_wins() {
    let mut cfg = Config::default();
    cfg.mirrors.push(MirrorRule::new("KKGitHub", "url.replace('x','y')", "dup"));
    assert_eq!(cfg.mirror_named("KKGitHub").unwrap().description, "dup");
  }

  #[test]
  fn readonly_load_never_writes_legacy_file() {
    let path = temp_path("config.toml");
    let legacy = r#"
[[presetMirrors]]
name = "P1"
enabled = true
rule = "url.replace('github.com','p1.com')"
"#;
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, legacy).unwrap();

    let cfg = load_readonly(&path).unwrap();
    assert_eq!(cfg.mirrors[0].name, "P1");
    assert_eq!(fs::read_to_string(&path).unwrap(), legacy);

    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.mirrors.len(), 1);
    assert_eq!(fs::read_to_string(&path).unwrap(), legacy);
  }

  #[test]
  fn missing_file_readonly_vs_seeded() {
    let path = temp_path("config.toml");
    let cfg = load_readonly(&path).unwrap();
    assert_eq!(cfg, Config::default());
    assert!(!path.exists());

    load_or_create_default(&path).unwrap();
    assert!(path.exists());
    assert_eq!(load_readonly(&path).unwrap(), Config::default());
  }

  #[test]
  fn save_round_trips_canonical_shape() {
    let path = temp_path("config.toml");
    let mut cfg = Config::default();
    cfg.auto_redirect.enabled = true;
    cfg.mirrors[2].enabled = false;
    save(&path, &cfg).unwrap();
    let loaded = load_readonly(&path).unwrap();
    assert_eq!(loaded, cfg);
  }
}
