use crate::config::{write_atomic, Config, ReachabilityConfig};
use crate::types::now_unix_ms;
use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::CACHE_CONTROL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachabilityRecord {
  pub accessible: bool,
  pub consecutive_failures: u32,
  pub checked_at: Option<u64>,
  pub last_error: Option<String>,
}

impl Default for ReachabilityRecord {
  fn default() -> Self {
    Self {
      accessible: true,
      consecutive_failures: 0,
      checked_at: None,
      last_error: None,
    }
  }
}

impl ReachabilityRecord {
  /// Reachable as established by at least one probe.
  pub fn is_confirmed_reachable(&self) -> bool {
    self.accessible && self.checked_at.is_some()
  }
}

/// Next record after one probe. A success clears the failure count; a failure
/// only flips `accessible` once the count reaches `threshold`.
pub fn apply_probe(
  record: &ReachabilityRecord,
  result: &Result<(), String>,
  threshold: u32,
  now_ms: u64,
) -> ReachabilityRecord {
  match result {
    Ok(()) => ReachabilityRecord {
      accessible: true,
      consecutive_failures: 0,
      checked_at: Some(now_ms),
      last_error: None,
    },
    Err(e) => {
      let failures = record.consecutive_failures.saturating_add(1);
      ReachabilityRecord {
        accessible: if failures >= threshold.max(1) {
          false
        } else {
          record.accessible
        },
        consecutive_failures: failures,
        checked_at: Some(now_ms),
        last_error: Some(e.clone()),
      }
    }
  }
}

pub trait Probe {
  fn probe(&self) -> Result<(), String>;
}

/// HEAD request against a small static resource on the primary host.
pub struct HeadProbe {
  client: Client,
  url: String,
}

impl HeadProbe {
  pub fn new(cfg: &ReachabilityConfig, user_agent: &str) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(cfg.probe_timeout_seconds))
      .user_agent(user_agent)
      .build()
      .context("build probe HTTP client")?;
    Ok(Self {
      client,
      url: cfg.probe_url.clone(),
    })
  }
}

impl Probe for HeadProbe {
  fn probe(&self) -> Result<(), String> {
    let response = self
      .client
      .head(&self.url)
      .header(CACHE_CONTROL, "no-cache")
      .send()
      .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
      return Err(format!("HTTP {}", response.status().as_u16()));
    }
    Ok(())
  }
}

/// Read side used by the redirect policy.
pub trait ReachabilitySource {
  fn is_primary_host_reachable(&self) -> bool;

  /// Probes immediately and returns the updated signal.
  fn check_now(&self) -> bool;
}

pub struct ReachabilityMonitor<P: Probe> {
  probe: P,
  threshold: u32,
  state_path: Option<PathBuf>,
  record: Mutex<ReachabilityRecord>,
}

impl<P: Probe> ReachabilityMonitor<P> {
  pub fn new(probe: P, threshold: u32) -> Self {
    Self {
      probe,
      threshold,
      state_path: None,
      record: Mutex::new(ReachabilityRecord::default()),
    }
  }

  /// Restores the last record from `path` and persists every update there.
  pub fn with_state_file(probe: P, threshold: u32, path: &Path) -> Self {
    let record = load_record(path);
    Self {
      probe,
      threshold,
      state_path: Some(path.to_path_buf()),
      record: Mutex::new(record),
    }
  }

  pub fn record(&self) -> ReachabilityRecord {
    match self.record.lock() {
      Ok(g) => g.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  pub fn check(&self) -> ReachabilityRecord {
    let result = self.probe.probe();
    let now = now_unix_ms();

    let updated = {
      let mut guard = match self.record.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
      };
      let next = apply_probe(&guard, &result, self.threshold, now);
      *guard = next.clone();
      next
    };

    match &result {
      Ok(()) => tracing::debug!("primary host reachable"),
      Err(e) if updated.accessible => tracing::info!(
        failures = updated.consecutive_failures,
        error = %e,
        "primary host probe failed; below threshold"
      ),
      Err(e) => tracing::warn!(
        failures = updated.consecutive_failures,
        error = %e,
        "primary host marked unreachable"
      ),
    }

    if let Some(path) = &self.state_path {
      if let Err(e) = save_record(path, &updated) {
        tracing::warn!(error = %e, "failed to persist reachability state");
      }
    }
    updated
  }
}

impl<P: Probe> ReachabilitySource for ReachabilityMonitor<P> {
  fn is_primary_host_reachable(&self) -> bool {
    self.record().is_confirmed_reachable()
  }

  fn check_now(&self) -> bool {
    self.check().accessible
  }
}

fn load_record(path: &Path) -> ReachabilityRecord {
  let Ok(raw) = fs::read_to_string(path) else {
    return ReachabilityRecord::default();
  };
  match serde_json::from_str(&raw) {
    Ok(r) => r,
    Err(e) => {
      tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable reachability state");
      ReachabilityRecord::default()
    }
  }
}

fn save_record(path: &Path, record: &ReachabilityRecord) -> anyhow::Result<()> {
  let raw = serde_json::to_string_pretty(record).context("serialize reachability state")?;
  write_atomic(path, &raw)
}

/// Drives periodic checks from a host loop.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityScheduler {
  next_due_unix_ms: Option<u64>,
}

impl ReachabilityScheduler {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn next_due_unix_ms(&self) -> Option<u64> {
    self.next_due_unix_ms
  }

  /// The first tick only schedules. Returns the record when a check ran.
  ///
  /// The period is `auto_redirect.check_interval_ms`.
  pub fn tick<P: Probe>(
    &mut self,
    cfg: &Config,
    monitor: &ReachabilityMonitor<P>,
    now_ms: u64,
  ) -> Option<ReachabilityRecord> {
    let interval_ms = cfg.auto_redirect.check_interval_ms.max(1);

    let Some(next_due) = self.next_due_unix_ms else {
      self.next_due_unix_ms = Some(now_ms.saturating_add(interval_ms));
      return None;
    };
    if now_ms < next_due {
      return None;
    }

    let record = monitor.check();
    self.next_due_unix_ms = Some(now_ms.saturating_add(interval_ms));
    Some(record)
  }
}


#[cfg(test)]
mod tests {
  use super::testing::ScriptedProbe;
  use super::*;

  fn fail() -> Result<(), String> {
    Err("timeout".to_string())
  }

  #[test]
  fn single_failure_after_success_keeps_signal() {
    let ok = apply_probe(&ReachabilityRecord::default(), &Ok(()), 2, 1);
    let once = apply_probe(&ok, &fail(), 2, 2);
    assert!(once.accessible);
    assert_eq!(once.consecutive_failures, 1);
    assert_eq!(once.last_error.as_deref(), Some("timeout"));

    let twice = apply_probe(&once, &fail(), 2, 3);
    assert!(!twice.accessible);
    assert_eq!(twice.consecutive_failures, 2);
  }

  #[test]
  fn success_resets_counter_and_restores_signal() {
    let down = ReachabilityRecord {
      accessible: false,
      consecutive_failures: 5,
      checked_at: Some(1),
      last_error: Some("x".to_string()),
    };
    let up = apply_probe(&down, &Ok(()), 2, 9);
    assert_eq!(
      up,
      ReachabilityRecord {
        accessible: true,
        consecutive_failures: 0,
        checked_at: Some(9),
        last_error: None,
      }
    );
  }

  #[test]
  fn failure_below_threshold_keeps_previous_unreachable_state() {
    let down = ReachabilityRecord {
      accessible: false,
      consecutive_failures: 0,
      checked_at: Some(1),
      last_error: None,
    };
    assert!(!apply_probe(&down, &fail(), 2, 2).accessible);
  }

  #[test]
  fn unprobed_record_is_not_confirmed() {
    let monitor = ReachabilityMonitor::new(ScriptedProbe::new(vec![Ok(())]), 2);
    assert!(!monitor.is_primary_host_reachable());
    assert!(monitor.check_now());
    assert!(monitor.is_primary_host_reachable());
  }

  #[test]
  fn state_file_round_trips() {
    let path = std::env::temp_dir()
      .join(format!("mirror-core-test-{}", uuid::Uuid::new_v4()))
      .join("reachability.json");

    let monitor = ReachabilityMonitor::with_state_file(ScriptedProbe::new(vec![fail(), fail()]), 2, &path);
    monitor.check();
    monitor.check();

    let restored = ReachabilityMonitor::with_state_file(ScriptedProbe::default(), 2, &path);
    let record = restored.record();
    assert!(!record.accessible);
    assert_eq!(record.consecutive_failures, 2);

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("consecutiveFailures"));
  }

  #[test]
  fn scheduler_schedules_then_checks_when_due() {
    let cfg = Config::default();
    let monitor = ReachabilityMonitor::new(ScriptedProbe::new(vec![Ok(())]), 2);
    let mut sched = ReachabilityScheduler::new();

    assert!(sched.tick(&cfg, &monitor, 1_000).is_none());
    assert_eq!(sched.next_due_unix_ms(), Some(301_000));
    assert!(sched.tick(&cfg, &monitor, 300_999).is_none());
    assert_eq!(*monitor.probe.calls.borrow(), 0);

    let record = sched.tick(&cfg, &monitor, 301_000).unwrap();
    assert!(record.accessible);
    assert_eq!(sched.next_due_unix_ms(), Some(601_000));
  }

  #[test]
  fn scheduler_follows_configured_check_interval() {
    let cfg = crate::config::from_json_str(r#"{"autoRedirect": {"checkInterval": 60000}}"#).unwrap();
    let monitor = ReachabilityMonitor::new(ScriptedProbe::new(vec![Ok(()), Ok(())]), 2);
    let mut sched = ReachabilityScheduler::new();

    assert!(sched.tick(&cfg, &monitor, 0).is_none());
    assert_eq!(sched.next_due_unix_ms(), Some(60_000));
    assert!(sched.tick(&cfg, &monitor, 60_000).is_some());
    assert_eq!(sched.next_due_unix_ms(), Some(120_000));
    assert_eq!(*monitor.probe.calls.borrow(), 1);
  }
}
