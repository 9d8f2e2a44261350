//! Download attempts through a browser tab.
//!
//! Each attempt is a small state machine. It starts `Pending` and resolves
//! exactly once, on whichever trigger fires first:
//!
//! - the tab reaches a URL the heuristic classifies as a failure page
//! - the grace period passes without such a URL (treated as a started download)
//! - the total timeout passes (measured from before the tab was opened)
//!
//! The tab is closed on every failure path by [`TabGuard`]'s `Drop`.

use super::{run_chain, ChainError, ChainSuccess, EndpointError};
use crate::config::DownloadConfig;
use crate::types::CandidateEndpoint;
use anyhow::Context;
use regex::RegexSet;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

pub type TabId = u64;

pub trait TabNavigator {
  fn open_tab(&self, url: &str) -> Result<TabId, EndpointError>;

  /// URL changes of `tab`. The channel disconnects when observation ends.
  fn observe_tab(&self, tab: TabId) -> Receiver<String>;

  fn close_tab(&self, tab: TabId);

  /// True when tabs are only simulated, so a resolved attempt starts nothing.
  fn is_dry_run(&self) -> bool {
    false
  }
}

/// Decides whether a navigated URL proves the attempt failed.
pub trait NavigationHeuristic {
  fn is_failure_page(&self, url: &str) -> bool;
}

pub struct DenyListHeuristic {
  patterns: RegexSet,
}

impl DenyListHeuristic {
  pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Ok(Self {
      patterns: RegexSet::new(patterns)?,
    })
  }

  pub fn from_config(cfg: &DownloadConfig) -> anyhow::Result<Self> {
    Self::new(&cfg.failure_patterns).context("compile download failure patterns")
  }
}

impl NavigationHeuristic for DenyListHeuristic {
  fn is_failure_page(&self, url: &str) -> bool {
    self.patterns.is_match(url)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationTimeouts {
  pub grace: Duration,
  pub total: Duration,
}

impl NavigationTimeouts {
  pub fn from_config(cfg: &DownloadConfig) -> Self {
    Self {
      grace: Duration::from_millis(cfg.grace_ms),
      total: Duration::from_millis(cfg.total_timeout_ms),
    }
  }
}

impl Default for NavigationTimeouts {
  fn default() -> Self {
    Self::from_config(&DownloadConfig::default())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
  FailureObserved(String),
  GraceElapsed,
  TotalElapsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
  Pending,
  Succeeded,
  Failed(EndpointError),
}

impl AttemptState {
  pub fn is_pending(&self) -> bool {
    matches!(self, AttemptState::Pending)
  }

  /// Returns false when the attempt was already resolved.
  pub fn resolve(&mut self, trigger: Trigger) -> bool {
    if !self.is_pending() {
      return false;
    }
    *self = match trigger {
      Trigger::FailureObserved(url) => AttemptState::Failed(EndpointError::FailurePage(url)),
      Trigger::GraceElapsed => AttemptState::Succeeded,
      Trigger::TotalElapsed => AttemptState::Failed(EndpointError::Timeout),
    };
    true
  }
}

/// Closes the tab on drop unless [`TabGuard::keep`] was called.
pub struct TabGuard<'a> {
  navigator: &'a dyn TabNavigator,
  tab: Option<TabId>,
}

impl<'a> TabGuard<'a> {
  pub fn new(navigator: &'a dyn TabNavigator, tab: TabId) -> Self {
    Self {
      navigator,
      tab: Some(tab),
    }
  }

  pub fn keep(mut self) -> Option<TabId> {
    self.tab.take()
  }

  pub fn close(&mut self) {
    if let Some(tab) = self.tab.take() {
      self.navigator.close_tab(tab);
    }
  }
}

impl Drop for TabGuard<'_> {
  fn drop(&mut self) {
    self.close();
  }
}

/// Opens `candidate` and waits for the attempt to resolve.
pub fn attempt_navigation(
  navigator: &dyn TabNavigator,
  heuristic: &dyn NavigationHeuristic,
  candidate: &CandidateEndpoint,
  timeouts: NavigationTimeouts,
) -> Result<TabId, EndpointError> {
  let total_deadline = Instant::now() + timeouts.total;

  let tab = navigator.open_tab(&candidate.url)?;
  let mut guard = TabGuard::new(navigator, tab);
  let events = navigator.observe_tab(tab);
  let grace_deadline = Instant::now() + timeouts.grace;

  let mut state = AttemptState::Pending;
  let mut observing = true;

  while state.is_pending() {
    let now = Instant::now();
    if now >= total_deadline {
      state.resolve(Trigger::TotalElapsed);
      continue;
    }
    if now >= grace_deadline {
      state.resolve(Trigger::GraceElapsed);
      continue;
    }

    let wait = grace_deadline.min(total_deadline) - now;
    if !observing {
      std::thread::sleep(wait);
      continue;
    }

    match events.recv_timeout(wait) {
      Ok(url) => {
        tracing::debug!(tab, url = %url, "tab navigated");
        if heuristic.is_failure_page(&url) {
          state.resolve(Trigger::FailureObserved(url));
        }
      }
      Err(RecvTimeoutError::Timeout) => {}
      Err(RecvTimeoutError::Disconnected) => observing = false,
    }
  }

  match state {
    AttemptState::Succeeded => {
      guard.keep();
      Ok(tab)
    }
    AttemptState::Failed(e) => {
      guard.close();
      Err(e)
    }
    AttemptState::Pending => Err(EndpointError::Timeout),
  }
}

pub fn run_download_chain(
  navigator: &dyn TabNavigator,
  heuristic: &dyn NavigationHeuristic,
  candidates: &[CandidateEndpoint],
  timeouts: NavigationTimeouts,
  execution_id: &str,
) -> Result<ChainSuccess<TabId>, ChainError> {
  run_chain(execution_id, candidates, |candidate| {
    attempt_navigation(navigator, heuristic, candidate, timeouts)
  })
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::cell::{Cell, RefCell};
  use std::collections::HashMap;
  use std::sync::mpsc;

  #[derive(Clone)]
  pub enum Script {
    /// URL changes delivered after the given delays; the channel then closes.
    Navigate(Vec<(Duration, String)>),
    /// Opens but never reports anything; the channel stays open.
    Silent,
    SlowOpen(Duration),
    OpenFails,
  }

  #[derive(Default)]
  pub struct ScriptedNavigator {
    pub scripts: HashMap<String, Script>,
    pub opened: RefCell<Vec<String>>,
    pub closed: RefCell<Vec<TabId>>,
    dry_run: bool,
    next_id: Cell<TabId>,
    tab_urls: RefCell<HashMap<TabId, String>>,
    keepalive: RefCell<Vec<mpsc::Sender<String>>>,
  }

  impl ScriptedNavigator {
    pub fn script(mut self, url: &str, script: Script) -> Self {
      self.scripts.insert(url.to_string(), script);
      self
    }

    pub fn dry_run(mut self) -> Self {
      self.dry_run = true;
      self
    }

    fn script_for(&self, url: &str) -> Script {
      self.scripts.get(url).cloned().unwrap_or(Script::Silent)
    }
  }

  impl TabNavigator for ScriptedNavigator {
    fn open_tab(&self, url: &str) -> Result<TabId, EndpointError> {
      match self.script_for(url) {
        Script::OpenFails => return Err(EndpointError::OpenFailed("window closed".to_string())),
        Script::SlowOpen(d) => std::thread::sleep(d),
        _ => {}
      }
      let id = self.next_id.get() + 1;
      self.next_id.set(id);
      self.opened.borrow_mut().push(url.to_string());
      self.tab_urls.borrow_mut().insert(id, url.to_string());
      Ok(id)
    }

    fn observe_tab(&self, tab: TabId) -> Receiver<String> {
      let (tx, rx) = mpsc::channel();
      let url = self.tab_urls.borrow().get(&tab).cloned().unwrap_or_default();
      match self.script_for(&url) {
        Script::Navigate(events) => {
          std::thread::spawn(move || {
            for (delay, next) in events {
              std::thread::sleep(delay);
              if tx.send(next).is_err() {
                return;
              }
            }
          });
        }
        _ => self.keepalive.borrow_mut().push(tx),
      }
      rx
    }

    fn close_tab(&self, tab: TabId) {
      self.closed.borrow_mut().push(tab);
    }

    fn is_dry_run(&self) -> bool {
      self.dry_run
    }
  }
}
