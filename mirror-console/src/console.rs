use mirror_core::chain::{self, EndpointError, TabId, TabNavigator};
use mirror_core::config::Config;
use mirror_core::reachability::{HeadProbe, ReachabilityMonitor, ReachabilityScheduler, ReachabilitySource};
use mirror_core::service::FileConfigProvider;
use mirror_core::types::{now_unix_ms, RepoRef};
use mirror_core::{paths, redirect, service};
use serde::Serialize;
use std::cell::Cell;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

pub fn is_long_running(args: &[String]) -> bool {
  args.first().map(|a| a == "watch").unwrap_or(false)
}

pub fn run_console_command(cfg: &Config, base: &Path, args: &[String]) -> anyhow::Result<()> {
  if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
    print_help();
    return Ok(());
  }

  let tail = &args[1..];
  match args[0].as_str() {
    "releases" => run_releases(base, tail),
    "download" => run_download(cfg, base, tail),
    "rewrite" => run_rewrite(tail),
    "status" => run_status(cfg, base, tail),
    "redirect" => run_redirect(cfg, base, tail),
    "watch" => run_watch(cfg, base),
    "config" => run_config(cfg, base, tail),
    other => {
      eprintln!("Unknown command `{other}`.");
      print_help();
      Ok(())
    }
  }
}

fn run_releases(base: &Path, tail: &[String]) -> anyhow::Result<()> {
  let (owner, repo) = match tail {
    [page] => match RepoRef::from_page_url(page) {
      Some(r) => (r.owner, r.repo),
      None => anyhow::bail!("expected: releases <owner> <repo> | releases <repository-page-url>"),
    },
    [owner, repo, ..] => (owner.clone(), repo.clone()),
    [] => anyhow::bail!("expected: releases <owner> <repo> | releases <repository-page-url>"),
  };

  let provider = FileConfigProvider::new(paths::config_path(base));
  let cfg = service::ConfigProvider::mirror_config(&provider)?;
  let client = chain::ReqwestClient::new(&cfg.api)?;
  print_json(&service::fetch_releases(&provider, &client, &owner, &repo))
}

fn run_download(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<()> {
  let url = tail
    .first()
    .ok_or_else(|| anyhow::anyhow!("expected: download <asset-url>"))?;

  if let Ok(valid) = chain::validate_download_url(url) {
    print_json(&chain::download_candidates(cfg, &valid))?;
  }

  let provider = FileConfigProvider::new(paths::config_path(base));
  let navigator = ReportingNavigator::default();
  print_json(&service::initiate_download(&provider, &navigator, url))
}

fn run_rewrite(tail: &[String]) -> anyhow::Result<()> {
  let [url, pattern, ..] = tail else {
    anyhow::bail!("expected: rewrite <url> <pattern>");
  };

  #[derive(Serialize)]
  struct RewriteOutput<'a> {
    original: &'a str,
    pattern: &'a str,
    rewritten: Option<String>,
  }

  print_json(&RewriteOutput {
    original: url,
    pattern,
    rewritten: service::rewrite_mirror_url(url, pattern),
  })
}

fn build_monitor(cfg: &Config, base: &Path) -> anyhow::Result<ReachabilityMonitor<HeadProbe>> {
  let probe = HeadProbe::new(&cfg.reachability, &cfg.api.user_agent)?;
  Ok(ReachabilityMonitor::with_state_file(
    probe,
    cfg.reachability.failure_threshold,
    &paths::reachability_state_path(base),
  ))
}

fn run_status(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<()> {
  let monitor = build_monitor(cfg, base)?;
  let record = if tail.iter().any(|a| a == "--recheck") {
    monitor.check()
  } else {
    monitor.record()
  };
  print_json(&record)
}

fn run_redirect(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<()> {
  let url = tail
    .first()
    .ok_or_else(|| anyhow::anyhow!("expected: redirect <page-url>"))?;
  let monitor = build_monitor(cfg, base)?;
  print_json(&redirect::plan_redirect(url, cfg, &monitor))
}

fn run_watch(cfg: &Config, base: &Path) -> anyhow::Result<()> {
  let monitor = build_monitor(cfg, base)?;
  let mut scheduler = ReachabilityScheduler::new();

  let (stop_tx, stop_rx) = mpsc::channel::<()>();
  ctrlc::set_handler(move || {
    let _ = stop_tx.send(());
  })?;

  tracing::info!(
    check_interval_ms = cfg.auto_redirect.check_interval_ms,
    "watching primary host reachability"
  );
  print_json(&monitor.check())?;
  scheduler.tick(cfg, &monitor, now_unix_ms());

  loop {
    match stop_rx.recv_timeout(Duration::from_millis(500)) {
      Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
      Err(RecvTimeoutError::Timeout) => {}
    }
    if let Some(record) = scheduler.tick(cfg, &monitor, now_unix_ms()) {
      print_json(&record)?;
    }
  }

  tracing::info!(reachable = monitor.is_primary_host_reachable(), "watch stopped");
  Ok(())
}

fn run_config(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<()> {
  match tail.first().map(|s| s.as_str()).unwrap_or("show") {
    "show" => print_json(cfg),
    "path" => {
      println!("{}", paths::config_path(base).display());
      Ok(())
    }
    _ => {
      eprintln!("Unknown `config` subcommand. Expected: show|path");
      Ok(())
    }
  }
}

/// Prints each tab it would open. Never observes anything, so the first
/// candidate resolves once the grace period passes. The response is marked
/// as a dry run with `initiated: false`.
#[derive(Default)]
struct ReportingNavigator {
  next_id: Cell<TabId>,
}

impl TabNavigator for ReportingNavigator {
  fn open_tab(&self, url: &str) -> Result<TabId, EndpointError> {
    let id = self.next_id.get() + 1;
    self.next_id.set(id);
    println!("open tab {id}: {url}");
    Ok(id)
  }

  fn observe_tab(&self, _tab: TabId) -> Receiver<String> {
    let (_tx, rx) = mpsc::channel();
    rx
  }

  fn close_tab(&self, tab: TabId) {
    println!("close tab {tab}");
  }

  fn is_dry_run(&self) -> bool {
    true
  }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn print_help() {
  println!("mirror-console v{}", env!("CARGO_PKG_VERSION"));
  println!("Commands:");
  println!("  releases <owner> <repo>");
  println!("  releases <repository-page-url>");
  println!("  download <asset-url> (dry run)");
  println!("  rewrite <url> <pattern>");
  println!("  status [--recheck]");
  println!("  redirect <page-url>");
  println!("  watch (until Ctrl-C)");
  println!("  config show|path");
  println!("  --version");
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reporting_navigator_marks_download_as_dry_run() {
    let mut cfg = Config::default();
    cfg.download.grace_ms = 20;
    cfg.download.total_timeout_ms = 100;

    let resp = service::initiate_download(&cfg, &ReportingNavigator::default(), "https://github.com/o/r/a.zip");
    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["initiated"], false);
    assert_eq!(json["dryRun"], true);
  }
}
