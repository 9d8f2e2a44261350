use crate::chain::{DenyListHeuristic, NavigationHeuristic};
use crate::config::{Config, MirrorRule};
use crate::reachability::ReachabilitySource;
use crate::rewrite;
use crate::types::PRIMARY_HOST;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectReason {
  /// The page is a mirror's help or failure page.
  MirrorFailover,
  /// The primary host stayed unreachable after an on-demand recheck.
  PrimaryUnreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectPlan {
  pub from: String,
  pub to: String,
  pub mirror: String,
  pub reason: RedirectReason,
}

pub fn plan_redirect(
  page_url: &str,
  cfg: &Config,
  monitor: &dyn ReachabilitySource,
) -> Option<RedirectPlan> {
  if !cfg.auto_redirect.enabled {
    return None;
  }
  let url = reqwest::Url::parse(page_url).ok()?;

  let is_help_page = match DenyListHeuristic::new(&cfg.auto_redirect.help_page_patterns) {
    Ok(h) => h.is_failure_page(page_url),
    Err(e) => {
      tracing::warn!(error = %e, "help page patterns unusable; skipping failover check");
      false
    }
  };
  if is_help_page {
    return plan_failover(&url, cfg);
  }

  if url.host_str() != Some(PRIMARY_HOST) {
    return None;
  }
  if monitor.is_primary_host_reachable() {
    return None;
  }

  tracing::info!(url = %page_url, "primary host not confirmed reachable; rechecking");
  if monitor.check_now() {
    tracing::info!("recheck shows primary host reachable; no redirect");
    return None;
  }

  let preferred = cfg
    .mirror_named(&cfg.auto_redirect.preferred_mirror)
    .filter(|m| m.is_usable());
  let target = preferred
    .into_iter()
    .chain(cfg.enabled_mirrors())
    .find_map(|m| rewrite_changed(page_url, m).map(|to| (m, to)));

  let Some((mirror, to)) = target else {
    tracing::warn!("primary host unreachable but no usable mirror configured");
    return None;
  };

  tracing::info!(from = %page_url, to = %to, mirror = %mirror.name, "redirecting to mirror");
  Some(RedirectPlan {
    from: page_url.to_string(),
    to,
    mirror: mirror.name.clone(),
    reason: RedirectReason::PrimaryUnreachable,
  })
}

fn rewrite_changed(url: &str, mirror: &MirrorRule) -> Option<String> {
  rewrite::rewrite(url, &mirror.pattern).filter(|out| out != url)
}

fn plan_failover(url: &reqwest::Url, cfg: &Config) -> Option<RedirectPlan> {
  let page_host = url.host_str().unwrap_or_default();
  let failing = cfg.enabled_mirrors().find(|m| {
    rewrite::mirror_host(&m.pattern)
      .map(|host| page_host == host || page_host.ends_with(&format!(".{host}")))
      .unwrap_or(false)
  });

  let primary_url = primary_url_for(url);
  let target = cfg
    .enabled_mirrors()
    .filter(|m| failing.map_or(true, |f| f.name != m.name))
    .find_map(|m| rewrite_changed(&primary_url, m).map(|to| (m, to)));

  let Some((mirror, to)) = target else {
    tracing::warn!(url = %url, "mirror failure page but no alternative mirror available");
    return None;
  };

  tracing::info!(
    from = %url,
    to = %to,
    failed = %failing.map(|m| m.name.as_str()).unwrap_or("unknown"),
    mirror = %mirror.name,
    "failing over to alternative mirror"
  );
  Some(RedirectPlan {
    from: url.to_string(),
    to,
    mirror: mirror.name.clone(),
    reason: RedirectReason::MirrorFailover,
  })
}

/// Repository-looking paths are kept; anything else goes to the primary home page.
fn primary_url_for(url: &reqwest::Url) -> String {
  let segments = url
    .path_segments()
    .map(|s| s.filter(|p| !p.is_empty()).count())
    .unwrap_or(0);
  if segments < 2 {
    return format!("https://{PRIMARY_HOST}/");
  }
  match url.query() {
    Some(q) => format!("https://{PRIMARY_HOST}{}?{q}", url.path()),
    None => format!("https://{PRIMARY_HOST}{}", url.path()),
  }
}
