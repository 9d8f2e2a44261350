//! Mirror URL rewriting.
//!
//! A mirror pattern is one of three grammars, tried in order:
//!
//! 1. `${url}.replace("search", "replacement")` (calls may be chained)
//! 2. `url.replace("search", "replacement")`
//! 3. a placeholder template using `${protocol}`, `${domain}`, `${path}`,
//!    `${url}` or `${url.replace(..)}` inside literal text
//!
//! Patterns are parsed, never evaluated. Search strings are literal text.

mod grammar;

use grammar::{Segment, BARE_RECEIVER, URL_TOKEN};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
  #[error("pattern is empty")]
  Empty,

  #[error("malformed pattern: {0}")]
  Malformed(String),

  #[error("replace call has an empty search string")]
  EmptySearch,

  #[error("unknown placeholder `${{{0}}}`")]
  UnknownPlaceholder(String),

  #[error("original URL cannot be parsed: {0}")]
  UnparsableUrl(String),

  #[error("template did not produce an absolute URL: {0}")]
  NotAUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
  TemplateReplace,
  MethodCall,
  Placeholder,
}

impl Grammar {
  /// Which grammar a pattern is routed to. Routing is by prefix only; the
  /// chosen grammar may still reject the pattern.
  pub fn detect(pattern: &str) -> Grammar {
    let trimmed = pattern.trim();
    if trimmed.starts_with(URL_TOKEN) && trimmed[URL_TOKEN.len()..].trim_start().starts_with(".replace") {
      Grammar::TemplateReplace
    } else if trimmed.starts_with(BARE_RECEIVER)
      && trimmed[BARE_RECEIVER.len()..].trim_start().starts_with(".replace")
    {
      Grammar::MethodCall
    } else {
      Grammar::Placeholder
    }
  }
}

/// Rewrites `original_url` with `pattern`, or `None` when the pattern does not apply.
pub fn rewrite(original_url: &str, pattern: &str) -> Option<String> {
  match try_rewrite(original_url, pattern) {
    Ok(out) => Some(out),
    Err(e) => {
      tracing::debug!(pattern = %pattern, error = %e, "mirror pattern not applicable");
      None
    }
  }
}

pub fn try_rewrite(original_url: &str, pattern: &str) -> Result<String, PatternError> {
  if pattern.trim().is_empty() {
    return Err(PatternError::Empty);
  }

  match Grammar::detect(pattern) {
    Grammar::TemplateReplace => {
      let calls = grammar::parse_method_call(pattern, URL_TOKEN)?;
      Ok(grammar::apply_all(&calls, original_url))
    }
    Grammar::MethodCall => {
      let calls = grammar::parse_method_call(pattern, BARE_RECEIVER)?;
      Ok(grammar::apply_all(&calls, original_url))
    }
    Grammar::Placeholder => render_template(original_url, pattern),
  }
}

fn render_template(original_url: &str, pattern: &str) -> Result<String, PatternError> {
  let segments = grammar::parse_template(pattern)?;
  let url = reqwest::Url::parse(original_url)
    .map_err(|e| PatternError::UnparsableUrl(format!("{original_url}: {e}")))?;

  let mut out = String::new();
  for seg in &segments {
    match seg {
      Segment::Literal(text) => out.push_str(text),
      Segment::Protocol => {
        out.push_str(url.scheme());
        out.push(':');
      }
      Segment::Domain => out.push_str(url.host_str().unwrap_or_default()),
      Segment::Path => out.push_str(url.path()),
      Segment::Url(calls) => out.push_str(&grammar::apply_all(calls, original_url)),
    }
  }

  if reqwest::Url::parse(&out).is_err() {
    return Err(PatternError::NotAUrl(out));
  }
  Ok(out)
}

/// Host a mirror pattern sends primary-host traffic to.
pub fn mirror_host(pattern: &str) -> Option<String> {
  let probe = "https://github.com/";
  let rewritten = rewrite(probe, pattern)?;
  if rewritten == probe {
    return None;
  }
  reqwest::Url::parse(&rewritten)
    .ok()?
    .host_str()
    .map(|h| h.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  const ASSET: &str = "https://github.com/o/r/releases/download/v1/f.zip";

  #[test]
  fn template_replace_swaps_host() {
    let out = rewrite(ASSET, r#"${url}.replace("github.com","kkgithub.com")"#);
    assert_eq!(
      out.as_deref(),
      Some("https://kkgithub.com/o/r/releases/download/v1/f.zip")
    );
  }

  #[test]
  fn replacement_is_global() {
    let url = "https://github.com/github.com/github.com";
    let out = rewrite(url, r#"${url}.replace('github.com', "x.y")"#).unwrap();
    assert_eq!(out, "https://x.y/x.y/x.y");
  }

  #[test]
  fn zero_occurrences_leave_url_unchanged() {
    let out = rewrite(ASSET, r#"${url}.replace("gitlab.com", "x")"#).unwrap();
    assert_eq!(out, ASSET);
  }

  #[test]
  fn search_is_literal_not_regex() {
    let url = "https://githubXcom/a";
    assert_eq!(
      rewrite(url, r#"url.replace("github.com", "m")"#).as_deref(),
      Some(url)
    );
    let url = "https://github.com/a(b)/c";
    assert_eq!(
      rewrite(url, r#"url.replace("(b)", "[b]")"#).as_deref(),
      Some("https://github.com/a[b]/c")
    );
  }

  #[test]
  fn bare_method_call() {
    let out = rewrite(ASSET, r#"url.replace("github.com", "bgithub.xyz")"#);
    assert_eq!(
      out.as_deref(),
      Some("https://bgithub.xyz/o/r/releases/download/v1/f.zip")
    );
  }

  #[test]
  fn placeholder_concatenates_exactly() {
    let out = rewrite("https://github.com/a/b", "https://mirror.${domain}${path}");
    assert_eq!(out.as_deref(), Some("https://mirror.github.com/a/b"));
  }

  #[test]
  fn protocol_keeps_trailing_colon() {
    let out = rewrite("https://github.com/a/b", "${protocol}//m.example${path}");
    assert_eq!(out.as_deref(), Some("https://m.example/a/b"));
  }

  #[test]
  fn interpolated_replace_call() {
    let out = rewrite(
      "https://github.com/microsoft/vscode/releases/download/1.80.0/VSCode-win32-x64.zip",
      r#"https://bgithub.xyz${url.replace("https://github.com", "")}"#,
    );
    assert_eq!(
      out.as_deref(),
      Some("https://bgithub.xyz/microsoft/vscode/releases/download/1.80.0/VSCode-win32-x64.zip")
    );
  }

  #[test]
  fn unrecognized_patterns_yield_none() {
    for url in [ASSET, "not a url", ""] {
      assert_eq!(rewrite(url, "not a valid pattern"), None);
    }
    assert_eq!(rewrite(ASSET, ""), None);
    assert_eq!(rewrite(ASSET, r#"${url}.replace("github.com")"#), None);
    assert_eq!(rewrite(ASSET, "https://${host}/x"), None);
  }

  #[test]
  fn placeholder_requires_parseable_original() {
    assert!(matches!(
      try_rewrite("::::", "https://m.${domain}/"),
      Err(PatternError::UnparsableUrl(_))
    ));
  }

  #[test]
  fn rewrite_is_idempotent_across_calls() {
    let p = r#"${url}.replace("github.com", "kkgithub.com")"#;
    assert_eq!(rewrite(ASSET, p), rewrite(ASSET, p));
  }

  #[test]
  fn grammar_detection_precedence() {
    assert_eq!(Grammar::detect(r#"${url}.replace("a","b")"#), Grammar::TemplateReplace);
    assert_eq!(Grammar::detect(r#"url.replace("a","b")"#), Grammar::MethodCall);
    assert_eq!(Grammar::detect("https://${domain}"), Grammar::Placeholder);
    assert_eq!(Grammar::detect("${url}"), Grammar::Placeholder);
  }

  #[test]
  fn mirror_host_from_pattern() {
    assert_eq!(
      mirror_host(r#"${url}.replace("github.com", "github.ur1.fun")"#).as_deref(),
      Some("github.ur1.fun")
    );
    assert_eq!(mirror_host("${url}"), None);
    assert_eq!(mirror_host("nonsense"), None);
  }
}
