use super::PatternError;

pub(crate) const URL_TOKEN: &str = "${url}";
pub(crate) const BARE_RECEIVER: &str = "url";

/// One `.replace(<search>, <replacement>)` call with both arguments taken literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReplaceCall {
  pub search: String,
  pub replacement: String,
}

impl ReplaceCall {
  pub fn apply(&self, input: &str) -> String {
    input.replace(&self.search, &self.replacement)
  }
}

pub(crate) fn apply_all(calls: &[ReplaceCall], input: &str) -> String {
  calls
    .iter()
    .fold(input.to_string(), |acc, call| call.apply(&acc))
}

/// A piece of a placeholder template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
  Literal(String),
  Protocol,
  Domain,
  Path,
  Url(Vec<ReplaceCall>),
}

pub(crate) struct Cursor<'a> {
  src: &'a str,
  pos: usize,
}

impl<'a> Cursor<'a> {
  pub fn new(src: &'a str) -> Self {
    Self { src, pos: 0 }
  }

  pub fn rest(&self) -> &'a str {
    &self.src[self.pos..]
  }

  pub fn is_done(&self) -> bool {
    self.pos >= self.src.len()
  }

  fn peek(&self) -> Option<char> {
    self.rest().chars().next()
  }

  fn bump(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.pos += c.len_utf8();
    Some(c)
  }

  pub fn eat(&mut self, lit: &str) -> bool {
    if self.rest().starts_with(lit) {
      self.pos += lit.len();
      true
    } else {
      false
    }
  }

  fn skip_ws(&mut self) {
    while matches!(self.peek(), Some(c) if c.is_whitespace()) {
      self.bump();
    }
  }

  fn expect(&mut self, lit: &str) -> Result<(), PatternError> {
    self.skip_ws();
    if self.eat(lit) {
      Ok(())
    } else {
      Err(PatternError::Malformed(format!(
        "expected `{lit}` at offset {}",
        self.pos
      )))
    }
  }

  fn quoted(&mut self) -> Result<String, PatternError> {
    self.skip_ws();
    let quote = match self.bump() {
      Some(q @ ('"' | '\'')) => q,
      _ => {
        return Err(PatternError::Malformed(format!(
          "expected quoted string at offset {}",
          self.pos
        )))
      }
    };

    let mut out = String::new();
    loop {
      match self.bump() {
        None => return Err(PatternError::Malformed("unterminated string literal".to_string())),
        Some('\\') => match self.bump() {
          Some(escaped) => out.push(escaped),
          None => return Err(PatternError::Malformed("dangling escape".to_string())),
        },
        Some(c) if c == quote => return Ok(out),
        Some(c) => out.push(c),
      }
    }
  }

  /// Parses `.replace(a, b)` repeated one or more times.
  pub fn replace_chain(&mut self) -> Result<Vec<ReplaceCall>, PatternError> {
    let mut calls = Vec::new();
    loop {
      let before = self.pos;
      self.skip_ws();
      if !self.eat(".replace") {
        self.pos = before;
        break;
      }
      self.expect("(")?;
      let search = self.quoted()?;
      self.expect(",")?;
      let replacement = self.quoted()?;
      self.expect(")")?;

      if search.is_empty() {
        return Err(PatternError::EmptySearch);
      }
      calls.push(ReplaceCall {
        search,
        replacement,
      });
    }

    if calls.is_empty() {
      return Err(PatternError::Malformed("expected `.replace(..)`".to_string()));
    }
    Ok(calls)
  }
}

/// `<receiver><.replace(..)>+` spanning the whole pattern.
pub(crate) fn parse_method_call(pattern: &str, receiver: &str) -> Result<Vec<ReplaceCall>, PatternError> {
  let mut cur = Cursor::new(pattern.trim());
  if !cur.eat(receiver) {
    return Err(PatternError::Malformed(format!("pattern must start with `{receiver}`")));
  }
  let calls = cur.replace_chain()?;
  cur.skip_ws();
  if !cur.is_done() {
    return Err(PatternError::Malformed(format!(
      "unexpected trailing text `{}`",
      cur.rest()
    )));
  }
  Ok(calls)
}

pub(crate) fn parse_template(pattern: &str) -> Result<Vec<Segment>, PatternError> {
  let mut cur = Cursor::new(pattern);
  let mut segments = Vec::new();
  let mut literal = String::new();

  while !cur.is_done() {
    if !cur.eat("${") {
      if let Some(c) = cur.bump() {
        literal.push(c);
      }
      continue;
    }

    if !literal.is_empty() {
      segments.push(Segment::Literal(std::mem::take(&mut literal)));
    }

    let ident_len = cur
      .rest()
      .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
      .unwrap_or(cur.rest().len());
    let ident = &cur.rest()[..ident_len];
    cur.pos += ident_len;

    let segment = match ident {
      "protocol" => Segment::Protocol,
      "domain" => Segment::Domain,
      "path" => Segment::Path,
      "url" if cur.rest().starts_with('}') => Segment::Url(Vec::new()),
      "url" => Segment::Url(cur.replace_chain()?),
      other => return Err(PatternError::UnknownPlaceholder(other.to_string())),
    };
    cur.expect("}")?;
    segments.push(segment);
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }
  Ok(segments)
}
