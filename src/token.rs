//! The token stream handed to the compiler by the (external) lexer. This
//! crate never splits template text itself; it only consumes tokens.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
  Text,
  Var,
  Block,
  Comment,
}

#[derive(Clone, Debug)]
pub struct Token {
  pub kind: TokenKind,
  pub contents: String,
  pub line: usize,
}

impl Token {
  pub fn new<S: Into<String>>(kind: TokenKind, contents: S, line: usize) -> Self {
    Self {
      kind,
      contents: contents.into(),
      line,
    }
  }

  pub fn text<S: Into<String>>(contents: S, line: usize) -> Self {
    Self::new(TokenKind::Text, contents, line)
  }

  pub fn var<S: Into<String>>(contents: S, line: usize) -> Self {
    Self::new(TokenKind::Var, contents, line)
  }

  pub fn block<S: Into<String>>(contents: S, line: usize) -> Self {
    Self::new(TokenKind::Block, contents, line)
  }

  pub fn comment<S: Into<String>>(contents: S, line: usize) -> Self {
    Self::new(TokenKind::Comment, contents, line)
  }

  /// Split the tag contents on whitespace, keeping quoted runs (and
  /// `key="quoted value"` bits) together, quotes included.
  pub fn split_contents(&self) -> Vec<String> {
    smart_split(&self.contents)
  }
}

pub fn smart_split(s: &str) -> Vec<String> {
  let mut bits = vec![];
  let mut current = String::new();
  let mut quote: Option<char> = None;
  for c in s.chars() {
    match quote {
      Some(q) => {
        current.push(c);
        if c == q {
          quote = None;
        }
      }
      None => {
        if c == '"' || c == '\'' {
          quote = Some(c);
          current.push(c);
        } else if c.is_whitespace() {
          if !current.is_empty() {
            bits.push(std::mem::take(&mut current));
          }
        } else {
          current.push(c);
        }
      }
    }
  }
  if !current.is_empty() {
    bits.push(current);
  }
  bits
}

/// Strip one layer of matching quotes, if present.
pub fn unquote(bit: &str) -> Option<&str> {
  let mut chars = bit.chars();
  let first = chars.next()?;
  if (first == '"' || first == '\'') && bit.len() >= 2 && bit.ends_with(first) {
    Some(&bit[1..bit.len() - 1])
  } else {
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn split_keeps_quoted_runs() {
    assert_eq!(
      smart_split(r#"cycle "a b" 'c' as x"#),
      vec!["cycle", r#""a b""#, "'c'", "as", "x"]
    );
  }

  #[test]
  fn split_keeps_kwarg_quotes_attached() {
    assert_eq!(
      smart_split(r#"tag greeting="hello there" count=3"#),
      vec!["tag", r#"greeting="hello there""#, "count=3"]
    );
  }

  #[test]
  fn unquote_requires_matching_quotes() {
    assert_eq!(unquote(r#""x y""#), Some("x y"));
    assert_eq!(unquote("'x'"), Some("x"));
    assert_eq!(unquote(r#""x'"#), None);
    assert_eq!(unquote("x"), None);
  }
}
