use crate::value::Value;

/// HTML-escape the five characters that can change markup meaning.
pub fn escape_html(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#x27;"),
      c => out.push(c),
    }
  }
  out
}

/// Escape a value's text unless the value is already marked safe.
pub fn conditional_escape(v: &Value) -> String {
  let text = v.to_output_string();
  if v.is_safe() {
    text
  } else {
    escape_html(&text)
  }
}

/// Turn a resolved value into node output, honoring the active autoescape
/// policy. This is the single spot where the safe bit meets the output.
pub fn render_value(v: &Value, autoescape: bool) -> String {
  if autoescape {
    conditional_escape(v)
  } else {
    v.to_output_string()
  }
}

/// Collapse runs of whitespace between adjacent tags, for `{% spaceless %}`.
/// Whitespace inside tags or text runs is left alone.
pub fn strip_spaces_between_tags(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let bytes = s.as_bytes();
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'>' {
      out.push('>');
      let mut j = i + 1;
      while j < bytes.len() && (bytes[j] as char).is_whitespace() {
        j += 1;
      }
      if j < bytes.len() && bytes[j] == b'<' {
        i = j;
        continue;
      }
      i += 1;
    } else {
      // multibyte chars never equal b'>', safe to walk bytewise
      let c = s[i..].chars().next().unwrap();
      out.push(c);
      i += c.len_utf8();
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn escapes_markup_chars() {
    assert_eq!(escape_html(r#"<b>&"'"#), "&lt;b&gt;&amp;&quot;&#x27;");
  }

  #[test]
  fn safe_values_skip_escaping() {
    assert_eq!(conditional_escape(&Value::safe("<b>")), "<b>");
    assert_eq!(conditional_escape(&Value::str("<b>")), "&lt;b&gt;");
  }

  #[test]
  fn spaceless_only_touches_gaps_between_tags() {
    assert_eq!(
      strip_spaces_between_tags("<p>\n  <a>x y</a>  </p>"),
      "<p><a>x y</a></p>"
    );
    assert_eq!(strip_spaces_between_tags("a > b < c"), "a > b < c");
  }
}
