//! The built-in filters. A deliberately small set: string case mapping, the
//! safety/escaping family, and the sequence helpers the built-in tags lean
//! on. Registries built here ride on the default library.

use crate::error::{ErrorKind, Result};
use crate::escape::conditional_escape;
use crate::library::{FilterFlags, Library};
use crate::value::Value;
use itertools::Itertools;
use std::sync::Arc;

pub fn register(lib: &mut Library) {
  lib.filter_with_flags(
    "lower",
    Arc::new(|value, _arg, _autoescape| Ok(Value::str(value.to_output_string().to_lowercase()))),
    FilterFlags::safe(),
  );

  // uppercasing can reveal characters that were previously escaped, so the
  // result is never trusted
  lib.filter(
    "upper",
    Arc::new(|value, _arg, _autoescape| Ok(Value::str(value.to_output_string().to_uppercase()))),
  );

  lib.filter(
    "default",
    Arc::new(|value, arg, _autoescape| {
      let fallback = arg.ok_or_else(|| ErrorKind::Filter("default requires 1 argument".into()))?;
      Ok(if value.is_truthy() { value } else { fallback })
    }),
  );

  lib.filter_with_flags(
    "safe",
    Arc::new(|value, _arg, _autoescape| Ok(value.mark_safe())),
    FilterFlags::safe(),
  );

  lib.filter_with_flags(
    "escape",
    Arc::new(|value, _arg, _autoescape| Ok(Value::safe(conditional_escape(&value)))),
    FilterFlags::safe(),
  );

  lib.filter_with_flags(
    "join",
    Arc::new(|value, arg, autoescape| {
      let items = match &value {
        Value::List(items) => items,
        // join of a non-list passes the value through untouched
        _ => return Ok(value),
      };
      let separator = match arg {
        Some(a) if autoescape => conditional_escape(&a),
        Some(a) => a.to_output_string(),
        None => String::new(),
      };
      let joined = items
        .iter()
        .map(|item| {
          if autoescape {
            conditional_escape(item)
          } else {
            item.to_output_string()
          }
        })
        .join(&separator);
      Ok(Value::safe(joined))
    }),
    FilterFlags {
      is_safe: true,
      needs_autoescape: true,
    },
  );

  lib.filter(
    "length",
    Arc::new(|value, _arg, _autoescape| {
      Ok(match &value {
        Value::List(items) => Value::Int(items.len() as i64),
        Value::Str { s, .. } => Value::Int(s.chars().count() as i64),
        Value::Map(m) => Value::Int(m.len() as i64),
        _ => Value::str(""),
      })
    }),
  );
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::{Context, Frame};
  use crate::engine::Engine;
  use crate::token::Token;

  fn render(template: &str, key: &str, value: Value) -> String {
    let t = Engine::shared()
      .add_template("test", vec![Token::var(template, 1)])
      .unwrap();
    let mut f = Frame::new();
    f.insert(key.to_string(), value);
    t.render(&mut Context::from_frame(f)).unwrap()
  }

  #[test]
  fn case_mapping() {
    assert_eq!(render("x|lower", "x", Value::str("HeLLo")), "hello");
    assert_eq!(render("x|upper", "x", Value::str("HeLLo")), "HELLO");
  }

  #[test]
  fn lower_preserves_safety_upper_does_not() {
    assert_eq!(render("x|lower", "x", Value::safe("<B>")), "<b>");
    assert_eq!(render("x|upper", "x", Value::safe("<b>")), "&lt;B&gt;");
  }

  #[test]
  fn default_replaces_falsy_values_only() {
    assert_eq!(render("x|default:\"n/a\"", "x", Value::str("")), "n/a");
    assert_eq!(render("x|default:\"n/a\"", "x", Value::Int(0)), "n/a");
    assert_eq!(render("x|default:\"n/a\"", "x", Value::Int(3)), "3");
  }

  #[test]
  fn default_covers_missing_variables_too() {
    // the variable is absent entirely; the empty fallback still runs
    // through the filter chain
    let t = Engine::shared()
      .add_template("test", vec![Token::var("ghost|default:\"n/a\"", 1)])
      .unwrap();
    assert_eq!(t.render(&mut Context::new()).unwrap(), "n/a");
  }

  #[test]
  fn safe_suppresses_escaping() {
    assert_eq!(render("x|safe", "x", Value::str("<b>")), "<b>");
  }

  #[test]
  fn escape_applies_once() {
    assert_eq!(render("x|escape", "x", Value::str("<b>")), "&lt;b&gt;");
    // already-safe input is not escaped again
    assert_eq!(render("x|escape", "x", Value::safe("&lt;b&gt;")), "&lt;b&gt;");
  }

  #[test]
  fn join_escapes_items_but_trusts_the_result() {
    let items = Value::List(vec![Value::str("<a>"), Value::safe("<b>")]);
    assert_eq!(render("x|join:\", \"", "x", items), "&lt;a&gt;, <b>");
  }

  #[test]
  fn join_of_non_list_passes_through() {
    assert_eq!(render("x|join:\",\"", "x", Value::Int(7)), "7");
  }

  #[test]
  fn length_counts_sequences() {
    assert_eq!(render("x|length", "x", Value::str("héllo")), "5");
    assert_eq!(
      render("x|length", "x", Value::List(vec![Value::Int(1), Value::Int(2)])),
      "2"
    );
    assert_eq!(render("x|length", "x", Value::Int(9)), "");
  }
}
