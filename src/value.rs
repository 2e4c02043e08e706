use crate::error::{ErrorKind, Result};
use std::{collections::BTreeMap, fmt::Debug};

/// A dynamically typed template value. Strings carry a `safe` bit instead of
/// being wrapped in a separate marker type; the bit travels with the string
/// through filters and decides whether autoescaping touches it on output.
#[derive(Clone)]
pub enum Value {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str { s: String, safe: bool },
  List(Vec<Value>),
  Map(BTreeMap<String, Value>),
}

impl Value {
  pub fn str<S: Into<String>>(s: S) -> Self {
    Value::Str {
      s: s.into(),
      safe: false,
    }
  }

  pub fn safe<S: Into<String>>(s: S) -> Self {
    Value::Str {
      s: s.into(),
      safe: true,
    }
  }

  pub fn typename(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Bool(_) => "bool",
      Value::Int(_) => "int",
      Value::Float(_) => "float",
      Value::Str { .. } => "string",
      Value::List(_) => "list",
      Value::Map(_) => "map",
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn is_safe(&self) -> bool {
    match self {
      Value::Str { safe, .. } => *safe,
      // non-string output never contains markup
      _ => true,
    }
  }

  /// Re-tag a string value as safe. Non-strings pass through untouched.
  pub fn mark_safe(self) -> Self {
    match self {
      Value::Str { s, .. } => Value::Str { s, safe: true },
      v => v,
    }
  }

  pub fn is_truthy(&self) -> bool {
    match self {
      Value::Null => false,
      Value::Bool(b) => *b,
      Value::Int(i) => *i != 0,
      Value::Float(f) => *f != 0.0,
      Value::Str { s, .. } => !s.is_empty(),
      Value::List(l) => !l.is_empty(),
      Value::Map(m) => !m.is_empty(),
    }
  }

  /// The raw textual form of a value, escaping nobody's business. Null
  /// renders as nothing at all.
  pub fn to_output_string(&self) -> String {
    match self {
      Value::Null => String::new(),
      Value::Bool(b) => if *b { "True" } else { "False" }.into(),
      Value::Int(i) => i.to_string(),
      Value::Float(f) => f.to_string(),
      Value::Str { s, .. } => s.clone(),
      Value::List(l) => {
        let items: Vec<String> = l.iter().map(|v| v.to_output_string()).collect();
        format!("[{}]", items.join(", "))
      }
      Value::Map(m) => {
        let items: Vec<String> = m
          .iter()
          .map(|(k, v)| format!("{}: {}", k, v.to_output_string()))
          .collect();
        format!("{{{}}}", items.join(", "))
      }
    }
  }

  /// Numeric coercion for arithmetic-ish tags (`widthratio`). Strings parse;
  /// everything else is a type error.
  pub fn as_number(&self) -> Result<f64> {
    match self {
      Value::Int(i) => Ok(*i as f64),
      Value::Float(f) => Ok(*f),
      Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
      Value::Str { s, .. } => s
        .trim()
        .parse::<f64>()
        .map_err(|_| ErrorKind::Filter(format!("`{}' is not a number", s)).into()),
      v => Err(ErrorKind::Filter(format!("{} is not a number", v.typename())).into()),
    }
  }

  /// Membership test backing the `in` operator: substring for strings, key
  /// for maps, element for lists.
  pub fn contains(&self, needle: &Value) -> bool {
    match self {
      Value::Str { s, .. } => match needle {
        Value::Str { s: n, .. } => s.contains(n.as_str()),
        _ => false,
      },
      Value::List(l) => l.iter().any(|v| v == needle),
      Value::Map(m) => match needle {
        Value::Str { s, .. } => m.contains_key(s),
        _ => false,
      },
      _ => false,
    }
  }
}

macro_rules! type_accessor {
  ($(#[$m:meta])? $shortname:ident, $longname:literal, $output:ty, $($lhs:pat => $rhs:expr),+) => {
    impl Value {
      paste::paste! {
        $(#[$m])?
        pub fn [< as_ $shortname >](&self) -> Result<$output> {
          match self {
            $($lhs => Ok($rhs),)+
            v => Err(
              ErrorKind::Filter(
                format!("unexpected type; expected {}, got {}", $longname, v.typename())
              ).into()
            ),
          }
        }
      }
    }
  };
}

type_accessor!(bool, "bool", bool, Value::Bool(b) => *b);
type_accessor!(int, "int", i64, Value::Int(i) => *i);
type_accessor!(str, "string", &str, Value::Str { s, .. } => s);
type_accessor!(list, "list", &[Value], Value::List(l) => l.as_slice());
type_accessor!(map, "map", &BTreeMap<String, Value>, Value::Map(m) => m);

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Int(a), Value::Int(b)) => a == b,
      (Value::Float(a), Value::Float(b)) => a == b,
      (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
      // the safe bit is presentation metadata, not part of the value
      (Value::Str { s: a, .. }, Value::Str { s: b, .. }) => a == b,
      (Value::List(a), Value::List(b)) => a == b,
      (Value::Map(a), Value::Map(b)) => a == b,
      _ => false,
    }
  }
}

impl PartialOrd for Value {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    match (self, other) {
      (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
      (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
      (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
      (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
      (Value::Str { s: a, .. }, Value::Str { s: b, .. }) => a.partial_cmp(b),
      (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
      (Value::List(a), Value::List(b)) => a.partial_cmp(b),
      _ => None,
    }
  }
}

impl Debug for Value {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::Null => f.write_str("null"),
      Value::Bool(b) => b.fmt(f),
      Value::Int(i) => i.fmt(f),
      Value::Float(x) => x.fmt(f),
      Value::Str { s, safe } => {
        if *safe {
          write!(f, "safe({:?})", s)
        } else {
          s.fmt(f)
        }
      }
      Value::List(l) => f.debug_list().entries(l).finish(),
      Value::Map(m) => f.debug_map().entries(m).finish(),
    }
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Value::Int(i)
  }
}

impl From<f64> for Value {
  fn from(f: f64) -> Self {
    Value::Float(f)
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::str(s)
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::str(s)
  }
}

impl From<Vec<Value>> for Value {
  fn from(l: Vec<Value>) -> Self {
    Value::List(l)
  }
}

impl From<BTreeMap<String, Value>> for Value {
  fn from(m: BTreeMap<String, Value>) -> Self {
    Value::Map(m)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn numeric_equality_crosses_int_and_float() {
    assert_eq!(Value::Int(1), Value::Float(1.0));
    assert_ne!(Value::Int(1), Value::Float(1.5));
  }

  #[test]
  fn safety_is_not_part_of_equality() {
    assert_eq!(Value::str("a"), Value::safe("a"));
  }

  #[test]
  fn truthiness() {
    assert!(!Value::Null.is_truthy());
    assert!(!Value::str("").is_truthy());
    assert!(Value::str("x").is_truthy());
    assert!(!Value::List(vec![]).is_truthy());
    assert!(Value::Int(-1).is_truthy());
  }

  #[test]
  fn contains() {
    assert!(Value::str("hello").contains(&Value::str("ell")));
    assert!(Value::List(vec![Value::Int(1), Value::Int(2)]).contains(&Value::Int(2)));
    let mut m = BTreeMap::new();
    m.insert("k".to_string(), Value::Int(1));
    assert!(Value::Map(m).contains(&Value::str("k")));
  }
}
