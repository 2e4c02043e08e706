use crate::{
  context::Context,
  error::{ErrorKind, Result},
  library::FilterSpec,
  token::unquote,
  value::Value,
};
use std::collections::HashMap;

/// A variable reference or literal, as found inside `{{ }}` or tag
/// arguments: `"text"`, `42`, `user.name`, `items.0`.
#[derive(Clone, Debug)]
pub struct Variable {
  source: VarSource,
  raw: String,
}

#[derive(Clone, Debug)]
enum VarSource {
  Literal(Value),
  Path(Vec<String>),
}

impl Variable {
  pub fn new(bit: &str) -> Result<Self> {
    if bit.is_empty() {
      syntax_error!("empty variable");
    }
    if let Some(text) = unquote(bit) {
      return Ok(Self {
        source: VarSource::Literal(Value::str(text)),
        raw: bit.into(),
      });
    }
    if bit.chars().next().map_or(false, |c| c.is_ascii_digit() || c == '-' || c == '.') {
      if let Ok(i) = bit.parse::<i64>() {
        return Ok(Self {
          source: VarSource::Literal(Value::Int(i)),
          raw: bit.into(),
        });
      }
      if let Ok(f) = bit.parse::<f64>() {
        return Ok(Self {
          source: VarSource::Literal(Value::Float(f)),
          raw: bit.into(),
        });
      }
      syntax_error!("could not parse the remainder: `{}'", bit);
    }
    let path: Vec<String> = bit.split('.').map(str::to_string).collect();
    for seg in &path {
      if seg.is_empty() || !seg.chars().all(|c| c.is_alphanumeric() || c == '_') {
        syntax_error!("variables and attributes may not be empty or contain punctuation: `{}'", bit);
      }
    }
    Ok(Self {
      source: VarSource::Path(path),
      raw: bit.into(),
    })
  }

  pub fn raw(&self) -> &str {
    &self.raw
  }

  /// Resolve against the context. Missing names and dead-end path segments
  /// are `VariableDoesNotExist`; callers pick their own recovery policy.
  pub fn resolve(&self, context: &Context) -> Result<Value> {
    let path = match &self.source {
      VarSource::Literal(v) => return Ok(v.clone()),
      VarSource::Path(p) => p,
    };
    let mut current = match context.get(&path[0]) {
      Some(v) => v.clone(),
      None => {
        return Err(
          ErrorKind::VariableDoesNotExist {
            key: path[0].clone(),
            container: "context".into(),
          }
          .into(),
        )
      }
    };
    for seg in &path[1..] {
      current = lookup_segment(&current, seg)?;
    }
    Ok(current)
  }
}

fn lookup_segment(value: &Value, seg: &str) -> Result<Value> {
  let missing = || -> crate::error::Error {
    ErrorKind::VariableDoesNotExist {
      key: seg.to_string(),
      container: value.typename().to_string(),
    }
    .into()
  };
  match value {
    Value::Map(m) => m.get(seg).cloned().ok_or_else(missing),
    Value::List(l) => match seg {
      "first" => l.first().cloned().ok_or_else(missing),
      "last" => l.last().cloned().ok_or_else(missing),
      _ => match seg.parse::<usize>() {
        Ok(i) => l.get(i).cloned().ok_or_else(missing),
        Err(_) => Err(missing()),
      },
    },
    _ => Err(missing()),
  }
}

#[derive(Clone, Debug)]
pub enum FilterArg {
  Literal(Value),
  Var(Variable),
}

#[derive(Clone)]
pub struct BoundFilter {
  pub name: String,
  pub spec: FilterSpec,
  pub arg: Option<FilterArg>,
}

/// A compiled `var|filter:arg|filter` chain. Filters were looked up at
/// compile time; resolution applies them left to right.
#[derive(Clone)]
pub struct FilterExpression {
  pub var: Variable,
  filters: Vec<BoundFilter>,
  raw: String,
}

impl std::fmt::Debug for FilterExpression {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "FilterExpression({:?})", self.raw)
  }
}

impl FilterExpression {
  pub fn new(raw: &str, filters: &HashMap<String, FilterSpec>) -> Result<Self> {
    let mut parts = split_outside_quotes(raw, '|');
    if parts.is_empty() {
      syntax_error!("empty filter expression");
    }
    let var = Variable::new(parts.remove(0).trim())?;
    let mut bound = vec![];
    for part in parts {
      let part = part.trim();
      let (name, arg_text) = match find_outside_quotes(part, ':') {
        Some(i) => (&part[..i], Some(&part[i + 1..])),
        None => (part, None),
      };
      let spec = filters
        .get(name)
        .cloned()
        .ok_or_else(|| ErrorKind::UnknownFilter(name.to_string()))?;
      let arg = match arg_text {
        None => None,
        Some(text) => Some(match unquote(text) {
          Some(s) => FilterArg::Literal(Value::str(s)),
          None => {
            let v = Variable::new(text)?;
            // literal numbers stay literal; anything else resolves at render
            FilterArg::Var(v)
          }
        }),
      };
      bound.push(BoundFilter {
        name: name.to_string(),
        spec,
        arg,
      });
    }
    Ok(Self {
      var,
      filters: bound,
      raw: raw.to_string(),
    })
  }

  pub fn raw(&self) -> &str {
    &self.raw
  }

  pub fn filter_names(&self) -> impl Iterator<Item = &str> {
    self.filters.iter().map(|f| f.name.as_str())
  }

  /// Resolve, turning a missing variable into the engine's configured
  /// invalid placeholder. With the default empty placeholder the empty
  /// string still flows through the filter chain, so `ghost|default:x`
  /// produces `x`; a non-empty placeholder short-circuits the filters.
  /// Filter-internal errors always propagate.
  pub fn resolve(&self, context: &Context) -> Result<Value> {
    match self.var.resolve(context) {
      Ok(v) => self.apply_filters(v, context),
      Err(e) => match e.kind {
        ErrorKind::VariableDoesNotExist { .. } => {
          debug!("exception while resolving variable `{}': {}", self.var.raw(), e);
          let placeholder = context.string_if_invalid();
          if placeholder.is_empty() {
            self.apply_filters(Value::str(""), context)
          } else {
            Ok(Value::str(placeholder.replace("%s", self.var.raw())))
          }
        }
        _ => Err(e),
      },
    }
  }

  /// Resolve with failures ignored entirely: a missing variable becomes
  /// null, with no placeholder, and the filters run over the null. `if`
  /// conditions and `for` sequences want this shape.
  pub fn resolve_or_null(&self, context: &Context) -> Result<Value> {
    match self.var.resolve(context) {
      Ok(v) => self.apply_filters(v, context),
      Err(e) => match e.kind {
        ErrorKind::VariableDoesNotExist { .. } => self.apply_filters(Value::Null, context),
        _ => Err(e),
      },
    }
  }

  fn apply_filters(&self, mut value: Value, context: &Context) -> Result<Value> {
    for filter in &self.filters {
      let arg = match &filter.arg {
        None => None,
        Some(FilterArg::Literal(v)) => Some(v.clone()),
        Some(FilterArg::Var(var)) => Some(var.resolve(context)?),
      };
      let input_safe = matches!(value, Value::Str { safe: true, .. });
      // only filters that declare an interest see the live autoescape flag
      let autoescape = filter.spec.flags.needs_autoescape && context.autoescape;
      let mut out = (filter.spec.fun)(value, arg, autoescape)?;
      if filter.spec.flags.is_safe && input_safe {
        out = out.mark_safe();
      }
      value = out;
    }
    Ok(value)
  }
}

fn split_outside_quotes(s: &str, sep: char) -> Vec<&str> {
  let mut parts = vec![];
  let mut quote: Option<char> = None;
  let mut start = 0;
  for (i, c) in s.char_indices() {
    match quote {
      Some(q) if c == q => quote = None,
      Some(_) => {}
      None if c == '"' || c == '\'' => quote = Some(c),
      None if c == sep => {
        parts.push(&s[start..i]);
        start = i + sep.len_utf8();
      }
      None => {}
    }
  }
  parts.push(&s[start..]);
  parts
}

fn find_outside_quotes(s: &str, target: char) -> Option<usize> {
  let mut quote: Option<char> = None;
  for (i, c) in s.char_indices() {
    match quote {
      Some(q) if c == q => quote = None,
      Some(_) => {}
      None if c == '"' || c == '\'' => quote = Some(c),
      None if c == target => return Some(i),
      None => {}
    }
  }
  None
}
