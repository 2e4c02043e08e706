use crate::prelude::*;

/// `{% for a, b in seq reversed %}` ... `{% empty %}` ... `{% endfor %}`.
pub struct ForNode {
  id: NodeId,
  line: usize,
  loopvars: Vec<String>,
  sequence: FilterExpression,
  reversed: bool,
  nodelist_loop: NodeList,
  nodelist_empty: Option<NodeList>,
}

pub fn parse_for(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let bits = token.split_contents();
  if bits.len() < 4 {
    syntax_error!(
      "`for' statements should have at least four words: {}",
      token.contents
    );
  }
  let reversed = bits[bits.len() - 1] == "reversed";
  let in_index = if reversed { bits.len() - 3 } else { bits.len() - 2 };
  if bits[in_index] != "in" {
    syntax_error!(
      "`for' statements should use the format `for x in y': {}",
      token.contents
    );
  }
  let loopvars: Vec<String> = bits[1..in_index]
    .join(" ")
    .split(',')
    .map(|s| s.trim().to_string())
    .collect();
  for var in &loopvars {
    if var.is_empty() || !var.chars().all(|c| c.is_alphanumeric() || c == '_') {
      syntax_error!("`for' tag received an invalid argument: {}", token.contents);
    }
  }
  let sequence = parser.compile_filter(&bits[in_index + 1])?;
  let nodelist_loop = parser.parse(&["empty", "endfor"])?;
  let nodelist_empty = if parser.next_command().as_deref() == Some("empty") {
    parser.delete_first_token();
    let nl = parser.parse(&["endfor"])?;
    parser.delete_first_token();
    Some(nl)
  } else {
    parser.delete_first_token();
    None
  };
  Ok(Box::new(ForNode {
    id: NodeId::fresh(),
    line: token.line,
    loopvars,
    sequence,
    reversed,
    nodelist_loop,
    nodelist_empty,
  }))
}

impl ForNode {
  fn items(&self, context: &Context) -> Result<Vec<Value>> {
    // a sequence that fails to resolve loops zero times, silently
    Ok(match self.sequence.resolve_or_null(context)? {
      Value::List(l) => l,
      Value::Str { s, .. } => s.chars().map(|c| Value::str(c.to_string())).collect(),
      Value::Map(m) => m.keys().map(|k| Value::str(k.clone())).collect(),
      Value::Null => vec![],
      v => return Err(ErrorKind::NotIterable(v.typename()).into()),
    })
  }
}

impl Node for ForNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let mut items = self.items(context)?;
    if self.reversed {
      items.reverse();
    }
    let parentloop = match context.get("forloop") {
      Some(Value::Map(m)) => Value::Map(m.clone()),
      _ => Value::Map(Frame::new()),
    };
    context.scope(Frame::new(), |context| {
      if items.is_empty() {
        return match &self.nodelist_empty {
          Some(nl) => nl.render(context),
          None => Ok(String::new()),
        };
      }
      let len = items.len();
      // one forloop mapping per loop render; updated in place each
      // iteration so loop-scoped state stashed in it survives iterations
      let mut forloop = Frame::new();
      forloop.insert("parentloop".into(), parentloop.clone());
      context.set("forloop", Value::Map(forloop));
      let mut out = String::new();
      for (i, item) in items.drain(..).enumerate() {
        if let Some(Value::Map(loop_map)) = context.lookup_mut("forloop") {
          loop_map.insert("counter0".into(), Value::Int(i as i64));
          loop_map.insert("counter".into(), Value::Int(i as i64 + 1));
          loop_map.insert("revcounter".into(), Value::Int((len - i) as i64));
          loop_map.insert("revcounter0".into(), Value::Int((len - i - 1) as i64));
          loop_map.insert("first".into(), Value::Bool(i == 0));
          loop_map.insert("last".into(), Value::Bool(i == len - 1));
        }
        if self.loopvars.len() > 1 {
          let parts = match item {
            Value::List(l) => l,
            other => vec![other],
          };
          if parts.len() != self.loopvars.len() {
            return Err(
              ErrorKind::Unpack {
                expected: self.loopvars.len(),
                got: parts.len(),
              }
              .into(),
            );
          }
          // a private frame per iteration: unpacking never leaks into the
          // shared loop frame
          let mut unpacked = Frame::new();
          for (var, val) in self.loopvars.iter().zip(parts) {
            unpacked.insert(var.clone(), val);
          }
          out.push_str(&context.scope(unpacked, |c| self.nodelist_loop.render(c))?);
        } else {
          context.set(self.loopvars[0].clone(), item);
          out.push_str(&self.nodelist_loop.render(context)?);
        }
      }
      Ok(out)
    })
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::For
  }

  fn line(&self) -> usize {
    self.line
  }

  fn child_nodelists(&self) -> Vec<&NodeList> {
    let mut lists = vec![&self.nodelist_loop];
    if let Some(nl) = &self.nodelist_empty {
      lists.push(nl);
    }
    lists
  }
}
