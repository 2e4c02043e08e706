use crate::parser::NamedCycle;
use crate::prelude::*;
use crate::scratch::ScratchValue;

/// `{% cycle %}`: emits the next value of a rotating sequence each time it
/// renders. The rotation position lives in render scratch under this node's
/// id; a named cycle and its later bare-name references share one id, so
/// every mention advances the same position.
pub struct CycleNode {
  id: NodeId,
  line: usize,
  exprs: Arc<Vec<FilterExpression>>,
  variable_name: Option<String>,
  silent: bool,
}

pub fn parse_cycle(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let bits = token.split_contents();
  if bits.len() < 2 {
    syntax_error!("`cycle' tag requires at least two arguments");
  }

  // a single unquoted argument names a previously defined cycle
  if bits.len() == 2 && !bits[1].contains('"') && !bits[1].contains('\'') {
    let name = &bits[1];
    let cycle = match parser.named_cycles.get(name) {
      Some(c) => c,
      None => syntax_error!("no named cycles in template. `{}' is not defined", name),
    };
    return Ok(Box::new(CycleNode {
      id: cycle.id,
      line: token.line,
      exprs: Arc::clone(&cycle.exprs),
      variable_name: Some(name.clone()),
      silent: cycle.silent,
    }));
  }

  let (arg_end, variable_name, silent) = if bits.len() > 5
    && bits[bits.len() - 3] == "as"
    && bits[bits.len() - 1] == "silent"
  {
    (bits.len() - 3, Some(bits[bits.len() - 2].clone()), true)
  } else if bits.len() > 4 && bits[bits.len() - 2] == "as" {
    (bits.len() - 2, Some(bits[bits.len() - 1].clone()), false)
  } else {
    (bits.len(), None, false)
  };

  let exprs = bits[1..arg_end]
    .iter()
    .map(|b| parser.compile_filter(b))
    .collect::<Result<Vec<_>>>()?;
  let exprs = Arc::new(exprs);
  let id = NodeId::fresh();

  if let Some(name) = &variable_name {
    let cycle = NamedCycle {
      id,
      exprs: Arc::clone(&exprs),
      silent,
    };
    parser.named_cycles.insert(name.clone(), cycle.clone());
    parser.last_cycle = Some(cycle);
  }

  Ok(Box::new(CycleNode {
    id,
    line: token.line,
    exprs,
    variable_name,
    silent,
  }))
}

impl Node for CycleNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let pos = match context.render_context.get(self.id) {
      Some(ScratchValue::Cycle(p)) => *p,
      _ => 0,
    };
    context
      .render_context
      .insert(self.id, ScratchValue::Cycle(pos + 1));
    let value = self.exprs[pos % self.exprs.len()].resolve(context)?;
    if let Some(name) = &self.variable_name {
      // reachable from inner scopes that reference the cycle by name
      context.set_upward(name.clone(), value.clone());
    }
    if self.silent {
      return Ok(String::new());
    }
    Ok(render_value(&value, context.autoescape))
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Cycle
  }

  fn line(&self) -> usize {
    self.line
  }
}

/// `{% resetcycle [name] %}`: rewinds a cycle to its first value. Without an
/// argument the most recently defined named cycle is reset.
pub struct ResetCycleNode {
  id: NodeId,
  line: usize,
  target: NodeId,
}

pub fn parse_resetcycle(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let bits = token.split_contents();
  if bits.len() > 2 {
    syntax_error!("`resetcycle' tag accepts at most one argument");
  }
  let target = if bits.len() == 2 {
    match parser.named_cycles.get(&bits[1]) {
      Some(c) => c.id,
      None => syntax_error!("named cycle `{}' does not exist", bits[1]),
    }
  } else {
    match &parser.last_cycle {
      Some(l) => l.id,
      None => syntax_error!("no cycles in template"),
    }
  };
  Ok(Box::new(ResetCycleNode {
    id: NodeId::fresh(),
    line: token.line,
    target,
  }))
}

impl Node for ResetCycleNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    context
      .render_context
      .insert(self.target, ScratchValue::Cycle(0));
    Ok(String::new())
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::ResetCycle
  }

  fn line(&self) -> usize {
    self.line
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::Engine;
  use crate::engine::Template;
  use assert_matches::assert_matches;

  fn compile(tokens: &[Token]) -> Result<Arc<Template>> {
    Engine::shared().add_template("test", tokens.to_vec())
  }

  fn render(tokens: &[Token]) -> Result<String> {
    compile(tokens)?.render(&mut Context::new())
  }

  #[test]
  fn unnamed_cycles_do_not_share_rotation() {
    // each unnamed node owns its state; only the `as` form is shared
    let tokens: Vec<Token> = (0..4).map(|_| Token::block("cycle \"a\" \"b\" \"c\"", 1)).collect();
    assert_eq!(render(&tokens).unwrap(), "aaaa");
  }

  #[test]
  fn fresh_context_restarts_rotation() {
    let t = compile(&[Token::block("cycle \"x\" \"y\"", 1)]).unwrap();
    assert_eq!(t.render(&mut Context::new()).unwrap(), "x");
    // scratch state lives in the context, not the template
    assert_eq!(t.render(&mut Context::new()).unwrap(), "x");
  }

  #[test]
  fn named_cycle_shares_state_with_references() {
    let tokens = [
      Token::block("cycle \"a\" \"b\" \"c\" as row", 1),
      Token::block("cycle row", 1),
      Token::block("cycle row", 1),
      Token::block("cycle row", 1),
    ];
    assert_eq!(render(&tokens).unwrap(), "abca");
  }

  #[test]
  fn named_cycle_exposes_current_value() {
    let tokens = [
      Token::block("cycle \"a\" \"b\" as row silent", 1),
      Token::var("row", 1),
      Token::var("row", 1),
    ];
    assert_eq!(render(&tokens).unwrap(), "aa");
  }

  #[test]
  fn silent_is_inherited_by_bare_references() {
    let tokens = [
      Token::block("cycle \"a\" \"b\" as row silent", 1),
      Token::block("cycle row", 1),
      Token::var("row", 1),
    ];
    assert_eq!(render(&tokens).unwrap(), "b");
  }

  #[test]
  fn resetcycle_rewinds_named_cycle() {
    let tokens = [
      Token::block("cycle \"a\" \"b\" \"c\" as row", 1),
      Token::block("cycle row", 1),
      Token::block("resetcycle row", 1),
      Token::block("cycle row", 1),
    ];
    assert_eq!(render(&tokens).unwrap(), "aba");
  }

  #[test]
  fn resetcycle_defaults_to_last_named_cycle() {
    let tokens = [
      Token::block("cycle \"a\" \"b\" as row", 1),
      Token::block("resetcycle", 1),
      Token::block("cycle row", 1),
    ];
    assert_eq!(render(&tokens).unwrap(), "aa");
  }

  #[test]
  fn undefined_named_cycle_is_a_syntax_error() {
    let err = render(&[Token::block("cycle ghost", 1)]).unwrap_err();
    assert_matches!(
      err.kind,
      ErrorKind::TemplateSyntax(msg) if msg.contains("`ghost' is not defined")
    );
  }

  #[test]
  fn cycle_values_resolve_through_context() {
    // two distinct unnamed nodes, so both start at the first value
    let tokens = [
      Token::block("cycle one two", 2),
      Token::block("cycle one two", 2),
    ];
    let mut f = Frame::new();
    f.insert("one".into(), Value::Int(1));
    f.insert("two".into(), Value::Int(2));
    let out = compile(&tokens).unwrap().render(&mut Context::from_frame(f)).unwrap();
    assert_eq!(out, "11");
  }
}
