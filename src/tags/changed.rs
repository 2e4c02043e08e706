use crate::prelude::*;
use crate::scratch::ScratchValue;

/// `{% ifchanged %}`: renders its body only when the watched state differs
/// from the previous render of this same node. Inside a `{% for %}` the
/// last-seen state is kept on the loop's `forloop` mapping so nested loops
/// restart cleanly; outside a loop it lives in render scratch.
pub struct IfChangedNode {
  id: NodeId,
  line: usize,
  exprs: Vec<FilterExpression>,
  nodelist_true: NodeList,
  nodelist_false: NodeList,
}

pub fn parse_ifchanged(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let line = token.line;
  let bits = token.split_contents();
  let exprs = bits[1..]
    .iter()
    .map(|b| parser.compile_filter(b))
    .collect::<Result<Vec<_>>>()?;
  let nodelist_true = parser.parse(&["else", "endifchanged"])?;
  let token = match parser.next_token() {
    Some(t) => t,
    None => syntax_error!("unexpected end of template in `ifchanged' tag"),
  };
  let nodelist_false = if token.contents == "else" {
    let nl = parser.parse(&["endifchanged"])?;
    parser.delete_first_token();
    nl
  } else {
    NodeList::default()
  };
  Ok(Box::new(IfChangedNode {
    id: NodeId::fresh(),
    line,
    exprs,
    nodelist_true,
    nodelist_false,
  }))
}

impl IfChangedNode {
  fn state_key(&self) -> String {
    format!("_ifchanged_{:?}", self.id)
  }

  fn last_seen(&self, context: &Context) -> Option<Value> {
    if let Some(Value::Map(forloop)) = context.get("forloop") {
      return forloop.get(&self.state_key()).cloned();
    }
    match context.render_context.get(self.id) {
      Some(ScratchValue::Seen(v)) => Some(v.clone()),
      _ => None,
    }
  }

  fn remember(&self, context: &mut Context, state: Value) {
    if let Some(Value::Map(forloop)) = context.lookup_mut("forloop") {
      forloop.insert(self.state_key(), state);
      return;
    }
    context
      .render_context
      .insert(self.id, ScratchValue::Seen(state));
  }
}

impl Node for IfChangedNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let previous = self.last_seen(context);
    if self.exprs.is_empty() {
      // no arguments: compare the rendered body itself
      let output = self.nodelist_true.render(context)?;
      let state = Value::str(&output);
      if previous.as_ref() != Some(&state) {
        self.remember(context, state);
        return Ok(output);
      }
    } else {
      let watched = self
        .exprs
        .iter()
        .map(|e| e.resolve_or_null(context))
        .collect::<Result<Vec<_>>>()?;
      let state = Value::List(watched);
      if previous.as_ref() != Some(&state) {
        self.remember(context, state);
        return self.nodelist_true.render(context);
      }
    }
    self.nodelist_false.render(context)
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::IfChanged
  }

  fn line(&self) -> usize {
    self.line
  }

  fn child_nodelists(&self) -> Vec<&NodeList> {
    vec![&self.nodelist_true, &self.nodelist_false]
  }
}

/// `{% regroup items by attr as grouped %}`: buckets adjacent items sharing
/// an attribute value into `{grouper, list}` mappings. Input order is kept;
/// items must already be sorted for grouping to be total.
pub struct RegroupNode {
  id: NodeId,
  line: usize,
  target: FilterExpression,
  expression: FilterExpression,
  var_name: String,
}

pub fn parse_regroup(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let bits = token.split_contents();
  if bits.len() != 6 {
    syntax_error!("`regroup' tag takes five arguments");
  }
  if bits[2] != "by" {
    syntax_error!("second argument to `regroup' tag must be `by'");
  }
  if bits[4] != "as" {
    syntax_error!("next-to-last argument to `regroup' tag must be `as'");
  }
  let target = parser.compile_filter(&bits[1])?;
  let var_name = bits[5].clone();
  // resolve the grouping attribute against each item by rebinding the item
  // under the output name while evaluating
  let expression = parser.compile_filter(&format!("{}.{}", var_name, bits[3]))?;
  Ok(Box::new(RegroupNode {
    id: NodeId::fresh(),
    line: token.line,
    target,
    expression,
    var_name,
  }))
}

impl RegroupNode {
  fn group_key(&self, context: &mut Context, item: &Value) -> Result<Value> {
    context.set(self.var_name.clone(), item.clone());
    self.expression.resolve_or_null(context)
  }
}

impl Node for RegroupNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let items = match self.target.resolve_or_null(context)? {
      Value::List(items) => items,
      // missing input groups to nothing rather than failing the render
      _ => {
        context.set(self.var_name.clone(), Value::List(vec![]));
        return Ok(String::new());
      }
    };
    let mut groups: Vec<Value> = vec![];
    let mut current: Option<(Value, Vec<Value>)> = None;
    let result = context.scope(Frame::new(), |context| {
      for item in items {
        let key = self.group_key(context, &item)?;
        match &mut current {
          Some((grouper, members)) if *grouper == key => members.push(item),
          _ => {
            if let Some((grouper, members)) = current.take() {
              groups.push(group_value(grouper, members));
            }
            current = Some((key, vec![item]));
          }
        }
      }
      Ok(())
    });
    result?;
    if let Some((grouper, members)) = current.take() {
      groups.push(group_value(grouper, members));
    }
    context.set(self.var_name.clone(), Value::List(groups));
    Ok(String::new())
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Regroup
  }

  fn line(&self) -> usize {
    self.line
  }
}

fn group_value(grouper: Value, members: Vec<Value>) -> Value {
  let mut m = BTreeMap::new();
  m.insert("grouper".to_string(), grouper);
  m.insert("list".to_string(), Value::List(members));
  Value::Map(m)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::Engine;

  fn render(tokens: &[Token], data: Frame) -> Result<String> {
    let t = Engine::shared().add_template("test", tokens.to_vec())?;
    t.render(&mut Context::from_frame(data))
  }

  fn nums(values: &[i64]) -> Frame {
    let mut f = Frame::new();
    f.insert(
      "items".to_string(),
      Value::List(values.iter().map(|n| Value::Int(*n)).collect()),
    );
    f
  }

  #[test]
  fn renders_only_on_change() {
    let tokens = [
      Token::block("for x in items", 1),
      Token::block("ifchanged x", 1),
      Token::var("x", 1),
      Token::block("endifchanged", 1),
      Token::block("endfor", 1),
    ];
    assert_eq!(render(&tokens, nums(&[1, 1, 2, 2, 1])).unwrap(), "121");
  }

  #[test]
  fn else_branch_renders_when_unchanged() {
    let tokens = [
      Token::block("for x in items", 1),
      Token::block("ifchanged x", 1),
      Token::var("x", 1),
      Token::block("else", 1),
      Token::text("-", 1),
      Token::block("endifchanged", 1),
      Token::block("endfor", 1),
    ];
    assert_eq!(render(&tokens, nums(&[1, 1, 2])).unwrap(), "1-2");
  }

  #[test]
  fn bare_form_compares_rendered_body() {
    let tokens = [
      Token::block("for x in items", 1),
      Token::block("ifchanged", 1),
      Token::var("x", 1),
      Token::block("endifchanged", 1),
      Token::block("endfor", 1),
    ];
    assert_eq!(render(&tokens, nums(&[3, 3, 4])).unwrap(), "34");
  }

  #[test]
  fn state_resets_per_loop_run() {
    // the outer loop reruns the inner one; each run starts unchanged-free
    let tokens = [
      Token::block("for y in items", 1),
      Token::block("for x in items", 1),
      Token::block("ifchanged x", 1),
      Token::var("x", 1),
      Token::block("endifchanged", 1),
      Token::block("endfor", 1),
      Token::text("|", 1),
      Token::block("endfor", 1),
    ];
    assert_eq!(render(&tokens, nums(&[1, 1])).unwrap(), "1|1|");
  }

  fn person(name: &str, city: &str) -> Value {
    let mut m = BTreeMap::new();
    m.insert("name".to_string(), Value::str(name));
    m.insert("city".to_string(), Value::str(city));
    Value::Map(m)
  }

  #[test]
  fn regroup_buckets_adjacent_items() {
    let mut f = Frame::new();
    f.insert(
      "people".to_string(),
      Value::List(vec![
        person("ada", "london"),
        person("alan", "london"),
        person("grace", "nyc"),
      ]),
    );
    let tokens = [
      Token::block("regroup people by city as grouped", 1),
      Token::block("for g in grouped", 1),
      Token::var("g.grouper", 1),
      Token::text(":", 1),
      Token::block("for p in g.list", 1),
      Token::var("p.name", 1),
      Token::text(" ", 1),
      Token::block("endfor", 1),
      Token::block("endfor", 1),
    ];
    assert_eq!(render(&tokens, f).unwrap(), "london:ada alan nyc:grace ");
  }

  #[test]
  fn regroup_does_not_merge_nonadjacent_groups() {
    let mut f = Frame::new();
    f.insert(
      "people".to_string(),
      Value::List(vec![
        person("a", "x"),
        person("b", "y"),
        person("c", "x"),
      ]),
    );
    let tokens = [
      Token::block("regroup people by city as grouped", 1),
      Token::block("for g in grouped", 1),
      Token::var("g.grouper", 1),
      Token::block("endfor", 1),
    ];
    assert_eq!(render(&tokens, f).unwrap(), "xyx");
  }

  #[test]
  fn regroup_missing_input_yields_empty_list() {
    let tokens = [
      Token::block("regroup ghost by city as grouped", 1),
      Token::block("for g in grouped", 1),
      Token::text("x", 1),
      Token::block("endfor", 1),
    ];
    assert_eq!(render(&tokens, Frame::new()).unwrap(), "");
  }
}
