use crate::prelude::*;
use std::cmp::Ordering;

/// `{% if %}` / `{% elif %}` / `{% else %}` branches: an ordered list of
/// (condition, body) pairs where a missing condition means "else".
pub struct IfNode {
  id: NodeId,
  line: usize,
  branches: Vec<(Option<Condition>, NodeList)>,
}

#[derive(Debug)]
pub enum Condition {
  Expr(FilterExpression),
  Not(Box<Condition>),
  And(Box<Condition>, Box<Condition>),
  Or(Box<Condition>, Box<Condition>),
  Binary(CmpOp, Box<Condition>, Box<Condition>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpOp {
  Eq,
  Ne,
  Lt,
  Gt,
  Le,
  Ge,
  In,
  NotIn,
}

impl Condition {
  fn value(&self, context: &Context) -> Result<Value> {
    Ok(match self {
      Condition::Expr(e) => e.resolve_or_null(context)?,
      Condition::Not(c) => Value::Bool(!c.value(context)?.is_truthy()),
      Condition::And(a, b) => {
        Value::Bool(a.value(context)?.is_truthy() && b.value(context)?.is_truthy())
      }
      Condition::Or(a, b) => {
        Value::Bool(a.value(context)?.is_truthy() || b.value(context)?.is_truthy())
      }
      Condition::Binary(op, a, b) => {
        let lhs = a.value(context)?;
        let rhs = b.value(context)?;
        Value::Bool(match op {
          CmpOp::Eq => lhs == rhs,
          CmpOp::Ne => lhs != rhs,
          CmpOp::Lt => lhs.partial_cmp(&rhs) == Some(Ordering::Less),
          CmpOp::Gt => lhs.partial_cmp(&rhs) == Some(Ordering::Greater),
          CmpOp::Le => matches!(lhs.partial_cmp(&rhs), Some(Ordering::Less | Ordering::Equal)),
          CmpOp::Ge => matches!(lhs.partial_cmp(&rhs), Some(Ordering::Greater | Ordering::Equal)),
          CmpOp::In => rhs.contains(&lhs),
          CmpOp::NotIn => !rhs.contains(&lhs),
        })
      }
    })
  }

  /// Evaluate for branch selection. A condition whose variables fail to
  /// resolve is false, not an error; real failures (inside filters) still
  /// propagate.
  pub fn eval(&self, context: &Context) -> Result<bool> {
    match self.value(context) {
      Ok(v) => Ok(v.is_truthy()),
      Err(e) => match e.kind {
        ErrorKind::VariableDoesNotExist { .. } => Ok(false),
        _ => Err(e),
      },
    }
  }
}

// operator precedence, Django's table: `or' binds loosest
const PREC_OR: u8 = 6;
const PREC_AND: u8 = 7;
const PREC_NOT: u8 = 8;
const PREC_IN: u8 = 9;
const PREC_CMP: u8 = 10;

fn infix_precedence(bit: &str) -> Option<u8> {
  match bit {
    "or" => Some(PREC_OR),
    "and" => Some(PREC_AND),
    "in" | "not" => Some(PREC_IN),
    "==" | "!=" | "<" | ">" | "<=" | ">=" => Some(PREC_CMP),
    _ => None,
  }
}

struct CondParser<'a, 'p> {
  bits: &'a [String],
  pos: usize,
  parser: &'p Parser,
}

impl<'a, 'p> CondParser<'a, 'p> {
  fn peek(&self) -> Option<&str> {
    self.bits.get(self.pos).map(String::as_str)
  }

  fn next(&mut self) -> Option<&'a str> {
    let bit = self.bits.get(self.pos)?;
    self.pos += 1;
    Some(bit.as_str())
  }

  fn expression(&mut self, min_prec: u8) -> Result<Condition> {
    let bit = match self.next() {
      Some(b) => b,
      None => syntax_error!("unexpected end of `if' expression"),
    };
    let mut lhs = if bit == "not" {
      Condition::Not(Box::new(self.expression(PREC_NOT)?))
    } else if infix_precedence(bit).is_some() {
      syntax_error!("not expecting `{}' in this position in `if' tag", bit)
    } else {
      Condition::Expr(self.parser.compile_filter(bit)?)
    };
    while let Some(op) = self.peek() {
      let prec = match infix_precedence(op) {
        Some(p) => p,
        None => syntax_error!("unused `{}' at end of `if' expression", op),
      };
      if prec < min_prec {
        break;
      }
      let op = match self.next() {
        Some(o) => o.to_string(),
        None => break,
      };
      let op = if op == "not" {
        // infix `not' only exists as the `not in' pair
        match self.next() {
          Some("in") => "not in".to_string(),
          _ => syntax_error!("expected `in' after `not' in `if' tag"),
        }
      } else {
        op
      };
      let rhs = self.expression(prec + 1)?;
      lhs = match op.as_str() {
        "or" => Condition::Or(Box::new(lhs), Box::new(rhs)),
        "and" => Condition::And(Box::new(lhs), Box::new(rhs)),
        "in" => Condition::Binary(CmpOp::In, Box::new(lhs), Box::new(rhs)),
        "not in" => Condition::Binary(CmpOp::NotIn, Box::new(lhs), Box::new(rhs)),
        "==" => Condition::Binary(CmpOp::Eq, Box::new(lhs), Box::new(rhs)),
        "!=" => Condition::Binary(CmpOp::Ne, Box::new(lhs), Box::new(rhs)),
        "<" => Condition::Binary(CmpOp::Lt, Box::new(lhs), Box::new(rhs)),
        ">" => Condition::Binary(CmpOp::Gt, Box::new(lhs), Box::new(rhs)),
        "<=" => Condition::Binary(CmpOp::Le, Box::new(lhs), Box::new(rhs)),
        ">=" => Condition::Binary(CmpOp::Ge, Box::new(lhs), Box::new(rhs)),
        _ => unreachable!(),
      };
    }
    Ok(lhs)
  }
}

pub fn parse_condition(parser: &Parser, bits: &[String]) -> Result<Condition> {
  let mut p = CondParser {
    bits,
    pos: 0,
    parser,
  };
  let cond = p.expression(0)?;
  if p.pos != bits.len() {
    syntax_error!("unused `{}' at end of `if' expression", bits[p.pos]);
  }
  Ok(cond)
}

pub fn parse_if(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let line = token.line;
  let bits = token.split_contents();
  let mut branches = vec![];
  let mut condition = Some(parse_condition(parser, &bits[1..])?);
  loop {
    let nodelist = parser.parse(&["elif", "else", "endif"])?;
    branches.push((condition.take(), nodelist));
    let terminator = match parser.next_token() {
      Some(t) => t,
      None => syntax_error!("unexpected end of template in `if' tag"),
    };
    let bits = terminator.split_contents();
    match bits[0].as_str() {
      "elif" => condition = Some(parse_condition(parser, &bits[1..])?),
      "else" => {
        let nodelist = parser.parse(&["endif"])?;
        parser.delete_first_token();
        branches.push((None, nodelist));
        break;
      }
      _ => break, // endif
    }
  }
  Ok(Box::new(IfNode {
    id: NodeId::fresh(),
    line,
    branches,
  }))
}

impl Node for IfNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    for (condition, nodelist) in &self.branches {
      let matched = match condition {
        None => true,
        Some(c) => c.eval(context)?,
      };
      if matched {
        return nodelist.render(context);
      }
    }
    Ok(String::new())
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::If
  }

  fn line(&self) -> usize {
    self.line
  }

  fn child_nodelists(&self) -> Vec<&NodeList> {
    self.branches.iter().map(|(_, nl)| nl).collect()
  }
}

/// `{% firstof a b c "fallback" %}`: the first truthy argument, escaped
/// unless marked safe; nothing at all when none is truthy.
pub struct FirstOfNode {
  id: NodeId,
  line: usize,
  vars: Vec<FilterExpression>,
  asvar: Option<String>,
}

pub fn parse_firstof(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let mut bits = token.split_contents();
  bits.remove(0);
  if bits.is_empty() {
    syntax_error!("`firstof' statement requires at least one argument");
  }
  let mut asvar = None;
  if bits.len() >= 2 && bits[bits.len() - 2] == "as" {
    asvar = bits.pop();
    bits.pop();
  }
  let vars = bits
    .iter()
    .map(|b| parser.compile_filter(b))
    .collect::<Result<Vec<_>>>()?;
  Ok(Box::new(FirstOfNode {
    id: NodeId::fresh(),
    line: token.line,
    vars,
    asvar,
  }))
}

impl Node for FirstOfNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let mut first = Value::str("");
    for var in &self.vars {
      // failed candidates are skipped, not fatal
      let value = var.resolve_or_null(context)?;
      if value.is_truthy() {
        first = value;
        break;
      }
    }
    match &self.asvar {
      Some(name) => {
        context.set(name.clone(), first);
        Ok(String::new())
      }
      None => Ok(render_value(&first, context.autoescape)),
    }
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::FirstOf
  }

  fn line(&self) -> usize {
    self.line
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::Engine;
  use assert_matches::assert_matches;

  fn render(template: &[Token], data: Frame) -> Result<String> {
    let engine = Engine::shared();
    let t = engine.add_template("test", template.to_vec())?;
    let mut ctx = Context::from_frame(data);
    t.render(&mut ctx)
  }

  fn eval_cond(expr: &str, data: Frame) -> bool {
    let bits: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
    let parser = Parser::new(vec![], &Engine::shared());
    let cond = parse_condition(&parser, &bits).unwrap();
    cond.eval(&Context::from_frame(data)).unwrap()
  }

  fn frame(key: &str, value: Value) -> Frame {
    let mut f = Frame::new();
    f.insert(key.to_string(), value);
    f
  }

  #[test]
  fn boolean_operators_and_precedence() {
    // `or' binds looser than `and'
    assert!(eval_cond("true or false and false", Frame::new()));
    assert!(!eval_cond("not true or false", Frame::new()));
    assert!(eval_cond("not false", Frame::new()));
  }

  #[test]
  fn comparisons() {
    let f = frame("n", Value::Int(5));
    assert!(eval_cond("n == 5", f.clone()));
    assert!(eval_cond("n >= 5", f.clone()));
    assert!(!eval_cond("n < 5", f.clone()));
    assert!(eval_cond("n != 6", f));
  }

  #[test]
  fn membership() {
    let f = frame("xs", Value::List(vec![Value::Int(1), Value::Int(2)]));
    assert!(eval_cond("1 in xs", f.clone()));
    assert!(eval_cond("3 not in xs", f));
    assert!(eval_cond("\"ell\" in \"hello\"", Frame::new()));
  }

  #[test]
  fn unresolvable_condition_is_false_not_fatal() {
    assert!(!eval_cond("ghost", Frame::new()));
    assert!(eval_cond("ghost or true", Frame::new()));
  }

  #[test]
  fn filters_rescue_unresolvable_conditions() {
    // the null fallback still runs through the chain
    assert!(eval_cond("ghost|default:1", Frame::new()));
  }

  #[test]
  fn leading_operator_is_a_syntax_error() {
    let parser = Parser::new(vec![], &Engine::shared());
    let bits = vec!["or".to_string(), "x".to_string()];
    let err = parse_condition(&parser, &bits).unwrap_err();
    assert_matches!(err.kind, ErrorKind::TemplateSyntax(msg) if msg.contains("not expecting `or'"));
  }

  #[test]
  fn trailing_junk_is_a_syntax_error() {
    let parser = Parser::new(vec![], &Engine::shared());
    let bits: Vec<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
    let err = parse_condition(&parser, &bits).unwrap_err();
    assert_matches!(err.kind, ErrorKind::TemplateSyntax(msg) if msg.contains("unused `y'"));
  }

  #[test]
  fn first_matching_branch_wins() {
    let tokens = [
      Token::block("if n > 10", 1),
      Token::text("big", 1),
      Token::block("elif n > 5", 1),
      Token::text("medium", 1),
      Token::block("else", 1),
      Token::text("small", 1),
      Token::block("endif", 1),
    ];
    assert_eq!(render(&tokens, frame("n", Value::Int(20))).unwrap(), "big");
    assert_eq!(render(&tokens, frame("n", Value::Int(7))).unwrap(), "medium");
    assert_eq!(render(&tokens, frame("n", Value::Int(1))).unwrap(), "small");
  }

  #[test]
  fn no_match_and_no_else_renders_nothing() {
    let tokens = [
      Token::block("if missing", 1),
      Token::text("yes", 1),
      Token::block("endif", 1),
    ];
    assert_eq!(render(&tokens, Frame::new()).unwrap(), "");
  }

  #[test]
  fn firstof_takes_first_truthy() {
    let tokens = [Token::block("firstof a b \"fallback\"", 1)];
    assert_eq!(
      render(&tokens, frame("b", Value::str("bee"))).unwrap(),
      "bee"
    );
    assert_eq!(render(&tokens, Frame::new()).unwrap(), "fallback");
  }

  #[test]
  fn firstof_escapes_unless_safe() {
    let tokens = [Token::block("firstof a", 1)];
    assert_eq!(
      render(&tokens, frame("a", Value::str("<b>"))).unwrap(),
      "&lt;b&gt;"
    );
    assert_eq!(
      render(&tokens, frame("a", Value::safe("<b>"))).unwrap(),
      "<b>"
    );
  }
}
