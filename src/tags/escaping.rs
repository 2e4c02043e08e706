use crate::escape::strip_spaces_between_tags;
use crate::prelude::*;

/// `{% autoescape on|off %}`: overrides the context's escaping flag for the
/// duration of the body and restores it afterwards, errors included.
pub struct AutoescapeControlNode {
  id: NodeId,
  line: usize,
  setting: bool,
  nodelist: NodeList,
}

pub fn parse_autoescape(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let bits = token.split_contents();
  if bits.len() != 2 {
    syntax_error!("`autoescape' tag requires exactly one argument");
  }
  let setting = match bits[1].as_str() {
    "on" => true,
    "off" => false,
    _ => syntax_error!("`autoescape' argument should be `on' or `off'"),
  };
  let nodelist = parser.parse(&["endautoescape"])?;
  parser.delete_first_token();
  Ok(Box::new(AutoescapeControlNode {
    id: NodeId::fresh(),
    line: token.line,
    setting,
    nodelist,
  }))
}

impl Node for AutoescapeControlNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let saved = context.autoescape;
    context.autoescape = self.setting;
    let output = self.nodelist.render(context);
    context.autoescape = saved;
    output
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Autoescape
  }

  fn line(&self) -> usize {
    self.line
  }

  fn child_nodelists(&self) -> Vec<&NodeList> {
    vec![&self.nodelist]
  }
}

/// `{% filter f|g %}`: renders the body, then pushes the output through the
/// given filter chain as if it were a variable.
pub struct FilterBlockNode {
  id: NodeId,
  line: usize,
  expr: FilterExpression,
  nodelist: NodeList,
}

pub fn parse_filter(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let rest = match token.contents.split_once(char::is_whitespace) {
    Some((_, rest)) => rest.trim(),
    None => syntax_error!("`filter' tag requires at least one filter"),
  };
  let expr = parser.compile_filter(&format!("var|{}", rest))?;
  for name in expr.filter_names() {
    // output escaping is controlled by autoescape blocks, not here
    if name == "escape" || name == "safe" {
      syntax_error!("`filter {}' is not permitted. Use the `autoescape' tag instead.", name);
    }
  }
  let nodelist = parser.parse(&["endfilter"])?;
  parser.delete_first_token();
  Ok(Box::new(FilterBlockNode {
    id: NodeId::fresh(),
    line: token.line,
    expr,
    nodelist,
  }))
}

impl Node for FilterBlockNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let output = self.nodelist.render(context)?;
    context.scope(Frame::new(), |context| {
      context.set("var", Value::safe(output));
      let filtered = self.expr.resolve(context)?;
      Ok(filtered.to_output_string())
    })
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Filter
  }

  fn line(&self) -> usize {
    self.line
  }

  fn child_nodelists(&self) -> Vec<&NodeList> {
    vec![&self.nodelist]
  }
}

/// `{% spaceless %}`: removes whitespace between adjacent tags in the
/// rendered body. Text inside tags is untouched.
pub struct SpacelessNode {
  id: NodeId,
  line: usize,
  nodelist: NodeList,
}

pub fn parse_spaceless(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let nodelist = parser.parse(&["endspaceless"])?;
  parser.delete_first_token();
  Ok(Box::new(SpacelessNode {
    id: NodeId::fresh(),
    line: token.line,
    nodelist,
  }))
}

impl Node for SpacelessNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let output = self.nodelist.render(context)?;
    Ok(strip_spaces_between_tags(&output))
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Spaceless
  }

  fn line(&self) -> usize {
    self.line
  }

  fn child_nodelists(&self) -> Vec<&NodeList> {
    vec![&self.nodelist]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::Engine;
  use assert_matches::assert_matches;

  fn render(tokens: &[Token], data: Frame) -> Result<String> {
    let t = Engine::shared().add_template("test", tokens.to_vec())?;
    t.render(&mut Context::from_frame(data))
  }

  fn frame(key: &str, value: Value) -> Frame {
    let mut f = Frame::new();
    f.insert(key.to_string(), value);
    f
  }

  #[test]
  fn autoescape_off_disables_escaping() {
    let tokens = [
      Token::block("autoescape off", 1),
      Token::var("x", 1),
      Token::block("endautoescape", 1),
      Token::var("x", 1),
    ];
    let out = render(&tokens, frame("x", Value::str("<b>"))).unwrap();
    assert_eq!(out, "<b>&lt;b&gt;");
  }

  #[test]
  fn autoescape_on_restores_escaping_inside_off() {
    let tokens = [
      Token::block("autoescape off", 1),
      Token::block("autoescape on", 1),
      Token::var("x", 1),
      Token::block("endautoescape", 1),
      Token::block("endautoescape", 1),
    ];
    let out = render(&tokens, frame("x", Value::str("<b>"))).unwrap();
    assert_eq!(out, "&lt;b&gt;");
  }

  #[test]
  fn autoescape_needs_on_or_off() {
    let err = render(
      &[
        Token::block("autoescape maybe", 1),
        Token::block("endautoescape", 1),
      ],
      Frame::new(),
    )
    .unwrap_err();
    assert_matches!(
      err.kind,
      ErrorKind::TemplateSyntax(msg) if msg.contains("should be `on' or `off'")
    );
  }

  #[test]
  fn filter_block_applies_chain_to_body() {
    let tokens = [
      Token::block("filter lower", 1),
      Token::text("HELLO ", 1),
      Token::var("x", 1),
      Token::block("endfilter", 1),
    ];
    assert_eq!(
      render(&tokens, frame("x", Value::str("World"))).unwrap(),
      "hello world"
    );
  }

  #[test]
  fn filter_block_rejects_escape_and_safe() {
    for name in ["escape", "safe"] {
      let err = render(
        &[
          Token::block(&format!("filter {}", name), 1),
          Token::block("endfilter", 1),
        ],
        Frame::new(),
      )
      .unwrap_err();
      assert_matches!(err.kind, ErrorKind::TemplateSyntax(msg) if msg.contains("not permitted"));
    }
  }

  #[test]
  fn spaceless_strips_between_tags_only() {
    let tokens = [
      Token::block("spaceless", 1),
      Token::text("<p>\n  <a>x y</a>  \n</p>", 1),
      Token::block("endspaceless", 1),
    ];
    assert_eq!(render(&tokens, Frame::new()).unwrap(), "<p><a>x y</a></p>");
  }
}
