use crate::parser::token_kwargs;
use crate::prelude::*;
use itertools::Itertools;

/// `{% with a=x b=y %}`: evaluates each binding once and exposes them in a
/// single extra frame for the duration of the body.
pub struct WithNode {
  id: NodeId,
  line: usize,
  bindings: Vec<(String, FilterExpression)>,
  nodelist: NodeList,
}

pub fn parse_with(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let mut bits = token.split_contents();
  bits.remove(0);
  let bindings = token_kwargs(&mut bits, parser, true)?;
  if bindings.is_empty() {
    syntax_error!("`with' expected at least one variable assignment");
  }
  if !bits.is_empty() {
    syntax_error!("`with' received an invalid token: `{}'", bits[0]);
  }
  let nodelist = parser.parse(&["endwith"])?;
  parser.delete_first_token();
  Ok(Box::new(WithNode {
    id: NodeId::fresh(),
    line: token.line,
    bindings,
    nodelist,
  }))
}

impl Node for WithNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let mut frame = Frame::new();
    for (name, expr) in &self.bindings {
      frame.insert(name.clone(), expr.resolve_or_null(context)?);
    }
    context.scope(frame, |context| self.nodelist.render(context))
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::With
  }

  fn line(&self) -> usize {
    self.line
  }

  fn child_nodelists(&self) -> Vec<&NodeList> {
    vec![&self.nodelist]
  }
}

/// `{% comment %}`: the body is discarded at compile time, never rendered.
pub struct CommentNode {
  id: NodeId,
  line: usize,
}

pub fn parse_comment(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  parser.skip_past("endcomment")?;
  Ok(Box::new(CommentNode {
    id: NodeId::fresh(),
    line: token.line,
  }))
}

impl Node for CommentNode {
  fn render(&self, _context: &mut Context) -> Result<String> {
    Ok(String::new())
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Comment
  }

  fn line(&self) -> usize {
    self.line
  }
}

/// `{% templatetag %}`: emits one of the template syntax markers literally.
pub struct TemplateTagNode {
  id: NodeId,
  line: usize,
  literal: &'static str,
}

const TEMPLATETAG_MAPPING: &[(&str, &str)] = &[
  ("openblock", "{%"),
  ("closeblock", "%}"),
  ("openvariable", "{{"),
  ("closevariable", "}}"),
  ("openbrace", "{"),
  ("closebrace", "}"),
  ("opencomment", "{#"),
  ("closecomment", "#}"),
];

pub fn parse_templatetag(_parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let bits = token.split_contents();
  if bits.len() != 2 {
    syntax_error!("`templatetag' statement takes one argument");
  }
  let literal = match TEMPLATETAG_MAPPING.iter().find(|(name, _)| *name == bits[1]) {
    Some((_, out)) => *out,
    None => syntax_error!(
      "invalid templatetag argument: `{}'. Must be one of: {}",
      bits[1],
      TEMPLATETAG_MAPPING.iter().map(|(name, _)| *name).join(", ")
    ),
  };
  Ok(Box::new(TemplateTagNode {
    id: NodeId::fresh(),
    line: token.line,
    literal,
  }))
}

impl Node for TemplateTagNode {
  fn render(&self, _context: &mut Context) -> Result<String> {
    Ok(self.literal.to_string())
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::TemplateTag
  }

  fn line(&self) -> usize {
    self.line
  }
}

/// `{% load lib %}` and `{% load tag filter from lib %}`: merges a
/// registered library into the parser's active registries. Renders nothing.
pub struct LoadNode {
  id: NodeId,
  line: usize,
}

pub fn parse_load(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let bits = token.split_contents();
  let engine = Arc::clone(&parser.engine);
  if bits.len() >= 4 && bits[bits.len() - 2] == "from" {
    let lib_name = &bits[bits.len() - 1];
    let lib = match engine.library(lib_name) {
      Some(l) => l,
      None => return Err(ErrorKind::UnknownLibrary(lib_name.clone()).into()),
    };
    parser.add_library_subset(&lib, &bits[1..bits.len() - 2], lib_name)?;
  } else {
    for name in &bits[1..] {
      let lib = match engine.library(name) {
        Some(l) => l,
        None => return Err(ErrorKind::UnknownLibrary(name.clone()).into()),
      };
      parser.add_library(&lib);
    }
  }
  Ok(Box::new(LoadNode {
    id: NodeId::fresh(),
    line: token.line,
  }))
}

impl Node for LoadNode {
  fn render(&self, _context: &mut Context) -> Result<String> {
    Ok(String::new())
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Load
  }

  fn line(&self) -> usize {
    self.line
  }
}

/// `{% url name args... %}`: asks the engine's reverser for a path. A failed
/// reverse is fatal unless the result is being captured with `as`, in which
/// case the variable is set to the empty string.
pub struct UrlNode {
  id: NodeId,
  line: usize,
  view_name: FilterExpression,
  args: Vec<FilterExpression>,
  kwargs: Vec<(String, FilterExpression)>,
  asvar: Option<String>,
}

pub fn parse_url(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let mut bits = token.split_contents();
  if bits.len() < 2 {
    syntax_error!("`url' takes at least one argument, a URL pattern name");
  }
  let mut asvar = None;
  if bits.len() >= 2 && bits[bits.len() - 2] == "as" {
    asvar = bits.pop();
    bits.pop();
  }
  let view_name = parser.compile_filter(&bits[1])?;
  let mut args = vec![];
  let mut kwargs = vec![];
  for bit in &bits[2..] {
    match crate::parser::parse_kwarg(bit) {
      Some((name, value)) => kwargs.push((name.to_string(), parser.compile_filter(value)?)),
      None => args.push(parser.compile_filter(bit)?),
    }
  }
  Ok(Box::new(UrlNode {
    id: NodeId::fresh(),
    line: token.line,
    view_name,
    args,
    kwargs,
    asvar,
  }))
}

impl Node for UrlNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let view = self.view_name.resolve(context)?.to_output_string();
    let args = self
      .args
      .iter()
      .map(|e| e.resolve(context))
      .collect::<Result<Vec<_>>>()?;
    let mut kwargs = Frame::new();
    for (name, expr) in &self.kwargs {
      kwargs.insert(name.clone(), expr.resolve(context)?);
    }
    let url = context.engine().and_then(|e| e.reverse_url(&view, &args, &kwargs).ok());
    match &self.asvar {
      Some(name) => {
        context.set(name.clone(), Value::str(url.unwrap_or_default()));
        Ok(String::new())
      }
      None => match url {
        Some(url) => Ok(render_value(&Value::str(url), context.autoescape)),
        None => Err(ErrorKind::NoReverseMatch(view).into()),
      },
    }
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Url
  }

  fn line(&self) -> usize {
    self.line
  }
}

/// `{% widthratio value max width %}`: `round(value / max * width)` for bar
/// chart sizing. A missing value or max renders as nothing.
pub struct WidthRatioNode {
  id: NodeId,
  line: usize,
  value: FilterExpression,
  max_value: FilterExpression,
  max_width: FilterExpression,
  asvar: Option<String>,
}

pub fn parse_widthratio(parser: &mut Parser, token: &Token) -> Result<Box<dyn Node>> {
  let bits = token.split_contents();
  let asvar = match bits.len() {
    4 => None,
    6 if bits[4] == "as" => Some(bits[5].clone()),
    _ => syntax_error!("`widthratio' takes at least three arguments"),
  };
  Ok(Box::new(WidthRatioNode {
    id: NodeId::fresh(),
    line: token.line,
    value: parser.compile_filter(&bits[1])?,
    max_value: parser.compile_filter(&bits[2])?,
    max_width: parser.compile_filter(&bits[3])?,
    asvar,
  }))
}

impl Node for WidthRatioNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let value = self.value.resolve_or_null(context)?;
    let max_value = self.max_value.resolve_or_null(context)?;
    let max_width = match self.max_width.resolve_or_null(context)?.as_number() {
      Ok(n) => n,
      Err(_) => syntax_error!("widthratio final argument must be a number"),
    };
    let output = match (value.as_number(), max_value.as_number()) {
      (Ok(_), Ok(max)) if max == 0.0 => "0".to_string(),
      (Ok(value), Ok(max)) => {
        let ratio = value / max * max_width;
        format!("{}", ratio.round() as i64)
      }
      // a missing or non-numeric operand sizes to nothing rather than
      // failing the page
      _ => String::new(),
    };
    match &self.asvar {
      Some(name) => {
        context.set(name.clone(), Value::str(output));
        Ok(String::new())
      }
      None => Ok(output),
    }
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::WidthRatio
  }

  fn line(&self) -> usize {
    self.line
  }
}
