use crate::{
  context::{Context, Frame},
  engine::Template,
  error::Result,
  escape::render_value,
  expr::FilterExpression,
  node::{Node, NodeId, NodeKind},
  parser::{parse_kwarg, Parser},
  scratch::ScratchValue,
  token::Token,
  value::Value,
};
use itertools::Itertools;
use std::{collections::HashMap, sync::Arc};

pub type TagFn = Arc<dyn Fn(&mut Parser, &Token) -> Result<Box<dyn Node>> + Send + Sync>;

/// value, optional argument, active autoescape flag. Filters that don't care
/// about autoescaping ignore the third parameter.
pub type FilterFn = Arc<dyn Fn(Value, Option<Value>, bool) -> Result<Value> + Send + Sync>;

/// Side-flags riding on a registered filter, consulted at resolution time:
/// `is_safe` keeps a safe input safe, `needs_autoescape` exposes the live
/// autoescape flag to the callable.
#[derive(Copy, Clone, Debug, Default)]
pub struct FilterFlags {
  pub is_safe: bool,
  pub needs_autoescape: bool,
}

impl FilterFlags {
  pub fn safe() -> Self {
    FilterFlags {
      is_safe: true,
      ..Default::default()
    }
  }
}

/// A registered filter: the callable plus its flags, bundled in one
/// descriptor so everything that can see the filter sees the flags too.
#[derive(Clone)]
pub struct FilterSpec {
  pub fun: FilterFn,
  pub flags: FilterFlags,
}

/// A tag/filter registry. Instances are built at startup, registered on an
/// engine, and read-only from then on; `{% load %}` merges them into a
/// parser's active set.
#[derive(Default)]
pub struct Library {
  tags: HashMap<String, TagFn>,
  filters: HashMap<String, FilterSpec>,
}

impl Library {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn tags(&self) -> &HashMap<String, TagFn> {
    &self.tags
  }

  pub fn filters(&self) -> &HashMap<String, FilterSpec> {
    &self.filters
  }

  pub fn tag<S: Into<String>>(&mut self, name: S, f: TagFn) {
    self.tags.insert(name.into(), f);
  }

  pub fn filter<S: Into<String>>(&mut self, name: S, f: FilterFn) {
    self.filter_with_flags(name, f, FilterFlags::default());
  }

  pub fn filter_with_flags<S: Into<String>>(&mut self, name: S, f: FilterFn, flags: FilterFlags) {
    self.filters.insert(name.into(), FilterSpec { fun: f, flags });
  }

  /// Register an ordinary callable as a tag. The call's argument list is
  /// bound from the tag's token bits by `parse_bits` under `spec`; an
  /// `as var` suffix redirects output into a context variable.
  pub fn simple_tag<S: Into<String>>(&mut self, name: S, spec: ParamSpec, func: TagCall) {
    let name = name.into();
    let tag_name = name.clone();
    let spec = Arc::new(spec);
    self.tag(
      name,
      Arc::new(move |parser: &mut Parser, token: &Token| {
        let mut bits = token.split_contents();
        bits.remove(0);
        let mut target_var = None;
        if bits.len() >= 2 && bits[bits.len() - 2] == "as" {
          target_var = bits.pop();
          bits.pop();
        }
        let (args, kwargs) = parse_bits(parser, &bits, &spec, &tag_name)?;
        Ok(Box::new(SimpleNode {
          id: NodeId::fresh(),
          line: token.line,
          func: Arc::clone(&func),
          args,
          kwargs,
          target_var: target_var.clone(),
        }) as Box<dyn Node>)
      }),
    );
  }

  /// Register a callable whose returned mapping becomes the context for a
  /// sub-template render.
  pub fn inclusion_tag<S: Into<String>>(
    &mut self,
    name: S,
    template: TemplateRef,
    spec: ParamSpec,
    func: InclusionCall,
  ) {
    let name = name.into();
    let tag_name = name.clone();
    let spec = Arc::new(spec);
    self.tag(
      name,
      Arc::new(move |parser: &mut Parser, token: &Token| {
        let mut bits = token.split_contents();
        bits.remove(0);
        let (args, kwargs) = parse_bits(parser, &bits, &spec, &tag_name)?;
        Ok(Box::new(InclusionNode {
          id: NodeId::fresh(),
          line: token.line,
          func: Arc::clone(&func),
          args,
          kwargs,
          template: template.clone(),
        }) as Box<dyn Node>)
      }),
    );
  }
}

/// The declared parameters of a tag function, built once at registration
/// time and consumed by `parse_bits`. This is the explicit stand-in for
/// host-language signature introspection.
#[derive(Clone, Debug, Default)]
pub struct ParamSpec {
  pub params: Vec<String>,
  /// How many trailing entries of `params` carry defaults.
  pub defaults: usize,
  pub varargs: bool,
  pub kwargs: bool,
  pub kwonly: Vec<String>,
  pub kwonly_defaults: Vec<String>,
  pub takes_context: bool,
}

impl ParamSpec {
  pub fn new(params: &[&str]) -> Self {
    Self {
      params: params.iter().map(|s| s.to_string()).collect(),
      ..Default::default()
    }
  }

  pub fn with_defaults(mut self, n: usize) -> Self {
    self.defaults = n;
    self
  }

  pub fn varargs(mut self) -> Self {
    self.varargs = true;
    self
  }

  pub fn accepts_kwargs(mut self) -> Self {
    self.kwargs = true;
    self
  }

  pub fn kwonly(mut self, names: &[&str], with_defaults: &[&str]) -> Self {
    self.kwonly = names.iter().map(|s| s.to_string()).collect();
    self.kwonly_defaults = with_defaults.iter().map(|s| s.to_string()).collect();
    self
  }

  pub fn takes_context(mut self) -> Self {
    self.takes_context = true;
    self
  }
}

/// Bind a tag invocation's raw bits to a declared parameter list, producing
/// compiled positional and keyword argument expressions. Every violated rule
/// is a distinct compile-time error, phrased from the caller's point of
/// view.
pub fn parse_bits(
  parser: &mut Parser,
  bits: &[String],
  spec: &ParamSpec,
  name: &str,
) -> Result<(Vec<FilterExpression>, Vec<(String, FilterExpression)>)> {
  let mut params: &[String] = &spec.params;
  if spec.takes_context {
    // validated when the tag is used, not when it is declared
    if params.first().map(String::as_str) == Some("context") {
      params = &params[1..];
    } else {
      syntax_error!(
        "`{}' is decorated with takes_context=True so it must have a first argument of `context'",
        name
      );
    }
  }
  let mut args: Vec<FilterExpression> = vec![];
  let mut kwargs: Vec<(String, FilterExpression)> = vec![];
  let mut unhandled_params: Vec<&String> =
    params[..params.len().saturating_sub(spec.defaults)].iter().collect();
  let mut unhandled_kwargs: Vec<&String> = spec
    .kwonly
    .iter()
    .filter(|p| !spec.kwonly_defaults.contains(p))
    .collect();
  for bit in bits {
    match parse_kwarg(bit) {
      Some((param, value)) => {
        let known = params.iter().any(|p| p == param) || spec.kwonly.iter().any(|p| p == param);
        if !known && !spec.kwargs {
          syntax_error!("`{}' received unexpected keyword argument `{}'", name, param);
        }
        if kwargs.iter().any(|(k, _)| k == param) {
          syntax_error!(
            "`{}' received multiple values for keyword argument `{}'",
            name,
            param
          );
        }
        kwargs.push((param.to_string(), parser.compile_filter(value)?));
        unhandled_params.retain(|p| *p != param);
        unhandled_kwargs.retain(|p| *p != param);
      }
      None => {
        if !kwargs.is_empty() {
          syntax_error!(
            "`{}' received some positional argument(s) after some keyword argument(s)",
            name
          );
        }
        args.push(parser.compile_filter(bit)?);
        if !unhandled_params.is_empty() {
          unhandled_params.remove(0);
        } else if !spec.varargs && args.len() > params.len() {
          syntax_error!("`{}' received too many positional arguments", name);
        }
      }
    }
  }
  if !unhandled_params.is_empty() || !unhandled_kwargs.is_empty() {
    let missing = unhandled_params
      .iter()
      .chain(unhandled_kwargs.iter())
      .map(|p| format!("'{}'", p))
      .join(", ");
    syntax_error!("`{}' did not receive value(s) for the argument(s): {}", name, missing);
  }
  Ok((args, kwargs))
}

pub type TagCall = Arc<dyn Fn(&mut Context, Vec<Value>, Frame) -> Result<Value> + Send + Sync>;
pub type InclusionCall = Arc<dyn Fn(&mut Context, Vec<Value>, Frame) -> Result<Frame> + Send + Sync>;

fn resolve_arguments(
  args: &[FilterExpression],
  kwargs: &[(String, FilterExpression)],
  context: &Context,
) -> Result<(Vec<Value>, Frame)> {
  let mut resolved_args = vec![];
  for arg in args {
    resolved_args.push(arg.resolve(context)?);
  }
  let mut resolved_kwargs = Frame::new();
  for (k, v) in kwargs {
    resolved_kwargs.insert(k.clone(), v.resolve(context)?);
  }
  Ok((resolved_args, resolved_kwargs))
}

/// A bound call to a registered tag function. Output goes to the context
/// under `target_var` for the `as var` form, otherwise out the front door,
/// escaped per the autoescape flag.
pub struct SimpleNode {
  pub(crate) id: NodeId,
  pub(crate) line: usize,
  pub(crate) func: TagCall,
  pub(crate) args: Vec<FilterExpression>,
  pub(crate) kwargs: Vec<(String, FilterExpression)>,
  pub(crate) target_var: Option<String>,
}

impl Node for SimpleNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let (args, kwargs) = resolve_arguments(&self.args, &self.kwargs, context)?;
    let output = (self.func)(context, args, kwargs)?;
    match &self.target_var {
      Some(var) => {
        context.set(var.clone(), output);
        Ok(String::new())
      }
      None => Ok(render_value(&output, context.autoescape)),
    }
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Simple
  }

  fn line(&self) -> usize {
    self.line
  }
}

/// How an inclusion tag names its sub-template: a literal path, a first-hit
/// list of paths, or an already-compiled template.
#[derive(Clone)]
pub enum TemplateRef {
  Name(String),
  Names(Vec<String>),
  Compiled(Arc<Template>),
}

/// Renders a sub-template against an isolated context seeded from the tag
/// function's returned mapping. The resolved template object is cached in
/// the scratch stack so loops don't re-resolve it every iteration.
pub struct InclusionNode {
  pub(crate) id: NodeId,
  pub(crate) line: usize,
  pub(crate) func: InclusionCall,
  pub(crate) args: Vec<FilterExpression>,
  pub(crate) kwargs: Vec<(String, FilterExpression)>,
  pub(crate) template: TemplateRef,
}

impl Node for InclusionNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let (args, kwargs) = resolve_arguments(&self.args, &self.kwargs, context)?;
    let mut values = (self.func)(context, args, kwargs)?;
    let template = match context.render_context.get(self.id) {
      Some(ScratchValue::Template(t)) => Arc::clone(t),
      _ => {
        let template = match &self.template {
          TemplateRef::Compiled(t) => Arc::clone(t),
          TemplateRef::Name(name) => self.engine_of(context, name)?.get_template(name)?,
          TemplateRef::Names(names) => {
            let engine = self.engine_of(context, &names.join(", "))?;
            engine.select_template(names)?
          }
        };
        context
          .render_context
          .insert(self.id, ScratchValue::Template(Arc::clone(&template)));
        template
      }
    };
    // the one cross-cutting value that follows the render across the
    // isolation boundary
    if let Some(csrf) = context.get("csrf_token") {
      values.insert("csrf_token".into(), csrf.clone());
    }
    let mut sub_context = context.isolated(values);
    template.render(&mut sub_context)
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Inclusion
  }

  fn line(&self) -> usize {
    self.line
  }
}

impl InclusionNode {
  fn engine_of(&self, context: &Context, wanted: &str) -> Result<Arc<crate::engine::Engine>> {
    context
      .engine()
      .ok_or_else(|| crate::error::ErrorKind::TemplateDoesNotExist(wanted.to_string()).into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{engine::Engine, error::ErrorKind};

  fn bind(decl: ParamSpec, bits: &[&str]) -> Result<(Vec<FilterExpression>, Vec<(String, FilterExpression)>)> {
    let mut parser = Parser::new(vec![], &Engine::shared());
    let bits: Vec<String> = bits.iter().map(|s| s.to_string()).collect();
    parse_bits(&mut parser, &bits, &decl, "f")
  }

  fn msg(r: Result<(Vec<FilterExpression>, Vec<(String, FilterExpression)>)>) -> String {
    match r.unwrap_err().kind {
      ErrorKind::TemplateSyntax(m) => m,
      k => panic!("expected syntax error, got {:?}", k),
    }
  }

  #[test]
  fn binds_positional_then_keyword() {
    let (args, kwargs) = bind(ParamSpec::new(&["one", "two"]), &["1", "two=2"]).unwrap();
    assert_eq!(args.len(), 1);
    assert_eq!(kwargs.len(), 1);
    assert_eq!(kwargs[0].0, "two");
  }

  #[test]
  fn missing_required_argument() {
    // def f(one, two="hi") called with no arguments
    let r = bind(ParamSpec::new(&["one", "two"]).with_defaults(1), &[]);
    assert_eq!(msg(r), "`f' did not receive value(s) for the argument(s): 'one'");
  }

  #[test]
  fn keyword_for_other_param_does_not_satisfy_missing_one() {
    let r = bind(ParamSpec::new(&["one", "two"]).with_defaults(1), &["two=\"x\""]);
    assert_eq!(msg(r), "`f' did not receive value(s) for the argument(s): 'one'");
  }

  #[test]
  fn unexpected_keyword() {
    let r = bind(
      ParamSpec::new(&["one", "two"]).with_defaults(1),
      &["one=1", "two=2", "three=3"],
    );
    assert_eq!(msg(r), "`f' received unexpected keyword argument `three'");
  }

  #[test]
  fn duplicate_keyword() {
    let r = bind(ParamSpec::new(&["one"]), &["one=1", "one=2"]);
    assert_eq!(msg(r), "`f' received multiple values for keyword argument `one'");
  }

  #[test]
  fn positional_after_keyword() {
    let r = bind(ParamSpec::new(&["one", "two"]), &["one=1", "2"]);
    assert_eq!(
      msg(r),
      "`f' received some positional argument(s) after some keyword argument(s)"
    );
  }

  #[test]
  fn too_many_positionals_without_varargs() {
    let r = bind(ParamSpec::new(&["one"]), &["1", "2"]);
    assert_eq!(msg(r), "`f' received too many positional arguments");
    assert!(bind(ParamSpec::new(&["one"]).varargs(), &["1", "2", "3"]).is_ok());
  }

  #[test]
  fn all_missing_parameters_reported_at_once() {
    let r = bind(ParamSpec::new(&["one", "two"]), &[]);
    assert_eq!(
      msg(r),
      "`f' did not receive value(s) for the argument(s): 'one', 'two'"
    );
  }

  #[test]
  fn kwonly_without_default_is_required() {
    let r = bind(ParamSpec::new(&[]).kwonly(&["flag", "opt"], &["opt"]), &[]);
    assert_eq!(msg(r), "`f' did not receive value(s) for the argument(s): 'flag'");
  }

  #[test]
  fn takes_context_requires_leading_context_param() {
    let r = bind(ParamSpec::new(&["one"]).takes_context(), &["1"]);
    assert_eq!(
      msg(r),
      "`f' is decorated with takes_context=True so it must have a first argument of `context'"
    );
    // with the context param declared, user-facing arity skips it
    let ok = bind(ParamSpec::new(&["context", "one"]).takes_context(), &["1"]);
    assert!(ok.is_ok());
  }

  #[test]
  fn arbitrary_kwargs_accepted_when_declared() {
    let r = bind(ParamSpec::new(&[]).accepts_kwargs(), &["anything=1"]);
    assert!(r.is_ok());
  }
}
