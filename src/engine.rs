use crate::{
  context::{Context, Frame},
  error::{ErrorKind, Result},
  filters,
  library::{FilterSpec, Library, TagFn},
  node::NodeList,
  parser::Parser,
  tags,
  token::Token,
  value::Value,
};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

pub type UrlReverser = Arc<dyn Fn(&str, &[Value], &Frame) -> Option<String> + Send + Sync>;

/// The process-wide default library: the built-in control-flow tags and the
/// stock filters. Built once, cloned into each engine's active set.
static DEFAULT_LIBRARY: Lazy<Library> = Lazy::new(|| {
  let mut lib = Library::new();
  tags::register(&mut lib);
  filters::register(&mut lib);
  lib
});

/// Owns the tag/filter registries, engine-wide render settings, and the
/// in-memory template registry that `{% include %}`-style machinery resolves
/// against. Engines are shared behind `Arc` and read-only once configured,
/// except for the template registry, which sits behind its own lock.
pub struct Engine {
  libraries: HashMap<String, Arc<Library>>,
  default_tags: HashMap<String, TagFn>,
  default_filters: HashMap<String, FilterSpec>,
  pub string_if_invalid: String,
  pub debug: bool,
  templates: RwLock<HashMap<String, Arc<Template>>>,
  url_reverser: Option<UrlReverser>,
}

impl Engine {
  pub fn new() -> Self {
    Self {
      libraries: HashMap::new(),
      default_tags: DEFAULT_LIBRARY.tags().clone(),
      default_filters: DEFAULT_LIBRARY.filters().clone(),
      string_if_invalid: String::new(),
      debug: false,
      templates: RwLock::new(HashMap::new()),
      url_reverser: None,
    }
  }

  /// A fresh engine with default settings, ready to share.
  pub fn shared() -> Arc<Self> {
    Arc::new(Self::new())
  }

  /// Make a library loadable by `{% load name %}`.
  pub fn register_library<S: Into<String>>(&mut self, name: S, lib: Library) {
    self.libraries.insert(name.into(), Arc::new(lib));
  }

  /// Merge a library into the default tag/filter set active in every
  /// template, no `{% load %}` needed.
  pub fn add_builtins(&mut self, lib: &Library) {
    for (name, f) in lib.tags() {
      self.default_tags.insert(name.clone(), Arc::clone(f));
    }
    for (name, f) in lib.filters() {
      self.default_filters.insert(name.clone(), f.clone());
    }
  }

  pub fn library(&self, name: &str) -> Option<Arc<Library>> {
    self.libraries.get(name).map(Arc::clone)
  }

  pub fn default_tags(&self) -> &HashMap<String, TagFn> {
    &self.default_tags
  }

  pub fn default_filters(&self) -> &HashMap<String, FilterSpec> {
    &self.default_filters
  }

  pub fn set_url_reverser(&mut self, f: UrlReverser) {
    self.url_reverser = Some(f);
  }

  pub fn reverse_url(&self, name: &str, args: &[Value], kwargs: &Frame) -> Result<String> {
    match &self.url_reverser {
      Some(f) => f(name, args, kwargs).ok_or_else(|| ErrorKind::NoReverseMatch(name.into()).into()),
      None => Err(ErrorKind::NoReverseMatch(name.into()).into()),
    }
  }

  /// Compile a token stream into a reusable template and register it under
  /// `name` for later `get_template` lookup.
  pub fn add_template(self: &Arc<Self>, name: &str, tokens: Vec<Token>) -> Result<Arc<Template>> {
    let template = Template::compile(name, tokens, self)?;
    self.templates.write().insert(name.to_string(), Arc::clone(&template));
    Ok(template)
  }

  /// The loader boundary: this core only ever asks for a compiled template
  /// by name; lookup policy beyond the in-memory registry lives elsewhere.
  pub fn get_template(&self, name: &str) -> Result<Arc<Template>> {
    self
      .templates
      .read()
      .get(name)
      .map(Arc::clone)
      .ok_or_else(|| ErrorKind::TemplateDoesNotExist(name.to_string()).into())
  }

  /// First existing name wins; all names are reported when none exists.
  pub fn select_template(&self, names: &[String]) -> Result<Arc<Template>> {
    for name in names {
      if let Ok(t) = self.get_template(name) {
        return Ok(t);
      }
    }
    Err(ErrorKind::TemplateDoesNotExist(names.join(", ")).into())
  }
}

impl Default for Engine {
  fn default() -> Self {
    Self::new()
  }
}

/// A compiled template: a nodelist plus the engine it was compiled against.
/// Compiled once per distinct source, rendered many times; all per-render
/// state lives in the context handed to `render`.
pub struct Template {
  pub name: String,
  pub nodelist: NodeList,
  pub engine: Arc<Engine>,
}

impl std::fmt::Debug for Template {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<template {}>", self.name)
  }
}

impl Template {
  pub fn compile(name: &str, tokens: Vec<Token>, engine: &Arc<Engine>) -> Result<Arc<Self>> {
    debug!("compiling template `{}'", name);
    let mut parser = Parser::new(tokens, engine);
    let nodelist = parser.parse(&[])?;
    Ok(Arc::new(Self {
      name: name.to_string(),
      nodelist,
      engine: Arc::clone(engine),
    }))
  }

  /// Render against a caller-owned context. The context is bound to this
  /// template for the duration (binding an already-bound context is the
  /// nested-render case and skips re-binding); a fresh isolated scratch
  /// frame keeps stateful nodes from leaking across template boundaries.
  pub fn render(&self, context: &mut Context) -> Result<String> {
    context.render_context.push_state(Some(self.name.clone()), true);
    let result = if context.is_bound() {
      self.nodelist.render(context)
    } else {
      match context.bind_template(self) {
        Ok(()) => {}
        Err(e) => {
          context.render_context.pop_state()?;
          return Err(e);
        }
      }
      let r = self.nodelist.render(context);
      context.unbind_template();
      r
    };
    context.render_context.pop_state()?;
    result
  }
}
