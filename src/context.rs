use crate::{
  engine::{Engine, Template},
  error::{ErrorKind, Result},
  scratch::RenderScratch,
  value::Value,
};
use once_cell::sync::Lazy;
use std::{collections::BTreeMap, sync::Arc};

pub type Frame = BTreeMap<String, Value>;

/// Frame 0 of every context. `True`/`False`/`None` spellings included so the
/// builtins bind the names templates actually use.
static BUILTINS: Lazy<Frame> = Lazy::new(|| {
  let mut f = Frame::new();
  f.insert("true".into(), Value::Bool(true));
  f.insert("True".into(), Value::Bool(true));
  f.insert("false".into(), Value::Bool(false));
  f.insert("False".into(), Value::Bool(false));
  f.insert("null".into(), Value::Null);
  f.insert("None".into(), Value::Null);
  f
});

/// What a context knows about the template it is currently rendering.
/// Installed by `bind_template`, read back for engine-wide settings like the
/// invalid-variable placeholder.
#[derive(Clone)]
pub struct BoundTemplate {
  pub name: String,
  pub engine: Arc<Engine>,
}

/// The variable scope stack consulted during rendering. Lookup scans frames
/// last-pushed-first; ordinary writes land in the top frame. Frame 0 holds
/// the builtins and can never be popped.
pub struct Context {
  frames: Vec<Frame>,
  pub autoescape: bool,
  pub render_context: RenderScratch,
  template: Option<BoundTemplate>,
}

impl Context {
  pub fn new() -> Self {
    Self {
      frames: vec![BUILTINS.clone()],
      autoescape: true,
      render_context: RenderScratch::new(),
      template: None,
    }
  }

  /// A context seeded with one frame of initial data above the builtins.
  pub fn from_frame(frame: Frame) -> Self {
    let mut ctx = Self::new();
    ctx.frames.push(frame);
    ctx
  }

  /// Request-style construction: run every processor against `request` and
  /// merge the results into one reserved frame sitting *below* any frame
  /// pushed later, so explicit context values always win. A processor that
  /// returns a non-mapping is an integration defect, reported by name.
  pub fn with_processors(
    request: &Value,
    processors: &[(String, Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>)],
  ) -> Result<Self> {
    let mut processor_frame = Frame::new();
    for (name, processor) in processors {
      match processor(request)? {
        Value::Map(m) => processor_frame.extend(m),
        _ => return Err(ErrorKind::BadContextProcessor(name.clone()).into()),
      }
    }
    let mut ctx = Self::new();
    ctx.frames.push(processor_frame);
    Ok(ctx)
  }

  pub fn depth(&self) -> usize {
    self.frames.len()
  }

  pub fn push(&mut self, frame: Frame) {
    self.frames.push(frame);
  }

  /// Pop the top frame. Popping the builtins frame is a contract violation,
  /// not a recoverable condition.
  pub fn pop(&mut self) -> Result<Frame> {
    if self.frames.len() == 1 {
      return Err(ErrorKind::ContextUnderflow.into());
    }
    Ok(self.frames.pop().unwrap())
  }

  /// Push `frame`, run `f`, and pop again no matter how `f` exits. The
  /// closure-scoped shape guarantees the stack discipline the explicit
  /// push/pop pair leaves to the caller.
  pub fn scope<R>(&mut self, frame: Frame, f: impl FnOnce(&mut Context) -> Result<R>) -> Result<R> {
    self.frames.push(frame);
    let result = f(self);
    self.frames.pop();
    result
  }

  /// Merge another context's non-builtin frames into one new frame on top of
  /// this stack.
  pub fn push_merged(&mut self, other: &Context) {
    let mut frame = Frame::new();
    for layer in &other.frames[1..] {
      frame.extend(layer.clone());
    }
    self.frames.push(frame);
  }

  /// Innermost-first lookup. `Some(Value::Null)` and `None` are distinct:
  /// the builtins intentionally bind `null`.
  pub fn get(&self, key: &str) -> Option<&Value> {
    self.frames.iter().rev().find_map(|f| f.get(key))
  }

  pub fn lookup_mut(&mut self, key: &str) -> Option<&mut Value> {
    self.frames.iter_mut().rev().find_map(|f| f.get_mut(key))
  }

  pub fn contains(&self, key: &str) -> bool {
    self.frames.iter().any(|f| f.contains_key(key))
  }

  /// Ordinary assignment: shadow by writing into the top frame.
  pub fn set<S: Into<String>>(&mut self, key: S, value: Value) {
    self.frames.last_mut().unwrap().insert(key.into(), value);
  }

  /// Write into the innermost frame that already binds `key`, falling back
  /// to the top frame when nothing does. Lets a tag update a name an
  /// ancestor scope declared without shadowing it.
  pub fn set_upward<S: Into<String>>(&mut self, key: S, value: Value) {
    let key = key.into();
    match self.frames.iter().rposition(|f| f.contains_key(&key)) {
      Some(i) => self.frames[i].insert(key, value),
      None => self.frames.last_mut().unwrap().insert(key, value),
    };
  }

  /// Merge all frames bottom-to-top into one mapping. Later frames override
  /// earlier ones; the stack itself is untouched.
  pub fn flatten(&self) -> Frame {
    let mut flat = Frame::new();
    for frame in &self.frames {
      flat.extend(frame.clone());
    }
    flat
  }

  pub fn bind_template(&mut self, template: &Template) -> Result<()> {
    if self.template.is_some() {
      return Err(ErrorKind::ContextAlreadyBound.into());
    }
    self.template = Some(BoundTemplate {
      name: template.name.clone(),
      engine: Arc::clone(&template.engine),
    });
    Ok(())
  }

  pub fn unbind_template(&mut self) {
    self.template = None;
  }

  pub fn is_bound(&self) -> bool {
    self.template.is_some()
  }

  pub fn template_name(&self) -> String {
    match &self.template {
      Some(b) => b.name.clone(),
      None => "<unbound>".into(),
    }
  }

  pub fn engine(&self) -> Option<Arc<Engine>> {
    self.template.as_ref().map(|b| Arc::clone(&b.engine))
  }

  pub fn string_if_invalid(&self) -> String {
    match &self.template {
      Some(b) => b.engine.string_if_invalid.clone(),
      None => String::new(),
    }
  }

  /// A fresh, isolated context carrying over the presentation settings but
  /// none of the variable frames. Used by inclusion tags.
  pub fn isolated(&self, frame: Frame) -> Context {
    let mut ctx = Context::from_frame(frame);
    ctx.autoescape = self.autoescape;
    ctx
  }
}

impl Default for Context {
  fn default() -> Self {
    Self::new()
  }
}

/// Equality compares flattened forms; frame boundaries matter for lookup
/// during a render, not for comparing two contexts.
impl PartialEq for Context {
  fn eq(&self, other: &Self) -> bool {
    self.flatten() == other.flatten()
  }
}

impl std::fmt::Debug for Context {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list().entries(self.frames.iter()).finish()
  }
}
