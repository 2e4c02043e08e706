use std::fmt::{self, Debug};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum ErrorKind {
  // structural errors: an integration defect, never recovered from
  #[error("cannot pop the builtins frame off the context")]
  ContextUnderflow,
  #[error("context is already bound to a template")]
  ContextAlreadyBound,
  #[error("context processor `{0}' didn't return a mapping")]
  BadContextProcessor(String),
  #[error("render state was popped more times than it was pushed")]
  ScratchUnderflow,

  // user-template errors, raised while compiling a token stream
  #[error("{0}")]
  TemplateSyntax(String),
  #[error("invalid block tag on line {line}: `{name}'. Did you forget to register or load this tag?")]
  UnknownTag { name: String, line: usize },
  #[error("invalid filter: `{0}'")]
  UnknownFilter(String),
  #[error("`{0}' is not a registered tag library")]
  UnknownLibrary(String),
  #[error("template `{0}' does not exist")]
  TemplateDoesNotExist(String),

  // render-time errors
  #[error("failed lookup for key `{key}' in {container}")]
  VariableDoesNotExist { key: String, container: String },
  #[error("need {expected} values to unpack in for loop; got {got}")]
  Unpack { expected: usize, got: usize },
  #[error("`for' loop sequence is {0}, not iterable")]
  NotIterable(&'static str),
  #[error("reverse for `{0}' not found")]
  NoReverseMatch(String),
  #[error("{0}")]
  Filter(String),
}

/// One step of the origin trace attached to an error as it bubbles out of a
/// nested render. `template` is the name the context was bound to when the
/// failing node rendered; `line` comes from the node's source token.
#[derive(Clone, PartialEq, Eq)]
pub struct Origin {
  pub template: String,
  pub line: usize,
}

impl Debug for Origin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.template, self.line)
  }
}

#[derive(thiserror::Error, Debug)]
#[error("{kind}")]
pub struct Error {
  pub kind: ErrorKind,
  pub trace: Vec<Origin>,
}

impl Error {
  pub fn add_origin(mut self, o: Origin) -> Self {
    // the innermost node annotates first; don't stutter when a nodelist and
    // its template both report the same spot
    if self.trace.last() != Some(&o) {
      self.trace.push(o);
    }
    self
  }
}

impl<T> From<T> for Error
where
  ErrorKind: From<T>,
{
  fn from(k: T) -> Self {
    Self {
      kind: ErrorKind::from(k),
      trace: vec![],
    }
  }
}

macro_rules! syntax_error {
  ($($t:tt)+) => {
    return Err($crate::error::ErrorKind::TemplateSyntax(format!($($t)+)).into())
  };
}
