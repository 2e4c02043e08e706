//! A template rendering core in the Django mold: a token stream compiles to
//! a tree of nodes, and nodes render against a stack of variable frames. The
//! lexer that produces tokens and the loader that finds template sources both
//! live upstream of this crate; everything from tokens to output strings
//! lives here.
//!
//! The three moving parts:
//!
//! * [`Context`] is the variable stack. Frames push and pop as tags open
//!   scopes; lookup walks top-down.
//! * [`Parser`] turns tokens into a [`NodeList`] by dispatching block tags
//!   through a [`Library`] of registered compile functions.
//! * [`Engine`] owns the registries and compiled [`Template`]s and is shared
//!   behind an `Arc` across threads.

#[macro_use]
extern crate log;

#[macro_use]
mod error;

mod context;
mod engine;
mod escape;
mod expr;
mod filters;
mod library;
mod node;
mod parser;
mod prelude;
mod scratch;
mod tags;
mod token;
mod value;

pub use context::{Context, Frame};
pub use engine::{Engine, Template, UrlReverser};
pub use error::{Error, ErrorKind, Origin, Result};
pub use escape::{conditional_escape, escape_html};
pub use expr::{FilterExpression, Variable};
pub use library::{
  FilterFlags, FilterFn, FilterSpec, InclusionCall, Library, ParamSpec, TagCall, TagFn,
  TemplateRef,
};
pub use node::{Node, NodeId, NodeKind, NodeList};
pub use parser::{token_kwargs, Parser};
pub use scratch::{RenderScratch, ScratchValue};
pub use token::{Token, TokenKind};
pub use value::Value;
