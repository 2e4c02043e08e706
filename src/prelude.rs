pub use crate::{
  context::{Context, Frame},
  error::{Error, ErrorKind, Origin, Result},
  escape::render_value,
  expr::FilterExpression,
  node::{Node, NodeId, NodeKind, NodeList},
  parser::Parser,
  scratch::ScratchValue,
  token::Token,
  value::Value,
};
pub use std::{collections::BTreeMap, sync::Arc};
