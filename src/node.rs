use crate::{
  context::Context,
  error::{Origin, Result},
  escape::render_value,
  expr::FilterExpression,
};
use std::{
  fmt::{self, Debug},
  sync::atomic::{AtomicU32, Ordering},
};

/// Compile-time identity of a node. Scratch state is keyed by this, so two
/// nodes that must share state (named cycles) share an id on purpose.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(0);

impl NodeId {
  pub fn fresh() -> Self {
    NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
  }
}

/// The closed set of node variants. Static tree traversal dispatches on this
/// instead of downcasting.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
  Text,
  Variable,
  For,
  If,
  With,
  Cycle,
  ResetCycle,
  IfChanged,
  Regroup,
  Autoescape,
  Filter,
  FirstOf,
  Url,
  WidthRatio,
  Comment,
  TemplateTag,
  Spaceless,
  Load,
  Simple,
  Inclusion,
}

/// One renderable unit of a compiled template. Implementations are immutable
/// after compilation; anything mutable lives in the context's scratch stack,
/// keyed by `id()`.
pub trait Node: Send + Sync {
  fn render(&self, context: &mut Context) -> Result<String>;

  fn id(&self) -> NodeId;

  fn kind(&self) -> NodeKind;

  /// Source line of the token this node was compiled from.
  fn line(&self) -> usize {
    0
  }

  /// Child nodelists for static traversal. Must not render anything.
  fn child_nodelists(&self) -> Vec<&NodeList> {
    vec![]
  }

  /// Render, annotating any propagated error with this node's origin so the
  /// top-level caller sees where a deep failure started.
  fn render_annotated(&self, context: &mut Context) -> Result<String> {
    self.render(context).map_err(|e| {
      e.add_origin(Origin {
        template: context.template_name(),
        line: self.line(),
      })
    })
  }
}

impl Debug for dyn Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<{:?} node at line {}>", self.kind(), self.line())
  }
}

/// An ordered aggregate of nodes, rendered and concatenated as a unit. A
/// failing child discards the whole list's partial output.
#[derive(Debug, Default)]
pub struct NodeList {
  children: Vec<Box<dyn Node>>,
  /// True once anything other than literal text has been pushed. Tag
  /// implementations that only accept literal bodies (translation-style
  /// block tags, for example) check this after parsing their body; the
  /// built-in tags all tolerate mixed bodies and leave it alone.
  pub contains_nontext: bool,
}

impl NodeList {
  pub fn new() -> Self {
    Self {
      children: vec![],
      contains_nontext: false,
    }
  }

  pub fn push(&mut self, node: Box<dyn Node>) {
    if node.kind() != NodeKind::Text {
      self.contains_nontext = true;
    }
    self.children.push(node);
  }

  pub fn len(&self) -> usize {
    self.children.len()
  }

  pub fn is_empty(&self) -> bool {
    self.children.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &dyn Node> {
    self.children.iter().map(|c| c.as_ref())
  }

  pub fn render(&self, context: &mut Context) -> Result<String> {
    let mut out = String::new();
    for child in &self.children {
      out.push_str(&child.render_annotated(context)?);
    }
    Ok(out)
  }

  /// Non-executing recursive search over children and their declared child
  /// nodelists. Used for introspection; never touches render state.
  pub fn nodes_by_kind(&self, kind: NodeKind) -> Vec<&dyn Node> {
    let mut found = vec![];
    for child in self.iter() {
      if child.kind() == kind {
        found.push(child);
      }
      for nodelist in child.child_nodelists() {
        found.extend(nodelist.nodes_by_kind(kind));
      }
    }
    found
  }
}

/// Literal template text between tags.
pub struct TextNode {
  id: NodeId,
  pub text: String,
}

impl TextNode {
  pub fn new<S: Into<String>>(text: S) -> Self {
    Self {
      id: NodeId::fresh(),
      text: text.into(),
    }
  }
}

impl Node for TextNode {
  fn render(&self, _context: &mut Context) -> Result<String> {
    Ok(self.text.clone())
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Text
  }
}

/// A `{{ expression }}` token: resolve and write out, escaping per the
/// context's autoescape flag.
pub struct VariableNode {
  id: NodeId,
  line: usize,
  pub expr: FilterExpression,
}

impl VariableNode {
  pub fn new(expr: FilterExpression, line: usize) -> Self {
    Self {
      id: NodeId::fresh(),
      line,
      expr,
    }
  }
}

impl Node for VariableNode {
  fn render(&self, context: &mut Context) -> Result<String> {
    let value = self.expr.resolve(context)?;
    Ok(render_value(&value, context.autoescape))
  }

  fn id(&self) -> NodeId {
    self.id
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Variable
  }

  fn line(&self) -> usize {
    self.line
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nodelist_tracks_nontext_children() {
    let mut list = NodeList::new();
    list.push(Box::new(TextNode::new("a")));
    assert!(!list.contains_nontext);
    list.push(Box::new(TextNode::new("b")));
    assert!(!list.contains_nontext);
  }

  #[test]
  fn nodelist_concatenates_in_order() {
    let mut list = NodeList::new();
    list.push(Box::new(TextNode::new("a")));
    list.push(Box::new(TextNode::new("b")));
    let mut ctx = Context::new();
    assert_eq!(list.render(&mut ctx).unwrap(), "ab");
  }

  #[test]
  fn node_ids_are_distinct() {
    assert_ne!(NodeId::fresh(), NodeId::fresh());
  }
}
