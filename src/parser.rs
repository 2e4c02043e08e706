use crate::{
  engine::Engine,
  error::{ErrorKind, Result},
  expr::FilterExpression,
  library::{FilterSpec, Library, TagFn},
  node::{NodeId, NodeList, TextNode, VariableNode},
  token::{Token, TokenKind},
};
use std::{collections::HashMap, sync::Arc};

/// A named `{% cycle ... as x %}` registered during compilation. A later
/// bare `{% cycle x %}` must share the original's node identity so both
/// advance the same iterator at render time.
#[derive(Clone)]
pub struct NamedCycle {
  pub id: NodeId,
  pub exprs: Arc<Vec<FilterExpression>>,
  pub silent: bool,
}

/// Compiles a token stream into a `NodeList`, dispatching block tags through
/// the active tag registry. The grammar that turns template text into tokens
/// lives upstream; this parser only ever sees tokens.
pub struct Parser {
  tokens: Vec<Token>,
  pub tags: HashMap<String, TagFn>,
  pub filters: HashMap<String, FilterSpec>,
  pub engine: Arc<Engine>,
  pub named_cycles: HashMap<String, NamedCycle>,
  pub last_cycle: Option<NamedCycle>,
  command_stack: Vec<(String, usize)>,
}

impl Parser {
  pub fn new(mut tokens: Vec<Token>, engine: &Arc<Engine>) -> Self {
    tokens.reverse();
    Self {
      tokens,
      tags: engine.default_tags().clone(),
      filters: engine.default_filters().clone(),
      engine: Arc::clone(engine),
      named_cycles: HashMap::new(),
      last_cycle: None,
      command_stack: vec![],
    }
  }

  pub fn next_token(&mut self) -> Option<Token> {
    self.tokens.pop()
  }

  pub fn prepend_token(&mut self, token: Token) {
    self.tokens.push(token);
  }

  pub fn delete_first_token(&mut self) {
    self.tokens.pop();
  }

  /// Peek at the command word of the next block token, if any.
  pub fn next_command(&self) -> Option<String> {
    let token = self.tokens.last()?;
    if token.kind != TokenKind::Block {
      return None;
    }
    token.split_contents().into_iter().next()
  }

  /// Parse until one of `until` block tags is reached; the terminating token
  /// is put back for the caller to consume. Called recursively by tag
  /// compile functions to collect their body nodelists.
  pub fn parse(&mut self, until: &[&str]) -> Result<NodeList> {
    let mut nodelist = NodeList::new();
    while let Some(token) = self.next_token() {
      match token.kind {
        TokenKind::Text => nodelist.push(Box::new(TextNode::new(token.contents))),
        TokenKind::Comment => {}
        TokenKind::Var => {
          let contents = token.contents.trim().to_string();
          if contents.is_empty() {
            syntax_error!("empty variable tag on line {}", token.line);
          }
          let expr = self.compile_filter(&contents)?;
          nodelist.push(Box::new(VariableNode::new(expr, token.line)));
        }
        TokenKind::Block => {
          let command = match token.split_contents().into_iter().next() {
            Some(c) => c,
            None => syntax_error!("empty block tag on line {}", token.line),
          };
          if until.contains(&command.as_str()) {
            self.prepend_token(token);
            return Ok(nodelist);
          }
          let compile_fn = match self.tags.get(&command) {
            Some(f) => Arc::clone(f),
            None => {
              if until.is_empty() {
                return Err(
                  ErrorKind::UnknownTag {
                    name: command,
                    line: token.line,
                  }
                  .into(),
                );
              }
              syntax_error!(
                "invalid block tag on line {}: `{}', expected one of: {}",
                token.line,
                command,
                until.join(", ")
              );
            }
          };
          self.command_stack.push((command, token.line));
          let node = compile_fn(self, &token)?;
          self.command_stack.pop();
          nodelist.push(node);
        }
      }
    }
    if !until.is_empty() {
      match self.command_stack.last() {
        Some((command, line)) => syntax_error!(
          "unclosed tag on line {}: `{}', looking for one of: {}",
          line,
          command,
          until.join(", ")
        ),
        None => syntax_error!("unexpected end of template, looking for one of: {}", until.join(", ")),
      }
    }
    Ok(nodelist)
  }

  /// Throw away everything up to and including the named end tag. Used by
  /// `{% comment %}`, whose body is never compiled.
  pub fn skip_past(&mut self, endtag: &str) -> Result<()> {
    while let Some(token) = self.next_token() {
      if token.kind == TokenKind::Block && token.split_contents().first().map(String::as_str) == Some(endtag)
      {
        return Ok(());
      }
    }
    syntax_error!("unclosed tag, looking for `{}'", endtag);
  }

  pub fn compile_filter(&self, text: &str) -> Result<FilterExpression> {
    FilterExpression::new(text, &self.filters)
  }

  /// Merge a library's whole tag and filter set into the active registries.
  pub fn add_library(&mut self, lib: &Library) {
    for (name, f) in lib.tags() {
      self.tags.insert(name.clone(), Arc::clone(f));
    }
    for (name, f) in lib.filters() {
      self.filters.insert(name.clone(), f.clone());
    }
  }

  /// Selective `{% load a b from lib %}` form: only the named entries are
  /// merged; an unknown name is a compile error.
  pub fn add_library_subset(&mut self, lib: &Library, names: &[String], lib_name: &str) -> Result<()> {
    for name in names {
      let mut found = false;
      if let Some(f) = lib.tags().get(name) {
        self.tags.insert(name.clone(), Arc::clone(f));
        found = true;
      }
      if let Some(f) = lib.filters().get(name) {
        self.filters.insert(name.clone(), f.clone());
        found = true;
      }
      if !found {
        syntax_error!("`{}' is not a valid tag or filter in tag library `{}'", name, lib_name);
      }
    }
    Ok(())
  }
}

/// Try a single bit as a `name=value` keyword argument. The name must be a
/// plain identifier; anything else falls back to positional treatment.
pub fn parse_kwarg(bit: &str) -> Option<(&str, &str)> {
  let eq = bit.find('=')?;
  let (name, value) = (&bit[..eq], &bit[eq + 1..]);
  if name.is_empty() || value.is_empty() {
    return None;
  }
  if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
    return None;
  }
  Some((name, value))
}

/// Consume leading `name=value` bits into compiled kwargs, in source order.
/// When `support_legacy` is set, the `value as name` spelling is accepted
/// too. Stops at the first bit that matches neither form.
pub fn token_kwargs(
  bits: &mut Vec<String>,
  parser: &Parser,
  support_legacy: bool,
) -> Result<Vec<(String, FilterExpression)>> {
  let mut kwargs = vec![];
  while !bits.is_empty() {
    if let Some((name, value)) = parse_kwarg(&bits[0]) {
      let expr = parser.compile_filter(value)?;
      kwargs.push((name.to_string(), expr));
      bits.remove(0);
    } else if support_legacy && bits.len() >= 3 && bits[1] == "as" {
      let expr = parser.compile_filter(&bits[0])?;
      kwargs.push((bits[2].clone(), expr));
      bits.drain(..3);
    } else {
      break;
    }
  }
  Ok(kwargs)
}
