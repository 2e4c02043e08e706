use crate::{
  engine::Template,
  error::{ErrorKind, Result},
  node::NodeId,
  value::Value,
};
use std::{collections::HashMap, sync::Arc};

/// State a stateful node parks between renders of the same compiled tree:
/// a cycle's position, an ifchanged's last-seen key, an inclusion tag's
/// resolved sub-template.
#[derive(Clone, Debug)]
pub enum ScratchValue {
  Cycle(usize),
  Seen(Value),
  Template(Arc<Template>),
}

/// A stack of node-private working state, keyed by node identity rather than
/// by name so it never collides with the variable namespace. Unlike the
/// context stack, lookup deliberately sees only the top frame: every nested
/// template render pushes an isolated frame, and an included template's
/// state must be invisible to its includer and vice versa.
pub struct RenderScratch {
  frames: Vec<HashMap<NodeId, ScratchValue>>,
  owner: Option<String>,
  // (previous owner, whether a frame was pushed) per push_state call
  states: Vec<(Option<String>, bool)>,
}

impl RenderScratch {
  pub fn new() -> Self {
    Self {
      frames: vec![HashMap::new()],
      owner: None,
      states: vec![],
    }
  }

  pub fn get(&self, id: NodeId) -> Option<&ScratchValue> {
    self.frames.last().unwrap().get(&id)
  }

  pub fn insert(&mut self, id: NodeId, value: ScratchValue) {
    self.frames.last_mut().unwrap().insert(id, value);
  }

  pub fn contains(&self, id: NodeId) -> bool {
    self.frames.last().unwrap().contains_key(&id)
  }

  pub fn remove(&mut self, id: NodeId) -> Option<ScratchValue> {
    self.frames.last_mut().unwrap().remove(&id)
  }

  /// Record that `owner` is now the rendering template, pushing a fresh
  /// isolated frame only when asked. Owner tracking and isolation are
  /// independent: the previous owner is restored on `pop_state` either way.
  pub fn push_state(&mut self, owner: Option<String>, isolated: bool) {
    self.states.push((self.owner.take(), isolated));
    self.owner = owner;
    if isolated {
      self.frames.push(HashMap::new());
    }
  }

  pub fn pop_state(&mut self) -> Result<()> {
    match self.states.pop() {
      Some((prev, isolated)) => {
        if isolated {
          self.frames.pop();
        }
        self.owner = prev;
        Ok(())
      }
      None => Err(ErrorKind::ScratchUnderflow.into()),
    }
  }

  pub fn owner(&self) -> Option<&str> {
    self.owner.as_deref()
  }
}

impl Default for RenderScratch {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use assert_matches::assert_matches;

  #[test]
  fn top_frame_only_lookup() {
    let mut rc = RenderScratch::new();
    let id = NodeId::fresh();
    rc.insert(id, ScratchValue::Cycle(2));
    rc.push_state(Some("inner.html".into()), true);
    // isolated frame hides state from the enclosing render
    assert!(rc.get(id).is_none());
    rc.insert(id, ScratchValue::Cycle(9));
    rc.pop_state().unwrap();
    assert!(matches!(rc.get(id), Some(ScratchValue::Cycle(2))));
  }

  #[test]
  fn owner_restored_independently_of_isolation() {
    let mut rc = RenderScratch::new();
    rc.push_state(Some("outer.html".into()), true);
    let id = NodeId::fresh();
    rc.insert(id, ScratchValue::Cycle(1));
    rc.push_state(Some("partial.html".into()), false);
    assert_eq!(rc.owner(), Some("partial.html"));
    // non-isolated state push leaves the frame visible
    assert!(rc.contains(id));
    rc.pop_state().unwrap();
    assert_eq!(rc.owner(), Some("outer.html"));
  }

  #[test]
  fn unmatched_pop_is_an_underflow() {
    let mut rc = RenderScratch::new();
    rc.push_state(None, false);
    rc.pop_state().unwrap();
    let err = rc.pop_state().unwrap_err();
    assert_matches!(err.kind, ErrorKind::ScratchUnderflow);
  }
}
