//! The built-in control-flow tags. Each submodule holds the compile function
//! and node type for a family of tags; `register` assembles them into the
//! default library.

use crate::library::Library;
use std::sync::Arc;

mod changed;
mod cond;
mod cycle;
mod escaping;
mod loops;
mod misc;

pub fn register(lib: &mut Library) {
  lib.tag("autoescape", Arc::new(escaping::parse_autoescape));
  lib.tag("comment", Arc::new(misc::parse_comment));
  lib.tag("cycle", Arc::new(cycle::parse_cycle));
  lib.tag("filter", Arc::new(escaping::parse_filter));
  lib.tag("firstof", Arc::new(cond::parse_firstof));
  lib.tag("for", Arc::new(loops::parse_for));
  lib.tag("if", Arc::new(cond::parse_if));
  lib.tag("ifchanged", Arc::new(changed::parse_ifchanged));
  lib.tag("load", Arc::new(misc::parse_load));
  lib.tag("regroup", Arc::new(changed::parse_regroup));
  lib.tag("resetcycle", Arc::new(cycle::parse_resetcycle));
  lib.tag("spaceless", Arc::new(escaping::parse_spaceless));
  lib.tag("templatetag", Arc::new(misc::parse_templatetag));
  lib.tag("url", Arc::new(misc::parse_url));
  lib.tag("widthratio", Arc::new(misc::parse_widthratio));
  lib.tag("with", Arc::new(misc::parse_with));
}
