//! Typed views over DBGp reply XML.
//!
//! [`dbgp_wire::parse_reply`] only decodes a reply's root element and its
//! `<error>` child; everything command-specific — property trees, stack
//! frames, context lists, eval results, break-state detail — lives here,
//! one small decoder per command, built on the shared tree-builder in
//! [`xml`].

#![warn(missing_docs)]

mod context;
mod eval;
mod property;
mod stack;
mod status;
mod xml;

pub use context::{ContextDecl, parse_context_names};
pub use eval::{EvalResult, parse_eval};
pub use property::{Facets, Property, Visibility, parse_properties};
pub use stack::{FrameType, StackFrame, parse_stack_get};
pub use status::{Status, StatusReply, parse_status};

/// `context_get` replies are structurally identical to `property_get`
/// replies: a list of top-level `<property>` elements, each possibly with
/// inlined children.
pub use property::parse_properties as parse_context_get;
