//! Control nodes
//!
//! Branching, merging and passthrough.

mod coalesce;
mod if_node;
mod passthrough;

pub use coalesce::CoalesceNode;
pub use if_node::IfNode;
pub use passthrough::PassthroughNode;

pub(crate) use passthrough::{forward_numbered, numbered_ports};
