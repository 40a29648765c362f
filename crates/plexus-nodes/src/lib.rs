//! Plexus Nodes
//!
//! Built-in node types for the Plexus dataflow engine. Each type registers
//! itself through `inventory`, so `NodeRegistry::with_builtins()` picks up
//! every node in this crate once it is linked.
//!
//! # Categories
//!
//! - **Io**: graph inputs and outputs, text templates
//! - **Control**: branching, merging and passthrough
//! - **State**: run-scoped globals
//! - **Flow**: subgraph calls, loops, scheduled runs, delays
//! - **Interaction**: user input, user events, external calls, aborts

pub mod control;
pub mod flow;
pub mod interaction;
pub mod io;
pub mod state;

// Re-export all nodes for convenience
pub use control::*;
pub use flow::*;
pub use interaction::*;
pub use io::*;
pub use state::*;

#[cfg(test)]
pub(crate) mod testing;
