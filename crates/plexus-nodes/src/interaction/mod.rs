//! Interaction nodes
//!
//! Nodes that talk to whoever hosts the run: user input, user events,
//! external functions and aborts.

mod abort_graph;
mod external_call;
mod raise_event;
mod user_input;
mod wait_for_event;

pub use abort_graph::{AbortGraphData, AbortGraphNode};
pub use external_call::{ExternalCallData, ExternalCallNode};
pub use raise_event::{RaiseEventData, RaiseEventNode};
pub use user_input::{UserInputData, UserInputNode};
pub use wait_for_event::{WaitForEventData, WaitForEventNode};

use plexus_engine::coerce::coerce_to_string;
use plexus_engine::{EngineError, PortValues, Result};

pub(crate) const PORT_EVENT_NAME: &str = "eventName";

/// Event name from the `eventName` input when `use_input` is set, else `configured`
pub(crate) fn resolve_event_name(configured: &str, use_input: bool, inputs: &PortValues) -> Result<String> {
    let name = if use_input {
        inputs
            .get(PORT_EVENT_NAME)
            .map(coerce_to_string)
            .transpose()?
            .unwrap_or_default()
    } else {
        configured.to_string()
    };
    if name.is_empty() {
        return Err(EngineError::failed("Missing event name"));
    }
    Ok(name)
}
