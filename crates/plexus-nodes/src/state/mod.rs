//! State nodes
//!
//! Run-scoped globals and context values.

mod context_value;
mod get_global;
mod set_global;

pub use context_value::{ContextData, ContextNode};
pub use get_global::{GetGlobalData, GetGlobalNode};
pub use set_global::{SetGlobalData, SetGlobalNode};

use plexus_engine::coerce::coerce_to_string;
use plexus_engine::{EngineError, PortValues, Result};

pub(crate) const PORT_ID: &str = "id";
pub(crate) const PORT_VARIABLE_ID_OUT: &str = "variable_id_out";

/// Global id from the `id` input when `use_id_input` is set, else `configured`
pub(crate) fn resolve_id(configured: &str, use_id_input: bool, inputs: &PortValues) -> Result<String> {
    let id = if use_id_input {
        let value = inputs
            .get(PORT_ID)
            .ok_or_else(|| EngineError::MissingInput(PORT_ID.to_string()))?;
        coerce_to_string(value)?
    } else {
        configured.to_string()
    };
    if id.is_empty() {
        return Err(EngineError::failed("Missing variable ID"));
    }
    Ok(id)
}
