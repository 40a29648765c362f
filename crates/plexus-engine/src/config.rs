//! Configuration types for processors and recorders

use serde::{Deserialize, Serialize};

use crate::constants::defaults;

/// Processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessorOptions {
    /// Split-run concurrency for nodes without their own `splitRunMax`
    pub split_run_max: usize,
    /// Emit `trace` events from `NodeContext::trace`
    pub emit_trace: bool,
    /// Register the built-in `echo` external function
    pub register_echo: bool,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            split_run_max: defaults::SPLIT_RUN_MAX,
            emit_trace: true,
            register_echo: true,
        }
    }
}

/// Execution recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecorderOptions {
    /// Record `partialOutput` events
    pub include_partial_outputs: bool,
    /// Record `trace` events
    pub include_trace: bool,
    /// Strings longer than this many chars are stored once in the string table
    pub string_dedup_threshold: usize,
    /// zstd level used by compressed serialization
    pub compression_level: i32,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            include_partial_outputs: false,
            include_trace: false,
            string_dedup_threshold: defaults::STRING_DEDUP_THRESHOLD,
            compression_level: defaults::COMPRESSION_LEVEL,
        }
    }
}
