//! Engine-wide constants

/// Default values for configuration
pub mod defaults {
    /// Concurrent split-run elements when a node sets no bound
    pub const SPLIT_RUN_MAX: usize = 10;
    /// Strings longer than this (in chars) are interned when recording
    pub const STRING_DEDUP_THRESHOLD: usize = 100;
    /// zstd level for compressed recordings
    pub const COMPRESSION_LEVEL: i32 = 3;
    /// Output port streamed as partial-output deltas
    pub const PARTIAL_OUTPUT_PORT: &str = "response";
}

/// Recording file format
pub mod recording {
    /// Current format version
    pub const VERSION: u32 = 1;
    /// Prefix of binary asset references
    pub const ASSET_PREFIX: &str = "$ASSET:";
    /// Prefix of interned string references
    pub const STRING_PREFIX: &str = "$STRING:";
}

/// Name of the external function every processor registers
pub const ECHO_FUNCTION: &str = "echo";
