//! VM configuration

use crate::error::JsError;
use serde::{Deserialize, Serialize};

/// Default execution timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Limits applied to every execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Wall-clock budget of one outermost execution; 0 disables the check
    pub timeout_ms: u64,

    /// Maximum number of live frames (nested calls and resumptions)
    pub max_call_depth: usize,

    /// Maximum number of value stack slots
    pub max_stack_size: usize,

    /// Maximum nesting of interpreter entries from native code: generator
    /// resumptions, `yield*` forwarding and host calls back into script.
    /// Each entry recurses on the native stack.
    pub max_reentry_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_call_depth: 512,
            max_stack_size: 1 << 20,
            max_reentry_depth: 128,
        }
    }
}

impl VmConfig {
    /// Parse a configuration; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, JsError> {
        serde_json::from_str(json).map_err(|e| JsError::decode_error(e.to_string()))
    }
}
