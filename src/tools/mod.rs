//! The Tool Track Registry: registered forward/reverse tool handlers plus
//! the per-agent append-only invocation track.

pub mod registry;
pub mod spec;

pub use registry::{ToolRegistryError, ToolTrackRegistry};
pub use spec::{
    RESERVED_TOOL_NAMES, ReverseResult, ToolForward, ToolInvocationRecord, ToolReverse, ToolSpec,
    is_reserved_tool,
};
