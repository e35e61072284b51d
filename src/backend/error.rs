// Contract errors raised by the backend
//
// Native failures travel as anyhow errors with context; these are the
// caller mistakes and capacity limits, typed so callers can match on them
// after `anyhow::Error::downcast_ref`.

use super::command::RecordingState;
use crate::types::{QueueUsage, ShaderObjectType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("command list is {actual:?}, {operation} needs {expected}")]
    InvalidState {
        operation: &'static str,
        actual: RecordingState,
        expected: &'static str,
    },

    #[error("{0} needs a bound pipeline")]
    NoBoundPipeline(&'static str),

    #[error("{operation} needs a {expected} pipeline")]
    WrongPipelineKind {
        operation: &'static str,
        expected: &'static str,
    },

    #[error("{operation} needs an open render pass")]
    NoRenderPass { operation: &'static str },

    #[error("{operation} is not allowed inside a render pass")]
    InsideRenderPass { operation: &'static str },

    #[error("command list was not created with {0:?} usage")]
    UnsupportedUsage(QueueUsage),

    #[error("command list has never been submitted")]
    NeverSubmitted,

    #[error("command list is still executing on the GPU")]
    InFlight,

    #[error("descriptor pool exhausted ({0} sets)")]
    PoolExhausted(u32),

    #[error("no static pipeline named '{0}'")]
    UnknownStaticPipeline(String),

    #[error("stale or unknown {0} handle")]
    UnknownHandle(&'static str),

    #[error("binding {0} is not declared by the bound pipeline layout")]
    UnknownBinding(u32),

    #[error("set index {set} is out of range for a layout with {count} sets")]
    SetOutOfRange { set: u32, count: usize },

    #[error("binding {binding} is declared as {declared:?}, not {requested:?}")]
    BindingTypeMismatch {
        binding: u32,
        declared: ShaderObjectType,
        requested: ShaderObjectType,
    },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("write of {len} bytes at offset {offset} overruns a {size} byte buffer")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("buffer '{0}' would hold zero bytes")]
    EmptyBuffer(String),

    #[error("buffer memory is not host visible")]
    NotHostVisible,

    #[error("no swapchain image has been acquired this frame")]
    NoAcquiredImage,

    #[error("swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("no queue family supports {0:?}")]
    NoQueue(QueueUsage),

    #[error("the {0} backend is not implemented")]
    Unimplemented(&'static str),
}

/// Shorthand used by contract checks
pub(crate) fn ensure(condition: bool, error: BackendError) -> Result<(), BackendError> {
    if condition {
        Ok(())
    } else {
        Err(error)
    }
}
