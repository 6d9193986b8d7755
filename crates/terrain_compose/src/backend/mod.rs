//! Compute backend interface.
//!
//! The compositor never touches buffer memory itself. It records [`CommandBatch`]es of
//! typed [`ComputeOp`]s with explicit buffer handles and barriers, submits them through
//! [`ComputeBackend`], and polls the returned [`BatchId`] for completion. A reference
//! implementation that runs every kernel on the CPU is provided by [`CpuBackend`].
pub mod arena;
pub mod command;
pub mod cpu;
pub mod kernels;

use thiserror::Error;

pub use arena::Arena;
pub use command::{
    ClearValue, CommandBatch, CompositeOp, ComputeOp, RegionFrame, StitchSources,
};
pub use cpu::{CpuBackend, StampImage};

/// Generational handle to a backend buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle {
    index: u32,
    generation: u32,
}

impl BufferHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buf#{}v{}", self.index, self.generation)
    }
}

/// Element type of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferFormat {
    F32,
    U32,
}

/// Allocation request for a 2D buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub width: u32,
    pub height: u32,
    pub format: BufferFormat,
    /// Debug label used in logs and errors.
    pub label: String,
}

impl BufferDesc {
    pub fn f32(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: BufferFormat::F32,
            label: label.into(),
        }
    }

    pub fn u32(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: BufferFormat::U32,
            label: label.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identifier of a submitted batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "batch#{}", self.0)
    }
}

/// Completion state of a submitted batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Complete,
    Failed(BackendError),
}

/// Errors reported by a compute backend.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("out of buffer memory allocating '{label}'")]
    OutOfMemory { label: String },

    #[error("invalid buffer handle {0}")]
    InvalidHandle(BufferHandle),

    #[error("resource '{resource}' is not ready")]
    ResourceNotReady { resource: String },

    #[error("op {op_index} touches {handle} written since the last barrier")]
    Hazard { op_index: usize, handle: BufferHandle },

    #[error("buffer {handle} has the wrong format or size for op {op_index}")]
    FormatMismatch { op_index: usize, handle: BufferHandle },

    #[error("unknown batch {0}")]
    UnknownBatch(BatchId),
}

/// Read-only view of a buffer's contents.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BufferView<'a> {
    F32(&'a [f32]),
    U32(&'a [u32]),
}

impl<'a> BufferView<'a> {
    pub fn as_f32(&self) -> Option<&'a [f32]> {
        match *self {
            BufferView::F32(data) => Some(data),
            BufferView::U32(_) => None,
        }
    }

    pub fn as_u32(&self) -> Option<&'a [u32]> {
        match *self {
            BufferView::U32(data) => Some(data),
            BufferView::F32(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BufferView::F32(data) => data.len(),
            BufferView::U32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw little-endian bytes, four per element.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            BufferView::F32(data) => data.iter().flat_map(|v| v.to_le_bytes()).collect(),
            BufferView::U32(data) => data.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }
}

/// Asynchronous executor of command batches.
///
/// Implementations may run submitted work in any order or degree of parallelism as long
/// as every batch honors its internal barriers. Callers order batches against each other
/// by waiting for [`BatchStatus::Complete`] before submitting dependent work.
pub trait ComputeBackend {
    /// Allocates a zero-initialized buffer.
    fn allocate(&mut self, desc: &BufferDesc) -> Result<BufferHandle, BackendError>;

    /// Releases a buffer. Returns `false` for stale or unknown handles.
    fn release(&mut self, handle: BufferHandle) -> bool;

    /// Whether an external resource (e.g. a stamp image) can be sampled.
    fn is_resource_ready(&self, resource: &str) -> bool;

    fn submit(&mut self, batch: CommandBatch) -> BatchId;

    /// Advances and reports a batch. A settled status is reported once; the backend may
    /// forget the batch afterwards.
    fn poll(&mut self, batch: BatchId) -> BatchStatus;

    /// Blocks until every submitted batch has finished.
    fn synchronize(&mut self);

    fn read(&self, handle: BufferHandle) -> Option<BufferView<'_>>;

    /// Number of buffers currently allocated.
    fn live_buffers(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_bytes_are_little_endian() {
        let data = [1u32, 0x0102_0304];
        let bytes = BufferView::U32(&data).to_le_bytes();
        assert_eq!(bytes, vec![1, 0, 0, 0, 4, 3, 2, 1]);
        let floats = [1.0f32];
        assert_eq!(BufferView::F32(&floats).to_le_bytes(), 1.0f32.to_le_bytes().to_vec());
    }

    #[test]
    fn handle_display_includes_generation() {
        assert_eq!(BufferHandle::new(3, 2).to_string(), "buf#3v2");
    }
}
