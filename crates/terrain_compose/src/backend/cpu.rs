//! Reference backend executing every command on the CPU.
//!
//! Batches are validated on submit (handles, formats, barrier hazards, resource
//! readiness) and executed in submission order once they have been polled `latency`
//! times, which models an asynchronous device queue without threads.
use std::collections::{HashMap, VecDeque};

use glam::Vec2;
use tracing::{debug, warn};

use crate::backend::arena::Arena;
use crate::backend::command::{ClearValue, CommandBatch, CompositeOp, ComputeOp};
use crate::backend::kernels::{self, ContextSampler};
use crate::backend::{
    BackendError, BatchId, BatchStatus, BufferDesc, BufferFormat, BufferHandle, BufferView,
    ComputeBackend,
};

/// Grayscale image sampled by stamp masks, values in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct StampImage {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl StampImage {
    /// Returns `None` when `data` does not hold `width * height` samples.
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        (width > 0 && height > 0 && data.len() == width as usize * height as usize).then_some(
            Self {
                width,
                height,
                data,
            },
        )
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Option<Self> {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self::new(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Nearest sample at normalized coordinates; `0` outside `[0, 1)²`.
    pub fn sample(&self, uv: Vec2) -> f32 {
        if !(0.0..1.0).contains(&uv.x) || !(0.0..1.0).contains(&uv.y) {
            return 0.0;
        }
        let x = ((uv.x * self.width as f32) as u32).min(self.width - 1);
        let y = ((uv.y * self.height as f32) as u32).min(self.height - 1);
        self.data[(y * self.width + x) as usize].clamp(0.0, 1.0)
    }
}

#[derive(Debug)]
enum BufferData {
    F32(Vec<f32>),
    U32(Vec<u32>),
}

#[derive(Debug)]
struct Buffer {
    desc: BufferDesc,
    data: BufferData,
}

#[derive(Debug)]
enum StampState {
    Pending,
    Ready(StampImage),
}

#[derive(Debug)]
struct QueuedBatch {
    id: BatchId,
    batch: CommandBatch,
    remaining: u32,
}

/// A batch the backend has executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchRecord {
    pub id: BatchId,
    pub label: String,
    pub ops: Vec<&'static str>,
}

/// CPU implementation of [`ComputeBackend`].
#[derive(Debug)]
pub struct CpuBackend {
    buffers: Arena<Buffer>,
    stamps: HashMap<String, StampState>,
    queue: VecDeque<QueuedBatch>,
    finished: HashMap<BatchId, BatchStatus>,
    next_batch: u64,
    latency: u32,
    buffer_limit: Option<usize>,
    record_history: bool,
    history: Vec<BatchRecord>,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    /// Creates a backend whose batches complete on their first poll.
    pub fn new() -> Self {
        Self {
            buffers: Arena::new(),
            stamps: HashMap::new(),
            queue: VecDeque::new(),
            finished: HashMap::new(),
            next_batch: 0,
            latency: 1,
            buffer_limit: None,
            record_history: false,
            history: Vec::new(),
        }
    }

    /// Number of polls a batch needs before it completes.
    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency = polls;
        self
    }

    /// Caps the number of live buffers; allocations beyond it fail.
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = Some(limit);
        self
    }

    /// Keeps a [`BatchRecord`] of every executed batch.
    pub fn with_history(mut self, record: bool) -> Self {
        self.record_history = record;
        self
    }

    pub fn set_buffer_limit(&mut self, limit: Option<usize>) {
        self.buffer_limit = limit;
    }

    /// Registers a stamp that is known but not uploaded yet.
    pub fn declare_stamp(&mut self, name: impl Into<String>) {
        self.stamps.insert(name.into(), StampState::Pending);
    }

    pub fn upload_stamp(&mut self, name: impl Into<String>, image: StampImage) {
        self.stamps.insert(name.into(), StampState::Ready(image));
    }

    /// Batches executed so far, in execution order. Empty unless enabled with
    /// [`CpuBackend::with_history`].
    pub fn history(&self) -> &[BatchRecord] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn pending_batches(&self) -> usize {
        self.queue.len()
    }

    /// Settled batches whose status has not been polled yet.
    pub fn unpolled_batches(&self) -> usize {
        self.finished.len()
    }

    fn stamp(&self, name: &str) -> Option<&StampImage> {
        match self.stamps.get(name) {
            Some(StampState::Ready(image)) => Some(image),
            _ => None,
        }
    }

    fn check(
        &self,
        op_index: usize,
        handle: BufferHandle,
        format: BufferFormat,
        len: Option<usize>,
    ) -> Result<(), BackendError> {
        let buffer = self
            .buffers
            .get(handle)
            .ok_or(BackendError::InvalidHandle(handle))?;
        let len_ok = len.is_none_or(|len| buffer.desc.len() == len);
        if buffer.desc.format != format || !len_ok {
            return Err(BackendError::FormatMismatch { op_index, handle });
        }
        Ok(())
    }

    fn validate(&self, batch: &CommandBatch) -> Result<(), BackendError> {
        use BufferFormat::{F32, U32};

        let mut written: Vec<BufferHandle> = Vec::new();
        for (i, op) in batch.ops.iter().enumerate() {
            if matches!(op, ComputeOp::Barrier) {
                written.clear();
                continue;
            }
            for handle in op.reads().into_iter().chain(op.writes()) {
                if written.contains(&handle) {
                    return Err(BackendError::Hazard {
                        op_index: i,
                        handle,
                    });
                }
            }

            match op {
                ComputeOp::Clear { target, value } => {
                    let format = match value {
                        ClearValue::F32(_) => F32,
                        ClearValue::U32(_) => U32,
                    };
                    self.check(i, *target, format, None)?;
                }
                ComputeOp::Stitch {
                    target,
                    sources,
                    resolution,
                    halo,
                } => {
                    let res = *resolution as usize;
                    let width = res + 2 * *halo as usize;
                    self.check(i, *target, F32, Some(width * width))?;
                    for handle in sources.handles() {
                        self.check(i, handle, F32, Some(res * res))?;
                    }
                }
                ComputeOp::MaskApply {
                    target,
                    context,
                    frame,
                    mask,
                    ..
                } => {
                    self.check(i, *target, F32, Some(frame.len()))?;
                    self.check(i, *context, F32, None)?;
                    if let Some(resource) = mask.kernel.resource() {
                        if self.stamp(resource).is_none() {
                            return Err(BackendError::ResourceNotReady {
                                resource: resource.to_owned(),
                            });
                        }
                    }
                }
                ComputeOp::Falloff { target, frame, .. } => {
                    self.check(i, *target, F32, Some(frame.len()))?;
                }
                ComputeOp::Composite { source, target, op } => {
                    if source == target {
                        return Err(BackendError::Hazard {
                            op_index: i,
                            handle: *target,
                        });
                    }
                    let len = self.buffers.get(*source).map(|b| b.desc.len());
                    self.check(i, *source, F32, None)?;
                    let format = match op {
                        CompositeOp::Height { .. } => F32,
                        CompositeOp::Material { .. } => U32,
                    };
                    self.check(i, *target, format, len)?;
                }
                ComputeOp::Rasterize {
                    influence,
                    claim,
                    frame,
                    ..
                } => {
                    self.check(i, *influence, F32, Some(frame.len()))?;
                    self.check(i, *claim, U32, Some(frame.len()))?;
                }
                ComputeOp::ApplyFeatures {
                    claim,
                    height,
                    material,
                    ..
                } => {
                    let len = self.buffers.get(*claim).map(|b| b.desc.len());
                    self.check(i, *claim, U32, None)?;
                    self.check(i, *height, F32, len)?;
                    self.check(i, *material, U32, len)?;
                }
                ComputeOp::Barrier => {}
            }
            written.extend(op.writes());
        }
        Ok(())
    }

    fn f32_ref(&self, handle: BufferHandle) -> &[f32] {
        match self.buffers.get(handle).map(|b| &b.data) {
            Some(BufferData::F32(data)) => data,
            _ => &[],
        }
    }

    fn u32_ref(&self, handle: BufferHandle) -> &[u32] {
        match self.buffers.get(handle).map(|b| &b.data) {
            Some(BufferData::U32(data)) => data,
            _ => &[],
        }
    }

    fn take_f32(&mut self, handle: BufferHandle) -> Vec<f32> {
        match self.buffers.get_mut(handle).map(|b| &mut b.data) {
            Some(BufferData::F32(data)) => std::mem::take(data),
            _ => Vec::new(),
        }
    }

    fn take_u32(&mut self, handle: BufferHandle) -> Vec<u32> {
        match self.buffers.get_mut(handle).map(|b| &mut b.data) {
            Some(BufferData::U32(data)) => std::mem::take(data),
            _ => Vec::new(),
        }
    }

    fn put_f32(&mut self, handle: BufferHandle, value: Vec<f32>) {
        if let Some(BufferData::F32(data)) = self.buffers.get_mut(handle).map(|b| &mut b.data) {
            *data = value;
        }
    }

    fn put_u32(&mut self, handle: BufferHandle, value: Vec<u32>) {
        if let Some(BufferData::U32(data)) = self.buffers.get_mut(handle).map(|b| &mut b.data) {
            *data = value;
        }
    }

    fn execute_op(&mut self, op: &ComputeOp) {
        match op {
            ComputeOp::Clear { target, value } => {
                match (self.buffers.get_mut(*target).map(|b| &mut b.data), value) {
                    (Some(BufferData::F32(data)), ClearValue::F32(v)) => data.fill(*v),
                    (Some(BufferData::U32(data)), ClearValue::U32(v)) => data.fill(*v),
                    _ => {}
                }
            }
            ComputeOp::Stitch {
                target,
                sources,
                resolution,
                halo,
            } => {
                let mut out = self.take_f32(*target);
                let center = self.f32_ref(sources.center);
                let neighbors = sources.neighbors.map(|n| n.map(|h| self.f32_ref(h)));
                kernels::stitch(&mut out, center, neighbors, *resolution, *halo);
                self.put_f32(*target, out);
            }
            ComputeOp::MaskApply {
                target,
                context,
                frame,
                halo,
                bounds,
                mask,
                stride,
            } => {
                let mut out = self.take_f32(*target);
                let sampler = ContextSampler {
                    context: self.f32_ref(*context),
                    resolution: frame.resolution,
                    halo: *halo,
                    cell_size: frame.cell_size,
                };
                let stamp = mask.kernel.resource().and_then(|r| self.stamp(r));
                kernels::apply_mask(&mut out, frame, bounds, mask, *stride, &sampler, stamp);
                self.put_f32(*target, out);
            }
            ComputeOp::Falloff {
                target,
                frame,
                bounds,
                falloff,
                stride,
            } => {
                let mut out = self.take_f32(*target);
                kernels::apply_falloff(&mut out, frame, bounds, falloff, *stride);
                self.put_f32(*target, out);
            }
            ComputeOp::Composite { source, target, op } => match op {
                CompositeOp::Height {
                    operation,
                    amplitude,
                } => {
                    let mut out = self.take_f32(*target);
                    let source = self.f32_ref(*source);
                    kernels::composite_height(&mut out, source, *operation, *amplitude);
                    self.put_f32(*target, out);
                }
                CompositeOp::Material { operation, paint } => {
                    let mut out = self.take_u32(*target);
                    let source = self.f32_ref(*source);
                    kernels::composite_material(&mut out, source, *operation, paint);
                    self.put_u32(*target, out);
                }
            },
            ComputeOp::Rasterize {
                influence,
                claim,
                frame,
                slot,
                geometry,
            } => {
                let mut out = self.take_u32(*claim);
                kernels::rasterize(&mut out, self.f32_ref(*influence), frame, *slot, geometry);
                self.put_u32(*claim, out);
            }
            ComputeOp::ApplyFeatures {
                claim,
                height,
                material,
                features,
            } => {
                let mut h = self.take_f32(*height);
                let mut m = self.take_u32(*material);
                kernels::apply_features(self.u32_ref(*claim), &mut h, &mut m, features);
                self.put_f32(*height, h);
                self.put_u32(*material, m);
            }
            ComputeOp::Barrier => {}
        }
    }

    fn execute_front(&mut self) {
        let Some(queued) = self.queue.pop_front() else {
            return;
        };
        for op in &queued.batch.ops {
            self.execute_op(op);
        }
        debug!(
            batch = %queued.id,
            label = %queued.batch.label,
            ops = queued.batch.len(),
            "executed batch"
        );
        if self.record_history {
            self.history.push(BatchRecord {
                id: queued.id,
                label: queued.batch.label.clone(),
                ops: queued.batch.op_names(),
            });
        }
        self.finished.insert(queued.id, BatchStatus::Complete);
    }
}

impl ComputeBackend for CpuBackend {
    fn allocate(&mut self, desc: &BufferDesc) -> Result<BufferHandle, BackendError> {
        if self
            .buffer_limit
            .is_some_and(|limit| self.buffers.len() >= limit)
        {
            return Err(BackendError::OutOfMemory {
                label: desc.label.clone(),
            });
        }
        let data = match desc.format {
            BufferFormat::F32 => BufferData::F32(vec![0.0; desc.len()]),
            BufferFormat::U32 => BufferData::U32(vec![0; desc.len()]),
        };
        Ok(self.buffers.insert(Buffer {
            desc: desc.clone(),
            data,
        }))
    }

    fn release(&mut self, handle: BufferHandle) -> bool {
        self.buffers.remove(handle).is_some()
    }

    fn is_resource_ready(&self, resource: &str) -> bool {
        self.stamp(resource).is_some()
    }

    fn submit(&mut self, batch: CommandBatch) -> BatchId {
        let id = BatchId(self.next_batch);
        self.next_batch += 1;
        match self.validate(&batch) {
            Ok(()) => self.queue.push_back(QueuedBatch {
                id,
                batch,
                remaining: self.latency,
            }),
            Err(err) => {
                warn!(batch = %id, label = %batch.label, "rejected batch: {err}");
                self.finished.insert(id, BatchStatus::Failed(err));
            }
        }
        id
    }

    fn poll(&mut self, batch: BatchId) -> BatchStatus {
        if let Some(status) = self.finished.remove(&batch) {
            return status;
        }
        let Some(position) = self.queue.iter().position(|q| q.id == batch) else {
            return BatchStatus::Failed(BackendError::UnknownBatch(batch));
        };
        let queued = &mut self.queue[position];
        queued.remaining = queued.remaining.saturating_sub(1);
        if queued.remaining > 0 {
            return BatchStatus::Pending;
        }
        for _ in 0..=position {
            self.execute_front();
        }
        self.finished.remove(&batch);
        BatchStatus::Complete
    }

    fn synchronize(&mut self) {
        while !self.queue.is_empty() {
            self.execute_front();
        }
    }

    fn read(&self, handle: BufferHandle) -> Option<BufferView<'_>> {
        self.buffers.get(handle).map(|b| match &b.data {
            BufferData::F32(data) => BufferView::F32(data),
            BufferData::U32(data) => BufferView::U32(data),
        })
    }

    fn live_buffers(&self) -> usize {
        self.buffers.len()
    }
}
