//! Reference-counted GPU buffers.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::context::{BufferDescriptor, BufferId, Context};
use crate::utils::generate_uid;

/// A buffer shared between several owners.
pub type SharedBuffer = Rc<RefCell<Buffer>>;

/// Wrapper around a GPU buffer handle.
///
/// Bind groups and geometries register themselves as consumers of the
/// buffers they use. The GPU buffer is only destroyed once the last consumer
/// has been removed.
#[derive(Debug)]
pub struct Buffer {
    pub uid: u64,
    pub label: String,
    gpu_buffer: Option<BufferId>,
    size: u64,
    usage: wgpu::BufferUsages,
    consumers: HashSet<u64>,
}

impl Buffer {
    /// Creates a buffer wrapper. No GPU buffer is allocated until
    /// [`Buffer::create_buffer`] is called.
    pub fn new(label: impl Into<String>) -> Self {
        Buffer {
            uid: generate_uid(),
            label: label.into(),
            gpu_buffer: None,
            size: 0,
            usage: wgpu::BufferUsages::empty(),
            consumers: HashSet::new(),
        }
    }

    /// Creates a shared buffer wrapper.
    pub fn shared(label: impl Into<String>) -> SharedBuffer {
        Rc::new(RefCell::new(Buffer::new(label)))
    }

    /// The GPU buffer, if it has been allocated.
    pub fn gpu_buffer(&self) -> Option<BufferId> {
        self.gpu_buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> wgpu::BufferUsages {
        self.usage
    }

    /// Allocates the GPU buffer. Does nothing if it already exists.
    pub fn create_buffer(&mut self, ctx: &mut Context, size: u64, usage: wgpu::BufferUsages) {
        if self.gpu_buffer.is_some() {
            return;
        }

        self.size = size;
        self.usage = usage;
        self.gpu_buffer = Some(ctx.create_buffer(&BufferDescriptor {
            label: self.label.clone(),
            size,
            usage,
        }));
    }

    /// Writes bytes at `offset`.
    pub fn write(&self, ctx: &mut Context, offset: u64, data: &[u8]) {
        if let Some(buffer) = self.gpu_buffer {
            ctx.write_buffer(buffer, offset, data);
        }
    }

    pub fn consumers(&self) -> &HashSet<u64> {
        &self.consumers
    }

    pub fn add_consumer(&mut self, uid: u64) {
        let _ = self.consumers.insert(uid);
    }

    /// Removes a consumer and returns `true` if none is left.
    pub fn remove_consumer(&mut self, uid: u64) -> bool {
        let _ = self.consumers.remove(&uid);
        self.consumers.is_empty()
    }

    /// Removes a consumer and destroys the GPU buffer if it was the last one.
    pub fn release(&mut self, ctx: &mut Context, uid: u64) {
        if self.remove_consumer(uid) {
            self.destroy(ctx);
        }
    }

    /// Destroys the GPU buffer regardless of its consumers.
    pub fn destroy(&mut self, ctx: &mut Context) {
        if let Some(buffer) = self.gpu_buffer.take() {
            ctx.destroy_buffer(buffer);
        }
    }

    /// Forgets the GPU buffer after a device loss without destroying it.
    pub fn reset(&mut self) {
        self.gpu_buffer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessBackend;

    #[test]
    fn destroyed_once_all_consumers_are_gone() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);

        let mut buffer = Buffer::new("shared");
        buffer.create_buffer(&mut ctx, 16, wgpu::BufferUsages::UNIFORM);
        buffer.add_consumer(1);
        buffer.add_consumer(2);

        buffer.release(&mut ctx, 1);
        assert_eq!(probe.stats().buffers_destroyed, 0);
        assert!(buffer.gpu_buffer().is_some());

        buffer.release(&mut ctx, 2);
        assert_eq!(probe.stats().buffers_destroyed, 1);
        assert!(buffer.gpu_buffer().is_none());
    }

    #[test]
    fn creation_is_lazy_and_idempotent() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);

        let mut buffer = Buffer::new("lazy");
        assert!(buffer.gpu_buffer().is_none());
        buffer.create_buffer(&mut ctx, 32, wgpu::BufferUsages::STORAGE);
        buffer.create_buffer(&mut ctx, 32, wgpu::BufferUsages::STORAGE);
        assert_eq!(probe.stats().buffers_created, 1);
    }
}
