//! The device context.
//!
//! The context owns the GPU backend together with every per-device cache: the
//! bind group layout cache, the buffer binding structural layout cache and the
//! queue of tasks that must run once the current frame has been submitted.
//! All of them are cleared together when the device is lost.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::context::{
    BindGroupEntry, BindGroupId, BindGroupLayoutEntry, BindGroupLayoutId, BufferDescriptor,
    BufferId, CommandEncoder, GpuBackend, SamplerDescriptor, SamplerId, TextureDescriptor,
    TextureId,
};
use crate::error::{Error, Result};
use crate::resource::{Binding, BindingResets, StructLayout};

/// Work deferred until the current frame has been submitted.
pub enum PostSubmitTask {
    /// Clears the given reset flags on each binding still alive.
    ClearBindingResets(Vec<Weak<RefCell<Binding>>>, BindingResets),
    /// Destroys a buffer that may still be referenced by the recorded frame.
    DestroyBuffer(BufferId),
    /// Destroys a texture that may still be referenced by the recorded frame.
    DestroyTexture(TextureId),
}

/// The device context shared by every GPU-facing component.
pub struct Context {
    backend: Box<dyn GpuBackend>,
    bind_group_layouts: HashMap<String, BindGroupLayoutId>,
    struct_layouts: HashMap<String, Rc<StructLayout>>,
    post_submit_tasks: Vec<PostSubmitTask>,
    frame: u64,
    recording: bool,
    lost: bool,
}

impl Context {
    /// Creates a context driving the given backend.
    pub fn new(backend: impl GpuBackend + 'static) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    /// Creates a context from an already boxed backend.
    pub fn from_boxed(backend: Box<dyn GpuBackend>) -> Self {
        log::debug!("curtains: creating device context on `{}`", backend.name());

        Context {
            backend,
            bind_group_layouts: HashMap::new(),
            struct_layouts: HashMap::new(),
            post_submit_tasks: Vec::new(),
            frame: 0,
            recording: false,
            lost: false,
        }
    }

    /// The underlying GPU backend.
    pub fn backend(&self) -> &dyn GpuBackend {
        &*self.backend
    }

    /// The underlying GPU backend.
    pub fn backend_mut(&mut self) -> &mut dyn GpuBackend {
        &mut *self.backend
    }

    /// The index of the frame being recorded, or of the last submitted one.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// `true` between [`Context::begin_frame`] and [`Context::submit`].
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// `true` if the device has been lost and not restored yet.
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Starts a new frame and returns the encoder it must be recorded into.
    pub fn begin_frame(&mut self) -> Result<CommandEncoder> {
        if self.lost {
            return Err(Error::DeviceLost);
        }

        self.frame += 1;
        self.recording = true;
        Ok(CommandEncoder::new(format!("frame {}", self.frame)))
    }

    /// Submits a recorded frame, then runs every queued post-submit task.
    pub fn submit(&mut self, encoder: CommandEncoder) -> Result<()> {
        self.recording = false;

        if self.lost {
            self.post_submit_tasks.clear();
            return Err(Error::DeviceLost);
        }

        let result = self.backend.submit(encoder);
        self.run_post_submit_tasks();
        result
    }

    /// Queues a task to run after the next submission.
    pub fn queue_post_submit(&mut self, task: PostSubmitTask) {
        self.post_submit_tasks.push(task);
    }

    /// Number of tasks waiting for the next submission.
    pub fn pending_post_submit_tasks(&self) -> usize {
        self.post_submit_tasks.len()
    }

    fn run_post_submit_tasks(&mut self) {
        for task in std::mem::take(&mut self.post_submit_tasks) {
            match task {
                PostSubmitTask::ClearBindingResets(bindings, resets) => {
                    for binding in bindings.iter().filter_map(Weak::upgrade) {
                        binding.borrow_mut().base_mut().resets.remove(resets);
                    }
                }
                PostSubmitTask::DestroyBuffer(buffer) => self.backend.destroy_buffer(buffer),
                PostSubmitTask::DestroyTexture(texture) => self.backend.destroy_texture(texture),
            }
        }
    }

    /// Creates a GPU buffer.
    pub fn create_buffer(&mut self, desc: &BufferDescriptor) -> BufferId {
        log::debug!(
            "curtains: creating buffer `{}` ({} bytes, {:?})",
            desc.label,
            desc.size,
            desc.usage
        );
        self.backend.create_buffer(desc)
    }

    /// Writes data to a buffer through the queue.
    pub fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        if !self.lost {
            self.backend.write_buffer(buffer, offset, data);
        }
    }

    /// Destroys a buffer, deferring the call until after submission if a
    /// frame is being recorded.
    pub fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.lost {
            return;
        }

        if self.recording {
            self.queue_post_submit(PostSubmitTask::DestroyBuffer(buffer));
        } else {
            self.backend.destroy_buffer(buffer);
        }
    }

    /// Creates a texture.
    pub fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureId {
        log::debug!(
            "curtains: creating texture `{}` ({}x{}, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        self.backend.create_texture(desc)
    }

    /// Uploads tightly packed texels to a texture.
    pub fn write_texture(&mut self, texture: TextureId, data: &[u8], width: u32, height: u32) {
        if !self.lost {
            self.backend.write_texture(texture, data, width, height);
        }
    }

    /// Destroys a texture, deferring the call until after submission if a
    /// frame is being recorded.
    pub fn destroy_texture(&mut self, texture: TextureId) {
        if self.lost {
            return;
        }

        if self.recording {
            self.queue_post_submit(PostSubmitTask::DestroyTexture(texture));
        } else {
            self.backend.destroy_texture(texture);
        }
    }

    pub fn create_sampler(&mut self, desc: &SamplerDescriptor) -> SamplerId {
        log::debug!("curtains: creating sampler `{}`", desc.label);
        self.backend.create_sampler(desc)
    }

    /// Creates a bind group. Bind groups embed live resources and are never
    /// cached.
    pub fn create_bind_group(
        &mut self,
        label: &str,
        layout: BindGroupLayoutId,
        entries: &[BindGroupEntry],
    ) -> BindGroupId {
        log::debug!("curtains: creating bind group `{}`", label);
        self.backend.create_bind_group(label, layout, entries)
    }

    /// Returns the cached bind group layout for `key`, creating it on a miss.
    pub fn get_or_create_bind_group_layout(
        &mut self,
        key: &str,
        label: &str,
        entries: &[BindGroupLayoutEntry],
    ) -> BindGroupLayoutId {
        if let Some(layout) = self.bind_group_layouts.get(key) {
            log::debug!("curtains: bind group layout cache hit for `{}`", label);
            return *layout;
        }

        let layout = self.backend.create_bind_group_layout(label, entries);
        let _ = self.bind_group_layouts.insert(key.to_string(), layout);
        layout
    }

    /// Number of distinct bind group layouts created on this device.
    pub fn cached_bind_group_layouts(&self) -> usize {
        self.bind_group_layouts.len()
    }

    /// Buffer binding layouts computed so far, shared by structurally
    /// identical bindings.
    pub fn struct_layouts(&mut self) -> &mut HashMap<String, Rc<StructLayout>> {
        &mut self.struct_layouts
    }

    /// Marks the device as lost.
    ///
    /// Every handle created so far is considered gone: caches are dropped and
    /// no destroy call is forwarded to the backend.
    pub fn lose(&mut self) {
        if self.lost {
            return;
        }

        log::warn!("curtains: device `{}` lost", self.backend.name());
        self.lost = true;
        self.recording = false;
        self.bind_group_layouts.clear();
        self.post_submit_tasks.clear();
    }

    /// Installs a fresh backend after a device loss.
    ///
    /// Calling this on a context that is not lost only swaps the backend if
    /// one is given, so repeated restorations are harmless.
    pub fn restore(&mut self, backend: Option<Box<dyn GpuBackend>>) {
        if let Some(backend) = backend {
            log::info!("curtains: restoring device context on `{}`", backend.name());
            self.backend = backend;
            self.bind_group_layouts.clear();
            self.post_submit_tasks.clear();
        }

        self.lost = false;
    }
}
