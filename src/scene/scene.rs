//! Per-frame scheduling of compute passes and render passes.

use std::collections::HashMap;

use glamx::Vec3;

use crate::context::{ColorTarget, CommandEncoder, Context};
use crate::error::Result;
use crate::pipeline::PipelineManager;
use crate::resource::{BindGroupRef, SamplerRef};
use crate::scene::{
    Camera, ComputePass, Mesh, MeshKind, PassHook, RenderPass, RenderPassOptions, RenderTarget,
};
use crate::utils::throw_warning;

/// The bucket a render pass entry belongs to. Buckets are rendered in
/// declaration order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Feedback passes drawing into a target they read on the next frame.
    PingPong,
    /// Offscreen passes.
    RenderTarget,
    /// Passes accumulating onto the screen: selective shader passes, then
    /// the main scene pass, then global post-processing passes.
    Screen,
}

/// The render pass an entry draws with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PassSource {
    Main,
    PostProcessing,
    Target(u64),
}

/// Meshes of a pass, split by projection and transparency.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshStack {
    pub unprojected_opaque: Vec<u64>,
    pub unprojected_transparent: Vec<u64>,
    pub projected_opaque: Vec<u64>,
    pub projected_transparent: Vec<u64>,
}

impl MeshStack {
    fn list_for(&mut self, mesh: &Mesh) -> &mut Vec<u64> {
        match (mesh.is_projected(), mesh.is_transparent()) {
            (false, false) => &mut self.unprojected_opaque,
            (false, true) => &mut self.unprojected_transparent,
            (true, false) => &mut self.projected_opaque,
            (true, true) => &mut self.projected_transparent,
        }
    }

    fn lists_mut(&mut self) -> [&mut Vec<u64>; 4] {
        [
            &mut self.unprojected_opaque,
            &mut self.unprojected_transparent,
            &mut self.projected_opaque,
            &mut self.projected_transparent,
        ]
    }

    pub fn len(&self) -> usize {
        self.unprojected_opaque.len()
            + self.unprojected_transparent.len()
            + self.projected_opaque.len()
            + self.projected_transparent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every mesh in draw order.
    pub fn draw_order(&self) -> impl Iterator<Item = u64> + '_ {
        self.unprojected_opaque
            .iter()
            .chain(&self.unprojected_transparent)
            .chain(&self.projected_opaque)
            .chain(&self.projected_transparent)
            .copied()
    }

    fn remove(&mut self, uid: u64) -> bool {
        let mut removed = false;
        for list in self.lists_mut() {
            let len = list.len();
            list.retain(|other| *other != uid);
            removed |= list.len() != len;
        }
        removed
    }

    /// Sorts every list by render order, keeping insertion order among
    /// equals. Projected transparent meshes are then drawn back to front.
    fn sort(&mut self, meshes: &HashMap<u64, Mesh>, eye: Vec3) {
        let order = |uid: &u64| meshes.get(uid).map_or(0, |mesh| mesh.render_order);
        let distance = |uid: &u64| meshes.get(uid).map_or(0.0, |mesh| mesh.camera_distance(eye));

        self.unprojected_opaque.sort_by_key(order);
        self.unprojected_transparent.sort_by_key(order);
        self.projected_opaque.sort_by_key(order);
        self.projected_transparent.sort_by(|a, b| {
            order(a)
                .cmp(&order(b))
                .then_with(|| distance(b).total_cmp(&distance(a)))
        });
    }
}

/// What a render pass entry draws.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassContent {
    /// A single shader pass or ping-pong plane.
    Element(u64),
    Stack(MeshStack),
}

impl PassContent {
    fn uids(&self) -> Vec<u64> {
        match self {
            PassContent::Element(uid) => vec![*uid],
            PassContent::Stack(stack) => stack.draw_order().collect(),
        }
    }
}

/// A scheduling unit pairing a render pass and its output with what it
/// draws.
#[derive(Debug)]
pub struct RenderPassEntry {
    pub label: String,
    source: PassSource,
    /// Render target drawn into. `None` draws to the screen.
    output: Option<u64>,
    content: PassContent,
    pub render_order: i32,
    post_process: bool,
    index: usize,
    pub on_before_render: Option<PassHook>,
    pub on_after_render: Option<PassHook>,
}

impl RenderPassEntry {
    pub fn content(&self) -> &PassContent {
        &self.content
    }

    pub fn output(&self) -> Option<u64> {
        self.output
    }

    /// `true` for global shader passes, drawn after the main scene pass.
    pub fn is_post_process(&self) -> bool {
        self.post_process
    }

    fn sort_key(&self) -> (bool, i32, usize) {
        (self.post_process, self.render_order, self.index)
    }

    fn stack_mut(&mut self) -> Option<&mut MeshStack> {
        match &mut self.content {
            PassContent::Stack(stack) => Some(stack),
            PassContent::Element(_) => None,
        }
    }
}

/// Owns every drawable and schedules them each frame.
pub struct Scene {
    meshes: HashMap<u64, Mesh>,
    compute_passes: Vec<ComputePass>,
    render_targets: HashMap<u64, RenderTarget>,
    main_pass: RenderPass,
    post_processing_pass: RenderPass,
    ping_pong: Vec<RenderPassEntry>,
    render_target: Vec<RenderPassEntry>,
    screen: Vec<RenderPassEntry>,
    next_index: usize,
}

impl Scene {
    /// Creates an empty scene with its main and post-processing passes.
    pub fn new(
        main: RenderPassOptions,
        post_processing: RenderPassOptions,
        size: (u32, u32),
    ) -> Self {
        let main_entry = RenderPassEntry {
            label: "Main scene".to_string(),
            source: PassSource::Main,
            output: None,
            content: PassContent::Stack(MeshStack::default()),
            render_order: 0,
            post_process: false,
            // Sorted after every selective pass of the same render order.
            index: usize::MAX,
            on_before_render: None,
            on_after_render: None,
        };

        Scene {
            meshes: HashMap::new(),
            compute_passes: Vec::new(),
            render_targets: HashMap::new(),
            main_pass: RenderPass::new(main, size),
            post_processing_pass: RenderPass::new(post_processing, size),
            ping_pong: Vec::new(),
            render_target: Vec::new(),
            screen: vec![main_entry],
            next_index: 0,
        }
    }

    pub fn main_pass(&self) -> &RenderPass {
        &self.main_pass
    }

    pub fn main_pass_mut(&mut self) -> &mut RenderPass {
        &mut self.main_pass
    }

    pub fn post_processing_pass(&self) -> &RenderPass {
        &self.post_processing_pass
    }

    /// The entries of a bucket, in render order.
    pub fn entries(&self, kind: PassKind) -> &[RenderPassEntry] {
        match kind {
            PassKind::PingPong => &self.ping_pong,
            PassKind::RenderTarget => &self.render_target,
            PassKind::Screen => &self.screen,
        }
    }

    fn bucket_mut(&mut self, kind: PassKind) -> &mut Vec<RenderPassEntry> {
        match kind {
            PassKind::PingPong => &mut self.ping_pong,
            PassKind::RenderTarget => &mut self.render_target,
            PassKind::Screen => &mut self.screen,
        }
    }

    fn all_entries_mut(&mut self) -> impl Iterator<Item = &mut RenderPassEntry> {
        self.ping_pong
            .iter_mut()
            .chain(self.render_target.iter_mut())
            .chain(self.screen.iter_mut())
    }

    fn next_index(&mut self) -> usize {
        self.next_index += 1;
        self.next_index - 1
    }

    fn main_stack_mut(&mut self) -> Option<&mut MeshStack> {
        self.screen
            .iter_mut()
            .find(|entry| entry.source == PassSource::Main)
            .and_then(RenderPassEntry::stack_mut)
    }

    fn target_stack_mut(&mut self, target: u64) -> Option<&mut MeshStack> {
        self.render_target
            .iter_mut()
            .find(|entry| entry.output == Some(target))
            .and_then(RenderPassEntry::stack_mut)
    }

    /// Options of the render pass a mesh of `kind` drawing into `output`
    /// would use.
    pub fn pass_options(&self, kind: MeshKind, output: Option<u64>) -> &RenderPassOptions {
        if let Some(target) = output.and_then(|uid| self.render_targets.get(&uid)) {
            return target.render_pass().options();
        }

        match kind {
            MeshKind::Mesh => self.main_pass.options(),
            _ => self.post_processing_pass.options(),
        }
    }

    /// Adds a mesh to the pass matching its kind and output target.
    pub fn add_mesh(&mut self, mut mesh: Mesh) -> u64 {
        let uid = mesh.uid;

        match mesh.kind() {
            MeshKind::Mesh => {
                let target = mesh.output_target();
                if target.is_some_and(|t| !self.render_targets.contains_key(&t)) {
                    throw_warning(format!(
                        "curtains: mesh `{}` draws into an unknown render target, drawing to the screen instead",
                        mesh.label
                    ));
                    mesh.set_output_target(None);
                }

                let stack = match mesh.output_target() {
                    Some(target) => self.target_stack_mut(target),
                    None => self.main_stack_mut(),
                };
                if let Some(stack) = stack {
                    stack.list_for(&mesh).push(uid);
                }
            }
            MeshKind::ShaderPass => {
                let output = mesh.output_target().filter(|t| self.render_targets.contains_key(t));
                let global = mesh.input_target().is_none();

                let entry = RenderPassEntry {
                    label: mesh.label.clone(),
                    source: output.map_or(PassSource::PostProcessing, PassSource::Target),
                    output,
                    content: PassContent::Element(uid),
                    render_order: mesh.render_order,
                    post_process: global,
                    index: self.next_index(),
                    on_before_render: mesh
                        .render_texture()
                        .filter(|_| global)
                        .map(|texture| PassHook::CopyTargetInto(texture.clone())),
                    on_after_render: None,
                };

                self.screen.push(entry);
                self.screen.sort_by_key(RenderPassEntry::sort_key);
            }
            MeshKind::PingPongPlane => {
                let output = mesh.output_target().filter(|t| self.render_targets.contains_key(t));

                let entry = RenderPassEntry {
                    label: mesh.label.clone(),
                    source: output.map_or(PassSource::PostProcessing, PassSource::Target),
                    output,
                    content: PassContent::Element(uid),
                    render_order: mesh.render_order,
                    post_process: false,
                    index: self.next_index(),
                    on_before_render: None,
                    on_after_render: mesh
                        .render_texture()
                        .map(|texture| PassHook::CopyTargetInto(texture.clone())),
                };

                self.ping_pong.push(entry);
                self.ping_pong.sort_by_key(RenderPassEntry::sort_key);
            }
        }

        let _ = self.meshes.insert(uid, mesh);
        uid
    }

    /// Removes a mesh from the scene. The caller destroys it.
    pub fn remove_mesh(&mut self, uid: u64) -> Option<Mesh> {
        let mesh = self.meshes.remove(&uid)?;

        for entry in self.all_entries_mut() {
            if let Some(stack) = entry.stack_mut() {
                let _ = stack.remove(uid);
            }
        }
        for kind in [PassKind::PingPong, PassKind::Screen] {
            self.bucket_mut(kind)
                .retain(|entry| entry.content != PassContent::Element(uid));
        }

        Some(mesh)
    }

    /// Moves a mesh to the list of its pass stack matching its current
    /// projection and transparency.
    pub fn restack_mesh(&mut self, uid: u64) {
        let Some(mesh) = self.meshes.remove(&uid) else {
            return;
        };

        for entry in self.all_entries_mut() {
            if let Some(stack) = entry.stack_mut() {
                if stack.remove(uid) {
                    stack.list_for(&mesh).push(uid);
                }
            }
        }

        let _ = self.meshes.insert(uid, mesh);
    }

    pub fn mesh(&self, uid: u64) -> Option<&Mesh> {
        self.meshes.get(&uid)
    }

    pub fn mesh_mut(&mut self, uid: u64) -> Option<&mut Mesh> {
        self.meshes.get_mut(&uid)
    }

    pub fn meshes(&self) -> impl Iterator<Item = &Mesh> {
        self.meshes.values()
    }

    /// Adds a render target and the offscreen pass drawing its meshes.
    pub fn add_render_target(&mut self, target: RenderTarget) -> u64 {
        let uid = target.uid;
        let entry = RenderPassEntry {
            label: target.label.clone(),
            source: PassSource::Target(uid),
            output: Some(uid),
            content: PassContent::Stack(MeshStack::default()),
            render_order: 0,
            post_process: false,
            index: self.next_index(),
            on_before_render: None,
            on_after_render: None,
        };

        self.render_target.push(entry);
        let _ = self.render_targets.insert(uid, target);
        uid
    }

    /// Removes a render target. Its meshes are moved to the main scene pass.
    /// The caller destroys it.
    pub fn remove_render_target(&mut self, uid: u64) -> Option<RenderTarget> {
        let target = self.render_targets.remove(&uid)?;

        let mut orphans = Vec::new();
        self.render_target.retain(|entry| {
            if entry.output != Some(uid) {
                return true;
            }
            if let PassContent::Stack(stack) = &entry.content {
                orphans.extend(stack.draw_order());
            }
            false
        });

        for orphan in orphans {
            let Some(mesh) = self.meshes.get_mut(&orphan) else {
                continue;
            };
            mesh.set_output_target(None);

            let Some(stack) = self
                .screen
                .iter_mut()
                .find(|entry| entry.source == PassSource::Main)
                .and_then(RenderPassEntry::stack_mut)
            else {
                continue;
            };
            stack.list_for(mesh).push(orphan);
        }

        for entry in self.all_entries_mut() {
            if entry.output == Some(uid) {
                entry.output = None;
                entry.source = PassSource::PostProcessing;
            }
        }

        Some(target)
    }

    pub fn render_target(&self, uid: u64) -> Option<&RenderTarget> {
        self.render_targets.get(&uid)
    }

    pub fn render_target_mut(&mut self, uid: u64) -> Option<&mut RenderTarget> {
        self.render_targets.get_mut(&uid)
    }

    /// Adds a compute pass, run before every render pass.
    pub fn add_compute_pass(&mut self, pass: ComputePass) -> u64 {
        let uid = pass.uid;
        self.compute_passes.push(pass);
        self.compute_passes.sort_by_key(|pass| pass.render_order);
        uid
    }

    /// Removes a compute pass. The caller destroys it.
    pub fn remove_compute_pass(&mut self, uid: u64) -> Option<ComputePass> {
        let position = self.compute_passes.iter().position(|pass| pass.uid == uid)?;
        Some(self.compute_passes.remove(position))
    }

    pub fn compute_pass(&self, uid: u64) -> Option<&ComputePass> {
        self.compute_passes.iter().find(|pass| pass.uid == uid)
    }

    pub fn compute_pass_mut(&mut self, uid: u64) -> Option<&mut ComputePass> {
        self.compute_passes.iter_mut().find(|pass| pass.uid == uid)
    }

    /// Runs the mesh hooks, updates every world matrix, then the mesh
    /// matrices and frustum tests.
    pub fn on_before_render(&mut self, camera: &Camera, camera_changed: bool) {
        for mesh in self.meshes.values_mut() {
            mesh.run_on_before_render();
        }

        for mesh in self.meshes.values_mut() {
            mesh.update_matrix_stack();
        }

        for mesh in self.meshes.values_mut() {
            mesh.update_matrices(camera, camera_changed);
            if mesh.visible {
                mesh.check_frustum(camera);
            }
        }
    }

    /// Records the compute passes, then every render pass bucket.
    pub fn render(
        &mut self,
        ctx: &mut Context,
        manager: &mut PipelineManager,
        encoder: &mut CommandEncoder,
        camera: &Camera,
        camera_bind_group: &BindGroupRef,
        default_sampler: &SamplerRef,
    ) -> Result<()> {
        for pass in &mut self.compute_passes {
            pass.render(ctx, manager, encoder)?;
        }

        let mut frame = FrameState {
            eye: camera.position(),
            camera_bind_group,
            default_sampler,
            screen_cleared: false,
        };

        for kind in [PassKind::PingPong, PassKind::RenderTarget, PassKind::Screen] {
            let mut entries = std::mem::take(self.bucket_mut(kind));

            let mut result = Ok(());
            for entry in &mut entries {
                result = self.render_entry(ctx, manager, encoder, entry, &mut frame);
                if result.is_err() {
                    break;
                }
            }

            *self.bucket_mut(kind) = entries;
            result?;
        }

        Ok(())
    }

    fn has_content(&self, entry: &RenderPassEntry) -> bool {
        match &entry.content {
            PassContent::Element(uid) => self.meshes.get(uid).is_some_and(|mesh| mesh.visible),
            PassContent::Stack(stack) => !stack.is_empty(),
        }
    }

    fn render_entry(
        &mut self,
        ctx: &mut Context,
        manager: &mut PipelineManager,
        encoder: &mut CommandEncoder,
        entry: &mut RenderPassEntry,
        frame: &mut FrameState<'_>,
    ) -> Result<()> {
        if !self.has_content(entry) {
            return Ok(());
        }

        for uid in entry.content.uids() {
            if let Some(mesh) = self.meshes.get_mut(&uid) {
                mesh.prepare(
                    ctx,
                    manager,
                    Some(frame.camera_bind_group),
                    Some(frame.default_sampler),
                )?;
            }
        }

        if let PassContent::Stack(stack) = &mut entry.content {
            stack.sort(&self.meshes, frame.eye);
        }

        let output = match entry.output {
            Some(uid) => match self.render_targets.get(&uid).and_then(|t| t.output(ctx)) {
                Some(output) => output,
                None => return Ok(()),
            },
            None => ColorTarget::Surface,
        };

        if let Some(hook) = &mut entry.on_before_render {
            hook.run(ctx, encoder, ColorTarget::Surface);
        }

        let render_pass = match entry.source {
            PassSource::Main => &mut self.main_pass,
            PassSource::PostProcessing => &mut self.post_processing_pass,
            PassSource::Target(uid) => match self.render_targets.get_mut(&uid) {
                Some(target) => target.render_pass_mut(),
                None => return Ok(()),
            },
        };

        // Screen passes accumulate: only the first one of the frame clears.
        if output == ColorTarget::Surface {
            render_pass.set_load_op(!frame.screen_cleared);
            frame.screen_cleared = true;
        }

        manager.reset_current_pipeline();
        let mut pass = render_pass.begin(ctx, encoder, output);
        for uid in entry.content.uids() {
            if let Some(mesh) = self.meshes.get(&uid) {
                mesh.render(manager, &mut pass);
            }
        }
        pass.end();
        manager.reset_current_pipeline();

        if let Some(hook) = &mut entry.on_after_render {
            hook.run(ctx, encoder, output);
        }

        Ok(())
    }

    /// Resizes the passes, the render targets and the textures of shader
    /// passes.
    pub fn resize(&mut self, ctx: &mut Context, width: u32, height: u32) {
        self.main_pass.resize(ctx, width, height);
        self.post_processing_pass.resize(ctx, width, height);

        for target in self.render_targets.values_mut() {
            target.resize(ctx, width, height);
        }
        for mesh in self.meshes.values_mut() {
            mesh.resize(ctx, width, height);
        }
    }

    /// Forgets every GPU handle after a device loss.
    pub fn reset_gpu_handles(&mut self) {
        self.main_pass.reset_gpu_handles();
        self.post_processing_pass.reset_gpu_handles();

        for target in self.render_targets.values_mut() {
            target.reset_gpu_handles();
        }
        for mesh in self.meshes.values_mut() {
            mesh.reset_gpu_handles();
        }
        for pass in &mut self.compute_passes {
            pass.reset_gpu_handles();
        }
    }

    /// Destroys everything the scene owns.
    pub fn destroy(&mut self, ctx: &mut Context, manager: &mut PipelineManager) {
        for (_, mut mesh) in self.meshes.drain() {
            mesh.destroy(ctx, manager);
        }
        for mut pass in self.compute_passes.drain(..) {
            pass.destroy(ctx, manager);
        }
        for (_, mut target) in self.render_targets.drain() {
            target.destroy(ctx);
        }

        self.ping_pong.clear();
        self.render_target.clear();
        self.screen.retain(|entry| entry.source == PassSource::Main);
        if let Some(stack) = self.main_stack_mut() {
            *stack = MeshStack::default();
        }

        self.main_pass.destroy(ctx);
        self.post_processing_pass.destroy(ctx);
    }
}

struct FrameState<'a> {
    eye: Vec3,
    camera_bind_group: &'a BindGroupRef,
    default_sampler: &'a SamplerRef,
    screen_cleared: bool,
}
