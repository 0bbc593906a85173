//! Pass model & graph (Component D, §3, §4.3). A pass list in strict submission order
//! (render passes first, then compute), each pass owning its consume/depend/injection
//! vectors and, for render passes, the cached `VkRenderPass`/framebuffer state.

use ash::vk;
use bitflags::bitflags;

use crate::attachment::AttachmentIndex;
use crate::barrier::{ConsumeAccess, ViewRange};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConsumeFlags: u8 {
        const VIEWED              = 1 << 0;
        const EXPLICIT_BLEND      = 1 << 1;
        const FIRST_USE_IN_CHAIN  = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DependFlags: u8 {
        const IS_SUBPASS        = 1 << 0;
        const NEEDS_TRANSITION  = 1 << 1;
    }
}

/// One attachment touched by a pass (§3 "Consume record").
#[derive(Debug, Clone)]
pub struct Consume {
    pub flags: ConsumeFlags,
    pub access: ConsumeAccess,
    pub stage: vk::PipelineStageFlags2,
    pub range: ViewRange,
    pub attachment: AttachmentIndex,
    /// `(pass_index, consume_index)` of the previous consume of the same attachment slot
    /// anywhere earlier in the graph, populated by warmup's single-writer graph walk (§9).
    pub prev: Option<(usize, usize)>,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    pub clear_value: Option<vk::ClearValue>,
    pub blend_state: Option<vk::PipelineColorBlendAttachmentState>,
    /// Explicit `layout(location = N)` (color) or `input_attachment_index` (input) this
    /// consume occupies within its subpass. `None` packs sequentially in consume order,
    /// matching the historical behavior for shaders with no gaps between locations.
    pub location: Option<u32>,
}

impl Consume {
    pub fn new(attachment: AttachmentIndex, access: ConsumeAccess, stage: vk::PipelineStageFlags2, range: ViewRange) -> Self {
        Self {
            flags: ConsumeFlags::empty(),
            access,
            stage,
            range,
            attachment,
            prev: None,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::UNDEFINED,
            clear_value: None,
            blend_state: None,
            location: None,
        }
    }
}

/// Identifies a dependency object (one sync-object pool, client-created via
/// `DependencyPool::new`) that a `Depend`/`Injection` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyObjectId(pub usize);

/// A cross-pass dependency (§3 "Depend record"): either a reference into a dependency
/// pool, or a plain access/stage pair the executor turns directly into a barrier.
#[derive(Debug, Clone)]
pub enum Depend {
    Object {
        dependency: DependencyObjectId,
        access: ConsumeAccess,
        stage: vk::PipelineStageFlags2,
        attachment: AttachmentIndex,
        range: ViewRange,
    },
    Plain {
        src_access: vk::AccessFlags2,
        dst_access: vk::AccessFlags2,
        src_stage: vk::PipelineStageFlags2,
        dst_stage: vk::PipelineStageFlags2,
        flags: DependFlags,
        format: Option<vk::Format>,
        attachment: Option<AttachmentIndex>,
        range: ViewRange,
        initial_layout: vk::ImageLayout,
        final_layout: vk::ImageLayout,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionKind {
    Wait,
    WaitRange,
    Signal,
    SignalRange,
}

/// An ad-hoc dependency reference issued by the client before a frame (§3, §6).
#[derive(Debug, Clone)]
pub struct Injection {
    pub kind: InjectionKind,
    pub dependency: DependencyObjectId,
    pub attachment: AttachmentIndex,
    pub range: ViewRange,
    pub stage: vk::PipelineStageFlags2,
    pub access: ConsumeAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassType {
    Render,
    Compute,
    ComputeAsync,
}

/// A `VkAttachmentDescription`-equivalent record derived by `pass_builder::warmup` (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct AttachmentDescription {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

/// One node in the pass graph. Render passes additionally carry the cached `VkRenderPass`,
/// framebuffer state, and subpass-chain linkage built by `pass_builder` (§4.3).
pub struct Pass {
    pub ty: PassType,
    pub consumes: Vec<Consume>,
    pub depends: Vec<Depend>,
    pub injections: Vec<Injection>,
    pub build_generation: u64,
    pub culled: bool,

    pub render_pass: Option<vk::RenderPass>,
    pub framebuffer_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub clear_values: Vec<vk::ClearValue>,
    pub blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    /// Per-subpass attachment description, color/input references; populated by warmup
    /// for this subpass only (the chain's attachment *array* is shared across the whole
    /// render pass and lives on the master pass, built by `pass_builder::build`).
    pub attachment_descriptions: Vec<AttachmentDescription>,
    pub color_refs: Vec<vk::AttachmentReference>,
    pub depth_stencil_ref: Option<vk::AttachmentReference>,
    pub input_refs: Vec<vk::AttachmentReference>,
    /// Whether one framebuffer exists per swapchain image (a window is the back-buffer)
    /// or just one (every attachment is a plain image), set by `pass_builder::build`.
    pub is_window_backed: bool,
    pub subpass_index: u32,
    /// Index of the chain's master pass, or `None` if this pass is its own master.
    pub master: Option<usize>,
    /// Index of the next pass in the chain, or `None` if this pass is the chain's last.
    pub next: Option<usize>,
}

impl Pass {
    pub fn new(ty: PassType) -> Self {
        Self {
            ty,
            consumes: Vec::new(),
            depends: Vec::new(),
            injections: Vec::new(),
            build_generation: 0,
            culled: false,
            render_pass: None,
            framebuffer_views: Vec::new(),
            framebuffers: Vec::new(),
            clear_values: Vec::new(),
            blend_attachments: Vec::new(),
            attachment_descriptions: Vec::new(),
            color_refs: Vec::new(),
            depth_stencil_ref: None,
            input_refs: Vec::new(),
            is_window_backed: false,
            subpass_index: 0,
            master: None,
            next: None,
        }
    }

    pub fn add_consume(&mut self, consume: Consume) -> usize {
        self.consumes.push(consume);
        self.consumes.len() - 1
    }

    pub fn add_depend(&mut self, depend: Depend) {
        self.depends.push(depend);
    }

    pub fn add_injection(&mut self, injection: Injection) {
        self.injections.push(injection);
    }

    pub fn is_chain_master(&self) -> bool {
        self.master.is_none()
    }

    pub fn is_last_in_chain(&self) -> bool {
        self.next.is_none()
    }

    pub fn is_render(&self) -> bool {
        self.ty == PassType::Render
    }
}

/// Owns every pass in strict submission order. Tracks the build-generation counter that
/// renderables compare their cached pipeline against (§4.3, §8 property 8).
pub struct PassGraph {
    passes: Vec<Pass>,
    built: bool,
    generation: u64,
}

impl PassGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            built: false,
            generation: 0,
        }
    }

    pub fn push(&mut self, pass: Pass) -> usize {
        self.passes.push(pass);
        self.invalidate();
        self.passes.len() - 1
    }

    pub fn get(&self, index: usize) -> &Pass {
        &self.passes[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Pass {
        &mut self.passes[index]
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pass> {
        self.passes.iter()
    }

    /// Any mutation to a pass's consume/depend list must call this (§4.3 "Invalidation
    /// protocol"): it forces a full rebuild of dependent passes before next use.
    pub fn invalidate(&mut self) {
        self.built = false;
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn mark_built(&mut self) {
        self.built = true;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bumps the pass-generation counter; called once per successful framebuffer rebuild
    /// (§4.3 "Every rebuild bumps a pass generation counter").
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Links a run of render-pass indices into a single subpass chain: the first becomes
    /// the chain's master (`master = None`), each subsequent pass points `master` at the
    /// head and `next` is threaded through; the last pass has `next = None`.
    pub fn link_subpass_chain(&mut self, indices: &[usize]) -> anyhow::Result<()> {
        anyhow::ensure!(!indices.is_empty(), "cannot link an empty subpass chain");
        for &index in indices {
            anyhow::ensure!(self.passes[index].is_render(), "subpass chains may only contain render passes");
        }

        let master_index = indices[0];
        self.passes[master_index].master = None;
        for (i, &index) in indices.iter().enumerate() {
            self.passes[index].master = if index == master_index { None } else { Some(master_index) };
            self.passes[index].subpass_index = i as u32;
            self.passes[index].next = indices.get(i + 1).copied();
        }
        Ok(())
    }
}

impl Default for PassGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushing_a_pass_invalidates_the_graph() {
        let mut graph = PassGraph::new();
        graph.mark_built();
        graph.push(Pass::new(PassType::Render));
        assert!(!graph.is_built());
    }

    #[test]
    fn linking_a_subpass_chain_sets_master_and_next() {
        let mut graph = PassGraph::new();
        let a = graph.push(Pass::new(PassType::Render));
        let b = graph.push(Pass::new(PassType::Render));
        let c = graph.push(Pass::new(PassType::Render));

        graph.link_subpass_chain(&[a, b, c]).unwrap();

        assert!(graph.get(a).is_chain_master());
        assert_eq!(graph.get(b).master, Some(a));
        assert_eq!(graph.get(c).master, Some(a));
        assert_eq!(graph.get(a).next, Some(b));
        assert_eq!(graph.get(b).next, Some(c));
        assert!(graph.get(c).is_last_in_chain());
    }

    #[test]
    fn chain_linking_rejects_compute_passes() {
        let mut graph = PassGraph::new();
        let a = graph.push(Pass::new(PassType::Render));
        let b = graph.push(Pass::new(PassType::Compute));
        assert!(graph.link_subpass_chain(&[a, b]).is_err());
    }

    #[test]
    fn mutating_blend_state_then_invalidating_forces_a_generation_bump_on_rebuild() {
        let mut graph = PassGraph::new();
        let index = graph.push(Pass::new(PassType::Render));
        graph.mark_built();
        let generation_before = graph.generation();

        graph.get_mut(index).blend_attachments.push(vk::PipelineColorBlendAttachmentState::default());
        graph.invalidate();
        assert!(!graph.is_built());

        graph.bump_generation();
        graph.mark_built();
        assert_eq!(graph.generation(), generation_before + 1);
    }
}
