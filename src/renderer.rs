//! Top-level renderer handle (§6 "the core surfaces to higher layers"). Thin ergonomic
//! wrapper over the frame executor: `renderer.acquire()` returns a `Frame` borrowing the
//! renderer for the duration of recording, consumed by exactly one of `submit`/`clear`
//! (§8 property 1, "frame conservation").

use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::attachment::{AttachmentIndex, AttachmentRegistry};
use crate::config::RendererConfig;
use crate::executor::FrameExecutor;
use crate::pass::{DependencyObjectId, PassGraph};
use crate::recorder::Recorder;
use crate::swapchain::RecreateFlags;
use crate::vulkan::device::DeviceShared;

/// Owns the frame executor and every dependency object created against it. Construction
/// brings up the Vulkan instance/device, the swapchain coordinator, the virtual-frame
/// ring, and the pipeline/descriptor collaborators; nothing here touches global mutable
/// state (§9 "the renderer is an explicit handle").
pub struct Renderer {
    executor: FrameExecutor,
}

impl Renderer {
    /// Brings up the Vulkan device against the given window and hands the result to the
    /// frame executor. `window_handle`/`display_handle` come from the host's windowing
    /// layer (§6 "Window" collaborator); device/instance bring-up itself stays an internal
    /// implementation detail, not part of this crate's public surface.
    pub fn new(
        window_handle: RawWindowHandle,
        display_handle: RawDisplayHandle,
        config: RendererConfig,
        descriptor_pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let device = Arc::new(DeviceShared::new(window_handle, display_handle, config.enable_validation)?);
        Ok(Self {
            executor: FrameExecutor::new(device, config, descriptor_pool_sizes)?,
        })
    }

    /// Creates a dependency object (§6 "a dependency object with create(device,
    /// wait_capacity)"). The wait capacity itself is fixed at renderer construction
    /// (`RendererConfig::wait_credit_capacity`) and shared by every dependency object, since
    /// the core has no per-object override surface.
    pub fn create_dependency_object(&mut self) -> DependencyObjectId {
        self.executor.create_dependency_object()
    }

    pub fn register_window_attachment(&mut self) -> Result<AttachmentIndex> {
        self.executor.register_window_attachment()
    }

    pub fn attachments(&self) -> &AttachmentRegistry {
        self.executor.attachments()
    }

    pub fn attachments_mut(&mut self) -> &mut AttachmentRegistry {
        self.executor.attachments_mut()
    }

    pub fn graph_mut(&mut self) -> &mut PassGraph {
        self.executor.graph_mut()
    }

    /// Acquires the next virtual frame (§4.5 "acquire"). Consults the attachment registry
    /// and swapchain coordinator to decide whether a recreate+rebuild is needed before
    /// handing back a `Frame` the caller records and submits.
    pub fn acquire(&mut self) -> Result<Frame<'_>> {
        self.executor.acquire()?;
        Ok(Frame {
            executor: &mut self.executor,
        })
    }

    /// Waits out the current frame's fences, resetting its command pools and every given
    /// recorder's pool (used around teardown and forced recreate).
    pub fn sync_all(&mut self, recorders: &mut [&mut dyn Recorder]) -> Result<()> {
        self.executor.sync(true, recorders)
    }
}

/// A single acquired frame. Exactly one of `submit` or `clear` must be called on it
/// (§8 property 1); both consume the handle to discourage calling either twice.
pub struct Frame<'a> {
    executor: &'a mut FrameExecutor,
}

impl<'a> Frame<'a> {
    /// `frame.start`, §6. Builds the render graph if a prior pass mutation invalidated it.
    /// Most frames reach here already built (acquire rebuilds eagerly on a recreate); this
    /// covers the case where the caller added/removed passes after acquiring.
    pub fn start(&mut self) -> Result<()> {
        self.executor.ensure_built()
    }

    /// `frame.index`, §6 — the virtual-frame slot this frame occupies.
    pub fn index(&self) -> usize {
        self.executor.frame_index()
    }

    /// `frame.get_swapchain_index(attachment_index)`, §6 — the acquired swapchain image
    /// index backing `attachment`, or `None` if `attachment` isn't the window attachment or
    /// nothing was acquired this frame (e.g. a minimized window).
    pub fn get_swapchain_index(&self, attachment_index: AttachmentIndex) -> Option<u32> {
        self.executor.swapchain_image_index(attachment_index)
    }

    /// `frame.submit(deps)`, §6. Records and submits the graphics half (if `graphics_range`
    /// is given) then the compute half (if `compute_range` is given), presenting after the
    /// graphics half. Returns the recreate-flags reported by present, if anything presented.
    pub fn submit(
        self,
        graphics_range: Option<(usize, usize)>,
        compute_range: Option<(usize, usize)>,
        recorders: &mut [&mut dyn Recorder],
    ) -> Result<Vec<RecreateFlags>> {
        self.executor.submit(graphics_range, compute_range, recorders)
    }

    /// The other half of frame conservation (§8 property 1): call this instead of `submit`
    /// when the frame has nothing to record (e.g. a skipped/minimized acquire). Finalizes
    /// the frame slot without touching any dependency pool.
    pub fn clear(self) -> Result<()> {
        self.executor.clear()
    }
}
