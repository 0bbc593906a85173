//! Virtual-frame pipeline and render-graph executor: a ring of in-flight frames, swapchain
//! acquire/recreate handling, a pass graph merged into subpass chains, barrier derivation
//! from consume/depend metadata, and graphics+compute submission with presentation.
//!
//! The public surface is [`renderer::Renderer`]/[`renderer::Frame`]: bring one up against a
//! window, build a [`pass::PassGraph`] describing the frame's passes, acquire a frame,
//! record through a [`recorder::Recorder`], and submit. Dependency objects
//! ([`pass::DependencyObjectId`]) thread cross-pass synchronization, including across the
//! graphics/compute queue boundary, through [`sync_pool::DependencyPool`].

mod attachment;
mod barrier;
mod collaborators;
mod config;
mod error;
mod executor;
mod frame;
mod pass;
mod pass_builder;
mod recorder;
mod renderer;
mod swapchain;
mod sync_pool;
mod vulkan;

pub use attachment::{AttachmentIndex, AttachmentRegistry, AttachmentSlot};
pub use config::RendererConfig;
pub use error::RenderError;
pub use pass::{
    AttachmentDescription, Consume, ConsumeFlags, Depend, DependFlags, DependencyObjectId, Injection, InjectionKind, Pass, PassGraph,
    PassType,
};
pub use recorder::Recorder;
pub use renderer::{Frame, Renderer};
pub use swapchain::{RecreateFlags, WindowId};
pub use sync_pool::{DependencyPool, InjectionId, ResourceRef, SyncStage};

pub use barrier::{ConsumeAccess, ViewRange};

/// The allocator/resource layer is an out-of-scope collaborator (§6), but `Image` itself
/// must be nameable here since `AttachmentSlot::Image` carries one.
pub use vulkan::resource::{Image, ImageDescriptor};

/// Re-exported so callers can build `vk::*` values (clear colors, pipeline stages, formats)
/// without an independent `ash` dependency of their own.
pub use ash::vk;
