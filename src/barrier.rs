//! Barrier derivation (§4.6, normative details). Pure functions over plain data — no
//! Vulkan handles are touched here, only the `ash::vk` value types needed to describe a
//! barrier. Callers (the dependency pool, the frame executor) turn the results into actual
//! `cmd_pipeline_barrier2` calls.

use ash::vk;
use bitflags::bitflags;

use crate::vulkan::resource::{format_has_depth, format_has_stencil};

bitflags! {
    /// Access-kind bits carried on a consume or a depend record (§3). Distinct from
    /// `vk::AccessFlags2` because a consume needs to express intent ("this is an
    /// attachment input", "this may be discarded") that Vulkan's own access flags don't
    /// directly carry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConsumeAccess: u32 {
        const READ              = 1 << 0;
        const WRITE              = 1 << 1;
        const ATTACHMENT_WRITE   = 1 << 2;
        const ATTACHMENT_INPUT   = 1 << 3;
        const STORAGE_READ       = 1 << 4;
        const STORAGE_WRITE      = 1 << 5;
        const TRANSFER_READ      = 1 << 6;
        const TRANSFER_WRITE     = 1 << 7;
        const SHADER_READ        = 1 << 8;
        const DISCARD            = 1 << 9;
        const ASYNC_COMPUTE      = 1 << 10;
        const CONCURRENT_SHARED  = 1 << 11;
    }
}

/// A view range over an image resource. `level_count`/`layer_count` of `0` mean "to the
/// end", matching the spec's "zero = remaining" convention (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRange {
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl ViewRange {
    pub fn whole(aspect_mask: vk::ImageAspectFlags) -> Self {
        Self {
            aspect_mask,
            base_mip_level: 0,
            level_count: 0,
            base_array_layer: 0,
            layer_count: 0,
        }
    }

    pub(crate) fn to_vulkan_subresource_range(self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect_mask)
            .base_mip_level(self.base_mip_level)
            .level_count(if self.level_count == 0 {
                vk::REMAINING_MIP_LEVELS
            } else {
                self.level_count
            })
            .base_array_layer(self.base_array_layer)
            .layer_count(if self.layer_count == 0 {
                vk::REMAINING_ARRAY_LAYERS
            } else {
                self.layer_count
            })
    }
}

/// A mask writes if any of {write, attachment-write, storage-write, transfer-write} bits
/// are set (§4.6).
pub fn access_writes(access: ConsumeAccess) -> bool {
    access.intersects(
        ConsumeAccess::WRITE
            | ConsumeAccess::ATTACHMENT_WRITE
            | ConsumeAccess::STORAGE_WRITE
            | ConsumeAccess::TRANSFER_WRITE,
    )
}

/// Maps a `ConsumeAccess` to the Vulkan `AccessFlags2` bits it implies.
pub fn to_vulkan_access(access: ConsumeAccess) -> vk::AccessFlags2 {
    let mut out = vk::AccessFlags2::empty();
    if access.contains(ConsumeAccess::READ) {
        out |= vk::AccessFlags2::MEMORY_READ;
    }
    if access.contains(ConsumeAccess::WRITE) {
        out |= vk::AccessFlags2::MEMORY_WRITE;
    }
    if access.contains(ConsumeAccess::ATTACHMENT_WRITE) {
        out |= vk::AccessFlags2::COLOR_ATTACHMENT_WRITE | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if access.contains(ConsumeAccess::ATTACHMENT_INPUT) {
        out |= vk::AccessFlags2::INPUT_ATTACHMENT_READ;
    }
    if access.contains(ConsumeAccess::STORAGE_READ) {
        out |= vk::AccessFlags2::SHADER_STORAGE_READ;
    }
    if access.contains(ConsumeAccess::STORAGE_WRITE) {
        out |= vk::AccessFlags2::SHADER_STORAGE_WRITE;
    }
    if access.contains(ConsumeAccess::TRANSFER_READ) {
        out |= vk::AccessFlags2::TRANSFER_READ;
    }
    if access.contains(ConsumeAccess::TRANSFER_WRITE) {
        out |= vk::AccessFlags2::TRANSFER_WRITE;
    }
    if access.contains(ConsumeAccess::SHADER_READ) {
        out |= vk::AccessFlags2::SHADER_READ;
    }
    out
}

/// Pipeline-stage mask derived from (access, is-compute-pass, format): depth/stencil
/// formats select depth/stencil-attachment output stages, color formats select
/// color-attachment output stages, `None` (no format, e.g. a buffer) selects generic
/// transfer/compute stages (§4.6).
pub fn pipeline_stage_mask(
    access: ConsumeAccess,
    is_compute: bool,
    format: Option<vk::Format>,
) -> vk::PipelineStageFlags2 {
    if access.intersects(ConsumeAccess::ATTACHMENT_WRITE | ConsumeAccess::ATTACHMENT_INPUT) {
        return match format {
            Some(f) if format_has_depth(f) => {
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
            }
            _ => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        };
    }
    if access.intersects(ConsumeAccess::TRANSFER_READ | ConsumeAccess::TRANSFER_WRITE) {
        return vk::PipelineStageFlags2::COPY;
    }
    if access.intersects(ConsumeAccess::STORAGE_READ | ConsumeAccess::STORAGE_WRITE) {
        return if is_compute {
            vk::PipelineStageFlags2::COMPUTE_SHADER
        } else {
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::VERTEX_SHADER
        };
    }
    if access.contains(ConsumeAccess::SHADER_READ) {
        return if is_compute {
            vk::PipelineStageFlags2::COMPUTE_SHADER
        } else {
            vk::PipelineStageFlags2::FRAGMENT_SHADER
        };
    }
    if is_compute {
        vk::PipelineStageFlags2::COMPUTE_SHADER
    } else {
        vk::PipelineStageFlags2::ALL_COMMANDS
    }
}

/// Image layout derived from (access, format, is-window) (§4.6).
pub fn image_layout_for(access: ConsumeAccess, format: Option<vk::Format>, is_window: bool) -> vk::ImageLayout {
    if access.contains(ConsumeAccess::DISCARD) {
        return vk::ImageLayout::UNDEFINED;
    }
    if access.contains(ConsumeAccess::ATTACHMENT_WRITE) {
        return match format {
            Some(f) if format_has_depth(f) => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            _ if is_window => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            _ => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
    }
    if access.contains(ConsumeAccess::SHADER_READ) || access.contains(ConsumeAccess::ATTACHMENT_INPUT) {
        return vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    }
    if access.contains(ConsumeAccess::TRANSFER_READ) {
        return vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
    }
    if access.contains(ConsumeAccess::TRANSFER_WRITE) {
        return vk::ImageLayout::TRANSFER_DST_OPTIMAL;
    }
    if is_window && access.contains(ConsumeAccess::READ) && !access_writes(access) {
        return vk::ImageLayout::PRESENT_SRC_KHR;
    }
    vk::ImageLayout::GENERAL
}

fn format_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if format_has_depth(format) {
        let mut aspect = vk::ImageAspectFlags::DEPTH;
        if format_has_stencil(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        aspect
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Merges two consecutive consumes of the same attachment into the range their shared
/// barrier must cover (§4.6 "Range merging for consecutive consumes").
pub fn merge_range(prev: ViewRange, cur: ViewRange, format: vk::Format) -> ViewRange {
    let aspect_mask = (prev.aspect_mask | cur.aspect_mask) & format_aspect_mask(format);
    let base_mip_level = prev.base_mip_level.min(cur.base_mip_level);
    let base_array_layer = prev.base_array_layer.min(cur.base_array_layer);

    let level_count = if prev.level_count == 0 || cur.level_count == 0 {
        0
    } else {
        let prev_end = prev.base_mip_level + prev.level_count;
        let cur_end = cur.base_mip_level + cur.level_count;
        prev_end.max(cur_end) - base_mip_level
    };

    let layer_count = if prev.layer_count == 0 || cur.layer_count == 0 {
        0
    } else {
        let prev_end = prev.base_array_layer + prev.layer_count;
        let cur_end = cur.base_array_layer + cur.layer_count;
        prev_end.max(cur_end) - base_array_layer
    };

    ViewRange {
        aspect_mask,
        base_mip_level,
        level_count,
        base_array_layer,
        layer_count,
    }
}

/// Queue-family transfer is skipped when the resource is concurrent-shared or when the
/// signaling side discards (§4.6).
pub fn needs_queue_family_transfer(src_family: u32, dst_family: u32, access: ConsumeAccess) -> bool {
    if access.contains(ConsumeAccess::CONCURRENT_SHARED) || access.contains(ConsumeAccess::DISCARD) {
        return false;
    }
    src_family != dst_family
}

pub struct ImageBarrierDescriptor {
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
    pub image: vk::Image,
    pub range: ViewRange,
}

pub fn build_image_barrier(desc: &ImageBarrierDescriptor) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_access_mask(desc.src_access)
        .dst_access_mask(desc.dst_access)
        .src_stage_mask(desc.src_stage)
        .dst_stage_mask(desc.dst_stage)
        .old_layout(desc.old_layout)
        .new_layout(desc.new_layout)
        .src_queue_family_index(desc.src_queue_family)
        .dst_queue_family_index(desc.dst_queue_family)
        .image(desc.image)
        .subresource_range(desc.range.to_vulkan_subresource_range())
}

pub fn build_execution_barrier(
    src_access: vk::AccessFlags2,
    dst_access: vk::AccessFlags2,
    src_stage: vk::PipelineStageFlags2,
    dst_stage: vk::PipelineStageFlags2,
) -> vk::MemoryBarrier2<'static> {
    vk::MemoryBarrier2::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_stage_mask(src_stage)
        .dst_stage_mask(dst_stage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_write_is_a_write() {
        assert!(access_writes(ConsumeAccess::ATTACHMENT_WRITE));
        assert!(access_writes(ConsumeAccess::STORAGE_WRITE));
        assert!(access_writes(ConsumeAccess::TRANSFER_WRITE));
        assert!(!access_writes(ConsumeAccess::READ | ConsumeAccess::SHADER_READ));
    }

    #[test]
    fn discard_forces_undefined_layout_regardless_of_other_bits() {
        let layout = image_layout_for(
            ConsumeAccess::DISCARD | ConsumeAccess::ATTACHMENT_WRITE,
            Some(vk::Format::B8G8R8A8_UNORM),
            true,
        );
        assert_eq!(layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn range_merge_takes_the_min_base_and_max_extent() {
        let prev = ViewRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let cur = ViewRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 1,
            level_count: 2,
            base_array_layer: 0,
            layer_count: 1,
        };
        let merged = merge_range(prev, cur, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(merged.base_mip_level, 0);
        assert_eq!(merged.level_count, 3);
    }

    #[test]
    fn zero_count_on_either_side_propagates_as_remaining() {
        let prev = ViewRange::whole(vk::ImageAspectFlags::COLOR);
        let cur = ViewRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 1,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let merged = merge_range(prev, cur, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(merged.level_count, 0);
    }

    #[test]
    fn concurrent_shared_never_needs_a_queue_family_transfer() {
        assert!(!needs_queue_family_transfer(0, 1, ConsumeAccess::CONCURRENT_SHARED));
        assert!(!needs_queue_family_transfer(0, 1, ConsumeAccess::DISCARD));
        assert!(needs_queue_family_transfer(0, 1, ConsumeAccess::empty()));
        assert!(!needs_queue_family_transfer(0, 0, ConsumeAccess::empty()));
    }
}
