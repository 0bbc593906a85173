use std::collections::HashMap;
use std::ffi::CString;
use std::mem::{align_of, size_of_val};
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::device::DeviceShared;

/// Queues of GPU objects whose Rust wrapper has already dropped, awaiting the next
/// `DeviceShared::cleanup_resources` pass (never destroyed inline from `Drop`, since the
/// object may still be referenced by in-flight command buffers).
#[derive(Default)]
pub(crate) struct ResourceHub {
    pub(crate) pending_destruction_buffers: Vec<PendingDestructionBuffer>,
    pub(crate) pending_destruction_images: Vec<PendingDestructionImage>,
    pub(crate) pending_destruction_samplers: Vec<PendingDestructionSampler>,
}

pub struct BufferDescriptor {
    pub size: u64,
    pub usage_flags: vk::BufferUsageFlags,
    pub memory_location: MemoryLocation,
}

pub struct Buffer {
    pub(crate) raw: vk::Buffer,
    pub(crate) size: u64,
    allocation: Option<Allocation>,
    device: Arc<DeviceShared>,
}

pub(crate) struct PendingDestructionBuffer {
    pub(crate) raw: vk::Buffer,
    pub(crate) allocation: Allocation,
}

impl Buffer {
    /// Writes to a CPU-visible buffer. Caller is responsible for only calling this on a
    /// buffer created with a host-visible memory location.
    pub fn write_data<T: Copy>(&self, data: &[T]) -> Result<()> {
        unsafe {
            let data_ptr = self
                .allocation
                .as_ref()
                .unwrap()
                .mapped_ptr()
                .unwrap()
                .as_ptr();

            let mut align =
                ash::util::Align::new(data_ptr, align_of::<T>() as _, size_of_val(data) as _);
            align.copy_from_slice(data);
        };

        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let allocation = self.allocation.take().unwrap();
        self.device
            .resource_hub
            .lock()
            .pending_destruction_buffers
            .push(PendingDestructionBuffer {
                raw: self.raw,
                allocation,
            });
    }
}

pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_layer_count: u32,
    pub mip_level_count: u32,
    pub format: vk::Format,
    pub image_type: vk::ImageType,
    pub usage_flags: vk::ImageUsageFlags,
    pub memory_location: MemoryLocation,
}

impl ImageDescriptor {
    pub fn new_2d_single_layer_level(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            width,
            height,
            depth: 1,
            array_layer_count: 1,
            mip_level_count: 1,
            format,
            image_type: vk::ImageType::TYPE_2D,
            usage_flags: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            memory_location: MemoryLocation::GpuOnly,
        }
    }
}

pub struct Image {
    pub(crate) raw: vk::Image,
    allocation: Option<Allocation>,
    pub(crate) raw_view: vk::ImageView,
    device: Arc<DeviceShared>,
    pub(crate) extent: vk::Extent3D,
    pub format: vk::Format,
}

pub(crate) struct PendingDestructionImage {
    pub(crate) raw: vk::Image,
    pub(crate) raw_view: vk::ImageView,
    pub(crate) allocation: Allocation,
}

impl Drop for Image {
    fn drop(&mut self) {
        let allocation = self.allocation.take().unwrap();
        self.device
            .resource_hub
            .lock()
            .pending_destruction_images
            .push(PendingDestructionImage {
                raw: self.raw,
                raw_view: self.raw_view,
                allocation,
            });
    }
}

fn vulkan_image_type_to_view_type(image_type: vk::ImageType) -> vk::ImageViewType {
    match image_type {
        vk::ImageType::TYPE_2D => vk::ImageViewType::TYPE_2D,
        vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
        vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
        other => panic!("unsupported image type {other:?}"),
    }
}

pub struct SamplerDescriptor {
    pub min_filter: vk::Filter,
    pub mag_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
}

impl SamplerDescriptor {
    pub fn new() -> Self {
        Self {
            min_filter: vk::Filter::LINEAR,
            mag_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
        }
    }
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Sampler {
    device: Arc<DeviceShared>,
    pub(crate) raw: vk::Sampler,
}

pub(crate) struct PendingDestructionSampler {
    pub(crate) raw: vk::Sampler,
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device
            .resource_hub
            .lock()
            .pending_destruction_samplers
            .push(PendingDestructionSampler { raw: self.raw });
    }
}


pub(crate) fn format_has_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D16_UNORM
    )
}

pub(crate) fn format_has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
    )
}

impl DeviceShared {
    pub fn create_buffer(self: &Arc<Self>, desc: BufferDescriptor) -> Result<Buffer> {
        let create_info = vk::BufferCreateInfo::default().size(desc.size).usage(
            desc.usage_flags | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
        );

        let raw;
        let requirements;
        unsafe {
            raw = self.raw.create_buffer(&create_info, None)?;
            requirements = self.raw.get_buffer_memory_requirements(raw);
        }

        let allocation = self.allocator.lock().allocate(&AllocationCreateDesc {
            name: "buffer",
            requirements,
            location: desc.memory_location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            self.raw
                .bind_buffer_memory(raw, allocation.memory(), allocation.offset())?;
        }

        Ok(Buffer {
            device: self.clone(),
            raw,
            size: desc.size,
            allocation: Some(allocation),
        })
    }

    pub fn create_image(self: &Arc<Self>, desc: ImageDescriptor) -> Result<Image> {
        let usage_flags =
            desc.usage_flags | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        let extent = vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
        };

        let create_info = vk::ImageCreateInfo::default()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(extent)
            .mip_levels(desc.mip_level_count)
            .array_layers(desc.array_layer_count)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage_flags)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let raw = unsafe { self.raw.create_image(&create_info, None)? };
        let requirements = unsafe { self.raw.get_image_memory_requirements(raw) };

        let allocation = self.allocator.lock().allocate(&AllocationCreateDesc {
            name: "image",
            requirements,
            location: desc.memory_location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        unsafe {
            self.raw
                .bind_image_memory(raw, allocation.memory(), allocation.offset())?;
        };

        let mut aspect_flags = vk::ImageAspectFlags::empty();
        if format_has_depth(desc.format) {
            aspect_flags |= vk::ImageAspectFlags::DEPTH;
            if format_has_stencil(desc.format) {
                aspect_flags |= vk::ImageAspectFlags::STENCIL;
            }
        } else {
            aspect_flags |= vk::ImageAspectFlags::COLOR;
        }
        let subresource_range = vk::ImageSubresourceRange::default()
            .aspect_mask(aspect_flags)
            .base_mip_level(0)
            .level_count(desc.mip_level_count)
            .base_array_layer(0)
            .layer_count(desc.array_layer_count);
        let view_create_info = vk::ImageViewCreateInfo::default()
            .image(raw)
            .view_type(vulkan_image_type_to_view_type(desc.image_type))
            .format(desc.format)
            .subresource_range(subresource_range);
        let raw_view = unsafe { self.raw.create_image_view(&view_create_info, None)? };

        Ok(Image {
            raw,
            allocation: Some(allocation),
            raw_view,
            device: self.clone(),
            extent,
            format: desc.format,
        })
    }

    pub fn create_sampler(self: &Arc<Self>, desc: SamplerDescriptor) -> Result<Sampler> {
        let create_info = vk::SamplerCreateInfo::default()
            .min_filter(desc.min_filter)
            .mag_filter(desc.mag_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .unnormalized_coordinates(false);

        let raw = unsafe { self.raw.create_sampler(&create_info, None)? };

        Ok(Sampler {
            device: self.clone(),
            raw,
        })
    }

}
