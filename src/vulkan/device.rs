use std::ffi::CString;
use std::mem::ManuallyDrop;

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocationSizes, AllocatorDebugSettings};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::instance::{
    select_discrete_gpu, select_queue_families, Instance, PhysicalDevice, QueueFamily,
    QUEUE_FAMILY_INDEX_COMPUTE, QUEUE_FAMILY_INDEX_GRAPHICS, QUEUE_FAMILY_INDEX_TRANSFER,
};
use super::queue::Queue;
use super::resource::ResourceHub;
use super::surface::Surface;

/// Shared immutable-after-construction Vulkan context: instance, physical/logical device,
/// surface and allocator. Everything else (frame ring, attachments, passes) borrows this
/// through an `Arc`.
pub(crate) struct DeviceShared {
    pub(crate) allocator: ManuallyDrop<Mutex<Allocator>>,
    pub(crate) raw: ash::Device,
    pub(crate) queue_families: Vec<QueueFamily>,
    /// Graphics+present queue. The graphics half of every virtual frame submits here.
    pub(crate) queue_graphics: Queue,
    /// Async compute queue, falling back to the graphics family when the device exposes
    /// no dedicated one (see `select_queue_families`); the compute half of every virtual
    /// frame submits here.
    pub(crate) queue_compute: Queue,
    /// Dedicated transfer queue, falling back to the compute (and transitively graphics)
    /// family when unavailable.
    pub(crate) queue_transfer: Queue,
    pub(crate) physical_device: PhysicalDevice,
    pub(crate) surface: Surface,
    pub(crate) instance: Instance,
    pub(crate) resource_hub: Mutex<ResourceHub>,
}

impl DeviceShared {
    pub(crate) fn new(
        window_handle: RawWindowHandle,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<Self> {
        let instance = Instance::new(display_handle, enable_validation)?;
        let surface = Surface::new(&instance, window_handle, display_handle)?;

        let physical_devices = instance.get_physical_devices(&surface)?;
        let physical_device = select_discrete_gpu(&physical_devices)?;
        let queue_families = select_queue_families(&physical_device);

        log::info!("physical device name: {}", physical_device.name);

        let raw = Self::new_ash_device(&instance, &physical_device, &queue_families)?;

        let queue_graphics = Queue::new_from_vulkan_handle(
            raw.clone(),
            unsafe { raw.get_device_queue(queue_families[QUEUE_FAMILY_INDEX_GRAPHICS].index, 0) },
            queue_families[QUEUE_FAMILY_INDEX_GRAPHICS].index,
        );
        let queue_compute = Queue::new_from_vulkan_handle(
            raw.clone(),
            unsafe { raw.get_device_queue(queue_families[QUEUE_FAMILY_INDEX_COMPUTE].index, 0) },
            queue_families[QUEUE_FAMILY_INDEX_COMPUTE].index,
        );
        let queue_transfer = Queue::new_from_vulkan_handle(
            raw.clone(),
            unsafe { raw.get_device_queue(queue_families[QUEUE_FAMILY_INDEX_TRANSFER].index, 0) },
            queue_families[QUEUE_FAMILY_INDEX_TRANSFER].index,
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.raw.clone(),
            device: raw.clone(),
            physical_device: physical_device.raw,
            debug_settings: AllocatorDebugSettings {
                log_memory_information: true,
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: true,
            allocation_sizes: AllocationSizes::default(),
        })?;
        let allocator = Mutex::new(allocator);

        Ok(Self {
            allocator: ManuallyDrop::new(allocator),
            queue_families,
            queue_graphics,
            queue_compute,
            queue_transfer,
            raw,
            physical_device,
            surface,
            instance,
            resource_hub: Mutex::new(ResourceHub::default()),
        })
    }

    /// Drains and destroys resources scheduled for destruction by dropped `Buffer`/`Image`/
    /// `Sampler` handles. Called once per frame from the executor after `sync`, matching the
    /// teacher's `cleanup_resources` cadence.
    pub(crate) fn cleanup_resources(&self) -> Result<()> {
        let mut hub = self.resource_hub.lock();
        for buffer in hub.pending_destruction_buffers.drain(..) {
            unsafe {
                self.raw.destroy_buffer(buffer.raw, None);
                self.allocator.lock().free(buffer.allocation)?;
            }
        }
        for image in hub.pending_destruction_images.drain(..) {
            unsafe {
                self.raw.destroy_image(image.raw, None);
                self.raw.destroy_image_view(image.raw_view, None);
                self.allocator.lock().free(image.allocation)?;
            }
        }
        for sampler in hub.pending_destruction_samplers.drain(..) {
            unsafe {
                self.raw.destroy_sampler(sampler.raw, None);
            }
        }

        Ok(())
    }

    fn new_ash_device(
        instance: &Instance,
        physical_device: &PhysicalDevice,
        queue_families: &[QueueFamily],
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0f32];

        let queue_create_infos = {
            let mut indices = queue_families
                .iter()
                .map(|family| family.index)
                .collect::<Vec<_>>();

            indices.sort();
            indices.dedup();

            indices
                .iter()
                .map(|index| {
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(*index)
                        .queue_priorities(&queue_priorities)
                })
                .collect::<Vec<_>>()
        };

        let device_extension_strs = ["VK_KHR_swapchain"];
        let device_extension_strs = device_extension_strs
            .iter()
            .map(|str| CString::new(*str))
            .collect::<Result<Vec<_>, _>>()?;
        let device_extension_strs = device_extension_strs
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<_>>();

        let mut vulkan11_features = vk::PhysicalDeviceVulkan11Features::default()
            .shader_draw_parameters(true)
            .storage_buffer16_bit_access(true);
        let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::default()
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_variable_descriptor_count(true)
            .timeline_semaphore(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .buffer_device_address(true)
            .storage_buffer8_bit_access(true);
        let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let mut device_features2 = vk::PhysicalDeviceFeatures2::default();
        unsafe {
            instance
                .raw
                .get_physical_device_features2(physical_device.raw, &mut device_features2);
        }
        device_features2 = device_features2
            .push_next(&mut vulkan11_features)
            .push_next(&mut vulkan12_features)
            .push_next(&mut vulkan13_features);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_extension_strs)
            .push_next(&mut device_features2);

        let device = unsafe {
            instance
                .raw
                .create_device(physical_device.raw, &device_create_info, None)?
        };

        Ok(device)
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            log::trace!("logical device dropped");
            ManuallyDrop::drop(&mut self.allocator);
            self.raw.destroy_device(None);
        }
    }
}
