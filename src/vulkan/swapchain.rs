use std::sync::Arc;

use anyhow::{Context, Result};
use ash::khr;
use ash::vk;

use super::device::DeviceShared;

/// Raw `VkSwapchainKHR` wrapper. Knows nothing about the virtual-frame ring or recreate
/// bookkeeping (§4.2) — that belongs to the higher-level coordinator; this struct only
/// owns the Vulkan objects and their query/acquire/present calls.
pub(crate) struct Swapchain {
    raw_loader: khr::swapchain::Device,
    raw: vk::SwapchainKHR,
    images_raw: Vec<vk::Image>,
    pub(crate) image_views_raw: Vec<vk::ImageView>,
    pub(crate) surface_format: vk::SurfaceFormatKHR,
    pub(crate) extent: vk::Extent2D,
    device: Arc<DeviceShared>,
}

impl Swapchain {
    pub(crate) fn new(device: Arc<DeviceShared>, requested_present_mode: vk::PresentModeKHR) -> Result<Self> {
        let surface_format = {
            let formats = unsafe {
                device
                    .surface
                    .loader
                    .get_physical_device_surface_formats(device.physical_device.raw, device.surface.raw)?
            };

            if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }
            } else {
                *formats
                    .iter()
                    .find(|format| {
                        format.format == vk::Format::B8G8R8A8_UNORM
                            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
                    })
                    .unwrap_or(&formats[0])
            }
        };

        let present_mode = {
            let present_modes = unsafe {
                device
                    .surface
                    .loader
                    .get_physical_device_surface_present_modes(
                        device.physical_device.raw,
                        device.surface.raw,
                    )?
            };

            if present_modes.contains(&requested_present_mode) {
                requested_present_mode
            } else {
                vk::PresentModeKHR::FIFO
            }
        };

        let capabilities = unsafe {
            device
                .surface
                .loader
                .get_physical_device_surface_capabilities(device.physical_device.raw, device.surface.raw)?
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            capabilities.max_image_extent
        };

        let image_count = capabilities
            .max_image_count
            .min(capabilities.min_image_count + 1);

        log::debug!("swapchain extent: {} x {}", extent.width, extent.height);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface.raw)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .present_mode(present_mode);

        let raw_loader = khr::swapchain::Device::new(&device.instance.raw, &device.raw);
        let raw = unsafe { raw_loader.create_swapchain(&create_info, None)? };

        let images_raw = unsafe { raw_loader.get_swapchain_images(raw)? };
        let image_views_raw = images_raw
            .iter()
            .map(|image| {
                let image_view_info = vk::ImageViewCreateInfo::default()
                    .image(*image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );

                Ok(unsafe { device.raw.create_image_view(&image_view_info, None)? })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device,
            raw_loader,
            raw,
            images_raw,
            image_views_raw,
            surface_format,
            extent,
        })
    }

    pub(crate) fn image_count(&self) -> usize {
        self.images_raw.len()
    }

    /// Returns `(image_index, suboptimal)`. Caller maps `ERROR_OUT_OF_DATE_KHR` to a
    /// recreate request; a `suboptimal` result still presents this frame.
    pub(crate) fn acquire_next_image(&self, signal_semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.raw_loader
                .acquire_next_image(self.raw, u64::MAX - 1, signal_semaphore, vk::Fence::null())
        }
    }

    pub(crate) fn queue_present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.raw];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.raw_loader.queue_present(queue, &present_info) }
    }

    pub(crate) fn image_raw(&self, index: u32) -> vk::Image {
        self.images_raw[index as usize]
    }

    pub(crate) fn image_view_raw(&self, index: u32) -> vk::ImageView {
        self.image_views_raw[index as usize]
    }

    fn destroy(&mut self) {
        if !self.image_views_raw.is_empty() {
            unsafe {
                for image_view in self.image_views_raw.drain(..) {
                    self.device.raw.destroy_image_view(image_view, None);
                }
                self.raw_loader.destroy_swapchain(self.raw, None);
            }
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

pub(crate) fn wait_idle(device: &DeviceShared) -> Result<()> {
    unsafe { device.raw.device_wait_idle().context("device_wait_idle failed") }
}
