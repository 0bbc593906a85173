use anyhow::Result;
use ash::vk;

use super::sync::{Semaphore, SemaphoreType};

pub(crate) struct QueueSubmitSemaphoreDescriptor<'a> {
    pub(crate) semaphore: &'a Semaphore,
    pub(crate) stage_mask: vk::PipelineStageFlags2,
    /// Only necessary for timeline semaphores.
    pub(crate) value: Option<u64>,
}

/// Thin wrapper around a `VkQueue` handle. Submission itself takes `&self`; callers hold
/// the per-queue mutex named in the concurrency model (§5) around the call.
#[derive(Clone)]
pub(crate) struct Queue {
    ash_device: ash::Device,
    pub(crate) raw: vk::Queue,
    pub(crate) family_index: u32,
}

impl Queue {
    pub(crate) fn new_from_vulkan_handle(
        ash_device: ash::Device,
        raw: vk::Queue,
        family_index: u32,
    ) -> Self {
        Self {
            ash_device,
            raw,
            family_index,
        }
    }

    pub(crate) fn submit_command_buffers(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait_semaphores: &[QueueSubmitSemaphoreDescriptor],
        signal_semaphores: &[QueueSubmitSemaphoreDescriptor],
        fence: vk::Fence,
    ) -> Result<()> {
        let wait_semaphores_info = wait_semaphores
            .iter()
            .map(Self::semaphore_submit_info)
            .collect::<Vec<_>>();
        let signal_semaphores_info = signal_semaphores
            .iter()
            .map(Self::semaphore_submit_info)
            .collect::<Vec<_>>();

        let command_buffer_submit_infos = command_buffers
            .iter()
            .map(|command_buffer| {
                vk::CommandBufferSubmitInfo::default().command_buffer(*command_buffer)
            })
            .collect::<Vec<_>>();

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_semaphores_info[..])
            .signal_semaphore_infos(&signal_semaphores_info[..])
            .command_buffer_infos(&command_buffer_submit_infos[..]);

        unsafe {
            self.ash_device
                .queue_submit2(self.raw, std::slice::from_ref(&submit_info), fence)?
        };

        Ok(())
    }

    fn semaphore_submit_info(
        descriptor: &QueueSubmitSemaphoreDescriptor,
    ) -> vk::SemaphoreSubmitInfo<'static> {
        vk::SemaphoreSubmitInfo::default()
            .semaphore(descriptor.semaphore.raw)
            .stage_mask(descriptor.stage_mask)
            .value(
                if descriptor.semaphore.semaphore_type == SemaphoreType::Timeline {
                    descriptor
                        .value
                        .expect("timeline semaphore submission requires a value")
                } else {
                    0
                },
            )
    }
}
