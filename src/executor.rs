//! Frame executor (Component G, §4.5) — the acquire/record/submit/sync/clear loop that
//! drives every other component: the attachment registry and swapchain coordinator decide
//! rebuilds, the pass builder derives render-pass state, the dependency pools emit
//! barriers, the recorder glue splices in recorded content, and the frame ring supplies the
//! fences and command pools.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::attachment::{AttachmentIndex, AttachmentRegistry, AttachmentSlot};
use crate::barrier::{
    access_writes, build_execution_barrier, build_image_barrier, image_layout_for, merge_range, to_vulkan_access,
    ConsumeAccess, ImageBarrierDescriptor,
};
use crate::collaborators::{DescriptorPoolHandle, FlushableCache, PipelineCacheHandle};
use crate::config::RendererConfig;
use crate::frame::{FrameRing, SubmittedMask};
use crate::pass::{Depend, DependFlags, DependencyObjectId, InjectionKind, PassGraph};
use crate::pass_builder;
use crate::recorder::Recorder;
use crate::swapchain::{RecreateFlags, SwapchainCoordinator, WindowId};
use crate::sync_pool::{DependencyPool, InjectionId, ResourceRef};
use crate::vulkan::command::CommandBuffer;
use crate::vulkan::device::DeviceShared;
use crate::vulkan::queue::QueueSubmitSemaphoreDescriptor;
use crate::vulkan::sync::Semaphore;

enum ConsumeBarrier {
    Image(vk::ImageMemoryBarrier2<'static>),
    Execution(vk::MemoryBarrier2<'static>),
}

fn derive_consume_barrier(
    graph: &PassGraph,
    prev_ref: (usize, usize),
    cur_pass: usize,
    cur_consume: usize,
    format: vk::Format,
    image: vk::Image,
) -> ConsumeBarrier {
    let prev = graph.get(prev_ref.0).consumes[prev_ref.1].clone();
    let cur = graph.get(cur_pass).consumes[cur_consume].clone();

    let prev_vk_access = to_vulkan_access(prev.access);
    let cur_vk_access = to_vulkan_access(cur.access);
    let transitions = prev.final_layout != cur.initial_layout;

    if access_writes(prev.access) || transitions {
        let merged_range = merge_range(prev.range, cur.range, format);
        ConsumeBarrier::Image(build_image_barrier(&ImageBarrierDescriptor {
            src_access: prev_vk_access,
            dst_access: cur_vk_access,
            src_stage: prev.stage,
            dst_stage: cur.stage,
            old_layout: prev.final_layout,
            new_layout: cur.initial_layout,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
            image,
            range: merged_range,
        }))
    } else {
        ConsumeBarrier::Execution(build_execution_barrier(prev_vk_access, cur_vk_access, prev.stage, cur.stage))
    }
}

/// Semaphores a recorded half needs waited/signalled at submit time, collected while
/// walking passes during `record` (§4.5 steps 2-5).
#[derive(Default)]
struct RecordOutcome {
    waits: Vec<(Arc<Semaphore>, vk::PipelineStageFlags2)>,
    signals: Vec<Arc<Semaphore>>,
}

/// Owns every component below the renderer handle: attachments, swapchain(s), the pass
/// graph, the frame ring, every dependency pool, and the two collaborator stand-ins.
pub struct FrameExecutor {
    device: Arc<DeviceShared>,
    #[allow(dead_code)]
    config: RendererConfig,
    attachments: AttachmentRegistry,
    swapchain: SwapchainCoordinator,
    graph: PassGraph,
    frames: FrameRing,
    dependency_pools: Vec<DependencyPool>,
    pipeline_cache: PipelineCacheHandle,
    descriptor_pool: DescriptorPoolHandle,
    window: WindowId,
    window_attachment: Option<AttachmentIndex>,
    next_injection: InjectionId,
}

impl FrameExecutor {
    pub fn new(device: Arc<DeviceShared>, config: RendererConfig, descriptor_pool_sizes: &[vk::DescriptorPoolSize]) -> Result<Self> {
        let swapchain = SwapchainCoordinator::new(device.clone(), config.present_mode)?;
        let frames = FrameRing::new(device.clone(), &config)?;
        let pipeline_cache = PipelineCacheHandle::new(device.clone())?;
        let descriptor_pool = DescriptorPoolHandle::new(device.clone(), 4096, descriptor_pool_sizes)?;

        Ok(Self {
            device,
            config,
            attachments: AttachmentRegistry::new(),
            swapchain,
            graph: PassGraph::new(),
            frames,
            dependency_pools: Vec::new(),
            pipeline_cache,
            descriptor_pool,
            window: WindowId(0),
            window_attachment: None,
            next_injection: 0,
        })
    }

    pub fn attachments(&self) -> &AttachmentRegistry {
        &self.attachments
    }

    pub fn attachments_mut(&mut self) -> &mut AttachmentRegistry {
        &mut self.attachments
    }

    pub fn graph_mut(&mut self) -> &mut PassGraph {
        &mut self.graph
    }

    /// Index of the frame slot currently in flight (§6 "frame.index").
    pub fn frame_index(&self) -> usize {
        self.frames.current_index()
    }

    /// The swapchain image index backing `attachment` this frame, if `attachment` is the
    /// window attachment and an image was actually acquired (§6 "frame.get_swapchain_index").
    pub fn swapchain_image_index(&self, attachment: AttachmentIndex) -> Option<u32> {
        if self.window_attachment != Some(attachment) {
            return None;
        }
        self.frames.current_slot().window_syncs.first().and_then(|sync| sync.image_index)
    }

    /// Builds the render graph if it was invalidated since the last build (§4.3). Acquire
    /// already does this when a recreate forces a rebuild; callers that mutate passes after
    /// acquire (adding consumes/depends for this frame) call this before recording.
    pub fn ensure_built(&mut self) -> Result<()> {
        if !self.graph.is_built() {
            self.rebuild_backing_and_graph()?;
        }
        Ok(())
    }

    /// Creates a new dependency object (one sync-object pool, §6 "dependency object ...
    /// create(device, wait_capacity)").
    pub fn create_dependency_object(&mut self) -> DependencyObjectId {
        self.dependency_pools
            .push(DependencyPool::new(self.device.clone(), self.config.wait_credit_capacity));
        DependencyObjectId(self.dependency_pools.len() - 1)
    }

    pub fn register_window_attachment(&mut self) -> Result<AttachmentIndex> {
        let format = self.swapchain.surface_format(self.window);
        let extent = self.swapchain.extent(self.window);
        let index = self.attachments.add_slot(AttachmentSlot::Window {
            window: self.window,
            format,
            extent,
            recreate_flags: RecreateFlags::empty(),
        })?;
        self.window_attachment = Some(index);
        Ok(index)
    }

    /// `acquire(frame)`, §4.5.
    pub fn acquire(&mut self) -> Result<()> {
        self.attachments.set_recording(false);
        self.frames.ensure_window_syncs(self.swapchain.window_count())?;

        let available_semaphore = self.frames.current_slot().window_syncs[0].available_semaphore.clone();
        let (image_index, flags) = self.swapchain.acquire(self.window, available_semaphore.raw)?;
        self.frames.current_slot_mut().window_syncs[0].image_index = image_index;

        if let Some(window_attachment) = self.window_attachment {
            self.attachments.or_window_recreate_flags(window_attachment, flags);
        }

        let accumulated = self
            .window_attachment
            .map(|index| match self.attachments.get(index) {
                AttachmentSlot::Window { recreate_flags, .. } => *recreate_flags,
                _ => RecreateFlags::empty(),
            })
            .unwrap_or_default();

        if accumulated.contains(RecreateFlags::RECREATE) {
            log::debug!("recreate protocol: flags={accumulated:?}");
            self.frames.sync_all()?;
            if accumulated.contains(RecreateFlags::RESIZE) {
                self.descriptor_pool.reset()?;
            }
            if let Some(window_attachment) = self.window_attachment {
                self.attachments.take_window_recreate_flags(window_attachment);
                let format = self.swapchain.surface_format(self.window);
                let extent = self.swapchain.extent(self.window);
                self.attachments.replace_slot(
                    window_attachment,
                    AttachmentSlot::Window {
                        window: self.window,
                        format,
                        extent,
                        recreate_flags: RecreateFlags::empty(),
                    },
                )?;
            }
            self.rebuild_backing_and_graph()?;
            self.swapchain.purge(self.window);
        }

        if !self.graph.is_built() {
            self.rebuild_backing_and_graph()?;
        }

        self.attachments.set_recording(true);
        Ok(())
    }

    fn rebuild_backing_and_graph(&mut self) -> Result<()> {
        pass_builder::link_consume_history(&mut self.graph);

        let master_indices: Vec<usize> = (0..self.graph.len())
            .filter(|&i| self.graph.get(i).is_render() && self.graph.get(i).is_chain_master())
            .collect();

        for master in master_indices {
            let mut current = Some(master);
            while let Some(pass_index) = current {
                if let Err(err) = pass_builder::warmup(self.graph.get_mut(pass_index), pass_index, &self.attachments) {
                    err.log();
                }
                current = self.graph.get(pass_index).next;
            }

            pass_builder::build(&self.device, &mut self.graph, master, &self.attachments, &self.swapchain, Some(self.window))?;
        }

        self.graph.mark_built();
        Ok(())
    }

    fn attachment_image(&self, attachment: AttachmentIndex) -> Option<(vk::Image, vk::Format)> {
        match self.attachments.get(attachment) {
            AttachmentSlot::Empty => None,
            AttachmentSlot::Image { image, .. } => Some((image.raw, image.format)),
            AttachmentSlot::Window { format, .. } => {
                let image_index = self.frames.current_slot().window_syncs.first()?.image_index?;
                Some((self.swapchain.image(self.window, image_index), *format))
            }
        }
    }

    /// Walks `first..first+count` in submission order, recording exactly one subpass chain
    /// or compute pass at a time: catch phase (barriers), begin/record/end, prepare phase
    /// (signals) — §4.5 steps 2-5.
    fn record_range(
        &mut self,
        cmd: &CommandBuffer,
        first: usize,
        count: usize,
        injection: InjectionId,
        injecting_family: u32,
        recorders: &mut [&mut dyn Recorder],
    ) -> Result<RecordOutcome> {
        cmd.begin()?;
        let mut outcome = RecordOutcome::default();

        let mut index = first;
        while index < first + count {
            if self.graph.get(index).culled {
                index += 1;
                continue;
            }
            if self.graph.get(index).is_render() && !self.graph.get(index).is_last_in_chain() {
                index += 1;
                continue;
            }

            let master = self.graph.get(index).master.unwrap_or(index);
            let mut chain = vec![master];
            let mut cursor = master;
            while let Some(next) = self.graph.get(cursor).next {
                chain.push(next);
                cursor = next;
            }

            let mut image_barriers = Vec::new();
            let mut execution_barriers = Vec::new();

            for &pass_index in &chain {
                for injection_ref in self.graph.get(pass_index).injections.clone() {
                    if !matches!(injection_ref.kind, InjectionKind::Wait | InjectionKind::WaitRange) {
                        continue;
                    }
                    let Some((image, _format)) = self.attachment_image(injection_ref.attachment) else {
                        continue;
                    };
                    let caught = self.dependency_pools[injection_ref.dependency.0].catch(
                        injecting_family,
                        ResourceRef {
                            image,
                            range: injection_ref.range,
                            format: None,
                        },
                        to_vulkan_access(injection_ref.access),
                        injection_ref.stage,
                        injection,
                    );
                    for wait in caught {
                        if let Some(barrier) = wait.barrier {
                            image_barriers.push(barrier);
                        }
                        if let Some(semaphore) = wait.semaphore {
                            outcome.waits.push((semaphore, wait.stage));
                        }
                    }
                }

                for depend in self.graph.get(pass_index).depends.clone() {
                    match depend {
                        Depend::Object {
                            dependency,
                            access,
                            stage,
                            attachment,
                            range,
                        } => {
                            let Some((image, _format)) = self.attachment_image(attachment) else {
                                continue;
                            };
                            let caught = self.dependency_pools[dependency.0].catch(
                                injecting_family,
                                ResourceRef { image, range, format: None },
                                to_vulkan_access(access),
                                stage,
                                injection,
                            );
                            for wait in caught {
                                if let Some(barrier) = wait.barrier {
                                    image_barriers.push(barrier);
                                }
                                if let Some(semaphore) = wait.semaphore {
                                    outcome.waits.push((semaphore, wait.stage));
                                }
                            }
                        }
                        Depend::Plain {
                            src_access,
                            dst_access,
                            src_stage,
                            dst_stage,
                            flags,
                            format: _,
                            attachment,
                            range,
                            initial_layout,
                            final_layout,
                        } => {
                            if flags.contains(DependFlags::IS_SUBPASS) {
                                // Folded into the subpass dependencies baked by
                                // pass_builder::build; no standalone barrier here.
                                continue;
                            }
                            if flags.contains(DependFlags::NEEDS_TRANSITION) {
                                if let Some(attachment) = attachment {
                                    if let Some((image, _)) = self.attachment_image(attachment) {
                                        image_barriers.push(build_image_barrier(&ImageBarrierDescriptor {
                                            src_access,
                                            dst_access,
                                            src_stage,
                                            dst_stage,
                                            old_layout: initial_layout,
                                            new_layout: final_layout,
                                            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
                                            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
                                            image,
                                            range,
                                        }));
                                        continue;
                                    }
                                }
                            }
                            execution_barriers.push(build_execution_barrier(src_access, dst_access, src_stage, dst_stage));
                        }
                    }
                }

                for (consume_index, consume) in self.graph.get(pass_index).consumes.iter().enumerate() {
                    if !consume.flags.contains(crate::pass::ConsumeFlags::FIRST_USE_IN_CHAIN) {
                        continue;
                    }
                    let Some(prev_ref) = consume.prev else { continue };
                    let Some((image, format)) = self.attachment_image(consume.attachment) else {
                        continue;
                    };
                    match derive_consume_barrier(&self.graph, prev_ref, pass_index, consume_index, format, image) {
                        ConsumeBarrier::Image(barrier) => image_barriers.push(barrier),
                        ConsumeBarrier::Execution(barrier) => execution_barriers.push(barrier),
                    }
                }
            }

            if !image_barriers.is_empty() {
                cmd.pipeline_image_barrier(&image_barriers);
            }
            if !execution_barriers.is_empty() {
                cmd.pipeline_execution_barrier(&execution_barriers);
            }

            let is_render = self.graph.get(master).is_render();
            if is_render {
                let master_pass = self.graph.get(master);
                let Some(render_pass) = master_pass.render_pass else {
                    log::debug!("pass {master}: no cached render pass, skipping record");
                    index += 1;
                    continue;
                };
                let image_index = self.frames.current_slot().window_syncs.first().and_then(|w| w.image_index).unwrap_or(0);
                let framebuffer_count = master_pass.framebuffers.len().max(1);
                let framebuffer = if master_pass.is_window_backed {
                    master_pass.framebuffers[image_index as usize % framebuffer_count]
                } else {
                    master_pass.framebuffers[0]
                };
                let extent = self.swapchain.extent(self.window);
                let render_area = vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                };
                let clear_values = master_pass.clear_values.clone();
                cmd.begin_render_pass(render_pass, framebuffer, render_area, &clear_values);
                cmd.set_viewport_scissor(extent);
            }

            for (chain_position, &pass_index) in chain.iter().enumerate() {
                if let Some(recorder) = recorders.get_mut(pass_index) {
                    recorder.record(self.graph.get(pass_index).subpass_index, cmd)?;
                }
                if is_render && chain_position + 1 < chain.len() {
                    cmd.next_subpass();
                }
            }

            if is_render {
                cmd.end_render_pass();
            }

            for &pass_index in &chain {
                for injection_ref in self.graph.get(pass_index).injections.clone() {
                    if !matches!(injection_ref.kind, InjectionKind::Signal | InjectionKind::SignalRange) {
                        continue;
                    }
                    let Some((image, format)) = self.attachment_image(injection_ref.attachment) else {
                        continue;
                    };
                    let is_window = matches!(self.attachments.get(injection_ref.attachment), AttachmentSlot::Window { .. });
                    let new_layout = image_layout_for(injection_ref.access, Some(format), is_window);
                    let old_layout = if injection_ref.access.contains(ConsumeAccess::DISCARD) {
                        vk::ImageLayout::UNDEFINED
                    } else {
                        new_layout
                    };
                    let claimed = self.dependency_pools[injection_ref.dependency.0].claim(injection, true, injecting_family)?;
                    if let Some(semaphore) = self.dependency_pools[injection_ref.dependency.0].semaphore_at(claimed) {
                        outcome.signals.push(semaphore);
                    }
                    self.dependency_pools[injection_ref.dependency.0].prepare(
                        claimed,
                        ResourceRef {
                            image,
                            range: injection_ref.range,
                            format: Some(format),
                        },
                        injection_ref.access,
                        injection_ref.stage,
                        old_layout,
                        new_layout,
                        injecting_family,
                        injecting_family,
                    );
                }
            }

            index += 1;
        }

        cmd.end()?;
        Ok(outcome)
    }

    /// `submit(frame)`, §4.5. Records and submits the graphics half (if `graphics_range` is
    /// given) then the compute half (if `compute_range` is given), presenting after the
    /// graphics half and finishing every dependency pool exactly once either way.
    pub fn submit(
        &mut self,
        graphics_range: Option<(usize, usize)>,
        compute_range: Option<(usize, usize)>,
        recorders: &mut [&mut dyn Recorder],
    ) -> Result<Vec<RecreateFlags>> {
        let injection = self.next_injection;
        self.next_injection += 1;

        let mut present_flags = Vec::new();

        let outcome: Result<()> = (|| {
            if let Some((first, count)) = graphics_range {
                self.submit_half(first, count, injection, true, recorders)?;
                self.frames.current_slot_mut().submitted |= SubmittedMask::GRAPHICS;

                let rendered = self.frames.current_slot().rendered_semaphore.raw;
                if let Some(image_index) = self.frames.current_slot().window_syncs.first().and_then(|w| w.image_index) {
                    let flags = self
                        .swapchain
                        .present(self.device.queue_graphics.raw, rendered, &[self.window], &[image_index]);
                    if let Some(window_attachment) = self.window_attachment {
                        self.attachments.or_window_recreate_flags(window_attachment, flags[0]);
                    }
                    present_flags = flags;
                }
            }

            if let Some((first, count)) = compute_range {
                self.submit_half(first, count, injection, false, recorders)?;
                self.frames.current_slot_mut().submitted |= SubmittedMask::COMPUTE;
            }

            Ok(())
        })();

        for pool in &mut self.dependency_pools {
            pool.finish(injection, outcome.is_ok());
        }
        outcome?;

        self.pipeline_cache.flush()?;
        self.descriptor_pool.flush()?;

        Ok(present_flags)
    }

    fn submit_half(
        &mut self,
        first: usize,
        count: usize,
        injection: InjectionId,
        is_graphics: bool,
        recorders: &mut [&mut dyn Recorder],
    ) -> Result<()> {
        let injecting_family = if is_graphics {
            self.device.queue_graphics.family_index
        } else {
            self.device.queue_compute.family_index
        };

        let cmd = if is_graphics {
            self.frames.graphics_command_buffer()
        } else {
            self.frames.compute_command_buffer()
        };

        let outcome = self.record_range(&cmd, first, count, injection, injecting_family, recorders)?;

        let mut wait_descriptors: Vec<QueueSubmitSemaphoreDescriptor> = outcome
            .waits
            .iter()
            .map(|(semaphore, stage)| QueueSubmitSemaphoreDescriptor {
                semaphore: semaphore.as_ref(),
                stage_mask: *stage,
                value: None,
            })
            .collect();
        if is_graphics {
            for window_sync in &self.frames.current_slot().window_syncs {
                wait_descriptors.push(QueueSubmitSemaphoreDescriptor {
                    semaphore: window_sync.available_semaphore.as_ref(),
                    stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    value: None,
                });
            }
        }

        let mut signal_descriptors: Vec<QueueSubmitSemaphoreDescriptor> = outcome
            .signals
            .iter()
            .map(|semaphore| QueueSubmitSemaphoreDescriptor {
                semaphore: semaphore.as_ref(),
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                value: None,
            })
            .collect();
        if is_graphics {
            signal_descriptors.push(QueueSubmitSemaphoreDescriptor {
                semaphore: self.frames.current_slot().rendered_semaphore.as_ref(),
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                value: None,
            });
        }

        let fence = if is_graphics {
            self.frames.current_slot().fence_graphics.raw
        } else {
            self.frames.current_slot().fence_compute.raw
        };

        if is_graphics {
            self.device
                .queue_graphics
                .submit_command_buffers(&[cmd.raw], &wait_descriptors, &signal_descriptors, fence)?;
        } else {
            self.device
                .queue_compute
                .submit_command_buffers(&[cmd.raw], &wait_descriptors, &signal_descriptors, fence)?;
        }

        Ok(())
    }

    /// `sync(frame)`, §4.5: waits the current slot's submitted fences, optionally resetting
    /// them, their command pools, and every active recorder's pool for reuse.
    pub fn sync(&mut self, reset: bool, recorders: &mut [&mut dyn Recorder]) -> Result<()> {
        self.frames.sync(reset, recorders)?;
        self.device.cleanup_resources()
    }

    /// `clear(frame)`, §4.5: per-frame teardown before the ring advances past this slot.
    pub fn clear(&mut self) -> Result<()> {
        self.frames.clear_current()
    }

    pub fn advance(&mut self) {
        self.frames.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_outcome_defaults_to_empty() {
        let outcome = RecordOutcome::default();
        assert!(outcome.waits.is_empty());
        assert!(outcome.signals.is_empty());
    }
}
