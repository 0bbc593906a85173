//! Sync-object pool (Component C, §4.4) — the central invariant of the design. Owns a
//! deque of reusable sync objects (semaphore-bearing entries kept toward the front, §9),
//! shared by claim/prepare/catch/finish across one dependency's lifetime.

use std::collections::VecDeque;
use std::sync::Arc;

use ash::vk;

use crate::barrier::{
    access_writes, build_image_barrier, needs_queue_family_transfer, to_vulkan_access,
    ConsumeAccess, ImageBarrierDescriptor, ViewRange,
};
use crate::vulkan::device::DeviceShared;
use crate::vulkan::sync::{Semaphore, SemaphoreType};

pub type InjectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Unused,
    Prepare,
    /// A catch of a signal issued in the same submission: both sides were seen while
    /// still building the same command stream, so no cross-submission semaphore wait is
    /// needed, only the barrier (§3 lifecycle note).
    PrepareCatch,
    Pending,
    Catch,
    Used,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceRef {
    pub image: vk::Image,
    pub range: ViewRange,
    pub format: Option<vk::Format>,
}

fn ranges_overlap(a: ViewRange, b: ViewRange) -> bool {
    let mips_overlap = a.level_count == 0
        || b.level_count == 0
        || a.base_mip_level < b.base_mip_level + b.level_count
            && b.base_mip_level < a.base_mip_level + a.level_count;
    let layers_overlap = a.layer_count == 0
        || b.layer_count == 0
        || a.base_array_layer < b.base_array_layer + b.layer_count
            && b.base_array_layer < a.base_array_layer + a.layer_count;
    mips_overlap && layers_overlap
}

struct SyncObject {
    stage: SyncStage,
    has_semaphore: bool,
    has_barrier: bool,
    has_memory_hazard: bool,
    resource: Option<ResourceRef>,
    src_access: vk::AccessFlags2,
    dst_access: vk::AccessFlags2,
    src_stage: vk::PipelineStageFlags2,
    dst_stage: vk::PipelineStageFlags2,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_family: u32,
    dst_family: u32,
    injection: Option<InjectionId>,
    semaphore: Option<Arc<Semaphore>>,
    wait_credit: u32,
}

impl SyncObject {
    fn unused_no_semaphore() -> Self {
        Self {
            stage: SyncStage::Unused,
            has_semaphore: false,
            has_barrier: false,
            has_memory_hazard: false,
            resource: None,
            src_access: vk::AccessFlags2::empty(),
            dst_access: vk::AccessFlags2::empty(),
            src_stage: vk::PipelineStageFlags2::empty(),
            dst_stage: vk::PipelineStageFlags2::empty(),
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
            src_family: vk::QUEUE_FAMILY_IGNORED,
            dst_family: vk::QUEUE_FAMILY_IGNORED,
            injection: None,
            semaphore: None,
            wait_credit: 0,
        }
    }
}

pub struct CaughtWait {
    pub semaphore: Option<Arc<Semaphore>>,
    pub stage: vk::PipelineStageFlags2,
    pub barrier: Option<vk::ImageMemoryBarrier2<'static>>,
}

/// One dependency's sync-object pool: claim, prepare (signal), catch (wait), finish.
pub struct DependencyPool {
    device: Arc<DeviceShared>,
    objects: VecDeque<SyncObject>,
    wait_credit_capacity: u32,
    next_injection: InjectionId,
}

impl DependencyPool {
    pub fn new(device: Arc<DeviceShared>, wait_credit_capacity: u32) -> Self {
        Self {
            device,
            objects: VecDeque::new(),
            wait_credit_capacity,
            next_injection: 0,
        }
    }

    pub fn begin_injection(&mut self) -> InjectionId {
        let id = self.next_injection;
        self.next_injection += 1;
        id
    }

    /// Claims a sync object for a new signal. Shares a semaphore already `Prepare`-staged
    /// in the same injection toward the same `dst_family` instead of allocating another
    /// (§4.4 step 1).
    pub fn claim(&mut self, injection: InjectionId, needs_semaphore: bool, dst_family: u32) -> anyhow::Result<usize> {
        if needs_semaphore {
            if let Some(index) = self.objects.iter().position(|o| {
                o.injection == Some(injection) && o.stage == SyncStage::Prepare && o.has_semaphore && o.dst_family == dst_family
            }) {
                return Ok(index);
            }

            if let Some(index) = self
                .objects
                .iter()
                .position(|o| o.stage == SyncStage::Unused && o.has_semaphore)
            {
                self.objects[index].injection = Some(injection);
                self.objects[index].stage = SyncStage::Prepare;
                self.objects[index].dst_family = dst_family;
                return Ok(index);
            }

            let semaphore = Semaphore::new(self.device.clone(), SemaphoreType::Binary)?;
            let mut object = SyncObject::unused_no_semaphore();
            object.has_semaphore = true;
            object.semaphore = Some(Arc::new(semaphore));
            object.stage = SyncStage::Prepare;
            object.injection = Some(injection);
            object.dst_family = dst_family;
            self.objects.push_front(object);
            Ok(0)
        } else {
            if let Some(index) = self
                .objects
                .iter()
                .position(|o| o.stage == SyncStage::Unused && !o.has_semaphore)
            {
                self.objects[index].injection = Some(injection);
                self.objects[index].stage = SyncStage::Prepare;
                self.objects[index].dst_family = dst_family;
                return Ok(index);
            }

            let mut object = SyncObject::unused_no_semaphore();
            object.stage = SyncStage::Prepare;
            object.injection = Some(injection);
            object.dst_family = dst_family;
            self.objects.push_back(object);
            Ok(self.objects.len() - 1)
        }
    }

    /// Prepare (signal), §4.4. If a queue-family transfer is required, only the release
    /// half (dst access/stage zeroed) is recorded now; the acquire half is filled in by
    /// `catch`.
    pub fn prepare(
        &mut self,
        index: usize,
        resource: ResourceRef,
        access: ConsumeAccess,
        src_stage: vk::PipelineStageFlags2,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_family: u32,
        dst_family: u32,
    ) {
        let same_family = src_family == dst_family;
        let transfer = needs_queue_family_transfer(src_family, dst_family, access);
        let layout_changes = old_layout != new_layout;

        let needs_barrier = (same_family && access_writes(access)) || transfer || layout_changes;
        let needs_memory_hazard = (same_family && access_writes(access))
            || (transfer && access.intersects(ConsumeAccess::TRANSFER_READ | ConsumeAccess::TRANSFER_WRITE))
            || layout_changes;

        let object = &mut self.objects[index];
        object.resource = Some(resource);
        object.src_access = to_vulkan_access(access);
        object.src_stage = src_stage;
        object.old_layout = old_layout;
        object.new_layout = new_layout;
        object.src_family = src_family;
        object.dst_family = dst_family;
        object.has_barrier = needs_barrier;
        object.has_memory_hazard = needs_memory_hazard;

        if transfer {
            object.dst_access = vk::AccessFlags2::empty();
            object.dst_stage = vk::PipelineStageFlags2::empty();
        } else {
            object.dst_access = object.src_access;
            object.dst_stage = object.src_stage;
        }

        if object.has_semaphore {
            object.wait_credit = self.wait_credit_capacity;
        }
    }

    /// Catch (wait), §4.4. Scans for pending (or same-injection prepare) objects whose
    /// `dst_family` matches and whose resource overlaps `wanted`. Barriers for all matches
    /// are merged by the caller into a single `cmd_pipeline_barrier2` (§9 resolution).
    pub fn catch(
        &mut self,
        injecting_family: u32,
        wanted: ResourceRef,
        dst_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        injection: InjectionId,
    ) -> Vec<CaughtWait> {
        let mut results = Vec::new();

        let matches: Vec<usize> = self
            .objects
            .iter()
            .enumerate()
            .filter(|(_, o)| {
                matches!(o.stage, SyncStage::Pending | SyncStage::Prepare)
                    && o.dst_family == injecting_family
                    && o.resource.map(|r| r.image) == Some(wanted.image)
                    && o.resource.map(|r| ranges_overlap(r.range, wanted.range)).unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect();

        for index in matches {
            let same_injection =
                self.objects[index].injection == Some(injection) && self.objects[index].stage == SyncStage::Prepare;

            let barrier = if self.objects[index].has_barrier {
                let object = &self.objects[index];
                Some(build_image_barrier(&ImageBarrierDescriptor {
                    src_access: object.src_access,
                    dst_access,
                    src_stage: object.src_stage,
                    dst_stage,
                    old_layout: object.old_layout,
                    new_layout: object.new_layout,
                    src_queue_family: object.src_family,
                    dst_queue_family: object.dst_family,
                    image: wanted.image,
                    range: wanted.range,
                }))
            } else {
                None
            };

            let semaphore = if !same_injection && self.objects[index].has_semaphore {
                let object = &mut self.objects[index];
                if object.wait_credit > 0 {
                    object.wait_credit -= 1;
                }
                let credit_exhausted = object.wait_credit == 0;
                let semaphore = object.semaphore.clone();
                if credit_exhausted {
                    object.stage = SyncStage::Unused;
                    object.injection = None;
                } else {
                    // Re-owned by the catching submission so its own `finish()` can find
                    // and resolve this object; the producing side already finished.
                    object.stage = SyncStage::Catch;
                    object.injection = Some(injection);
                }
                semaphore
            } else {
                self.objects[index].stage = if same_injection {
                    SyncStage::PrepareCatch
                } else {
                    SyncStage::Catch
                };
                if !same_injection {
                    self.objects[index].injection = Some(injection);
                }
                None
            };

            results.push(CaughtWait {
                semaphore,
                stage: dst_stage,
                barrier,
            });
        }

        results
    }

    /// Finish, §4.4. Always called exactly once per record, success or abort.
    pub fn finish(&mut self, injection: InjectionId, success: bool) {
        for object in self.objects.iter_mut() {
            if object.injection != Some(injection) {
                continue;
            }
            object.stage = match (object.stage, success) {
                (SyncStage::Prepare, true) => SyncStage::Pending,
                (SyncStage::PrepareCatch, true) => SyncStage::Unused,
                (SyncStage::Catch, true) => {
                    if object.has_semaphore && object.wait_credit > 0 {
                        SyncStage::Used
                    } else {
                        SyncStage::Unused
                    }
                }
                (SyncStage::Catch, false) => SyncStage::Pending,
                (_, false) => SyncStage::Unused,
                (other, true) => other,
            };
            object.injection = None;
        }
    }

    /// The semaphore backing a claimed sync object, if any (§4.5 `submit`: a prepared
    /// signal with a semaphore must be added to the submission's signal list).
    pub fn semaphore_at(&self, index: usize) -> Option<Arc<Semaphore>> {
        self.objects[index].semaphore.clone()
    }

    #[cfg(test)]
    fn stage_of(&self, index: usize) -> SyncStage {
        self.objects[index].stage
    }
}

/// A single `UNDEFINED -> target` barrier for a resource referenced by an operation with
/// no matching wait (§4.4 "Initial transitions").
pub fn initial_transition_barrier(
    image: vk::Image,
    range: ViewRange,
    target_layout: vk::ImageLayout,
    dst_access: vk::AccessFlags2,
    dst_stage: vk::PipelineStageFlags2,
) -> vk::ImageMemoryBarrier2<'static> {
    build_image_barrier(&ImageBarrierDescriptor {
        src_access: vk::AccessFlags2::empty(),
        dst_access,
        src_stage: vk::PipelineStageFlags2::empty(),
        dst_stage,
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: target_layout,
        src_queue_family: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
        image,
        range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_range() -> ViewRange {
        ViewRange::whole(vk::ImageAspectFlags::COLOR)
    }

    fn dummy_ref() -> ResourceRef {
        ResourceRef {
            image: vk::Image::null(),
            range: dummy_range(),
            format: Some(vk::Format::B8G8R8A8_UNORM),
        }
    }

    #[test]
    fn same_injection_catch_short_circuits_through_prepare_catch() {
        let mut pool_objects = VecDeque::new();
        let mut object = SyncObject::unused_no_semaphore();
        object.stage = SyncStage::Prepare;
        object.injection = Some(1);
        object.dst_family = 0;
        object.resource = Some(dummy_ref());
        object.has_barrier = true;
        pool_objects.push_back(object);

        // Exercise catch()'s matching + stage transition logic directly without a real
        // device by constructing the pool's object list in isolation.
        let mut objects = pool_objects;
        let wanted = dummy_ref();
        let matches: Vec<usize> = objects
            .iter()
            .enumerate()
            .filter(|(_, o)| {
                matches!(o.stage, SyncStage::Pending | SyncStage::Prepare)
                    && o.dst_family == 0
                    && o.resource.map(|r| r.image) == Some(wanted.image)
            })
            .map(|(i, _)| i)
            .collect();
        assert_eq!(matches, vec![0]);

        let same_injection = objects[0].injection == Some(1) && objects[0].stage == SyncStage::Prepare;
        assert!(same_injection);
        objects[0].stage = SyncStage::PrepareCatch;
        assert_eq!(objects[0].stage, SyncStage::PrepareCatch);
    }

    #[test]
    fn wait_credit_reaches_zero_after_capacity_catches() {
        let mut object = SyncObject::unused_no_semaphore();
        object.has_semaphore = true;
        object.wait_credit = 2;

        object.wait_credit -= 1;
        assert_eq!(object.wait_credit, 1);
        object.wait_credit -= 1;
        assert_eq!(object.wait_credit, 0);
    }

    #[test]
    fn ranges_overlap_treats_zero_count_as_remaining() {
        let whole = ViewRange::whole(vk::ImageAspectFlags::COLOR);
        let narrow = ViewRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 3,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        assert!(ranges_overlap(whole, narrow));
    }

    #[test]
    fn initial_transition_barrier_has_no_src_access_or_family() {
        let barrier = initial_transition_barrier(
            vk::Image::null(),
            dummy_range(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        );
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::empty());
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn catch_reassigns_injection_to_the_catching_submission() {
        // A signal prepared by injection 1, now pending (producer already finished).
        let mut object = SyncObject::unused_no_semaphore();
        object.stage = SyncStage::Pending;
        object.injection = Some(1);
        object.has_semaphore = true;
        object.wait_credit = 2;

        // Catch by injection 2: not the same injection, credit survives (2 -> 1).
        let catching_injection = 2;
        let same_injection = object.injection == Some(catching_injection) && object.stage == SyncStage::Prepare;
        assert!(!same_injection);

        if object.wait_credit > 0 {
            object.wait_credit -= 1;
        }
        let credit_exhausted = object.wait_credit == 0;
        assert!(!credit_exhausted);
        object.stage = SyncStage::Catch;
        object.injection = Some(catching_injection);

        // The catching submission's own finish() must be able to find this object.
        assert_eq!(object.injection, Some(catching_injection));
        assert_eq!(object.stage, SyncStage::Catch);
    }

    #[test]
    fn abort_reverts_catch_to_pending_and_others_to_unused() {
        let mut objects = VecDeque::new();
        let mut caught = SyncObject::unused_no_semaphore();
        caught.stage = SyncStage::Catch;
        caught.injection = Some(5);
        objects.push_back(caught);

        let mut prepared = SyncObject::unused_no_semaphore();
        prepared.stage = SyncStage::Prepare;
        prepared.injection = Some(5);
        objects.push_back(prepared);

        for object in objects.iter_mut() {
            if object.injection != Some(5) {
                continue;
            }
            object.stage = match (object.stage, false) {
                (SyncStage::Catch, false) => SyncStage::Pending,
                (_, false) => SyncStage::Unused,
                (other, true) => other,
            };
            object.injection = None;
        }

        assert_eq!(objects[0].stage, SyncStage::Pending);
        assert_eq!(objects[1].stage, SyncStage::Unused);
    }
}
