// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_render::RenderSize;
use tracing::debug;

use crate::memory::DepthTarget;

/// Scratch resource built for one extent.
pub(crate) trait SizedResource {
    fn extent(&self) -> RenderSize;
}

impl SizedResource for DepthTarget {
    fn extent(&self) -> RenderSize {
        self.extent
    }
}

/// Keeps `slot` sized for `extent`: a matching resource is reused, a stale
/// one is destroyed and rebuilt, an empty slot is built.
pub(crate) fn ensure_sized<T: SizedResource>(
    slot: &mut Option<T>,
    extent: RenderSize,
    build: impl FnOnce() -> Result<T>,
    destroy: impl FnOnce(T),
) -> Result<&mut T> {
    let resource = match slot.take() {
        Some(current) if current.extent() == extent => current,
        Some(stale) => {
            debug!("rebuilding scratch target {} -> {}", stale.extent(), extent);
            destroy(stale);
            build()?
        }
        None => build()?,
    };
    Ok(slot.insert(resource))
}

fn single_command_buffer(buffers: Vec<vk::CommandBuffer>) -> Result<vk::CommandBuffer> {
    buffers
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Command buffer allocation returned no buffers"))
}

/// One entry of the frame ring.
pub(crate) struct FrameSlot {
    /// Signaled when this slot's last submission finished.
    pub fence: vk::Fence,
    /// Signaled by the acquire issued while this slot is `prev()`.
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub cmd: vk::CommandBuffer,
    pub depth: Option<DepthTarget>,
}

impl FrameSlot {
    pub(crate) unsafe fn new(device: &ash::Device, pool: vk::CommandPool) -> Result<Self> {
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };

        let mut slot = Self {
            fence: vk::Fence::null(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            cmd: vk::CommandBuffer::null(),
            depth: None,
        };
        let built = (|| -> Result<()> {
            slot.fence = device.create_fence(&fence_ci, None).context("Create frame fence failed")?;
            slot.image_available = device
                .create_semaphore(&sem_ci, None)
                .context("Create image-available semaphore failed")?;
            slot.render_finished = device
                .create_semaphore(&sem_ci, None)
                .context("Create render-finished semaphore failed")?;
            slot.cmd = single_command_buffer(
                device
                    .allocate_command_buffers(&alloc_info)
                    .context("Allocate frame command buffer failed")?,
            )?;
            Ok(())
        })();

        match built {
            Ok(()) => Ok(slot),
            Err(e) => {
                slot.destroy(device);
                Err(e)
            }
        }
    }

    /// Rebuilds the depth target when it was sized for another extent.
    /// Only call after this slot's fence has signaled.
    pub(crate) unsafe fn ensure_depth(
        &mut self,
        device: &ash::Device,
        memory_props: &vk::PhysicalDeviceMemoryProperties,
        format: vk::Format,
        extent: RenderSize,
    ) -> Result<&DepthTarget> {
        let depth = ensure_sized(
            &mut self.depth,
            extent,
            || DepthTarget::new(device, memory_props, format, extent),
            |stale| stale.destroy(device),
        )?;
        Ok(depth)
    }

    /// The command buffer is freed with its pool.
    pub(crate) unsafe fn destroy(&mut self, device: &ash::Device) {
        if let Some(depth) = self.depth.take() {
            depth.destroy(device);
        }
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_semaphore(self.image_available, None);
        device.destroy_fence(self.fence, None);
        self.render_finished = vk::Semaphore::null();
        self.image_available = vk::Semaphore::null();
        self.fence = vk::Fence::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_render::Cycle;

    #[derive(Debug)]
    struct Scratch {
        extent: RenderSize,
    }

    impl SizedResource for Scratch {
        fn extent(&self) -> RenderSize {
            self.extent
        }
    }

    #[derive(Default)]
    struct Counts {
        built: usize,
        destroyed: usize,
    }

    fn frame(ring: &mut Cycle<Option<Scratch>>, extent: RenderSize, counts: &mut Counts) {
        ring.cycle();
        let Counts { built, destroyed } = counts;
        let scratch = ensure_sized(
            ring.current_mut(),
            extent,
            || {
                *built += 1;
                Ok(Scratch { extent })
            },
            |_| *destroyed += 1,
        )
        .unwrap();
        assert_eq!(scratch.extent, extent);
    }

    fn sized_for(ring: &Cycle<Option<Scratch>>, extent: RenderSize) -> usize {
        ring.iter()
            .filter(|s| s.as_ref().is_some_and(|s| s.extent == extent))
            .count()
    }

    #[test]
    fn each_slot_rebuilds_once_on_its_turn_after_a_resize() {
        let small = RenderSize::new(800, 600);
        let large = RenderSize::new(1024, 768);
        let mut ring = Cycle::new(vec![None, None, None]);
        let mut counts = Counts::default();

        for _ in 0..6 {
            frame(&mut ring, small, &mut counts);
        }
        assert_eq!((counts.built, counts.destroyed), (3, 0));

        for turn in 1..=3 {
            frame(&mut ring, large, &mut counts);
            assert_eq!(sized_for(&ring, large), turn);
            assert_eq!(sized_for(&ring, small), 3 - turn);
        }
        assert_eq!((counts.built, counts.destroyed), (6, 3));

        for _ in 0..9 {
            frame(&mut ring, large, &mut counts);
        }
        assert_eq!((counts.built, counts.destroyed), (6, 3));
    }

    #[test]
    fn failed_rebuild_leaves_the_slot_empty() {
        let mut slot = Some(Scratch {
            extent: RenderSize::new(800, 600),
        });
        let mut destroyed = false;
        let err = ensure_sized(
            &mut slot,
            RenderSize::new(1024, 768),
            || Err(anyhow!("out of device memory")),
            |_| destroyed = true,
        )
        .unwrap_err();
        assert!(err.to_string().contains("out of device memory"));
        assert!(destroyed);
        assert!(slot.is_none());
    }

    #[test]
    fn empty_allocation_is_an_error() {
        assert!(single_command_buffer(Vec::new()).is_err());
        let cmd = vk::CommandBuffer::null();
        assert_eq!(single_command_buffer(vec![cmd]).unwrap(), cmd);
    }
}
