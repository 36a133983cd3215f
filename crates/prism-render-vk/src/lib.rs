// SPDX-License-Identifier: CEPL-1.0
use anyhow::{ensure, Context, Result};
use ash::vk;
use prism_render::{Cycle, Feature, RenderConfig, RenderSize, Renderer, SwapchainError};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, trace, warn};

mod context;
mod device;
mod feature_table;
mod frame;
mod instance;
mod memory;
mod physical;
mod presenter;
mod surface;

pub use context::{DeviceContext, VkFrame};
pub use device::{LogicalDevice, Queue};
pub use instance::VkInstance;
pub use physical::VkCandidate;
pub use presenter::VkPresenter;
pub use surface::SurfaceLayout;

use frame::FrameSlot;

/// Features the frame loop records with.
const REQUIRED_FEATURES: [Feature; 2] = [Feature::DYNAMIC_RENDERING, Feature::SYNCHRONIZATION2];

/// Clears color and depth each frame through dynamic rendering.
pub struct VkRenderer {
    frames: Cycle<FrameSlot>,
    command_pool: vk::CommandPool,
    depth_format: vk::Format,
    /// Updated only when an acquire reports `extent_changed`.
    target_extent: RenderSize,
    clear: vk::ClearValue,
    paused: bool,
    ctx: DeviceContext,
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            let device = self.ctx.device();
            if let Err(e) = device.device_wait_idle() {
                warn!("vkDeviceWaitIdle failed during renderer teardown: {e}");
            }
            for slot in self.frames.iter_mut() {
                slot.destroy(device);
            }
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

impl VkRenderer {
    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    // STRICT PER-FRAME ORDER:
    // 1) rotate the ring, wait on the current slot's fence
    // 2) acquire, signaling prev().image_available
    // 3) record into the current slot's command buffer
    // 4) submit: wait prev().image_available, signal current().render_finished
    // 5) present, waiting on render_finished
    unsafe fn draw_frame(&mut self) -> Result<()> {
        self.frames.cycle();
        let fence = self.frames.current().fence;
        self.ctx
            .device()
            .wait_for_fences(&[fence], true, u64::MAX)
            .context("Wait for frame fence failed")?;

        let image_available = self.frames.prev().image_available;
        let frame = match self.ctx.acquire(Some(image_available), None, u64::MAX) {
            Ok(frame) => frame,
            Err(e) if e.downcast_ref::<SwapchainError>() == Some(&SwapchainError::ZeroExtent) => {
                trace!("surface extent is 0x0, skipping frame");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if frame.extent_changed {
            info!("render target {} -> {}", self.target_extent, frame.extent);
            self.target_extent = frame.extent;
        }

        let device = self.ctx.device();
        let slot = self.frames.current_mut();
        let depth = slot.ensure_depth(
            device,
            self.ctx.memory_properties(),
            self.depth_format,
            self.target_extent,
        )?;

        let target = Target {
            image: frame.image,
            view: frame.view,
            depth_image: depth.image,
            depth_view: depth.view,
            depth_aspect: depth_aspect(self.depth_format),
            extent: self.target_extent,
        };
        record(device, slot.cmd, &target, self.clear).context("Record frame commands failed")?;

        let cmd = slot.cmd;
        let render_finished = slot.render_finished;
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &render_finished,
            ..Default::default()
        };
        device
            .reset_fences(&[slot.fence])
            .context("Reset frame fence failed")?;
        device
            .queue_submit(
                self.ctx.graphics_queue().raw,
                std::slice::from_ref(&submit),
                slot.fence,
            )
            .context("queue_submit")?;

        self.ctx.present(frame.index, Some(render_finished))
    }
}

/// The images one frame draws into.
struct Target {
    image: vk::Image,
    view: vk::ImageView,
    depth_image: vk::Image,
    depth_view: vk::ImageView,
    depth_aspect: vk::ImageAspectFlags,
    extent: RenderSize,
}

fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

fn subresource(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

unsafe fn record(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: &Target,
    clear: vk::ClearValue,
) -> Result<()> {
    device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    device.begin_command_buffer(cmd, &begin)?;

    transition_to_attachment(device, cmd, target);
    begin_rendering(device, cmd, target, clear);
    device.cmd_end_rendering(cmd);
    transition_to_present(device, cmd, target.image);

    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Previous contents of both attachments are discarded.
unsafe fn transition_to_attachment(device: &ash::Device, cmd: vk::CommandBuffer, target: &Target) {
    let barriers = [
        vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            // Chains with the acquire semaphore wait stage.
            src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags2::empty(),
            dst_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags2::COLOR_ATTACHMENT_READ,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            image: target.image,
            subresource_range: subresource(vk::ImageAspectFlags::COLOR),
            ..Default::default()
        },
        vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            src_access_mask: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_stage_mask: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            dst_access_mask: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            image: target.depth_image,
            subresource_range: subresource(target.depth_aspect),
            ..Default::default()
        },
    ];
    let dep = vk::DependencyInfo {
        s_type: vk::StructureType::DEPENDENCY_INFO,
        image_memory_barrier_count: barriers.len() as u32,
        p_image_memory_barriers: barriers.as_ptr(),
        ..Default::default()
    };
    device.cmd_pipeline_barrier2(cmd, &dep);
}

unsafe fn begin_rendering(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: &Target,
    clear: vk::ClearValue,
) {
    let color_att = vk::RenderingAttachmentInfo {
        s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
        image_view: target.view,
        image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        clear_value: clear,
        ..Default::default()
    };
    let depth_att = vk::RenderingAttachmentInfo {
        s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
        image_view: target.depth_view,
        image_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        clear_value: vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
        ..Default::default()
    };
    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D {
            width: target.extent.width,
            height: target.extent.height,
        },
    };
    let rendering_info = vk::RenderingInfo {
        s_type: vk::StructureType::RENDERING_INFO,
        render_area,
        layer_count: 1,
        color_attachment_count: 1,
        p_color_attachments: &color_att,
        p_depth_attachment: &depth_att,
        ..Default::default()
    };
    device.cmd_begin_rendering(cmd, &rendering_info);
}

unsafe fn transition_to_present(device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image) {
    let post_barrier = vk::ImageMemoryBarrier2 {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
        src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        dst_stage_mask: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        dst_access_mask: vk::AccessFlags2::empty(),
        old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        image,
        subresource_range: subresource(vk::ImageAspectFlags::COLOR),
        ..Default::default()
    };
    let dep = vk::DependencyInfo {
        s_type: vk::StructureType::DEPENDENCY_INFO,
        image_memory_barrier_count: 1,
        p_image_memory_barriers: &post_barrier,
        ..Default::default()
    };
    device.cmd_pipeline_barrier2(cmd, &dep);
}

unsafe fn create_frames(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: usize,
) -> Result<Cycle<FrameSlot>> {
    let mut slots = Vec::with_capacity(count.max(1));
    for i in 0..count.max(1) {
        match FrameSlot::new(device, pool) {
            Ok(slot) => slots.push(slot),
            Err(e) => {
                for slot in &mut slots {
                    slot.destroy(device);
                }
                return Err(e.context(format!("Create frame slot {i} failed")));
            }
        }
    }
    Ok(Cycle::new(slots))
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RenderConfig,
    ) -> Result<Self> {
        let ctx = DeviceContext::create(window, display, size, config)?;
        let enabled = &ctx.enabled_features().features;
        for feature in REQUIRED_FEATURES {
            ensure!(
                enabled.contains(&feature),
                "Renderer records with {feature}, but the feature request left it out"
            );
        }

        unsafe {
            let device = ctx.device();
            let pool_ci = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                queue_family_index: ctx.graphics_queue().family,
                ..Default::default()
            };
            let command_pool = device
                .create_command_pool(&pool_ci, None)
                .context("Create command pool failed")?;

            let frames = match create_frames(device, command_pool, config.frames_in_flight) {
                Ok(frames) => frames,
                Err(e) => {
                    device.destroy_command_pool(command_pool, None);
                    return Err(e);
                }
            };

            let depth_format = memory::pick_depth_format(ctx.instance(), ctx.physical_device());
            info!(
                "Vulkan renderer ready on {} ({} frame(s) in flight, depth {:?})",
                ctx.device_name(),
                frames.len(),
                depth_format
            );

            Ok(Self {
                frames,
                command_pool,
                depth_format,
                target_extent: RenderSize::default(),
                clear: vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [0.0, 0.0, 0.0, 1.0],
                    },
                },
                paused: size.is_empty(),
                ctx,
            })
        }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        let paused = size.is_empty();
        if paused != self.paused {
            info!("vk: resize to {size} → paused={paused}");
        }
        self.paused = paused;
        if !paused {
            self.ctx.set_size_hint(size);
        }
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = vk::ClearValue {
            color: vk::ClearColorValue { float32: rgba },
        };
    }

    fn render(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        unsafe { self.draw_frame() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stencil_formats_transition_both_aspects() {
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(depth_aspect(vk::Format::D16_UNORM), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn frame_loop_features_are_in_the_default_request() {
        let request = prism_render::FeatureRequest::default();
        for feature in REQUIRED_FEATURES {
            assert!(request.features().contains(&feature), "{feature} missing");
        }
    }
}
