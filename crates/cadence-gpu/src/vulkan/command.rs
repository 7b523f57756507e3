//! Command pools and the frame command buffer.

use std::sync::Arc;

use ash::vk;
use cadence_core::{Color, Rect, ResourceState, Viewport};

use super::device::DeviceShared;
use super::memory::{subresource_range, VulkanImageView, VulkanTexture};
use super::{conv, VulkanBackend};
use crate::backend::{CommandAllocator, CommandList};
use crate::error::Result;

/// A command pool with the one primary buffer recorded from it per frame.
pub struct VulkanCommandAllocator {
    shared: Arc<DeviceShared>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl VulkanCommandAllocator {
    pub(crate) fn new(shared: Arc<DeviceShared>, slot: usize) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(shared.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        // SAFETY: the device is valid
        let pool = unsafe { shared.device.create_command_pool(&create_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        // SAFETY: the pool was just created from this device
        let buffer = match unsafe { shared.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                // SAFETY: nothing was allocated from the pool
                unsafe { shared.device.destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };

        tracing::trace!("Command pool created for slot {slot}");

        Ok(Self {
            shared,
            pool,
            buffer,
        })
    }

    pub fn raw(&self) -> vk::CommandPool {
        self.pool
    }
}

impl CommandAllocator for VulkanCommandAllocator {
    fn reset(&mut self) -> Result<()> {
        // SAFETY: the caller waited for the slot's fence value
        unsafe {
            self.shared
                .device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

impl Drop for VulkanCommandAllocator {
    fn drop(&mut self) {
        // SAFETY: the GPU is idle or lost when allocators are released; the
        // buffer is freed with its pool
        unsafe { self.shared.device.destroy_command_pool(self.pool, None) };
    }
}

/// The frame command list. Records into the buffer of whichever allocator it
/// was last reset against.
pub struct VulkanCommandList {
    shared: Arc<DeviceShared>,
    buffer: vk::CommandBuffer,
}

impl VulkanCommandList {
    pub(crate) fn new(shared: Arc<DeviceShared>, allocator: &VulkanCommandAllocator) -> Self {
        Self {
            shared,
            buffer: allocator.buffer,
        }
    }

    /// The command buffer currently recorded into.
    pub fn raw(&self) -> vk::CommandBuffer {
        self.buffer
    }

    pub fn device(&self) -> &ash::Device {
        &self.shared.device
    }

    fn barrier(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        (old_layout, src_stage, src_access): (vk::ImageLayout, vk::PipelineStageFlags2, vk::AccessFlags2),
        (new_layout, dst_stage, dst_access): (vk::ImageLayout, vk::PipelineStageFlags2, vk::AccessFlags2),
    ) {
        let barriers = [vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range(aspect))];
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);

        // SAFETY: the buffer is recording and the image belongs to this device
        unsafe {
            self.shared
                .device
                .cmd_pipeline_barrier2(self.buffer, &dependency_info)
        };
    }
}

impl CommandList<VulkanBackend> for VulkanCommandList {
    fn reset(&mut self, allocator: &VulkanCommandAllocator) -> Result<()> {
        self.buffer = allocator.buffer;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        // SAFETY: the pool was reset, so the buffer is in the initial state
        unsafe {
            self.shared
                .device
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    fn transition(&mut self, texture: &VulkanTexture, before: ResourceState, after: ResourceState) {
        let mut src = conv::resource_state(before);
        // Presented contents are not preserved.
        if before == ResourceState::Present {
            src.0 = vk::ImageLayout::UNDEFINED;
        }
        self.barrier(texture.raw(), texture.aspect(), src, conv::resource_state(after));
    }

    fn set_render_targets(
        &mut self,
        _render_target: &VulkanImageView,
        _depth_stencil: Option<&VulkanImageView>,
    ) {
        // Dynamic rendering names its attachments per pass.
    }

    fn clear_render_target(&mut self, render_target: &VulkanImageView, color: Color) {
        let attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(render_target.raw())
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: color.to_array(),
                },
            })];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: render_target.extent(),
            })
            .layer_count(1)
            .color_attachments(&attachments);

        // SAFETY: the view is in COLOR_ATTACHMENT_OPTIMAL after prepare
        unsafe {
            let device = &self.shared.device;
            device.cmd_begin_rendering(self.buffer, &rendering_info);
            device.cmd_end_rendering(self.buffer);
        }
    }

    fn clear_depth(&mut self, depth_stencil: &VulkanImageView, depth: f32) {
        // Previous contents are discarded by the clear.
        let mut src = conv::resource_state(ResourceState::DepthWrite);
        src.0 = vk::ImageLayout::UNDEFINED;
        self.barrier(
            depth_stencil.image(),
            depth_stencil.aspect(),
            src,
            conv::resource_state(ResourceState::DepthWrite),
        );

        let attachment = vk::RenderingAttachmentInfo::default()
            .image_view(depth_stencil.raw())
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            });
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: depth_stencil.extent(),
            })
            .layer_count(1)
            .depth_attachment(&attachment);
        if depth_stencil.aspect().contains(vk::ImageAspectFlags::STENCIL) {
            rendering_info = rendering_info.stencil_attachment(&attachment);
        }

        // SAFETY: the view was just moved to DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        unsafe {
            let device = &self.shared.device;
            device.cmd_begin_rendering(self.buffer, &rendering_info);
            device.cmd_end_rendering(self.buffer);
        }
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        let viewports = [vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        }];
        // SAFETY: the buffer is recording
        unsafe { self.shared.device.cmd_set_viewport(self.buffer, 0, &viewports) };
    }

    fn set_scissor(&mut self, rect: &Rect) {
        let (width, height) = rect.clamped_extent();
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D {
                x: rect.left,
                y: rect.top,
            },
            extent: vk::Extent2D { width, height },
        }];
        // SAFETY: the buffer is recording
        unsafe { self.shared.device.cmd_set_scissor(self.buffer, 0, &scissors) };
    }

    fn close(&mut self) -> Result<()> {
        // SAFETY: the buffer is recording
        unsafe { self.shared.device.end_command_buffer(self.buffer)? };
        Ok(())
    }
}
