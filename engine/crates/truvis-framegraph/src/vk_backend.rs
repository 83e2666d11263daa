//! 基于 ash + vk-mem 的后端实现

use std::collections::{HashMap, HashSet};
use std::ffi::CString;

use ash::vk;
use vk_mem::{Alloc, Allocation};

use crate::backend::{FgCommandRecorder, FgResourceAllocator};
use crate::barrier::FgVkBarrierBatch;
use crate::error::{FgError, FgResult};

/// 使用 VMA 分配 owned 资源，image view 直接由 device 创建
pub struct FgVmaAllocator<'a> {
    device: &'a ash::Device,
    allocator: &'a vk_mem::Allocator,
    /// 用于给资源设置 debug name
    debug_utils: Option<&'a ash::ext::debug_utils::Device>,

    images: HashMap<vk::Image, Allocation>,
    buffers: HashMap<vk::Buffer, Allocation>,
    views: HashSet<vk::ImageView>,
}

// new & init
impl<'a> FgVmaAllocator<'a> {
    pub fn new(
        device: &'a ash::Device,
        allocator: &'a vk_mem::Allocator,
        debug_utils: Option<&'a ash::ext::debug_utils::Device>,
    ) -> Self {
        Self {
            device,
            allocator,
            debug_utils,
            images: HashMap::new(),
            buffers: HashMap::new(),
            views: HashSet::new(),
        }
    }

    fn set_debug_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(name.as_c_str());
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            log::warn!("failed to set debug name {:?}: {}", name, e);
        }
    }

    fn alloc_info() -> vk_mem::AllocationCreateInfo {
        vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        }
    }
}

impl FgResourceAllocator for FgVmaAllocator<'_> {
    fn create_image(&mut self, name: &str, create_info: &vk::ImageCreateInfo<'_>) -> FgResult<vk::Image> {
        let (image, allocation) = unsafe { self.allocator.create_image(create_info, &Self::alloc_info()) }
            .map_err(|result| FgError::Allocation {
                name: name.to_string(),
                result,
            })?;
        self.set_debug_name(image, name);
        self.images.insert(image, allocation);
        Ok(image)
    }

    fn destroy_image(&mut self, image: vk::Image) {
        match self.images.remove(&image) {
            Some(mut allocation) => unsafe { self.allocator.destroy_image(image, &mut allocation) },
            None => log::warn!("destroy_image: {:?} was not allocated by this allocator", image),
        }
    }

    fn create_buffer(&mut self, name: &str, create_info: &vk::BufferCreateInfo<'_>) -> FgResult<vk::Buffer> {
        let (buffer, allocation) = unsafe { self.allocator.create_buffer(create_info, &Self::alloc_info()) }
            .map_err(|result| FgError::Allocation {
                name: name.to_string(),
                result,
            })?;
        self.set_debug_name(buffer, name);
        self.buffers.insert(buffer, allocation);
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        match self.buffers.remove(&buffer) {
            Some(mut allocation) => unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) },
            None => log::warn!("destroy_buffer: {:?} was not allocated by this allocator", buffer),
        }
    }

    fn create_image_view(&mut self, name: &str, create_info: &vk::ImageViewCreateInfo<'_>) -> FgResult<vk::ImageView> {
        let view = unsafe { self.device.create_image_view(create_info, None) }.map_err(|result| FgError::Allocation {
            name: name.to_string(),
            result,
        })?;
        self.set_debug_name(view, &format!("{}-view", name));
        self.views.insert(view);
        Ok(view)
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        if self.views.remove(&view) {
            unsafe { self.device.destroy_image_view(view, None) };
        } else {
            log::warn!("destroy_image_view: {:?} was not created by this allocator", view);
        }
    }
}

impl Drop for FgVmaAllocator<'_> {
    fn drop(&mut self) {
        debug_assert!(self.images.is_empty(), "framegraph images leaked: {}", self.images.len());
        debug_assert!(self.buffers.is_empty(), "framegraph buffers leaked: {}", self.buffers.len());
        debug_assert!(self.views.is_empty(), "framegraph image views leaked: {}", self.views.len());
    }
}

/// 把 barrier 和 label 录制到一个 `vk::CommandBuffer`
pub struct FgVkCommandRecorder<'a> {
    device: &'a ash::Device,
    debug_utils: Option<&'a ash::ext::debug_utils::Device>,
    command_buffer: vk::CommandBuffer,
}

impl<'a> FgVkCommandRecorder<'a> {
    pub fn new(
        device: &'a ash::Device,
        debug_utils: Option<&'a ash::ext::debug_utils::Device>,
        command_buffer: vk::CommandBuffer,
    ) -> Self {
        Self {
            device,
            debug_utils,
            command_buffer,
        }
    }
}

impl FgCommandRecorder for FgVkCommandRecorder<'_> {
    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    fn pipeline_barrier(&mut self, barriers: &FgVkBarrierBatch) {
        if barriers.is_empty() {
            return;
        }
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(&barriers.image_barriers)
            .buffer_memory_barriers(&barriers.buffer_barriers)
            .dependency_flags(vk::DependencyFlags::empty());
        unsafe {
            self.device.cmd_pipeline_barrier2(self.command_buffer, &dependency_info);
        }
    }

    fn begin_label(&mut self, name: &str, color: glam::Vec4) {
        let Some(debug_utils) = self.debug_utils else {
            return;
        };
        let name = CString::new(name).unwrap_or_default();
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(
                self.command_buffer,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(color.into()),
            );
        }
    }

    fn end_label(&mut self) {
        let Some(debug_utils) = self.debug_utils else {
            return;
        };
        unsafe {
            debug_utils.cmd_end_debug_utils_label(self.command_buffer);
        }
    }

    #[inline]
    fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}
