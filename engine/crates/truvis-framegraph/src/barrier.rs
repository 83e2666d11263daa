//! Barrier 描述
//!
//! 解析阶段只生成与物理资源无关的描述；录制时才转换为
//! `vk::ImageMemoryBarrier2` / `vk::BufferMemoryBarrier2`，
//! 这样导入资源可以每帧重新绑定（例如 swapchain image）。

use ash::vk;

use crate::error::{FgError, FgResult};
use crate::handle::{FgBufferHandle, FgImageHandle, FgNodeHandle};
use crate::registry::FgResourceRegistry;
use crate::subresource::{FgBufferRange, FgImageRange};
use crate::usage::{FgBufferUsage, FgImageUsage, write_access_only};

/// 图像 barrier 描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FgImageBarrier {
    pub handle: FgImageHandle,
    /// 上一个使用者，帧边界上为 None
    pub src_node: Option<FgNodeHandle>,
    pub dst_node: Option<FgNodeHandle>,

    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,

    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,

    /// 覆盖的子资源，默认整个图像
    pub range: FgImageRange,
}

impl FgImageBarrier {
    /// `previous` 到 `requested` 的转换，`requested` 的 layout 应当已经 resolve 过
    pub fn new(handle: FgImageHandle, previous: &FgImageUsage, requested: &FgImageUsage) -> Self {
        Self {
            handle,
            src_node: None,
            dst_node: None,
            src_stage: previous.stage,
            src_access: previous.access,
            dst_stage: requested.stage,
            dst_access: requested.access,
            old_layout: previous.finish_layout,
            new_layout: requested.start_layout,
            range: FgImageRange::ALL,
        }
    }

    pub fn with_range(mut self, range: FgImageRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_nodes(mut self, src_node: Option<FgNodeHandle>, dst_node: Option<FgNodeHandle>) -> Self {
        self.src_node = src_node;
        self.dst_node = dst_node;
        self
    }

    /// 丢弃旧内容
    pub fn discard_contents(mut self) -> Self {
        self.old_layout = vk::ImageLayout::UNDEFINED;
        self
    }

    #[inline]
    pub fn has_layout_transition(&self) -> bool {
        self.old_layout != self.new_layout
    }

    /// `range` 是 resolve 过的 [`Self::range`]
    pub fn to_vk(&self, image: vk::Image, range: &FgImageRange) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(self.src_stage)
            .src_access_mask(write_access_only(self.src_access))
            .dst_stage_mask(self.dst_stage)
            .dst_access_mask(self.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range.to_vk())
    }
}

/// 缓冲区 barrier 描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FgBufferBarrier {
    pub handle: FgBufferHandle,
    pub src_node: Option<FgNodeHandle>,
    pub dst_node: Option<FgNodeHandle>,

    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,

    pub offset: vk::DeviceSize,
    /// WHOLE_SIZE 表示整个缓冲区
    pub size: vk::DeviceSize,
}

impl FgBufferBarrier {
    pub fn new(handle: FgBufferHandle, previous: &FgBufferUsage, requested: &FgBufferUsage) -> Self {
        Self {
            handle,
            src_node: None,
            dst_node: None,
            src_stage: previous.stage,
            src_access: previous.access,
            dst_stage: requested.stage,
            dst_access: requested.access,
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }

    pub fn with_range(mut self, range: FgBufferRange) -> Self {
        self.offset = range.offset;
        self.size = range.size;
        self
    }

    #[inline]
    pub fn range(&self) -> FgBufferRange {
        FgBufferRange::new(self.offset, self.size)
    }

    pub fn with_nodes(mut self, src_node: Option<FgNodeHandle>, dst_node: Option<FgNodeHandle>) -> Self {
        self.src_node = src_node;
        self.dst_node = dst_node;
        self
    }

    pub fn to_vk(&self, buffer: vk::Buffer) -> vk::BufferMemoryBarrier2<'static> {
        vk::BufferMemoryBarrier2::default()
            .src_stage_mask(self.src_stage)
            .src_access_mask(write_access_only(self.src_access))
            .dst_stage_mask(self.dst_stage)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(self.offset)
            .size(self.size)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FgBarrier {
    Image(FgImageBarrier),
    Buffer(FgBufferBarrier),
}

/// 一个 node 执行之前需要一次性提交的所有 barrier
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FgBarrierBatch {
    pub image_barriers: Vec<FgImageBarrier>,
    pub buffer_barriers: Vec<FgBufferBarrier>,
}

impl FgBarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, barrier: FgBarrier) {
        match barrier {
            FgBarrier::Image(barrier) => self.image_barriers.push(barrier),
            FgBarrier::Buffer(barrier) => self.buffer_barriers.push(barrier),
        }
    }

    #[inline]
    pub fn has_barriers(&self) -> bool {
        !self.image_barriers.is_empty() || !self.buffer_barriers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.image_barriers.len() + self.buffer_barriers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_barriers()
    }

    pub fn clear(&mut self) {
        self.image_barriers.clear();
        self.buffer_barriers.clear();
    }

    /// 所有 barrier 的 src stage 之和
    pub fn src_stages(&self) -> vk::PipelineStageFlags2 {
        let images = self.image_barriers.iter().map(|b| b.src_stage);
        let buffers = self.buffer_barriers.iter().map(|b| b.src_stage);
        images.chain(buffers).fold(vk::PipelineStageFlags2::NONE, |acc, stage| acc | stage)
    }

    /// 所有 barrier 的 dst stage 之和
    pub fn dst_stages(&self) -> vk::PipelineStageFlags2 {
        let images = self.image_barriers.iter().map(|b| b.dst_stage);
        let buffers = self.buffer_barriers.iter().map(|b| b.dst_stage);
        images.chain(buffers).fold(vk::PipelineStageFlags2::NONE, |acc, stage| acc | stage)
    }

    /// 用注册表中的物理资源生成 Vulkan barrier
    pub fn to_vk(&self, registry: &FgResourceRegistry) -> FgResult<FgVkBarrierBatch> {
        let mut batch = FgVkBarrierBatch::default();

        for barrier in &self.image_barriers {
            let resource = registry
                .get_image(barrier.handle)
                .ok_or_else(|| FgError::ResourceNotBacked(registry.name_of(barrier.handle.into()).to_string()))?;
            let image = resource.physical_handle().ok_or_else(|| FgError::ResourceNotBacked(resource.name.clone()))?;
            let range = resource.shape().resolve(&barrier.range).ok_or_else(|| FgError::SubresourceOutOfRange {
                name: resource.name.clone(),
                range: format!("{:?}", barrier.range),
            })?;
            batch.image_barriers.push(barrier.to_vk(image, &range));
        }

        for barrier in &self.buffer_barriers {
            let resource = registry
                .get_buffer(barrier.handle)
                .ok_or_else(|| FgError::ResourceNotBacked(registry.name_of(barrier.handle.into()).to_string()))?;
            let buffer = resource.physical_handle().ok_or_else(|| FgError::ResourceNotBacked(resource.name.clone()))?;
            batch.buffer_barriers.push(barrier.to_vk(buffer));
        }

        Ok(batch)
    }
}

/// 可以直接提交给 `vkCmdPipelineBarrier2` 的 barrier 集合
#[derive(Clone, Debug, Default)]
pub struct FgVkBarrierBatch {
    pub image_barriers: Vec<vk::ImageMemoryBarrier2<'static>>,
    pub buffer_barriers: Vec<vk::BufferMemoryBarrier2<'static>>,
}

impl FgVkBarrierBatch {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty() && self.buffer_barriers.is_empty()
    }
}
