//! GPU 后端接口
//!
//! framegraph 只通过这两个 trait 接触 GPU：分配/释放 owned 资源和 image view，
//! 以及把 barrier 和 debug label 录制到命令缓冲区。返回的 handle 只被存储，不被解释。

use ash::vk;

use crate::barrier::FgVkBarrierBatch;
use crate::error::FgResult;

/// owned 资源的分配器
pub trait FgResourceAllocator {
    /// 分配失败时返回 [`FgError::Allocation`](crate::FgError::Allocation)
    fn create_image(&mut self, name: &str, create_info: &vk::ImageCreateInfo<'_>) -> FgResult<vk::Image>;

    fn destroy_image(&mut self, image: vk::Image);

    fn create_buffer(&mut self, name: &str, create_info: &vk::BufferCreateInfo<'_>) -> FgResult<vk::Buffer>;

    fn destroy_buffer(&mut self, buffer: vk::Buffer);

    /// 为 owned 或导入的图像创建 view，`name` 是图像的名字
    fn create_image_view(&mut self, name: &str, create_info: &vk::ImageViewCreateInfo<'_>) -> FgResult<vk::ImageView>;

    fn destroy_image_view(&mut self, view: vk::ImageView);
}

/// 命令录制目标
pub trait FgCommandRecorder {
    /// 一个 node 的所有 barrier 必须在一次调用中提交
    fn pipeline_barrier(&mut self, barriers: &FgVkBarrierBatch);

    fn begin_label(&mut self, name: &str, color: glam::Vec4);

    fn end_label(&mut self);

    /// node 录制自己的命令时使用的 command buffer
    fn command_buffer(&self) -> vk::CommandBuffer;
}
