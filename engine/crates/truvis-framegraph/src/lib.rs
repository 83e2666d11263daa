//! Framegraph - 资源依赖解析与 barrier 自动推导
//!
//! 每个 node 声明自己创建、导入和引用的资源，framegraph 负责：
//! - 按资源依赖排序 node（没有依赖的 node 保持插入顺序）
//! - 为每一次使用方式的变化生成一个 Vulkan sync2 barrier，同一 node 的 barrier 一次提交
//! - 按子资源（mip / layer / aspect、缓冲区字节区间）跟踪状态，barrier 只覆盖发生变化的范围
//! - 跨帧跟踪资源状态，尺寸变化时只重建尺寸相关的资源
//!
//! # 核心概念
//!
//! - **FgNode**: 一个 pass，声明资源并录制命令
//! - **FgImageUsage / FgBufferUsage**: 资源使用方式，包含 stage、access、layout 和子资源范围
//! - **FgResourceRegistry**: 按名字登记的逻辑资源
//! - **FgDependencyResolver**: 把使用方式的序列转换为 barrier
//! - **FgContext**: 生命周期 `Unbuilt -> ResourcesDeclared -> Resolved -> Recording -> Recorded`
//!
//! # 使用示例
//!
//! ```ignore
//! use truvis_framegraph::*;
//!
//! struct Upload;
//!
//! impl FgNode for Upload {
//!     fn name(&self) -> &str {
//!         "upload"
//!     }
//!
//!     fn declare_resources(&mut self, builder: &mut FgNodeBuilder<'_>) -> FgResult<()> {
//!         builder.create_image("target", FgImageDesc::target_sized(vk::Format::R8G8B8A8_UNORM), FgImageUsage::TRANSFER_DST)?;
//!         Ok(())
//!     }
//!
//!     fn record_commands(&mut self, ctx: &mut FgRecordContext<'_>) {
//!         let image = ctx.image("target").unwrap();
//!         // cmd_copy_buffer_to_image ...
//!     }
//! }
//!
//! let mut fg = FgContext::new(FgSettings::default(), swapchain_extent);
//! fg.add_node(Upload)?;
//! fg.add_node(Composite::default())?; // reference_image("target", FgImageUsage::SHADER_READ_FRAGMENT)
//!
//! let mut allocator = FgVmaAllocator::new(&device, &vma, Some(&debug_utils));
//! fg.build(&mut allocator)?;
//!
//! // 每帧
//! let mut recorder = FgVkCommandRecorder::new(&device, Some(&debug_utils), cmd);
//! fg.record_frame(&mut recorder, frame_index)?;
//! ```
//!
//! # 模块结构
//!
//! - `usage`: 资源使用方式（stage/access/layout）
//! - `resource` / `registry`: 逻辑资源和注册表
//! - `subresource`: 子资源范围以及逐子资源的状态存储
//! - `tracker`: 跨帧的使用方式跟踪
//! - `barrier` / `resolver`: barrier 推导
//! - `graph`: 依赖图和拓扑排序
//! - `context` / `sequencer` / `resize`: 生命周期驱动
//! - `backend` / `vk_backend`: GPU 接口以及 ash + vk-mem 实现

pub use ash::vk;

/// 打开 `profiling` feature 时为 tracy span，否则为空
#[cfg(feature = "profiling")]
macro_rules! profile_span {
    ($name:literal) => {
        tracy_client::span!($name)
    };
}

#[cfg(not(feature = "profiling"))]
macro_rules! profile_span {
    ($name:literal) => {
        ()
    };
}

pub(crate) use profile_span;

mod backend;
mod barrier;
mod context;
mod error;
mod graph;
mod handle;
mod node;
mod plan;
mod registry;
mod resize;
mod resolver;
mod resource;
mod sequencer;
mod settings;
mod subresource;
mod tracker;
mod usage;
mod vk_backend;

#[cfg(test)]
mod test_utils;

// Re-exports
pub use backend::{FgCommandRecorder, FgResourceAllocator};
pub use barrier::{FgBarrier, FgBarrierBatch, FgBufferBarrier, FgImageBarrier, FgVkBarrierBatch};
pub use context::{FgContext, FgState};
pub use error::{FgError, FgResourceKind, FgResult};
pub use graph::{FgDependencyEdge, FgDependencyGraph};
pub use handle::{FgBufferHandle, FgImageHandle, FgNodeHandle, FgResourceHandle};
pub use node::{FgNode, FgNodeBuilder, FgRecordContext};
pub use plan::{format_access_flags, format_pipeline_stage};
pub use registry::FgResourceRegistry;
pub use resolver::FgDependencyResolver;
pub use resource::{
    FgBufferDesc, FgBufferResource, FgBufferSize, FgBufferSource, FgExternalImage, FgImageDesc, FgImageExtent,
    FgImageResource, FgImageSource, FgImageViewDesc, infer_image_aspect,
};
pub use sequencer::NODE_LABEL_COLOR;
pub use settings::FgSettings;
pub use subresource::{FgBufferRange, FgImageRange, FgImageShape};
pub use tracker::{FgTrackedBuffer, FgTrackedImage, FgTrackedUsage, FgUsageTracker};
pub use usage::{FgBufferUsage, FgImageUsage, FgUsage};
pub use vk_backend::{FgVkCommandRecorder, FgVmaAllocator};
