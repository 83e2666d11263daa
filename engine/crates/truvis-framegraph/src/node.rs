//! Node 接口以及 node 在各阶段拿到的上下文

use ash::vk;

use crate::backend::FgCommandRecorder;
use crate::barrier::FgBarrierBatch;
use crate::error::{FgError, FgResult};
use crate::handle::{FgBufferHandle, FgImageHandle, FgNodeHandle, FgResourceHandle};
use crate::registry::FgResourceRegistry;
use crate::resource::{FgBufferDesc, FgExternalImage, FgImageDesc, FgImageViewDesc};
use crate::tracker::FgUsageTracker;
use crate::usage::{FgBufferUsage, FgImageUsage, FgUsage};

/// 一个渲染/计算 pass
///
/// 生命周期：
/// 1. `declare_resources`：每次 build 调用一次，声明创建、导入和引用的资源
/// 2. `record_commands`：每帧调用一次，framegraph 已经提交了该 node 需要的 barrier
/// 3. `on_resize`：node 使用的尺寸相关资源被重建之后调用
/// 4. `teardown`：node 被移除或 framegraph 销毁时调用
pub trait FgNode {
    fn name(&self) -> &str;

    fn declare_resources(&mut self, builder: &mut FgNodeBuilder<'_>) -> FgResult<()>;

    fn record_commands(&mut self, ctx: &mut FgRecordContext<'_>);

    fn on_resize(&mut self, _width: u32, _height: u32) {}

    fn teardown(&mut self) {}
}

/// 声明阶段收集的引用，名字在所有 node 声明完成后才解析
#[derive(Clone, Debug)]
pub(crate) struct FgPendingReference {
    pub node: FgNodeHandle,
    pub name: String,
    pub usage: FgUsage,
}

/// 解析过名字的引用
#[derive(Clone, Copy, Debug)]
pub(crate) struct FgReference {
    pub node: FgNodeHandle,
    pub handle: FgResourceHandle,
    pub usage: FgUsage,
}

/// 声明阶段收集的 image view 请求
#[derive(Clone, Debug)]
pub(crate) struct FgPendingView {
    pub node: FgNodeHandle,
    pub name: String,
    pub desc: FgImageViewDesc,
}

/// node 的一个 image view，`index` 是它在该 node 对同一图像的 view 中的序号
#[derive(Clone, Debug)]
pub(crate) struct FgImageViewEntry {
    pub node: FgNodeHandle,
    pub handle: FgImageHandle,
    pub name: String,
    pub index: usize,
    pub desc: FgImageViewDesc,
    pub view: Option<vk::ImageView>,
}

/// `declare_resources` 中使用的构建器
pub struct FgNodeBuilder<'a> {
    pub(crate) node: FgNodeHandle,
    pub(crate) registry: &'a mut FgResourceRegistry,
    pub(crate) tracker: &'a mut FgUsageTracker,
    pub(crate) references: &'a mut Vec<FgPendingReference>,
    pub(crate) views: &'a mut Vec<FgPendingView>,
    pub(crate) target_extent: vk::Extent2D,
}

// 创建 & 导入
impl FgNodeBuilder<'_> {
    /// 创建 owned 图像，`initial_usage` 是本 node 对它的使用方式
    pub fn create_image(
        &mut self,
        name: &str,
        desc: FgImageDesc,
        initial_usage: FgImageUsage,
    ) -> FgResult<FgImageHandle> {
        self.registry.declare_created_image(self.tracker, self.node, name, desc, initial_usage)
    }

    pub fn create_buffer(
        &mut self,
        name: &str,
        desc: FgBufferDesc,
        initial_usage: FgBufferUsage,
    ) -> FgResult<FgBufferHandle> {
        self.registry.declare_created_buffer(self.tracker, self.node, name, desc, initial_usage)
    }

    /// 导入外部图像，`initial_usage` 是图像交给 framegraph 时所处的状态
    ///
    /// 导入的 node 与创建者一样排在所有引用者之前，并以 `initial_usage` 持有图像。
    pub fn import_image(
        &mut self,
        name: &str,
        external: FgExternalImage,
        initial_usage: FgImageUsage,
    ) -> FgResult<FgImageHandle> {
        self.registry.declare_imported_image(self.tracker, Some(self.node), name, external, initial_usage)
    }

    pub fn import_buffer(
        &mut self,
        name: &str,
        buffer: vk::Buffer,
        initial_usage: FgBufferUsage,
    ) -> FgResult<FgBufferHandle> {
        self.registry.declare_imported_buffer(self.tracker, Some(self.node), name, buffer, initial_usage)
    }

    /// 为图像 `name` 请求一个 view，返回录制时用于 [`FgRecordContext::image_view`] 的序号
    ///
    /// view 随图像一起创建和销毁；图像被重建或重新绑定时 view 也会重建。
    pub fn create_image_view(&mut self, name: &str, desc: FgImageViewDesc) -> usize {
        let index = self.views.iter().filter(|v| v.node == self.node && v.name == name).count();
        self.views.push(FgPendingView {
            node: self.node,
            name: name.to_string(),
            desc,
        });
        index
    }
}

// 引用
impl FgNodeBuilder<'_> {
    /// 引用其它 node 创建或导入的图像，资源可以由之后插入的 node 创建
    pub fn reference_image(&mut self, name: &str, usage: FgImageUsage) {
        self.reference(name, usage.into());
    }

    pub fn reference_buffer(&mut self, name: &str, usage: FgBufferUsage) {
        self.reference(name, usage.into());
    }

    fn reference(&mut self, name: &str, usage: FgUsage) {
        self.references.push(FgPendingReference {
            node: self.node,
            name: name.to_string(),
            usage,
        });
    }

    #[inline]
    pub fn target_extent(&self) -> vk::Extent2D {
        self.target_extent
    }

    #[inline]
    pub fn node(&self) -> FgNodeHandle {
        self.node
    }
}

/// `record_commands` 中使用的上下文
pub struct FgRecordContext<'a> {
    pub(crate) recorder: &'a mut dyn FgCommandRecorder,
    pub(crate) registry: &'a FgResourceRegistry,
    pub(crate) views: &'a [FgImageViewEntry],
    pub(crate) barriers: &'a FgBarrierBatch,
    pub(crate) frame_index: usize,
    pub(crate) node: FgNodeHandle,
}

impl FgRecordContext<'_> {
    #[inline]
    pub fn recorder(&mut self) -> &mut dyn FgCommandRecorder {
        &mut *self.recorder
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.recorder.command_buffer()
    }

    /// 在本 node 之前已经提交的 barrier
    #[inline]
    pub fn barriers(&self) -> &FgBarrierBatch {
        self.barriers
    }

    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn node(&self) -> FgNodeHandle {
        self.node
    }

    pub fn image(&self, name: &str) -> FgResult<vk::Image> {
        let handle = self.registry.image_handle(name)?;
        self.get_image(handle).ok_or_else(|| FgError::ResourceNotBacked(name.to_string()))
    }

    pub fn buffer(&self, name: &str) -> FgResult<vk::Buffer> {
        let handle = self.registry.buffer_handle(name)?;
        self.get_buffer(handle).ok_or_else(|| FgError::ResourceNotBacked(name.to_string()))
    }

    /// 本 node 在声明阶段请求的第 `index` 个 `name` 的 view
    pub fn image_view(&self, name: &str, index: usize) -> FgResult<vk::ImageView> {
        let entry = self
            .views
            .iter()
            .find(|v| v.node == self.node && v.index == index && v.name == name)
            .ok_or_else(|| FgError::ImageViewNotFound {
                name: name.to_string(),
                index,
            })?;
        entry.view.ok_or_else(|| FgError::ResourceNotBacked(name.to_string()))
    }

    #[inline]
    pub fn get_image(&self, handle: FgImageHandle) -> Option<vk::Image> {
        self.registry.get_image(handle).and_then(|r| r.physical_handle())
    }

    #[inline]
    pub fn get_buffer(&self, handle: FgBufferHandle) -> Option<vk::Buffer> {
        self.registry.get_buffer(handle).and_then(|r| r.physical_handle())
    }
}
