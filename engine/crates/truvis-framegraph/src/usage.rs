//! 资源使用方式定义
//!
//! 封装 Vulkan 的 pipeline stage、access mask 和 image layout，
//! 描述某个 node 在持有资源期间如何访问它，并提供常用的预定义组合。

use ash::vk;

use crate::subresource::{FgBufferRange, FgImageRange};

/// 会产生写入的 access flags
const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_WRITE.as_raw()
        | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
        | vk::AccessFlags2::HOST_WRITE.as_raw()
        | vk::AccessFlags2::MEMORY_WRITE.as_raw()
        | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR.as_raw(),
);

/// 只读 access，作为 barrier 的 src 时没有意义
const READ_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::INDIRECT_COMMAND_READ.as_raw()
        | vk::AccessFlags2::INDEX_READ.as_raw()
        | vk::AccessFlags2::VERTEX_ATTRIBUTE_READ.as_raw()
        | vk::AccessFlags2::UNIFORM_READ.as_raw()
        | vk::AccessFlags2::INPUT_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::SHADER_READ.as_raw()
        | vk::AccessFlags2::SHADER_SAMPLED_READ.as_raw()
        | vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::TRANSFER_READ.as_raw()
        | vk::AccessFlags2::HOST_READ.as_raw()
        | vk::AccessFlags2::MEMORY_READ.as_raw()
        | vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR.as_raw(),
);

#[inline]
const fn access_writes(access: vk::AccessFlags2) -> bool {
    access.as_raw() & WRITE_ACCESS.as_raw() != 0
}

/// 去掉只读 access
#[inline]
pub(crate) fn write_access_only(access: vk::AccessFlags2) -> vk::AccessFlags2 {
    access & !READ_ACCESS
}

#[inline]
const fn or_access(a: vk::AccessFlags2, b: vk::AccessFlags2) -> vk::AccessFlags2 {
    vk::AccessFlags2::from_raw(a.as_raw() | b.as_raw())
}

/// 图像使用方式
///
/// node 持有图像期间，图像从 `start_layout` 开始，到 `finish_layout` 结束。
/// 大多数情况下两者相同；render pass 自带 layout 转换时可以不同。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FgImageUsage {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    /// node 开始访问时期望的 layout，`UNDEFINED` 表示沿用上一个使用者留下的 layout
    pub start_layout: vk::ImageLayout,
    /// node 结束时图像所处的 layout
    pub finish_layout: vk::ImageLayout,
    pub writes: bool,
    /// 创建图像时需要的 usage flags，会在所有使用方式之间累加
    pub usage_flags: vk::ImageUsageFlags,
    /// 访问的子资源，默认为整个图像
    pub range: FgImageRange,
}

impl Default for FgImageUsage {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl FgImageUsage {
    /// `writes` 由 access 推导
    #[inline]
    pub const fn new(
        stage: vk::PipelineStageFlags2,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
        usage_flags: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            stage,
            access,
            start_layout: layout,
            finish_layout: layout,
            writes: access_writes(access),
            usage_flags,
            range: FgImageRange::ALL,
        }
    }

    /// 只访问 `range` 覆盖的子资源，例如 `FgImageUsage::TRANSFER_DST.with_range(FgImageRange::mip(1))`
    #[inline]
    pub const fn with_range(mut self, range: FgImageRange) -> Self {
        self.range = range;
        self
    }

    #[inline]
    pub const fn with_layouts(mut self, start_layout: vk::ImageLayout, finish_layout: vk::ImageLayout) -> Self {
        self.start_layout = start_layout;
        self.finish_layout = finish_layout;
        self
    }

    #[inline]
    pub const fn with_writes(mut self, writes: bool) -> Self {
        self.writes = writes;
        self
    }

    #[inline]
    pub const fn with_usage_flags(mut self, usage_flags: vk::ImageUsageFlags) -> Self {
        self.usage_flags = usage_flags;
        self
    }

    // ============ 预定义使用方式 ============

    /// 未定义（首次使用前，或者不关心内容）
    pub const UNDEFINED: Self = Self::new(
        vk::PipelineStageFlags2::TOP_OF_PIPE,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::UNDEFINED,
        vk::ImageUsageFlags::empty(),
    );

    /// 通用布局，可用于任何操作
    pub const GENERAL: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        or_access(vk::AccessFlags2::MEMORY_READ, vk::AccessFlags2::MEMORY_WRITE),
        vk::ImageLayout::GENERAL,
        vk::ImageUsageFlags::STORAGE,
    );

    /// 颜色附件输出
    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::ImageUsageFlags::COLOR_ATTACHMENT,
    );

    /// 颜色附件读写（blend）
    pub const COLOR_ATTACHMENT_READ_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        or_access(vk::AccessFlags2::COLOR_ATTACHMENT_READ, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::ImageUsageFlags::COLOR_ATTACHMENT,
    );

    /// 深度附件写入
    pub const DEPTH_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    );

    /// 深度附件读写
    pub const DEPTH_ATTACHMENT_READ_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        or_access(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    );

    /// 片段着色器采样
    pub const SHADER_READ_FRAGMENT: Self = Self::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::ImageUsageFlags::SAMPLED,
    );

    /// 计算着色器采样
    pub const SHADER_READ_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::ImageUsageFlags::SAMPLED,
    );

    /// 光追着色器采样
    pub const SHADER_READ_RAY_TRACING: Self = Self::new(
        vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::ImageUsageFlags::SAMPLED,
    );

    /// 计算着色器写 storage image
    pub const STORAGE_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_STORAGE_WRITE,
        vk::ImageLayout::GENERAL,
        vk::ImageUsageFlags::STORAGE,
    );

    /// 计算着色器读写 storage image
    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        or_access(vk::AccessFlags2::SHADER_STORAGE_READ, vk::AccessFlags2::SHADER_STORAGE_WRITE),
        vk::ImageLayout::GENERAL,
        vk::ImageUsageFlags::STORAGE,
    );

    /// 光追着色器读写 storage image
    pub const STORAGE_READ_WRITE_RAY_TRACING: Self = Self::new(
        vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        or_access(vk::AccessFlags2::SHADER_STORAGE_READ, vk::AccessFlags2::SHADER_STORAGE_WRITE),
        vk::ImageLayout::GENERAL,
        vk::ImageUsageFlags::STORAGE,
    );

    /// 传输源
    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageUsageFlags::TRANSFER_SRC,
    );

    /// 传输目标
    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageUsageFlags::TRANSFER_DST,
    );

    /// 呈现（swapchain image 的最终状态）
    pub const PRESENT: Self = Self::new(
        vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::PRESENT_SRC_KHR,
        vk::ImageUsageFlags::empty(),
    );
}

// 辅助方法
impl FgImageUsage {
    #[inline]
    pub fn is_write(&self) -> bool {
        self.writes || access_writes(self.access)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        !self.is_write()
    }

    /// 用于 barrier src 的 access（去掉读操作）
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        write_access_only(self.access)
    }

    /// 把 `UNDEFINED` 的 start/finish layout 替换为上一个使用者留下的 layout
    pub fn resolved_after(&self, previous_finish: vk::ImageLayout) -> Self {
        let mut usage = *self;
        if usage.start_layout == vk::ImageLayout::UNDEFINED {
            usage.start_layout = previous_finish;
        }
        if usage.finish_layout == vk::ImageLayout::UNDEFINED {
            usage.finish_layout = usage.start_layout;
        }
        usage
    }

    /// 去掉子资源范围，只保留访问状态
    #[inline]
    pub(crate) fn access_state(mut self) -> Self {
        self.range = FgImageRange::ALL;
        self
    }

    /// 紧跟在 `previous` 之后访问时是否不存在任何 hazard
    ///
    /// 只有两者都是只读、layout 不变、且 stage/access 都被 `previous` 覆盖时才成立。
    pub fn is_hazard_free_after(&self, previous: &FgImageUsage) -> bool {
        previous.is_read_only()
            && self.is_read_only()
            && previous.finish_layout == self.start_layout
            && self.start_layout == self.finish_layout
            && previous.stage.contains(self.stage)
            && previous.access.contains(self.access)
    }
}

/// 缓冲区使用方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FgBufferUsage {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub writes: bool,
    pub usage_flags: vk::BufferUsageFlags,
    pub range: FgBufferRange,
}

impl Default for FgBufferUsage {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl FgBufferUsage {
    #[inline]
    pub const fn new(
        stage: vk::PipelineStageFlags2,
        access: vk::AccessFlags2,
        usage_flags: vk::BufferUsageFlags,
    ) -> Self {
        Self {
            stage,
            access,
            writes: access_writes(access),
            usage_flags,
            range: FgBufferRange::WHOLE,
        }
    }

    /// 只访问 `[offset, offset + size)`
    #[inline]
    pub const fn with_range(mut self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.range = FgBufferRange::new(offset, size);
        self
    }

    #[inline]
    pub const fn with_writes(mut self, writes: bool) -> Self {
        self.writes = writes;
        self
    }

    #[inline]
    pub const fn with_usage_flags(mut self, usage_flags: vk::BufferUsageFlags) -> Self {
        self.usage_flags = usage_flags;
        self
    }

    // ============ 预定义使用方式 ============

    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::BufferUsageFlags::empty());

    pub const VERTEX_BUFFER: Self = Self::new(
        vk::PipelineStageFlags2::VERTEX_INPUT,
        vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
        vk::BufferUsageFlags::VERTEX_BUFFER,
    );

    pub const INDEX_BUFFER: Self = Self::new(
        vk::PipelineStageFlags2::INDEX_INPUT,
        vk::AccessFlags2::INDEX_READ,
        vk::BufferUsageFlags::INDEX_BUFFER,
    );

    pub const UNIFORM_VERTEX: Self = Self::new(
        vk::PipelineStageFlags2::VERTEX_SHADER,
        vk::AccessFlags2::UNIFORM_READ,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
    );

    pub const UNIFORM_FRAGMENT: Self = Self::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::UNIFORM_READ,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
    );

    pub const UNIFORM_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::UNIFORM_READ,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
    );

    pub const STORAGE_READ_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_STORAGE_READ,
        vk::BufferUsageFlags::STORAGE_BUFFER,
    );

    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        or_access(vk::AccessFlags2::SHADER_STORAGE_READ, vk::AccessFlags2::SHADER_STORAGE_WRITE),
        vk::BufferUsageFlags::STORAGE_BUFFER,
    );

    pub const INDIRECT_BUFFER: Self = Self::new(
        vk::PipelineStageFlags2::DRAW_INDIRECT,
        vk::AccessFlags2::INDIRECT_COMMAND_READ,
        vk::BufferUsageFlags::INDIRECT_BUFFER,
    );

    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::BufferUsageFlags::TRANSFER_SRC,
    );

    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::BufferUsageFlags::TRANSFER_DST,
    );
}

// 辅助方法
impl FgBufferUsage {
    #[inline]
    pub fn is_write(&self) -> bool {
        self.writes || access_writes(self.access)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        !self.is_write()
    }

    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        write_access_only(self.access)
    }

    #[inline]
    pub(crate) fn access_state(mut self) -> Self {
        self.range = FgBufferRange::WHOLE;
        self
    }

    pub fn is_hazard_free_after(&self, previous: &FgBufferUsage) -> bool {
        previous.is_read_only()
            && self.is_read_only()
            && previous.stage.contains(self.stage)
            && previous.access.contains(self.access)
    }
}

/// 按名字引用资源时使用的统一描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FgUsage {
    Image(FgImageUsage),
    Buffer(FgBufferUsage),
}

impl From<FgImageUsage> for FgUsage {
    fn from(usage: FgImageUsage) -> Self {
        FgUsage::Image(usage)
    }
}

impl From<FgBufferUsage> for FgUsage {
    fn from(usage: FgBufferUsage) -> Self {
        FgUsage::Buffer(usage)
    }
}
