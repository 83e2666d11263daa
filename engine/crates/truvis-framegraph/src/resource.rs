//! Framegraph 逻辑资源
//!
//! 资源分为两类来源：
//! - Owned：由 framegraph 通过 [`FgResourceAllocator`](crate::backend::FgResourceAllocator) 创建和销毁
//! - Imported：外部持有的 image/buffer，framegraph 只跟踪状态，从不释放

use ash::vk;

use crate::error::{FgError, FgResult};
use crate::handle::FgNodeHandle;
use crate::subresource::{FgImageRange, FgImageShape};
use crate::usage::{FgBufferUsage, FgImageUsage};

/// 图像尺寸来源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FgImageExtent {
    /// 固定尺寸，resize 时保持不变
    Fixed(vk::Extent3D),
    /// 跟随输出目标（swapchain）尺寸，resize 时重建
    Target,
}

/// Owned 图像的创建描述
#[derive(Clone, Debug)]
pub struct FgImageDesc {
    pub extent: FgImageExtent,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub image_type: vk::ImageType,
    pub tiling: vk::ImageTiling,
    /// 额外的 usage flags，和所有使用方式的 flags 合并
    pub usage: vk::ImageUsageFlags,
    /// 为 false 时，每帧开始都从 `UNDEFINED` 转换，不保留上一帧内容
    pub preserve_across_frames: bool,
}

impl Default for FgImageDesc {
    fn default() -> Self {
        Self {
            extent: FgImageExtent::Target,
            format: vk::Format::R8G8B8A8_UNORM,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            image_type: vk::ImageType::TYPE_2D,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::empty(),
            preserve_across_frames: false,
        }
    }
}

impl FgImageDesc {
    /// 固定尺寸的 2D 图像
    pub fn new_2d(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            extent: FgImageExtent::Fixed(vk::Extent3D {
                width,
                height,
                depth: 1,
            }),
            format,
            ..Default::default()
        }
    }

    /// 与输出目标同尺寸的 2D 图像
    pub fn target_sized(format: vk::Format) -> Self {
        Self {
            extent: FgImageExtent::Target,
            format,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    pub fn preserve_across_frames(mut self) -> Self {
        self.preserve_across_frames = true;
        self
    }

    #[inline]
    pub fn is_size_dependent(&self) -> bool {
        matches!(self.extent, FgImageExtent::Target)
    }

    pub fn resolve_extent(&self, target: vk::Extent2D) -> vk::Extent3D {
        match self.extent {
            FgImageExtent::Fixed(extent) => extent,
            FgImageExtent::Target => vk::Extent3D {
                width: target.width,
                height: target.height,
                depth: 1,
            },
        }
    }

    pub fn shape(&self) -> FgImageShape {
        FgImageShape::new(infer_image_aspect(self.format), self.mip_levels, self.array_layers)
    }

    /// 生成 `vk::ImageCreateInfo`，`usage` 为累加后的最终 flags
    pub fn to_create_info(&self, target: vk::Extent2D, usage: vk::ImageUsageFlags) -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo::default()
            .image_type(self.image_type)
            .format(self.format)
            .extent(self.resolve_extent(target))
            .mip_levels(self.mip_levels)
            .array_layers(self.array_layers)
            .samples(self.samples)
            .tiling(self.tiling)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
    }
}

/// 外部图像
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FgExternalImage {
    pub image: vk::Image,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
}

impl FgExternalImage {
    /// 单个 mip、单个 layer 的图像（例如 swapchain image）
    pub fn new(image: vk::Image, format: vk::Format) -> Self {
        Self {
            image,
            format,
            mip_levels: 1,
            array_layers: 1,
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    pub fn shape(&self) -> FgImageShape {
        FgImageShape::new(infer_image_aspect(self.format), self.mip_levels, self.array_layers)
    }
}

/// node 请求的 image view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FgImageViewDesc {
    pub view_type: vk::ImageViewType,
    /// None 时使用图像自身的格式
    pub format: Option<vk::Format>,
    pub range: FgImageRange,
}

impl FgImageViewDesc {
    /// 覆盖整个图像的 2D view
    pub fn new_2d() -> Self {
        Self {
            view_type: vk::ImageViewType::TYPE_2D,
            format: None,
            range: FgImageRange::ALL,
        }
    }

    pub fn with_view_type(mut self, view_type: vk::ImageViewType) -> Self {
        self.view_type = view_type;
        self
    }

    pub fn with_format(mut self, format: vk::Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_range(mut self, range: FgImageRange) -> Self {
        self.range = range;
        self
    }

    /// `range` 是在图像上 resolve 过的 [`Self::range`]
    pub fn to_create_info(
        &self,
        image: vk::Image,
        image_format: vk::Format,
        range: &FgImageRange,
    ) -> vk::ImageViewCreateInfo<'static> {
        vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(self.view_type)
            .format(self.format.unwrap_or(image_format))
            .components(vk::ComponentMapping::default())
            .subresource_range(range.to_vk())
    }
}

#[derive(Clone, Debug)]
pub enum FgImageSource {
    Owned {
        desc: FgImageDesc,
        /// build 之前为 None
        image: Option<vk::Image>,
    },
    Imported(FgExternalImage),
}

/// Framegraph 中的图像资源
#[derive(Clone, Debug)]
pub struct FgImageResource {
    pub name: String,
    pub source: FgImageSource,
    /// 创建或导入它的 node；直接导入到 context 上的资源为 None
    pub creator: Option<FgNodeHandle>,
    pub initial_usage: FgImageUsage,
    /// 所有使用方式累加得到的 usage flags
    pub usage_flags: vk::ImageUsageFlags,
}

impl FgImageResource {
    pub fn owned(name: String, creator: FgNodeHandle, desc: FgImageDesc, initial_usage: FgImageUsage) -> Self {
        let usage_flags = desc.usage | initial_usage.usage_flags;
        Self {
            name,
            source: FgImageSource::Owned { desc, image: None },
            creator: Some(creator),
            initial_usage,
            usage_flags,
        }
    }

    pub fn imported(
        name: String,
        importer: Option<FgNodeHandle>,
        external: FgExternalImage,
        initial_usage: FgImageUsage,
    ) -> Self {
        Self {
            name,
            source: FgImageSource::Imported(external),
            creator: importer,
            initial_usage,
            usage_flags: initial_usage.usage_flags,
        }
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        matches!(self.source, FgImageSource::Owned { .. })
    }

    #[inline]
    pub fn is_size_dependent(&self) -> bool {
        match &self.source {
            FgImageSource::Owned { desc, .. } => desc.is_size_dependent(),
            FgImageSource::Imported(_) => false,
        }
    }

    /// 导入的资源总是保留内容
    #[inline]
    pub fn preserve_across_frames(&self) -> bool {
        match &self.source {
            FgImageSource::Owned { desc, .. } => desc.preserve_across_frames,
            FgImageSource::Imported(_) => true,
        }
    }

    pub fn format(&self) -> vk::Format {
        match &self.source {
            FgImageSource::Owned { desc, .. } => desc.format,
            FgImageSource::Imported(external) => external.format,
        }
    }

    pub fn physical_handle(&self) -> Option<vk::Image> {
        match &self.source {
            FgImageSource::Owned { image, .. } => *image,
            FgImageSource::Imported(external) => Some(external.image),
        }
    }

    pub fn shape(&self) -> FgImageShape {
        match &self.source {
            FgImageSource::Owned { desc, .. } => desc.shape(),
            FgImageSource::Imported(external) => external.shape(),
        }
    }
}

/// 根据格式推断 aspect
pub fn infer_image_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// 缓冲区大小来源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FgBufferSize {
    Fixed(vk::DeviceSize),
    /// 按输出目标的像素数量计算，resize 时重建
    PerTargetPixel(vk::DeviceSize),
}

/// Owned 缓冲区的创建描述
#[derive(Clone, Debug)]
pub struct FgBufferDesc {
    pub size: FgBufferSize,
    pub usage: vk::BufferUsageFlags,
}

impl FgBufferDesc {
    pub fn new(size: vk::DeviceSize) -> Self {
        Self {
            size: FgBufferSize::Fixed(size),
            usage: vk::BufferUsageFlags::empty(),
        }
    }

    pub fn per_target_pixel(bytes_per_pixel: vk::DeviceSize) -> Self {
        Self {
            size: FgBufferSize::PerTargetPixel(bytes_per_pixel),
            usage: vk::BufferUsageFlags::empty(),
        }
    }

    pub fn with_usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    #[inline]
    pub fn is_size_dependent(&self) -> bool {
        matches!(self.size, FgBufferSize::PerTargetPixel(_))
    }

    /// 按像素计算的大小溢出 `u64` 时返回 None
    pub fn resolve_size(&self, target: vk::Extent2D) -> Option<vk::DeviceSize> {
        match self.size {
            FgBufferSize::Fixed(size) => Some(size),
            FgBufferSize::PerTargetPixel(bytes) => bytes
                .checked_mul(target.width as vk::DeviceSize)?
                .checked_mul(target.height as vk::DeviceSize),
        }
    }

    pub fn to_create_info(
        &self,
        name: &str,
        target: vk::Extent2D,
        usage: vk::BufferUsageFlags,
    ) -> FgResult<vk::BufferCreateInfo<'static>> {
        let size = self.resolve_size(target).ok_or_else(|| {
            log::error!("size of buffer \"{}\" overflows at {}x{}", name, target.width, target.height);
            FgError::BufferSizeOverflow {
                name: name.to_string(),
                width: target.width,
                height: target.height,
            }
        })?;
        Ok(vk::BufferCreateInfo::default().size(size).usage(usage).sharing_mode(vk::SharingMode::EXCLUSIVE))
    }
}

#[derive(Clone, Debug)]
pub enum FgBufferSource {
    Owned {
        desc: FgBufferDesc,
        buffer: Option<vk::Buffer>,
    },
    Imported(vk::Buffer),
}

/// Framegraph 中的缓冲区资源
#[derive(Clone, Debug)]
pub struct FgBufferResource {
    pub name: String,
    pub source: FgBufferSource,
    pub creator: Option<FgNodeHandle>,
    pub initial_usage: FgBufferUsage,
    pub usage_flags: vk::BufferUsageFlags,
}

impl FgBufferResource {
    pub fn owned(name: String, creator: FgNodeHandle, desc: FgBufferDesc, initial_usage: FgBufferUsage) -> Self {
        let usage_flags = desc.usage | initial_usage.usage_flags;
        Self {
            name,
            source: FgBufferSource::Owned { desc, buffer: None },
            creator: Some(creator),
            initial_usage,
            usage_flags,
        }
    }

    pub fn imported(
        name: String,
        importer: Option<FgNodeHandle>,
        buffer: vk::Buffer,
        initial_usage: FgBufferUsage,
    ) -> Self {
        Self {
            name,
            source: FgBufferSource::Imported(buffer),
            creator: importer,
            initial_usage,
            usage_flags: initial_usage.usage_flags,
        }
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        matches!(self.source, FgBufferSource::Owned { .. })
    }

    #[inline]
    pub fn is_size_dependent(&self) -> bool {
        match &self.source {
            FgBufferSource::Owned { desc, .. } => desc.is_size_dependent(),
            FgBufferSource::Imported(_) => false,
        }
    }

    pub fn physical_handle(&self) -> Option<vk::Buffer> {
        match &self.source {
            FgBufferSource::Owned { buffer, .. } => *buffer,
            FgBufferSource::Imported(buffer) => Some(*buffer),
        }
    }
}
