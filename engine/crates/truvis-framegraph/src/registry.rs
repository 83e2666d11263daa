//! 资源注册表
//!
//! 对外以名字访问资源，内部 intern 为 slotmap key。
//! 声明资源的同时在 [`FgUsageTracker`] 中登记初始使用方式。

use std::collections::HashMap;

use ash::vk;
use slotmap::SlotMap;

use crate::error::{FgError, FgResourceKind, FgResult};
use crate::handle::{FgBufferHandle, FgImageHandle, FgNodeHandle, FgResourceHandle};
use crate::resource::{
    FgBufferDesc, FgBufferResource, FgBufferSource, FgExternalImage, FgImageDesc, FgImageResource, FgImageSource,
};
use crate::subresource::{FgBufferRange, FgImageRange, FgImageShape};
use crate::tracker::FgUsageTracker;
use crate::usage::{FgBufferUsage, FgImageUsage};

#[derive(Default)]
pub struct FgResourceRegistry {
    images: SlotMap<FgImageHandle, FgImageResource>,
    buffers: SlotMap<FgBufferHandle, FgBufferResource>,
    names: HashMap<String, FgResourceHandle>,
}

// new & init
impl FgResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.buffers.clear();
        self.names.clear();
    }

    fn check_unique(&self, name: &str) -> FgResult<()> {
        if self.names.contains_key(name) {
            log::error!("resource \"{}\" declared twice", name);
            return Err(FgError::DuplicateResource(name.to_string()));
        }
        Ok(())
    }
}

fn resolve_in_shape(name: &str, shape: &FgImageShape, range: &FgImageRange) -> FgResult<FgImageRange> {
    shape.resolve(range).ok_or_else(|| {
        log::error!("range {:?} does not fit image \"{}\" ({:?})", range, name, shape);
        FgError::SubresourceOutOfRange {
            name: name.to_string(),
            range: format!("{:?}", range),
        }
    })
}

fn check_buffer_range(name: &str, range: &FgBufferRange) -> FgResult<FgBufferRange> {
    if range.is_empty() {
        log::error!("empty range {:?} on buffer \"{}\"", range, name);
        return Err(FgError::SubresourceOutOfRange {
            name: name.to_string(),
            range: format!("{:?}", range),
        });
    }
    Ok(*range)
}

// declare
impl FgResourceRegistry {
    /// 声明由 framegraph 持有的图像，物理资源在 build 结束时统一分配
    pub fn declare_created_image(
        &mut self,
        tracker: &mut FgUsageTracker,
        creator: FgNodeHandle,
        name: &str,
        desc: FgImageDesc,
        initial_usage: FgImageUsage,
    ) -> FgResult<FgImageHandle> {
        self.check_unique(name)?;
        let shape = desc.shape();
        let initial_range = resolve_in_shape(name, &shape, &initial_usage.range)?;
        let discard = !desc.preserve_across_frames;
        let handle = self.images.insert(FgImageResource::owned(name.to_string(), creator, desc, initial_usage));
        self.names.insert(name.to_string(), handle.into());
        tracker.seed_image(handle, shape, initial_usage, &initial_range, FgImageUsage::UNDEFINED, discard);
        Ok(handle)
    }

    pub fn declare_created_buffer(
        &mut self,
        tracker: &mut FgUsageTracker,
        creator: FgNodeHandle,
        name: &str,
        desc: FgBufferDesc,
        initial_usage: FgBufferUsage,
    ) -> FgResult<FgBufferHandle> {
        self.check_unique(name)?;
        check_buffer_range(name, &initial_usage.range)?;
        let handle = self.buffers.insert(FgBufferResource::owned(name.to_string(), creator, desc, initial_usage));
        self.names.insert(name.to_string(), handle.into());
        tracker.seed_buffer(handle, initial_usage, FgBufferUsage::UNDEFINED);
        Ok(handle)
    }

    /// 声明外部图像，`initial_usage` 是外部交给 framegraph 时图像所处的状态
    ///
    /// `importer` 是导入它的 node，和创建者一样排在所有引用者之前；直接导入到 context 上时为 None。
    pub fn declare_imported_image(
        &mut self,
        tracker: &mut FgUsageTracker,
        importer: Option<FgNodeHandle>,
        name: &str,
        external: FgExternalImage,
        initial_usage: FgImageUsage,
    ) -> FgResult<FgImageHandle> {
        self.check_unique(name)?;
        let resource = FgImageResource::imported(name.to_string(), importer, external, initial_usage);
        let shape = resource.shape();
        let initial_range = resolve_in_shape(name, &shape, &initial_usage.range)?;
        let handle = self.images.insert(resource);
        self.names.insert(name.to_string(), handle.into());
        tracker.seed_image(handle, shape, initial_usage, &initial_range, initial_usage, false);
        Ok(handle)
    }

    pub fn declare_imported_buffer(
        &mut self,
        tracker: &mut FgUsageTracker,
        importer: Option<FgNodeHandle>,
        name: &str,
        buffer: vk::Buffer,
        initial_usage: FgBufferUsage,
    ) -> FgResult<FgBufferHandle> {
        self.check_unique(name)?;
        check_buffer_range(name, &initial_usage.range)?;
        let handle =
            self.buffers.insert(FgBufferResource::imported(name.to_string(), importer, buffer, initial_usage));
        self.names.insert(name.to_string(), handle.into());
        tracker.seed_buffer(handle, initial_usage, initial_usage);
        Ok(handle)
    }

    /// 换上新的外部图像，之前帧留下的状态全部丢弃
    pub fn rebind_imported_image(
        &mut self,
        tracker: &mut FgUsageTracker,
        handle: FgImageHandle,
        external: FgExternalImage,
        usage: FgImageUsage,
    ) -> FgResult<()> {
        let name = self.name_of(handle.into()).to_string();
        let shape = external.shape();
        let initial_range = resolve_in_shape(&name, &shape, &usage.range)?;
        let resource = self.images.get_mut(handle).ok_or_else(|| FgError::ResourceNotFound(name.clone()))?;
        let FgImageSource::Imported(current) = &mut resource.source else {
            return Err(FgError::NotImported(name));
        };
        *current = external;
        resource.initial_usage = usage;
        tracker.seed_image(handle, shape, usage, &initial_range, usage, false);
        Ok(())
    }

    pub fn rebind_imported_buffer(
        &mut self,
        tracker: &mut FgUsageTracker,
        handle: FgBufferHandle,
        buffer: vk::Buffer,
        usage: FgBufferUsage,
    ) -> FgResult<()> {
        let name = self.name_of(handle.into()).to_string();
        check_buffer_range(&name, &usage.range)?;
        let resource = self.buffers.get_mut(handle).ok_or_else(|| FgError::ResourceNotFound(name.clone()))?;
        let FgBufferSource::Imported(current) = &mut resource.source else {
            return Err(FgError::NotImported(name));
        };
        *current = buffer;
        resource.initial_usage = usage;
        tracker.seed_buffer(handle, usage, usage);
        Ok(())
    }
}

// 子资源
impl FgResourceRegistry {
    /// 声明的范围 -> 图像内的具体范围
    pub fn resolve_image_range(&self, handle: FgImageHandle, range: &FgImageRange) -> FgResult<FgImageRange> {
        let resource = self
            .images
            .get(handle)
            .ok_or_else(|| FgError::ResourceNotFound(self.name_of(handle.into()).to_string()))?;
        resolve_in_shape(&resource.name, &resource.shape(), range)
    }

    pub fn resolve_buffer_range(&self, handle: FgBufferHandle, range: &FgBufferRange) -> FgResult<FgBufferRange> {
        check_buffer_range(self.name_of(handle.into()), range)
    }
}

// getter & iter
impl FgResourceRegistry {
    pub fn lookup(&self, name: &str) -> FgResult<FgResourceHandle> {
        self.names.get(name).copied().ok_or_else(|| FgError::ResourceNotFound(name.to_string()))
    }

    pub fn image_handle(&self, name: &str) -> FgResult<FgImageHandle> {
        match self.lookup(name)? {
            FgResourceHandle::Image(handle) => Ok(handle),
            FgResourceHandle::Buffer(_) => Err(FgError::ResourceKindMismatch {
                name: name.to_string(),
                expected: FgResourceKind::Image,
                actual: FgResourceKind::Buffer,
            }),
        }
    }

    pub fn buffer_handle(&self, name: &str) -> FgResult<FgBufferHandle> {
        match self.lookup(name)? {
            FgResourceHandle::Buffer(handle) => Ok(handle),
            FgResourceHandle::Image(_) => Err(FgError::ResourceKindMismatch {
                name: name.to_string(),
                expected: FgResourceKind::Buffer,
                actual: FgResourceKind::Image,
            }),
        }
    }

    #[inline]
    pub fn get_image(&self, handle: FgImageHandle) -> Option<&FgImageResource> {
        self.images.get(handle)
    }

    #[inline]
    pub fn get_image_mut(&mut self, handle: FgImageHandle) -> Option<&mut FgImageResource> {
        self.images.get_mut(handle)
    }

    #[inline]
    pub fn get_buffer(&self, handle: FgBufferHandle) -> Option<&FgBufferResource> {
        self.buffers.get(handle)
    }

    #[inline]
    pub fn get_buffer_mut(&mut self, handle: FgBufferHandle) -> Option<&mut FgBufferResource> {
        self.buffers.get_mut(handle)
    }

    pub fn name_of(&self, handle: FgResourceHandle) -> &str {
        let name = match handle {
            FgResourceHandle::Image(handle) => self.images.get(handle).map(|r| r.name.as_str()),
            FgResourceHandle::Buffer(handle) => self.buffers.get(handle).map(|r| r.name.as_str()),
        };
        name.unwrap_or("<unknown>")
    }

    /// 创建或导入资源的 node（直接导入到 context 上的资源为 None）
    pub fn creator_of(&self, handle: FgResourceHandle) -> Option<FgNodeHandle> {
        match handle {
            FgResourceHandle::Image(handle) => self.images.get(handle).and_then(|r| r.creator),
            FgResourceHandle::Buffer(handle) => self.buffers.get(handle).and_then(|r| r.creator),
        }
    }

    pub fn iter_images(&self) -> impl Iterator<Item = (FgImageHandle, &FgImageResource)> {
        self.images.iter()
    }

    pub fn iter_images_mut(&mut self) -> impl Iterator<Item = (FgImageHandle, &mut FgImageResource)> {
        self.images.iter_mut()
    }

    pub fn iter_buffers(&self) -> impl Iterator<Item = (FgBufferHandle, &FgBufferResource)> {
        self.buffers.iter()
    }

    pub fn iter_buffers_mut(&mut self) -> impl Iterator<Item = (FgBufferHandle, &mut FgBufferResource)> {
        self.buffers.iter_mut()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}
