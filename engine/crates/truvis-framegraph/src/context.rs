//! Framegraph 上下文
//!
//! 持有 node 列表、资源注册表、使用方式跟踪和依赖解析结果，驱动整个生命周期：
//!
//! ```text
//! Unbuilt --build--> ResourcesDeclared --resolve--> Resolved --record_frame--> Recording
//!                          ^                                                      |
//!                          +------------------------ Recorded <-------------------+
//! ```
//!
//! 增删 node 会让 framegraph 回到 `Unbuilt`，下一次 build 重新声明全部资源。

use std::collections::HashMap;

use ash::vk;
use slotmap::SlotMap;

use crate::backend::FgResourceAllocator;
use crate::barrier::FgBarrierBatch;
use crate::error::{FgError, FgResourceKind, FgResult};
use crate::graph::FgDependencyGraph;
use crate::handle::{FgImageHandle, FgNodeHandle, FgResourceHandle};
use crate::node::{FgImageViewEntry, FgNode, FgNodeBuilder, FgPendingReference, FgPendingView, FgReference};
use crate::registry::FgResourceRegistry;
use crate::resolver::FgDependencyResolver;
use crate::resource::{FgBufferSource, FgExternalImage, FgImageSource};
use crate::settings::FgSettings;
use crate::subresource::{FgImageShape, FgSubresource};
use crate::tracker::FgUsageTracker;
use crate::usage::{FgBufferUsage, FgImageUsage, FgUsage};

/// Framegraph 所处的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FgState {
    /// 还没有 build，或者 node 列表变化之后需要重新 build
    Unbuilt,
    /// 资源已声明并分配
    ResourcesDeclared,
    /// 执行顺序和 barrier 已经解析
    Resolved,
    Recording,
    Recorded,
}

/// 直接导入到 context 上的外部资源，每次 build 都会重新声明
#[derive(Clone, Debug)]
pub(crate) enum FgExternalResource {
    Image {
        name: String,
        external: FgExternalImage,
        initial_usage: FgImageUsage,
    },
    Buffer {
        name: String,
        buffer: vk::Buffer,
        initial_usage: FgBufferUsage,
    },
}

impl FgExternalResource {
    fn name(&self) -> &str {
        match self {
            FgExternalResource::Image { name, .. } | FgExternalResource::Buffer { name, .. } => name,
        }
    }
}

pub struct FgContext {
    pub(crate) settings: FgSettings,
    pub(crate) state: FgState,
    /// 尺寸相关资源的参考尺寸（通常是 swapchain 尺寸）
    pub(crate) target_extent: vk::Extent2D,

    pub(crate) nodes: SlotMap<FgNodeHandle, Box<dyn FgNode>>,
    /// 插入顺序，拓扑排序的 tie-break 依据
    pub(crate) node_order: Vec<FgNodeHandle>,

    pub(crate) registry: FgResourceRegistry,
    pub(crate) tracker: FgUsageTracker,
    pub(crate) resolver: FgDependencyResolver,

    /// 名字已经解析的引用，按声明顺序
    pub(crate) references: Vec<FgReference>,
    /// build 之后通过 `add_reference` 追加的引用，重新 build 时保留
    pub(crate) late_references: Vec<FgPendingReference>,
    pub(crate) externals: Vec<FgExternalResource>,
    /// node 请求的 image view，随图像一起创建和销毁
    pub(crate) image_views: Vec<FgImageViewEntry>,
    /// 帧结束时需要转换到最终使用方式的图像
    pub(crate) export_requests: Vec<(String, FgImageUsage)>,
    pub(crate) exports: Vec<(FgImageHandle, FgImageUsage)>,

    pub(crate) execution_order: Vec<FgNodeHandle>,
    /// 最近一次解析的依赖图，node 以插入顺序的索引表示
    pub(crate) dependency_graph: Option<FgDependencyGraph>,
    pub(crate) frame_count: u64,
}

// new & init
impl FgContext {
    pub fn new(settings: FgSettings, target_extent: vk::Extent2D) -> Self {
        let resolver = FgDependencyResolver::new(settings.skip_redundant_barriers);
        Self {
            settings,
            state: FgState::Unbuilt,
            target_extent,
            nodes: SlotMap::with_key(),
            node_order: Vec::new(),
            registry: FgResourceRegistry::new(),
            tracker: FgUsageTracker::new(),
            resolver,
            references: Vec::new(),
            late_references: Vec::new(),
            externals: Vec::new(),
            image_views: Vec::new(),
            export_requests: Vec::new(),
            exports: Vec::new(),
            execution_order: Vec::new(),
            dependency_graph: None,
            frame_count: 0,
        }
    }

    /// 释放所有 owned 资源并 teardown 所有 node
    pub fn destroy(&mut self, allocator: &mut dyn FgResourceAllocator) {
        let _span = crate::profile_span!("FgContext::destroy");

        for handle in self.node_order.drain(..) {
            if let Some(mut node) = self.nodes.remove(handle) {
                node.teardown();
            }
        }
        self.release_resources(allocator);
        self.clear_declarations();
        self.late_references.clear();
        self.state = FgState::Unbuilt;
        log::info!("framegraph destroyed after {} frames", self.frame_count);
    }

    pub(crate) fn ensure_state(&self, op: &'static str, allowed: &[FgState]) -> FgResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(FgError::InvalidState { op, state: self.state })
        }
    }

    /// node 列表或外部资源变化之后，下一次使用前必须重新 build
    fn invalidate(&mut self) {
        if self.state != FgState::Unbuilt {
            log::debug!("framegraph invalidated in state {:?}", self.state);
        }
        self.resolver.clear();
        self.dependency_graph = None;
        self.state = FgState::Unbuilt;
    }

    fn clear_declarations(&mut self) {
        self.registry.clear();
        self.tracker.clear();
        self.resolver.clear();
        self.references.clear();
        self.image_views.clear();
        self.exports.clear();
        self.execution_order.clear();
        self.dependency_graph = None;
    }
}

// node 管理
impl FgContext {
    /// 追加 node，插入顺序决定没有依赖关系的 node 之间的执行顺序
    pub fn add_node<N: FgNode + 'static>(&mut self, node: N) -> FgResult<FgNodeHandle> {
        self.add_boxed_node(Box::new(node))
    }

    pub fn add_boxed_node(&mut self, node: Box<dyn FgNode>) -> FgResult<FgNodeHandle> {
        self.ensure_not_recording("add_node")?;
        let name = node.name().to_string();
        let handle = self.nodes.insert(node);
        self.node_order.push(handle);
        self.invalidate();
        log::debug!("node \"{}\" added at position {}", name, self.node_order.len() - 1);
        Ok(handle)
    }

    /// 把 node 插入到 `after` 之后
    pub fn insert_node_after<N: FgNode + 'static>(&mut self, after: FgNodeHandle, node: N) -> FgResult<FgNodeHandle> {
        self.ensure_not_recording("insert_node_after")?;
        let position = self.node_position(after)?;
        let name = node.name().to_string();
        let handle = self.nodes.insert(Box::new(node));
        self.node_order.insert(position + 1, handle);
        self.invalidate();
        log::debug!("node \"{}\" inserted at position {}", name, position + 1);
        Ok(handle)
    }

    /// 移除 node 并调用它的 `teardown`
    pub fn remove_node(&mut self, handle: FgNodeHandle) -> FgResult<()> {
        self.ensure_not_recording("remove_node")?;
        let position = self.node_position(handle)?;
        self.node_order.remove(position);
        let Some(mut node) = self.nodes.remove(handle) else {
            return Err(FgError::NodeNotFound);
        };
        node.teardown();
        self.late_references.retain(|r| r.node != handle);
        self.invalidate();
        log::debug!("node \"{}\" removed", node.name());
        Ok(())
    }

    fn node_position(&self, handle: FgNodeHandle) -> FgResult<usize> {
        self.node_order.iter().position(|h| *h == handle).ok_or(FgError::NodeNotFound)
    }

    fn ensure_not_recording(&self, op: &'static str) -> FgResult<()> {
        if self.state == FgState::Recording {
            return Err(FgError::InvalidState { op, state: self.state });
        }
        Ok(())
    }
}

// 外部资源
impl FgContext {
    /// 导入外部图像（例如 swapchain image），对所有 node 可见
    pub fn import_image(&mut self, name: &str, external: FgExternalImage, initial_usage: FgImageUsage) -> FgResult<()> {
        self.ensure_not_recording("import_image")?;
        self.check_external_unique(name)?;
        self.externals.push(FgExternalResource::Image {
            name: name.to_string(),
            external,
            initial_usage,
        });
        self.invalidate();
        Ok(())
    }

    pub fn import_buffer(&mut self, name: &str, buffer: vk::Buffer, initial_usage: FgBufferUsage) -> FgResult<()> {
        self.ensure_not_recording("import_buffer")?;
        self.check_external_unique(name)?;
        self.externals.push(FgExternalResource::Buffer {
            name: name.to_string(),
            buffer,
            initial_usage,
        });
        self.invalidate();
        Ok(())
    }

    fn check_external_unique(&self, name: &str) -> FgResult<()> {
        if self.externals.iter().any(|e| e.name() == name) {
            log::error!("external resource \"{}\" imported twice", name);
            return Err(FgError::DuplicateResource(name.to_string()));
        }
        Ok(())
    }

    /// 换上新的外部图像（例如本帧获取到的 swapchain image）
    ///
    /// 新图像从 `usage` 开始，不会继承旧图像上一帧留下的状态；图像上的 view 会在新图像上重建。
    /// build 之前只能重新绑定直接导入到 context 上的图像。失败时绑定保持不变。
    pub fn rebind_imported_image(
        &mut self,
        name: &str,
        external: FgExternalImage,
        usage: FgImageUsage,
        allocator: &mut dyn FgResourceAllocator,
    ) -> FgResult<()> {
        self.ensure_not_recording("rebind_imported_image")?;

        let entry = self.externals.iter().position(|e| matches!(e, FgExternalResource::Image { name: n, .. } if n == name));
        if self.state == FgState::Unbuilt {
            if entry.is_none() {
                log::error!("rebind: no image \"{}\" imported into the framegraph", name);
                return Err(FgError::ResourceNotFound(name.to_string()));
            }
        } else {
            self.rebind_declared_image(name, external, usage, allocator)?;
        }

        if let Some(FgExternalResource::Image {
            external: entry_external,
            initial_usage,
            ..
        }) = entry.and_then(|index| self.externals.get_mut(index))
        {
            *entry_external = external;
            *initial_usage = usage;
        }
        Ok(())
    }

    fn rebind_declared_image(
        &mut self,
        name: &str,
        external: FgExternalImage,
        usage: FgImageUsage,
        allocator: &mut dyn FgResourceAllocator,
    ) -> FgResult<()> {
        let handle = self.registry.image_handle(name)?;
        if self.registry.get_image(handle).is_some_and(|r| r.is_owned()) {
            return Err(FgError::NotImported(name.to_string()));
        }

        let views = self.create_views_on(handle, external.image, external.format, &external.shape(), allocator)?;
        if let Err(e) = self.registry.rebind_imported_image(&mut self.tracker, handle, external, usage) {
            views.into_iter().for_each(|(_, view)| allocator.destroy_image_view(view));
            return Err(e);
        }
        self.replace_views(views, allocator);
        self.drop_resolution();
        Ok(())
    }

    pub fn rebind_imported_buffer(&mut self, name: &str, buffer: vk::Buffer, usage: FgBufferUsage) -> FgResult<()> {
        self.ensure_not_recording("rebind_imported_buffer")?;

        let entry =
            self.externals.iter().position(|e| matches!(e, FgExternalResource::Buffer { name: n, .. } if n == name));
        if self.state == FgState::Unbuilt {
            if entry.is_none() {
                log::error!("rebind: no buffer \"{}\" imported into the framegraph", name);
                return Err(FgError::ResourceNotFound(name.to_string()));
            }
        } else {
            let handle = self.registry.buffer_handle(name)?;
            self.registry.rebind_imported_buffer(&mut self.tracker, handle, buffer, usage)?;
            self.drop_resolution();
        }

        if let Some(FgExternalResource::Buffer {
            buffer: entry_buffer,
            initial_usage,
            ..
        }) = entry.and_then(|index| self.externals.get_mut(index))
        {
            *entry_buffer = buffer;
            *initial_usage = usage;
        }
        Ok(())
    }

    /// 最后一个 node 之后把图像转换到 `final_usage`，例如 [`FgImageUsage::PRESENT`]
    pub fn export_image(&mut self, name: &str, final_usage: FgImageUsage) -> FgResult<()> {
        self.ensure_not_recording("export_image")?;
        match self.export_requests.iter_mut().find(|(n, _)| n == name) {
            Some((_, usage)) => *usage = final_usage,
            None => self.export_requests.push((name.to_string(), final_usage)),
        }
        self.drop_resolution();
        Ok(())
    }

    /// 已解析的结果失效，但资源仍然有效
    pub(crate) fn drop_resolution(&mut self) {
        if matches!(self.state, FgState::Resolved | FgState::Recorded) {
            self.resolver.clear();
            self.dependency_graph = None;
            self.state = FgState::ResourcesDeclared;
        }
    }
}

// build
impl FgContext {
    /// 声明并分配所有资源
    ///
    /// 所有 node 按插入顺序声明资源；之后统一解析引用名字，所以被引用的资源可以由后插入的 node 创建。
    /// 失败时不会保留任何分配，framegraph 停留在 `Unbuilt`。
    pub fn build(&mut self, allocator: &mut dyn FgResourceAllocator) -> FgResult<()> {
        let _span = crate::profile_span!("FgContext::build");
        self.ensure_not_recording("build")?;

        self.release_resources(allocator);
        self.clear_declarations();
        self.state = FgState::Unbuilt;

        if let Err(e) = self.declare_and_allocate(allocator) {
            log::error!("framegraph build failed: {}", e);
            self.release_resources(allocator);
            self.clear_declarations();
            return Err(e);
        }

        self.state = FgState::ResourcesDeclared;
        log::info!(
            "framegraph built: {} nodes, {} images, {} buffers, {} references",
            self.node_order.len(),
            self.registry.image_count(),
            self.registry.buffer_count(),
            self.references.len()
        );
        Ok(())
    }

    fn declare_and_allocate(&mut self, allocator: &mut dyn FgResourceAllocator) -> FgResult<()> {
        for external in &self.externals {
            match external {
                FgExternalResource::Image {
                    name,
                    external,
                    initial_usage,
                } => {
                    self.registry.declare_imported_image(&mut self.tracker, None, name, *external, *initial_usage)?;
                }
                FgExternalResource::Buffer {
                    name,
                    buffer,
                    initial_usage,
                } => {
                    self.registry.declare_imported_buffer(&mut self.tracker, None, name, *buffer, *initial_usage)?;
                }
            }
        }

        let mut pending = Vec::new();
        let mut pending_views = Vec::new();
        for &handle in &self.node_order {
            let Some(node) = self.nodes.get_mut(handle) else {
                continue;
            };
            let mut builder = FgNodeBuilder {
                node: handle,
                registry: &mut self.registry,
                tracker: &mut self.tracker,
                references: &mut pending,
                views: &mut pending_views,
                target_extent: self.target_extent,
            };
            node.declare_resources(&mut builder).inspect_err(|e| {
                log::error!("node \"{}\" failed to declare resources: {}", node.name(), e);
            })?;
        }
        pending.extend(self.late_references.iter().cloned());

        self.references = self.resolve_pending(pending)?;
        self.image_views = self.resolve_views(pending_views)?;
        self.accumulate_usage_flags();
        self.allocate_resources(allocator)?;
        self.create_image_views(allocator)
    }

    /// 名字 -> handle，同时检查每个 node 持有的子资源互不重叠
    ///
    /// 创建者和导入者以 initial 使用方式的范围持有资源。
    fn resolve_pending(&self, pending: Vec<FgPendingReference>) -> FgResult<Vec<FgReference>> {
        let mut holdings: HashMap<(FgNodeHandle, FgResourceHandle), Vec<FgSubresource>> = HashMap::new();
        let handles = self
            .registry
            .iter_images()
            .map(|(handle, _)| FgResourceHandle::from(handle))
            .chain(self.registry.iter_buffers().map(|(handle, _)| FgResourceHandle::from(handle)));
        for handle in handles {
            if let Some((creator, part)) = self.creator_holding(handle)? {
                holdings.entry((creator, handle)).or_default().push(part);
            }
        }

        let mut references = Vec::with_capacity(pending.len());
        for reference in pending {
            let node_name = self.node_name(reference.node).unwrap_or("<unknown>");
            let (handle, part) = self.resolve_reference(&reference.name, reference.usage).inspect_err(|e| {
                log::error!("node \"{}\": {}", node_name, e);
            })?;
            let held = holdings.entry((reference.node, handle)).or_default();
            if held.iter().any(|h| h.overlaps(&part)) {
                log::error!("node \"{}\" holds overlapping parts of \"{}\"", node_name, reference.name);
                return Err(FgError::DuplicateReference {
                    node: node_name.to_string(),
                    name: reference.name,
                });
            }
            held.push(part);
            references.push(FgReference {
                node: reference.node,
                handle,
                usage: reference.usage,
            });
        }
        Ok(references)
    }

    /// 名字 -> handle 以及引用的具体子资源
    fn resolve_reference(&self, name: &str, usage: FgUsage) -> FgResult<(FgResourceHandle, FgSubresource)> {
        let handle = match usage {
            FgUsage::Image(_) => FgResourceHandle::from(self.registry.image_handle(name)?),
            FgUsage::Buffer(_) => FgResourceHandle::from(self.registry.buffer_handle(name)?),
        };
        Ok((handle, self.reference_part(handle, usage)?))
    }

    fn reference_part(&self, handle: FgResourceHandle, usage: FgUsage) -> FgResult<FgSubresource> {
        match (handle, usage) {
            (FgResourceHandle::Image(h), FgUsage::Image(u)) => {
                self.registry.resolve_image_range(h, &u.range).map(FgSubresource::Image)
            }
            (FgResourceHandle::Buffer(h), FgUsage::Buffer(u)) => {
                self.registry.resolve_buffer_range(h, &u.range).map(FgSubresource::Buffer)
            }
            (handle, _) => Err(FgError::ResourceKindMismatch {
                name: self.registry.name_of(handle).to_string(),
                expected: match handle.kind() {
                    FgResourceKind::Image => FgResourceKind::Buffer,
                    FgResourceKind::Buffer => FgResourceKind::Image,
                },
                actual: handle.kind(),
            }),
        }
    }

    /// 创建者或导入者以 initial 使用方式的范围持有资源
    fn creator_holding(&self, handle: FgResourceHandle) -> FgResult<Option<(FgNodeHandle, FgSubresource)>> {
        let holding = match handle {
            FgResourceHandle::Image(h) => {
                self.registry.get_image(h).and_then(|r| Some((r.creator?, FgUsage::Image(r.initial_usage))))
            }
            FgResourceHandle::Buffer(h) => {
                self.registry.get_buffer(h).and_then(|r| Some((r.creator?, FgUsage::Buffer(r.initial_usage))))
            }
        };
        match holding {
            Some((creator, usage)) => Ok(Some((creator, self.reference_part(handle, usage)?))),
            None => Ok(None),
        }
    }

    /// node 在同一 node 内对同一图像的 view 按请求顺序编号
    fn resolve_views(&self, pending: Vec<FgPendingView>) -> FgResult<Vec<FgImageViewEntry>> {
        let mut views: Vec<FgImageViewEntry> = Vec::with_capacity(pending.len());
        for request in pending {
            let node_name = self.node_name(request.node).unwrap_or("<unknown>");
            let handle = self.registry.image_handle(&request.name).inspect_err(|e| {
                log::error!("node \"{}\" view: {}", node_name, e);
            })?;
            self.registry.resolve_image_range(handle, &request.desc.range)?;
            let index = views.iter().filter(|v| v.node == request.node && v.name == request.name).count();
            views.push(FgImageViewEntry {
                node: request.node,
                handle,
                name: request.name,
                index,
                desc: request.desc,
                view: None,
            });
        }
        Ok(views)
    }

    /// owned 资源的 usage flags 是所有使用方式的并集
    fn accumulate_usage_flags(&mut self) {
        for reference in &self.references {
            match (reference.handle, reference.usage) {
                (FgResourceHandle::Image(handle), FgUsage::Image(usage)) => {
                    if let Some(resource) = self.registry.get_image_mut(handle) {
                        resource.usage_flags |= usage.usage_flags;
                    }
                }
                (FgResourceHandle::Buffer(handle), FgUsage::Buffer(usage)) => {
                    if let Some(resource) = self.registry.get_buffer_mut(handle) {
                        resource.usage_flags |= usage.usage_flags;
                    }
                }
                _ => {}
            }
        }
    }

    fn allocate_resources(&mut self, allocator: &mut dyn FgResourceAllocator) -> FgResult<()> {
        let target = self.target_extent;
        for (_, resource) in self.registry.iter_images_mut() {
            let usage_flags = resource.usage_flags;
            if let FgImageSource::Owned { desc, image } = &mut resource.source {
                if image.is_none() {
                    *image = Some(allocator.create_image(&resource.name, &desc.to_create_info(target, usage_flags))?);
                }
            }
        }
        for (_, resource) in self.registry.iter_buffers_mut() {
            let usage_flags = resource.usage_flags;
            if let FgBufferSource::Owned { desc, buffer } = &mut resource.source {
                if buffer.is_none() {
                    let create_info = desc.to_create_info(&resource.name, target, usage_flags)?;
                    *buffer = Some(allocator.create_buffer(&resource.name, &create_info)?);
                }
            }
        }
        Ok(())
    }

    fn create_image_views(&mut self, allocator: &mut dyn FgResourceAllocator) -> FgResult<()> {
        for entry in self.image_views.iter_mut().filter(|v| v.view.is_none()) {
            let resource = self
                .registry
                .get_image(entry.handle)
                .ok_or_else(|| FgError::ResourceNotFound(entry.name.clone()))?;
            let image = resource.physical_handle().ok_or_else(|| FgError::ResourceNotBacked(entry.name.clone()))?;
            let view = create_view(entry, image, resource.format(), &resource.shape(), allocator)?;
            entry.view = Some(view);
        }
        Ok(())
    }

    /// 在 `image` 上为 `handle` 的所有 view 创建替换品，返回 (view 序号, 新 view)
    ///
    /// 任何一个失败时已经创建的替换品都会被销毁。
    pub(crate) fn create_views_on(
        &self,
        handle: FgImageHandle,
        image: vk::Image,
        format: vk::Format,
        shape: &FgImageShape,
        allocator: &mut dyn FgResourceAllocator,
    ) -> FgResult<Vec<(usize, vk::ImageView)>> {
        let mut created = Vec::new();
        for (index, entry) in self.image_views.iter().enumerate().filter(|(_, v)| v.handle == handle) {
            match create_view(entry, image, format, shape, allocator) {
                Ok(view) => created.push((index, view)),
                Err(e) => {
                    created.into_iter().for_each(|(_, view)| allocator.destroy_image_view(view));
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    /// 换上新的 view 并销毁旧的
    pub(crate) fn replace_views(&mut self, views: Vec<(usize, vk::ImageView)>, allocator: &mut dyn FgResourceAllocator) {
        for (index, view) in views {
            match self.image_views.get_mut(index) {
                Some(entry) => {
                    if let Some(old) = entry.view.replace(view) {
                        allocator.destroy_image_view(old);
                    }
                }
                None => allocator.destroy_image_view(view),
            }
        }
    }

    /// 归还所有 owned 资源的物理对象，view 先于图像销毁
    pub(crate) fn release_resources(&mut self, allocator: &mut dyn FgResourceAllocator) {
        for entry in self.image_views.iter_mut() {
            if let Some(view) = entry.view.take() {
                allocator.destroy_image_view(view);
            }
        }
        for (_, resource) in self.registry.iter_images_mut() {
            if let FgImageSource::Owned { image, .. } = &mut resource.source {
                if let Some(image) = image.take() {
                    allocator.destroy_image(image);
                }
            }
        }
        for (_, resource) in self.registry.iter_buffers_mut() {
            if let FgBufferSource::Owned { buffer, .. } = &mut resource.source {
                if let Some(buffer) = buffer.take() {
                    allocator.destroy_buffer(buffer);
                }
            }
        }
    }

    fn has_live_resources(&self) -> bool {
        self.registry.iter_images().any(|(_, r)| r.is_owned() && r.physical_handle().is_some())
            || self.registry.iter_buffers().any(|(_, r)| r.is_owned() && r.physical_handle().is_some())
            || self.image_views.iter().any(|v| v.view.is_some())
    }
}

fn create_view(
    entry: &FgImageViewEntry,
    image: vk::Image,
    format: vk::Format,
    shape: &FgImageShape,
    allocator: &mut dyn FgResourceAllocator,
) -> FgResult<vk::ImageView> {
    let range = shape.resolve(&entry.desc.range).ok_or_else(|| FgError::SubresourceOutOfRange {
        name: entry.name.clone(),
        range: format!("{:?}", entry.desc.range),
    })?;
    allocator.create_image_view(&entry.name, &entry.desc.to_create_info(image, format, &range))
}

// 运行时引用
impl FgContext {
    /// build 之后追加引用，例如调试 node 临时读取某个中间结果
    ///
    /// 只能在 `ResourcesDeclared` 阶段调用；已经分配的资源必须包含所需的 usage flags。
    pub fn add_reference(&mut self, node: FgNodeHandle, name: &str, usage: impl Into<FgUsage>) -> FgResult<()> {
        self.ensure_state("add_reference", &[FgState::ResourcesDeclared])?;
        let usage = usage.into();
        let node_name = self.node_name(node).ok_or(FgError::NodeNotFound)?.to_string();
        let (handle, part) = self.resolve_reference(name, usage)?;

        let held_by_creator = self
            .creator_holding(handle)?
            .is_some_and(|(creator, held)| creator == node && held.overlaps(&part));
        let mut held_by_reference = false;
        for reference in self.references.iter().filter(|r| r.node == node && r.handle == handle) {
            held_by_reference |= self.reference_part(reference.handle, reference.usage)?.overlaps(&part);
        }
        if held_by_creator || held_by_reference {
            return Err(FgError::DuplicateReference {
                node: node_name,
                name: name.to_string(),
            });
        }

        match (handle, usage) {
            (FgResourceHandle::Image(h), FgUsage::Image(u)) => {
                if let Some(resource) = self.registry.get_image(h) {
                    let missing = u.usage_flags & !resource.usage_flags;
                    if resource.is_owned() && !missing.is_empty() {
                        return Err(FgError::MissingUsageFlags {
                            name: name.to_string(),
                            missing: format!("{:?}", missing),
                        });
                    }
                }
            }
            (FgResourceHandle::Buffer(h), FgUsage::Buffer(u)) => {
                if let Some(resource) = self.registry.get_buffer(h) {
                    let missing = u.usage_flags & !resource.usage_flags;
                    if resource.is_owned() && !missing.is_empty() {
                        return Err(FgError::MissingUsageFlags {
                            name: name.to_string(),
                            missing: format!("{:?}", missing),
                        });
                    }
                }
            }
            _ => {}
        }

        self.references.push(FgReference { node, handle, usage });
        self.late_references.push(FgPendingReference {
            node,
            name: name.to_string(),
            usage,
        });
        log::debug!("node \"{}\" late reference to \"{}\"", node_name, name);
        Ok(())
    }

    /// 资源当前记录的使用方式
    ///
    /// 解析之后是本帧最后的使用方式，帧结束之后是下一帧开始前的状态。
    pub fn previous_usage(&self, name: &str) -> FgResult<FgUsage> {
        let usage = match self.registry.lookup(name)? {
            FgResourceHandle::Image(handle) => self.tracker.previous_image_usage(handle).map(FgUsage::Image),
            FgResourceHandle::Buffer(handle) => self.tracker.previous_buffer_usage(handle).map(FgUsage::Buffer),
        };
        usage.ok_or_else(|| FgError::UsageNotTracked(name.to_string()))
    }
}

// getter
impl FgContext {
    #[inline]
    pub fn state(&self) -> FgState {
        self.state
    }

    #[inline]
    pub fn settings(&self) -> &FgSettings {
        &self.settings
    }

    /// 修改设置之后需要重新解析
    pub fn set_settings(&mut self, settings: FgSettings) {
        self.resolver.set_skip_redundant(settings.skip_redundant_barriers);
        self.settings = settings;
        self.drop_resolution();
    }

    #[inline]
    pub fn target_extent(&self) -> vk::Extent2D {
        self.target_extent
    }

    #[inline]
    pub fn registry(&self) -> &FgResourceRegistry {
        &self.registry
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.node_order.len()
    }

    /// 插入顺序
    #[inline]
    pub fn nodes(&self) -> &[FgNodeHandle] {
        &self.node_order
    }

    pub fn node_name(&self, handle: FgNodeHandle) -> Option<&str> {
        self.nodes.get(handle).map(|node| node.name())
    }

    /// 最近一次解析得到的执行顺序
    #[inline]
    pub fn execution_order(&self) -> &[FgNodeHandle] {
        &self.execution_order
    }

    #[inline]
    pub fn node_barriers(&self, node: FgNodeHandle) -> Option<&FgBarrierBatch> {
        self.resolver.node_barriers(node)
    }

    #[inline]
    pub fn prologue_barriers(&self) -> &FgBarrierBatch {
        self.resolver.prologue()
    }

    #[inline]
    pub fn epilogue_barriers(&self) -> &FgBarrierBatch {
        self.resolver.epilogue()
    }

    /// 已经录制完成的帧数
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn image(&self, name: &str) -> FgResult<vk::Image> {
        let handle = self.registry.image_handle(name)?;
        self.registry
            .get_image(handle)
            .and_then(|r| r.physical_handle())
            .ok_or_else(|| FgError::ResourceNotBacked(name.to_string()))
    }

    pub fn buffer(&self, name: &str) -> FgResult<vk::Buffer> {
        let handle = self.registry.buffer_handle(name)?;
        self.registry
            .get_buffer(handle)
            .and_then(|r| r.physical_handle())
            .ok_or_else(|| FgError::ResourceNotBacked(name.to_string()))
    }
}

impl Drop for FgContext {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(!self.has_live_resources(), "FgContext dropped without destroy()");
        }
    }
}
