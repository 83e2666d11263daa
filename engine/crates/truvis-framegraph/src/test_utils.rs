//! 测试用的 mock 后端和可配置 node

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use ash::vk;
use ash::vk::Handle;

use crate::backend::{FgCommandRecorder, FgResourceAllocator};
use crate::barrier::FgVkBarrierBatch;
use crate::error::{FgError, FgResult};
use crate::node::{FgNode, FgNodeBuilder, FgRecordContext};
use crate::resource::{FgBufferDesc, FgExternalImage, FgImageDesc, FgImageViewDesc};
use crate::subresource::FgImageRange;
use crate::usage::{FgBufferUsage, FgImageUsage};

pub(crate) fn test_extent() -> vk::Extent2D {
    vk::Extent2D {
        width: 1280,
        height: 720,
    }
}

/// 只生成 handle 的分配器，记录每个资源的尺寸和 usage
pub(crate) struct MockAllocator {
    next_raw: u64,
    allocations: usize,
    fail_after: usize,
    images: HashMap<vk::Image, (vk::Extent3D, vk::ImageUsageFlags)>,
    buffers: HashMap<vk::Buffer, (vk::DeviceSize, vk::BufferUsageFlags)>,
    /// view -> (图像, 范围)
    views: HashMap<vk::ImageView, (vk::Image, FgImageRange)>,
    destroyed_images: HashSet<vk::Image>,
}

impl Default for MockAllocator {
    fn default() -> Self {
        Self {
            next_raw: 1,
            allocations: 0,
            fail_after: usize::MAX,
            images: HashMap::new(),
            buffers: HashMap::new(),
            views: HashMap::new(),
            destroyed_images: HashSet::new(),
        }
    }
}

impl MockAllocator {
    /// 前 `count` 次分配成功，之后全部返回显存不足
    pub fn failing_after(count: usize) -> Self {
        Self {
            fail_after: count,
            ..Default::default()
        }
    }

    pub fn fail_after(&mut self, count: usize) {
        self.fail_after = count;
    }

    pub fn external_image(raw: u64, format: vk::Format) -> FgExternalImage {
        FgExternalImage::new(vk::Image::from_raw(0x1000_0000 + raw), format)
    }

    /// 成功分配的总次数
    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_view_count(&self) -> usize {
        self.views.len()
    }

    /// view 指向的图像和范围
    pub fn view_info(&self, view: vk::ImageView) -> Option<(vk::Image, FgImageRange)> {
        self.views.get(&view).copied()
    }

    pub fn is_live_image(&self, image: vk::Image) -> bool {
        self.images.contains_key(&image)
    }

    pub fn image_info(&self, image: vk::Image) -> Option<(vk::Extent3D, vk::ImageUsageFlags)> {
        self.images.get(&image).copied()
    }

    pub fn buffer_size(&self, buffer: vk::Buffer) -> Option<vk::DeviceSize> {
        self.buffers.get(&buffer).map(|(size, _)| *size)
    }

    fn next_handle(&mut self, name: &str) -> FgResult<u64> {
        if self.allocations >= self.fail_after {
            return Err(FgError::Allocation {
                name: name.to_string(),
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            });
        }
        self.allocations += 1;
        let raw = self.next_raw;
        self.next_raw += 1;
        Ok(raw)
    }
}

impl FgResourceAllocator for MockAllocator {
    fn create_image(&mut self, name: &str, create_info: &vk::ImageCreateInfo<'_>) -> FgResult<vk::Image> {
        let image = vk::Image::from_raw(self.next_handle(name)?);
        self.images.insert(image, (create_info.extent, create_info.usage));
        Ok(image)
    }

    fn destroy_image(&mut self, image: vk::Image) {
        assert!(self.images.remove(&image).is_some(), "double free of {:?}", image);
        assert!(
            self.views.values().all(|(viewed, _)| *viewed != image),
            "image {:?} destroyed before its views",
            image
        );
        self.destroyed_images.insert(image);
    }

    fn create_buffer(&mut self, name: &str, create_info: &vk::BufferCreateInfo<'_>) -> FgResult<vk::Buffer> {
        let buffer = vk::Buffer::from_raw(self.next_handle(name)?);
        self.buffers.insert(buffer, (create_info.size, create_info.usage));
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        assert!(self.buffers.remove(&buffer).is_some(), "double free of {:?}", buffer);
    }

    fn create_image_view(&mut self, name: &str, create_info: &vk::ImageViewCreateInfo<'_>) -> FgResult<vk::ImageView> {
        assert!(!self.destroyed_images.contains(&create_info.image), "view on destroyed image {}", name);
        let view = vk::ImageView::from_raw(self.next_handle(name)?);
        let range = create_info.subresource_range;
        let range = FgImageRange {
            aspect: range.aspect_mask,
            base_mip_level: range.base_mip_level,
            level_count: range.level_count,
            base_array_layer: range.base_array_layer,
            layer_count: range.layer_count,
        };
        self.views.insert(view, (create_info.image, range));
        Ok(view)
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        assert!(self.views.remove(&view).is_some(), "double free of {:?}", view);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RecorderEvent {
    Barrier {
        images: Vec<(vk::Image, vk::ImageLayout, vk::ImageLayout)>,
        buffers: Vec<vk::Buffer>,
    },
    BeginLabel(String),
    EndLabel,
}

impl RecorderEvent {
    pub fn barrier(images: &[(vk::Image, vk::ImageLayout, vk::ImageLayout)]) -> Self {
        RecorderEvent::Barrier {
            images: images.to_vec(),
            buffers: Vec::new(),
        }
    }
}

#[derive(Default)]
pub(crate) struct MockRecorder {
    pub events: Vec<RecorderEvent>,
}

impl FgCommandRecorder for MockRecorder {
    fn pipeline_barrier(&mut self, barriers: &FgVkBarrierBatch) {
        self.events.push(RecorderEvent::Barrier {
            images: barriers.image_barriers.iter().map(|b| (b.image, b.old_layout, b.new_layout)).collect(),
            buffers: barriers.buffer_barriers.iter().map(|b| b.buffer).collect(),
        });
    }

    fn begin_label(&mut self, name: &str, _color: glam::Vec4) {
        self.events.push(RecorderEvent::BeginLabel(name.to_string()));
    }

    fn end_label(&mut self) {
        self.events.push(RecorderEvent::EndLabel);
    }

    fn command_buffer(&self) -> vk::CommandBuffer {
        vk::CommandBuffer::null()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum NodeEvent {
    Record {
        node: String,
        barrier_count: usize,
        frame_index: usize,
    },
    Resize {
        node: String,
        width: u32,
        height: u32,
    },
    /// 录制时拿到的 image view
    Views {
        node: String,
        views: Vec<vk::ImageView>,
    },
    Teardown(String),
}

impl NodeEvent {
    pub fn recorded_node(&self) -> Option<String> {
        match self {
            NodeEvent::Record { node, .. } => Some(node.clone()),
            _ => None,
        }
    }

    pub fn resized_node(&self) -> Option<String> {
        match self {
            NodeEvent::Resize { node, .. } => Some(node.clone()),
            _ => None,
        }
    }

    pub fn views_of(&self, name: &str) -> Option<Vec<vk::ImageView>> {
        match self {
            NodeEvent::Views { node, views } if node == name => Some(views.clone()),
            _ => None,
        }
    }

    pub fn is_teardown_of(&self, name: &str) -> bool {
        matches!(self, NodeEvent::Teardown(node) if node == name)
    }
}

pub(crate) type EventLog = Rc<RefCell<Vec<NodeEvent>>>;

pub(crate) fn new_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// 按脚本声明资源的 node
pub(crate) struct TestNode {
    name: String,
    created_images: Vec<(String, FgImageDesc, FgImageUsage)>,
    created_buffers: Vec<(String, FgBufferDesc, FgBufferUsage)>,
    imported_images: Vec<(String, FgExternalImage, FgImageUsage)>,
    imported_buffers: Vec<(String, vk::Buffer, FgBufferUsage)>,
    image_refs: Vec<(String, FgImageUsage)>,
    buffer_refs: Vec<(String, FgBufferUsage)>,
    view_requests: Vec<(String, FgImageViewDesc)>,
    /// declare_resources 返回的 (名字, 序号)
    view_indices: Vec<(String, usize)>,
    log: EventLog,
}

impl TestNode {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            created_images: Vec::new(),
            created_buffers: Vec::new(),
            imported_images: Vec::new(),
            imported_buffers: Vec::new(),
            image_refs: Vec::new(),
            buffer_refs: Vec::new(),
            view_requests: Vec::new(),
            view_indices: Vec::new(),
            log: log.clone(),
        }
    }

    pub fn create_image(mut self, name: &str, desc: FgImageDesc, usage: FgImageUsage) -> Self {
        self.created_images.push((name.to_string(), desc, usage));
        self
    }

    pub fn create_buffer(mut self, name: &str, desc: FgBufferDesc, usage: FgBufferUsage) -> Self {
        self.created_buffers.push((name.to_string(), desc, usage));
        self
    }

    pub fn import_image(mut self, name: &str, external: FgExternalImage, usage: FgImageUsage) -> Self {
        self.imported_images.push((name.to_string(), external, usage));
        self
    }

    pub fn import_buffer(mut self, name: &str, buffer: vk::Buffer, usage: FgBufferUsage) -> Self {
        self.imported_buffers.push((name.to_string(), buffer, usage));
        self
    }

    pub fn image_view(mut self, name: &str, desc: FgImageViewDesc) -> Self {
        self.view_requests.push((name.to_string(), desc));
        self
    }

    pub fn reference_image(mut self, name: &str, usage: FgImageUsage) -> Self {
        self.image_refs.push((name.to_string(), usage));
        self
    }

    pub fn reference_buffer(mut self, name: &str, usage: FgBufferUsage) -> Self {
        self.buffer_refs.push((name.to_string(), usage));
        self
    }
}

impl FgNode for TestNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare_resources(&mut self, builder: &mut FgNodeBuilder<'_>) -> FgResult<()> {
        for (name, desc, usage) in &self.created_images {
            builder.create_image(name, desc.clone(), *usage)?;
        }
        for (name, desc, usage) in &self.created_buffers {
            builder.create_buffer(name, desc.clone(), *usage)?;
        }
        for (name, external, usage) in &self.imported_images {
            builder.import_image(name, *external, *usage)?;
        }
        for (name, buffer, usage) in &self.imported_buffers {
            builder.import_buffer(name, *buffer, *usage)?;
        }
        self.view_indices.clear();
        for (name, desc) in &self.view_requests {
            let index = builder.create_image_view(name, *desc);
            self.view_indices.push((name.clone(), index));
        }
        for (name, usage) in &self.image_refs {
            builder.reference_image(name, *usage);
        }
        for (name, usage) in &self.buffer_refs {
            builder.reference_buffer(name, *usage);
        }
        Ok(())
    }

    fn record_commands(&mut self, ctx: &mut FgRecordContext<'_>) {
        // 每个持有的资源都必须有物理对象
        for (name, ..) in &self.created_images {
            assert!(ctx.image(name).is_ok(), "{} not backed", name);
        }
        for (name, _) in &self.image_refs {
            assert!(ctx.image(name).is_ok(), "{} not backed", name);
        }
        if !self.view_indices.is_empty() {
            let views = self
                .view_indices
                .iter()
                .map(|(name, index)| ctx.image_view(name, *index).unwrap_or_else(|e| panic!("{}: {}", name, e)))
                .collect();
            self.log.borrow_mut().push(NodeEvent::Views {
                node: self.name.clone(),
                views,
            });
        }
        self.log.borrow_mut().push(NodeEvent::Record {
            node: self.name.clone(),
            barrier_count: ctx.barriers().len(),
            frame_index: ctx.frame_index(),
        });
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        self.log.borrow_mut().push(NodeEvent::Resize {
            node: self.name.clone(),
            width,
            height,
        });
    }

    fn teardown(&mut self) {
        self.log.borrow_mut().push(NodeEvent::Teardown(self.name.clone()));
    }
}
