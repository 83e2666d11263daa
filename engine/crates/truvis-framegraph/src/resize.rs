//! 输出尺寸变化时重建尺寸相关资源
//!
//! 先为所有尺寸相关的 owned 资源分配替换品，全部成功之后才销毁旧资源并替换 handle；
//! 任何一次分配失败都会释放已经分配的替换品，framegraph 保持 resize 之前的状态。

use std::collections::HashSet;

use ash::vk;

use crate::backend::FgResourceAllocator;
use crate::context::{FgContext, FgState};
use crate::error::FgResult;
use crate::handle::{FgBufferHandle, FgImageHandle, FgNodeHandle, FgResourceHandle};
use crate::resource::{FgBufferSource, FgImageSource};
use crate::usage::{FgBufferUsage, FgImageUsage};

#[derive(Default)]
struct FgReplacements {
    images: Vec<(FgImageHandle, vk::Image)>,
    buffers: Vec<(FgBufferHandle, vk::Buffer)>,
    /// 建在替换图像上的 view，下标对应 `FgContext::image_views`
    views: Vec<(usize, vk::ImageView)>,
}

impl FgReplacements {
    fn release(self, allocator: &mut dyn FgResourceAllocator) {
        for (_, view) in self.views {
            allocator.destroy_image_view(view);
        }
        for (_, image) in self.images {
            allocator.destroy_image(image);
        }
        for (_, buffer) in self.buffers {
            allocator.destroy_buffer(buffer);
        }
    }

    fn is_empty(&self) -> bool {
        self.images.is_empty() && self.buffers.is_empty()
    }
}

impl FgContext {
    /// 输出尺寸变化
    ///
    /// 尺寸无关的资源保持原 handle；重建的资源从 `UNDEFINED` 重新开始，
    /// 只有创建或引用了重建资源的 node 会收到 `on_resize`。
    pub fn on_resize(&mut self, width: u32, height: u32, allocator: &mut dyn FgResourceAllocator) -> FgResult<()> {
        let _span = crate::profile_span!("FgContext::on_resize");
        self.ensure_state("on_resize", &[
            FgState::Unbuilt,
            FgState::ResourcesDeclared,
            FgState::Resolved,
            FgState::Recorded,
        ])?;

        let extent = vk::Extent2D { width, height };
        if width == 0 || height == 0 {
            log::warn!("ignore resize to {}x{}", width, height);
            return Ok(());
        }
        if extent == self.target_extent {
            return Ok(());
        }

        if self.state == FgState::Unbuilt {
            // 还没有物理资源，下一次 build 直接使用新尺寸
            self.target_extent = extent;
            for &handle in &self.node_order {
                if let Some(node) = self.nodes.get_mut(handle) {
                    node.on_resize(width, height);
                }
            }
            return Ok(());
        }

        let replacements = match self.allocate_replacements(extent, allocator) {
            Ok(replacements) => replacements,
            Err(e) => {
                log::error!(
                    "resize {}x{} -> {}x{} failed, keep old resources: {}",
                    self.target_extent.width,
                    self.target_extent.height,
                    width,
                    height,
                    e
                );
                return Err(e);
            }
        };

        let recreated = self.commit_replacements(replacements, allocator);
        self.target_extent = extent;
        self.drop_resolution();

        let affected = self.nodes_using(&recreated);
        for &handle in &self.node_order {
            if !affected.contains(&handle) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(handle) {
                node.on_resize(width, height);
            }
        }

        log::info!(
            "framegraph resized to {}x{}: {} resources recreated, {} nodes notified",
            width,
            height,
            recreated.len(),
            affected.len()
        );
        Ok(())
    }

    fn allocate_replacements(
        &self,
        extent: vk::Extent2D,
        allocator: &mut dyn FgResourceAllocator,
    ) -> FgResult<FgReplacements> {
        let mut replacements = FgReplacements::default();

        for (handle, resource) in self.registry.iter_images() {
            let FgImageSource::Owned { desc, .. } = &resource.source else {
                continue;
            };
            if !desc.is_size_dependent() {
                continue;
            }
            match allocator.create_image(&resource.name, &desc.to_create_info(extent, resource.usage_flags)) {
                Ok(image) => replacements.images.push((handle, image)),
                Err(e) => {
                    replacements.release(allocator);
                    return Err(e);
                }
            }
        }

        for (handle, resource) in self.registry.iter_buffers() {
            let FgBufferSource::Owned { desc, .. } = &resource.source else {
                continue;
            };
            if !desc.is_size_dependent() {
                continue;
            }
            let created = desc
                .to_create_info(&resource.name, extent, resource.usage_flags)
                .and_then(|create_info| allocator.create_buffer(&resource.name, &create_info));
            match created {
                Ok(buffer) => replacements.buffers.push((handle, buffer)),
                Err(e) => {
                    replacements.release(allocator);
                    return Err(e);
                }
            }
        }

        for index in 0..replacements.images.len() {
            let (handle, image) = replacements.images[index];
            let Some(resource) = self.registry.get_image(handle) else {
                continue;
            };
            match self.create_views_on(handle, image, resource.format(), &resource.shape(), allocator) {
                Ok(mut views) => replacements.views.append(&mut views),
                Err(e) => {
                    replacements.release(allocator);
                    return Err(e);
                }
            }
        }

        Ok(replacements)
    }

    /// 销毁旧资源，换上替换品，返回被重建的资源
    fn commit_replacements(
        &mut self,
        replacements: FgReplacements,
        allocator: &mut dyn FgResourceAllocator,
    ) -> Vec<FgResourceHandle> {
        if replacements.is_empty() {
            return Vec::new();
        }
        let mut recreated = Vec::with_capacity(replacements.images.len() + replacements.buffers.len());

        // 旧 view 必须先于旧图像销毁
        self.replace_views(replacements.views, allocator);

        for (handle, new_image) in replacements.images {
            let Some(resource) = self.registry.get_image_mut(handle) else {
                allocator.destroy_image(new_image);
                continue;
            };
            if let FgImageSource::Owned { image, .. } = &mut resource.source {
                if let Some(old) = image.replace(new_image) {
                    allocator.destroy_image(old);
                }
            }
            self.tracker.reset_image(handle, FgImageUsage::UNDEFINED);
            recreated.push(handle.into());
        }

        for (handle, new_buffer) in replacements.buffers {
            let Some(resource) = self.registry.get_buffer_mut(handle) else {
                allocator.destroy_buffer(new_buffer);
                continue;
            };
            if let FgBufferSource::Owned { buffer, .. } = &mut resource.source {
                if let Some(old) = buffer.replace(new_buffer) {
                    allocator.destroy_buffer(old);
                }
            }
            self.tracker.reset_buffer(handle, FgBufferUsage::UNDEFINED);
            recreated.push(handle.into());
        }

        recreated
    }

    /// 创建或引用了这些资源的 node
    fn nodes_using(&self, resources: &[FgResourceHandle]) -> HashSet<FgNodeHandle> {
        let mut nodes: HashSet<FgNodeHandle> =
            resources.iter().filter_map(|handle| self.registry.creator_of(*handle)).collect();
        nodes.extend(self.references.iter().filter(|r| resources.contains(&r.handle)).map(|r| r.node));
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FgError;
    use crate::resource::{FgBufferDesc, FgImageDesc, FgImageViewDesc};
    use crate::subresource::FgImageRange;
    use crate::settings::FgSettings;
    use crate::test_utils::{MockAllocator, MockRecorder, NodeEvent, TestNode, new_log};

    fn scene(log: &crate::test_utils::EventLog) -> FgContext {
        truvis_crate_tools::init_log::init_test_log();
        let mut ctx = FgContext::new(FgSettings::default(), vk::Extent2D { width: 800, height: 600 });
        ctx.add_node(
            TestNode::new("render", log)
                .create_image("rt", FgImageDesc::target_sized(vk::Format::R16G16B16A16_SFLOAT), FgImageUsage::COLOR_ATTACHMENT_WRITE)
                .create_image("lut", FgImageDesc::new_2d(32, 32, vk::Format::R8G8B8A8_UNORM), FgImageUsage::TRANSFER_DST),
        )
        .unwrap();
        ctx.add_node(TestNode::new("post", log).reference_image("rt", FgImageUsage::SHADER_READ_FRAGMENT)).unwrap();
        ctx.add_node(TestNode::new("grade", log).reference_image("lut", FgImageUsage::SHADER_READ_FRAGMENT)).unwrap();
        ctx
    }

    #[test]
    fn test_resize_recreates_only_size_dependent() {
        let log = new_log();
        let mut ctx = scene(&log);
        let mut allocator = MockAllocator::default();
        ctx.build(&mut allocator).unwrap();
        ctx.record_frame(&mut MockRecorder::default(), 0).unwrap();

        let old_rt = ctx.image("rt").unwrap();
        let old_lut = ctx.image("lut").unwrap();
        ctx.on_resize(1920, 1080, &mut allocator).unwrap();

        let new_rt = ctx.image("rt").unwrap();
        assert_ne!(new_rt, old_rt);
        assert_eq!(ctx.image("lut").unwrap(), old_lut);
        assert!(!allocator.is_live_image(old_rt));
        let (extent, _) = allocator.image_info(new_rt).unwrap();
        assert_eq!((extent.width, extent.height), (1920, 1080));
        assert_eq!(ctx.target_extent(), vk::Extent2D { width: 1920, height: 1080 });

        // 只有 render 和 post 使用 rt
        let resized = log.borrow().iter().filter_map(NodeEvent::resized_node).collect::<Vec<_>>();
        assert_eq!(resized, vec!["render".to_string(), "post".to_string()]);

        ctx.destroy(&mut allocator);
    }

    #[test]
    fn test_resize_restarts_rt_from_initial_usage() {
        let log = new_log();
        let mut ctx = scene(&log);
        let mut allocator = MockAllocator::default();
        ctx.build(&mut allocator).unwrap();
        ctx.record_frame(&mut MockRecorder::default(), 0).unwrap();
        ctx.on_resize(1920, 1080, &mut allocator).unwrap();
        ctx.resolve().unwrap();

        let rt = ctx.registry().image_handle("rt").unwrap();
        let lut = ctx.registry().image_handle("lut").unwrap();
        let prologue = ctx.prologue_barriers();

        let rt_start = prologue.image_barriers.iter().find(|b| b.handle == rt).unwrap();
        assert_eq!(rt_start.src_stage, vk::PipelineStageFlags2::TOP_OF_PIPE);
        assert_eq!(rt_start.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(rt_start.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        // lut 延续上一帧的状态
        let lut_start = prologue.image_barriers.iter().find(|b| b.handle == lut).unwrap();
        assert_eq!(lut_start.src_stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);

        let post = ctx.nodes()[1];
        let consumer = ctx.node_barriers(post).unwrap().image_barriers[0];
        assert_eq!(consumer.handle, rt);
        assert_eq!(consumer.src_stage, FgImageUsage::COLOR_ATTACHMENT_WRITE.stage);
        assert_eq!(consumer.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(consumer.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        ctx.destroy(&mut allocator);
    }

    #[test]
    fn test_failed_resize_changes_nothing() {
        let log = new_log();
        let mut ctx = FgContext::new(FgSettings::default(), vk::Extent2D { width: 800, height: 600 });
        ctx.add_node(
            TestNode::new("render", &log)
                .create_image("rt", FgImageDesc::target_sized(vk::Format::R16G16B16A16_SFLOAT), FgImageUsage::COLOR_ATTACHMENT_WRITE)
                .create_buffer("tiles", FgBufferDesc::per_target_pixel(4), FgBufferUsage::STORAGE_READ_WRITE_COMPUTE),
        )
        .unwrap();
        let mut allocator = MockAllocator::default();
        ctx.build(&mut allocator).unwrap();
        ctx.resolve().unwrap();

        let rt = ctx.image("rt").unwrap();
        let tiles = ctx.buffer("tiles").unwrap();
        // rt 的替换品分配成功，tiles 的替换品失败
        allocator.fail_after(allocator.allocation_count() + 1);

        let err = ctx.on_resize(1920, 1080, &mut allocator).unwrap_err();
        assert!(matches!(err, FgError::Allocation { .. }));
        assert_eq!(ctx.image("rt").unwrap(), rt);
        assert_eq!(ctx.buffer("tiles").unwrap(), tiles);
        assert_eq!(ctx.target_extent(), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(ctx.state(), FgState::Resolved);
        assert_eq!(allocator.live_image_count(), 1);
        assert_eq!(allocator.live_buffer_count(), 1);
        assert!(log.borrow().iter().all(|e| e.resized_node().is_none()));

        allocator.fail_after(usize::MAX);
        ctx.destroy(&mut allocator);
    }

    #[test]
    fn test_per_pixel_buffer_follows_target() {
        let log = new_log();
        let mut ctx = FgContext::new(FgSettings::default(), vk::Extent2D { width: 4, height: 4 });
        ctx.add_node(
            TestNode::new("binning", &log).create_buffer(
                "bins",
                FgBufferDesc::per_target_pixel(16),
                FgBufferUsage::STORAGE_READ_WRITE_COMPUTE,
            ),
        )
        .unwrap();
        let mut allocator = MockAllocator::default();
        ctx.build(&mut allocator).unwrap();
        assert_eq!(allocator.buffer_size(ctx.buffer("bins").unwrap()), Some(4 * 4 * 16));

        ctx.on_resize(8, 2, &mut allocator).unwrap();
        assert_eq!(allocator.buffer_size(ctx.buffer("bins").unwrap()), Some(8 * 2 * 16));
        ctx.destroy(&mut allocator);
    }

    #[test]
    fn test_resize_before_build_only_updates_extent() {
        let log = new_log();
        let mut ctx = scene(&log);
        let mut allocator = MockAllocator::default();
        ctx.on_resize(1024, 768, &mut allocator).unwrap();
        assert_eq!(allocator.allocation_count(), 0);

        ctx.build(&mut allocator).unwrap();
        let (extent, _) = allocator.image_info(ctx.image("rt").unwrap()).unwrap();
        assert_eq!((extent.width, extent.height), (1024, 768));
        ctx.destroy(&mut allocator);
    }

    #[test]
    fn test_zero_size_resize_ignored() {
        let log = new_log();
        let mut ctx = scene(&log);
        let mut allocator = MockAllocator::default();
        ctx.build(&mut allocator).unwrap();
        let rt = ctx.image("rt").unwrap();
        ctx.on_resize(0, 0, &mut allocator).unwrap();
        assert_eq!(ctx.image("rt").unwrap(), rt);
        ctx.destroy(&mut allocator);
    }

    #[test]
    fn test_overflowing_buffer_rolls_back_resize() {
        let log = new_log();
        let mut ctx = FgContext::new(FgSettings::default(), vk::Extent2D { width: 64, height: 64 });
        ctx.add_node(
            TestNode::new("render", &log)
                .create_image("rt", FgImageDesc::target_sized(vk::Format::R8G8B8A8_UNORM), FgImageUsage::COLOR_ATTACHMENT_WRITE)
                .create_buffer("records", FgBufferDesc::per_target_pixel(1 << 32), FgBufferUsage::STORAGE_READ_WRITE_COMPUTE),
        )
        .unwrap();
        let mut allocator = MockAllocator::default();
        ctx.build(&mut allocator).unwrap();
        let rt = ctx.image("rt").unwrap();
        let records = ctx.buffer("records").unwrap();

        let err = ctx.on_resize(u32::MAX, u32::MAX, &mut allocator).unwrap_err();
        assert!(matches!(err, FgError::BufferSizeOverflow { ref name, .. } if name == "records"));
        assert_eq!(ctx.image("rt").unwrap(), rt);
        assert_eq!(ctx.buffer("records").unwrap(), records);
        assert_eq!(ctx.target_extent(), vk::Extent2D { width: 64, height: 64 });
        assert_eq!(allocator.live_image_count(), 1);
        ctx.destroy(&mut allocator);
    }

    #[test]
    fn test_resize_rebuilds_views_on_new_image() {
        let log = new_log();
        let mut ctx = FgContext::new(FgSettings::default(), vk::Extent2D { width: 800, height: 600 });
        ctx.add_node(
            TestNode::new("bloom", &log)
                .create_image(
                    "bloom_chain",
                    FgImageDesc::target_sized(vk::Format::B10G11R11_UFLOAT_PACK32).with_mip_levels(4),
                    FgImageUsage::COLOR_ATTACHMENT_WRITE,
                )
                .image_view("bloom_chain", FgImageViewDesc::new_2d().with_range(FgImageRange::mip(2))),
        )
        .unwrap();
        let mut allocator = MockAllocator::default();
        ctx.build(&mut allocator).unwrap();
        let mut recorder = MockRecorder::default();
        ctx.record_frame(&mut recorder, 0).unwrap();
        let old_view = log.borrow().iter().find_map(|e| e.views_of("bloom")).unwrap()[0];

        ctx.on_resize(1280, 720, &mut allocator).unwrap();
        assert_eq!(allocator.live_view_count(), 1);
        assert!(allocator.view_info(old_view).is_none());

        log.borrow_mut().clear();
        ctx.record_frame(&mut recorder, 1).unwrap();
        let new_view = log.borrow().iter().find_map(|e| e.views_of("bloom")).unwrap()[0];
        let (image, range) = allocator.view_info(new_view).unwrap();
        assert_eq!(image, ctx.image("bloom_chain").unwrap());
        assert_eq!((range.base_mip_level, range.level_count), (2, 1));
        ctx.destroy(&mut allocator);
    }

    #[test]
    fn test_failed_view_allocation_rolls_back_resize() {
        let log = new_log();
        let mut ctx = FgContext::new(FgSettings::default(), vk::Extent2D { width: 800, height: 600 });
        ctx.add_node(
            TestNode::new("render", &log)
                .create_image("rt", FgImageDesc::target_sized(vk::Format::R8G8B8A8_UNORM), FgImageUsage::COLOR_ATTACHMENT_WRITE)
                .image_view("rt", FgImageViewDesc::new_2d()),
        )
        .unwrap();
        let mut allocator = MockAllocator::default();
        ctx.build(&mut allocator).unwrap();
        let rt = ctx.image("rt").unwrap();

        // 新图像成功，新 view 失败
        allocator.fail_after(allocator.allocation_count() + 1);
        assert!(ctx.on_resize(1920, 1080, &mut allocator).is_err());
        assert_eq!(ctx.image("rt").unwrap(), rt);
        assert_eq!(allocator.live_image_count(), 1);
        assert_eq!(allocator.live_view_count(), 1);

        allocator.fail_after(usize::MAX);
        ctx.destroy(&mut allocator);
        assert_eq!(allocator.live_view_count(), 0);
    }
}
