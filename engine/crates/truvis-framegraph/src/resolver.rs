//! 依赖解析
//!
//! 按 node 执行顺序处理每一个资源引用：从 [`FgUsageTracker`] 取出上一个使用方式，
//! 生成到新使用方式的 barrier，然后记录新的使用方式。
//!
//! 默认每个引用都会生成 barrier（多同步是安全的）；开启 `skip_redundant` 后，
//! 只有纯只读、layout 不变且 stage/access 被上一个使用方式完全覆盖的引用才会被省略。

use slotmap::SecondaryMap;

use crate::barrier::{FgBarrier, FgBarrierBatch, FgBufferBarrier, FgImageBarrier};
use crate::error::{FgError, FgResourceKind, FgResult};
use crate::handle::{FgBufferHandle, FgImageHandle, FgNodeHandle, FgResourceHandle};
use crate::registry::FgResourceRegistry;
use crate::tracker::FgUsageTracker;
use crate::usage::{FgBufferUsage, FgImageUsage, FgUsage};

#[derive(Default)]
pub struct FgDependencyResolver {
    /// node -> 执行前需要提交的 barrier
    batches: SecondaryMap<FgNodeHandle, FgBarrierBatch>,
    /// 帧开始时，resting -> initial
    prologue: FgBarrierBatch,
    /// 最后一个 node 之后，导出资源转换到最终状态
    epilogue: FgBarrierBatch,
    /// 每个资源最近一次的使用者
    last_user: SecondaryMap<FgImageHandle, FgNodeHandle>,
    last_buffer_user: SecondaryMap<FgBufferHandle, FgNodeHandle>,

    skip_redundant: bool,
}

// new & init
impl FgDependencyResolver {
    pub fn new(skip_redundant: bool) -> Self {
        Self {
            skip_redundant,
            ..Default::default()
        }
    }

    pub fn set_skip_redundant(&mut self, skip_redundant: bool) {
        self.skip_redundant = skip_redundant;
    }

    /// 丢弃上一次解析的全部结果
    pub fn clear(&mut self) {
        self.batches.clear();
        self.prologue.clear();
        self.epilogue.clear();
        self.last_user.clear();
        self.last_buffer_user.clear();
    }
}

// 帧边界
impl FgDependencyResolver {
    /// 生成帧开始的 barrier，并让所有资源回到 initial 使用方式
    ///
    /// 首帧 owned 资源从 `UNDEFINED` 开始；之后的帧从上一帧最后的使用方式开始。
    /// 不保留内容的 owned 图像每帧都从 `UNDEFINED` layout 转换。
    /// 只有创建者声明了 initial 的子范围会进入 prologue，其余子资源留给第一个引用它的 node。
    pub fn begin_frame(&mut self, registry: &FgResourceRegistry, tracker: &mut FgUsageTracker) {
        self.clear();

        for (handle, resource) in registry.iter_images() {
            let Some(tracked) = tracker.tracked_image(handle) else {
                continue;
            };
            if let Some(creator) = resource.creator {
                self.last_user.insert(handle, creator);
            }
            for (range, resting, initial) in tracked.prologue() {
                let initial = initial.resolved_after(resting.finish_layout);
                if initial.is_hazard_free_after(&resting) {
                    continue;
                }
                let mut barrier = FgImageBarrier::new(handle, &resting, &initial)
                    .with_range(range)
                    .with_nodes(None, resource.creator);
                if !resource.preserve_across_frames() {
                    barrier = barrier.discard_contents();
                }
                self.prologue.push(FgBarrier::Image(barrier));
            }
        }

        for (handle, resource) in registry.iter_buffers() {
            let Some(tracked) = tracker.tracked_buffer(handle) else {
                continue;
            };
            if let Some(creator) = resource.creator {
                self.last_buffer_user.insert(handle, creator);
            }
            for (range, resting, initial) in tracked.prologue() {
                if initial.is_hazard_free_after(&resting) {
                    continue;
                }
                let barrier = FgBufferBarrier::new(handle, &resting, &initial)
                    .with_range(range)
                    .with_nodes(None, resource.creator);
                self.prologue.push(FgBarrier::Buffer(barrier));
            }
        }

        tracker.begin_frame();
    }

    /// 为导出资源生成最后的转换，并记录为最终使用方式
    ///
    /// 导出范围内处于不同状态的子资源各自得到一个 barrier。
    pub fn finish_frame(
        &mut self,
        registry: &FgResourceRegistry,
        tracker: &mut FgUsageTracker,
        exports: &[(FgImageHandle, FgImageUsage)],
    ) -> FgResult<()> {
        for (handle, final_usage) in exports {
            let range = registry.resolve_image_range(*handle, &final_usage.range)?;
            let parts = tracker
                .image_usages(*handle, &range)
                .ok_or_else(|| FgError::UsageNotTracked(registry.name_of((*handle).into()).to_string()))?;
            let src_node = self.last_user.get(*handle).copied();
            for (part, previous) in parts {
                let final_usage = final_usage.resolved_after(previous.finish_layout);
                let barrier = FgImageBarrier::new(*handle, &previous, &final_usage)
                    .with_range(part)
                    .with_nodes(src_node, None);
                self.epilogue.push(FgBarrier::Image(barrier));
                tracker.record_image_usage(*handle, &part, final_usage);
            }
        }
        Ok(())
    }
}

// 引用解析
impl FgDependencyResolver {
    /// 解析 `node` 对 `name` 的引用
    ///
    /// 返回生成的 barrier。引用范围内处于不同状态的子资源各自得到一个 barrier；
    /// 开启冗余消除时，没有任何 hazard 的部分不生成 barrier。
    pub fn declare_reference(
        &mut self,
        registry: &FgResourceRegistry,
        tracker: &mut FgUsageTracker,
        node: FgNodeHandle,
        name: &str,
        requested: FgUsage,
    ) -> FgResult<Vec<FgBarrier>> {
        let handle = match requested {
            FgUsage::Image(_) => FgResourceHandle::Image(registry.image_handle(name)?),
            FgUsage::Buffer(_) => FgResourceHandle::Buffer(registry.buffer_handle(name)?),
        };
        self.declare_reference_by_handle(registry, tracker, node, handle, requested)
    }

    pub fn declare_reference_by_handle(
        &mut self,
        registry: &FgResourceRegistry,
        tracker: &mut FgUsageTracker,
        node: FgNodeHandle,
        handle: FgResourceHandle,
        requested: FgUsage,
    ) -> FgResult<Vec<FgBarrier>> {
        let barriers = match (handle, requested) {
            (FgResourceHandle::Image(handle), FgUsage::Image(requested)) => {
                self.resolve_image_reference(registry, tracker, node, handle, requested)?
            }
            (FgResourceHandle::Buffer(handle), FgUsage::Buffer(requested)) => {
                self.resolve_buffer_reference(registry, tracker, node, handle, requested)?
            }
            (handle, _) => {
                let actual = handle.kind();
                let expected = match actual {
                    FgResourceKind::Image => FgResourceKind::Buffer,
                    FgResourceKind::Buffer => FgResourceKind::Image,
                };
                return Err(FgError::ResourceKindMismatch {
                    name: registry.name_of(handle).to_string(),
                    expected,
                    actual,
                });
            }
        };

        if !barriers.is_empty() {
            if let Some(entry) = self.batches.entry(node) {
                let batch = entry.or_default();
                barriers.iter().for_each(|barrier| batch.push(*barrier));
            }
        }
        Ok(barriers)
    }

    fn resolve_image_reference(
        &mut self,
        registry: &FgResourceRegistry,
        tracker: &mut FgUsageTracker,
        node: FgNodeHandle,
        handle: FgImageHandle,
        requested: FgImageUsage,
    ) -> FgResult<Vec<FgBarrier>> {
        let range = registry.resolve_image_range(handle, &requested.range)?;
        let parts = tracker
            .image_usages(handle, &range)
            .ok_or_else(|| FgError::UsageNotTracked(registry.name_of(handle.into()).to_string()))?;
        let src_node = self.last_user.get(handle).copied();

        let mut barriers = Vec::with_capacity(parts.len());
        for (part, previous) in parts {
            let resolved = requested.resolved_after(previous.finish_layout);
            if self.skip_redundant && resolved.is_hazard_free_after(&previous) {
                // 保留覆盖范围更大的 previous，后续写入需要等待它
                log::debug!("skip redundant barrier on \"{}\" {:?}", registry.name_of(handle.into()), part);
                continue;
            }
            let barrier = FgImageBarrier::new(handle, &previous, &resolved)
                .with_range(part)
                .with_nodes(src_node, Some(node));
            tracker.record_image_usage(handle, &part, resolved);
            barriers.push(FgBarrier::Image(barrier));
        }
        self.last_user.insert(handle, node);
        Ok(barriers)
    }

    fn resolve_buffer_reference(
        &mut self,
        registry: &FgResourceRegistry,
        tracker: &mut FgUsageTracker,
        node: FgNodeHandle,
        handle: FgBufferHandle,
        requested: FgBufferUsage,
    ) -> FgResult<Vec<FgBarrier>> {
        let range = registry.resolve_buffer_range(handle, &requested.range)?;
        let parts = tracker
            .buffer_usages(handle, &range)
            .ok_or_else(|| FgError::UsageNotTracked(registry.name_of(handle.into()).to_string()))?;
        let src_node = self.last_buffer_user.get(handle).copied();

        let mut barriers = Vec::with_capacity(parts.len());
        for (part, previous) in parts {
            if self.skip_redundant && requested.is_hazard_free_after(&previous) {
                log::debug!("skip redundant barrier on \"{}\" {:?}", registry.name_of(handle.into()), part);
                continue;
            }
            let barrier = FgBufferBarrier::new(handle, &previous, &requested)
                .with_range(part)
                .with_nodes(src_node, Some(node));
            tracker.record_buffer_usage(handle, &part, requested);
            barriers.push(FgBarrier::Buffer(barrier));
        }
        self.last_buffer_user.insert(handle, node);
        Ok(barriers)
    }
}

// getter
impl FgDependencyResolver {
    /// node 的 barrier（没有任何 barrier 时为 None）
    #[inline]
    pub fn node_barriers(&self, node: FgNodeHandle) -> Option<&FgBarrierBatch> {
        self.batches.get(node)
    }

    #[inline]
    pub fn prologue(&self) -> &FgBarrierBatch {
        &self.prologue
    }

    #[inline]
    pub fn epilogue(&self) -> &FgBarrierBatch {
        &self.epilogue
    }

    /// 所有 node 的 barrier 总数（不含帧边界）
    pub fn barrier_count(&self) -> usize {
        self.batches.values().map(FgBarrierBatch::len).sum()
    }
}
