//! 资源使用方式跟踪
//!
//! 每个子资源记录三种状态：
//! - `initial`：创建/导入时声明的使用方式，每帧由创建者重新进入；不在声明范围内的子资源为 None
//! - `resting`：帧开始时子资源所处的状态（上一帧最后一个使用者留下的）
//! - `current`：解析过程中最近一次记录的使用方式
//!
//! 图像按 aspect × mip × layer 跟踪，缓冲区按字节区间跟踪。
//! 解析必须按 node 执行顺序调用 `record_*`，顺序决定了依赖链。

use ash::vk;
use slotmap::SecondaryMap;

use crate::handle::{FgBufferHandle, FgImageHandle};
use crate::subresource::{FgBufferRange, FgBufferSegments, FgImageCells, FgImageRange, FgImageShape};
use crate::usage::{FgBufferUsage, FgImageUsage};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FgTrackedUsage<U> {
    pub initial: Option<U>,
    pub resting: U,
    pub current: U,
}

impl<U: Copy> FgTrackedUsage<U> {
    fn new(resting: U) -> Self {
        Self {
            initial: None,
            resting,
            current: resting,
        }
    }

    #[inline]
    fn frame_start(&self) -> U {
        self.initial.unwrap_or(self.resting)
    }
}

/// 一个图像的逐子资源状态
#[derive(Clone, Debug)]
pub struct FgTrackedImage {
    cells: FgImageCells<FgTrackedUsage<FgImageUsage>>,
    /// 没有 initial 的子资源每帧从 `UNDEFINED` layout 开始
    discard_contents: bool,
}

impl FgTrackedImage {
    #[inline]
    pub fn shape(&self) -> FgImageShape {
        self.cells.shape()
    }

    /// mip 0 / layer 0 的状态
    #[inline]
    pub fn base(&self) -> &FgTrackedUsage<FgImageUsage> {
        self.cells.base()
    }

    /// 帧开始时由创建者重新进入的子资源：(范围, resting, initial)
    pub fn prologue(&self) -> Vec<(FgImageRange, FgImageUsage, FgImageUsage)> {
        let full = self.shape().full_range();
        self.cells
            .partition(&full, |cell| (cell.resting, cell.initial))
            .into_iter()
            .filter_map(|(range, (resting, initial))| initial.map(|initial| (range, resting, initial)))
            .collect()
    }

    fn begin_frame(&mut self) {
        let discard = self.discard_contents;
        for cell in self.cells.iter_mut() {
            cell.current = cell.frame_start();
            if discard && cell.initial.is_none() {
                cell.current.start_layout = vk::ImageLayout::UNDEFINED;
                cell.current.finish_layout = vk::ImageLayout::UNDEFINED;
            }
        }
    }
}

/// 一个缓冲区的逐区间状态
#[derive(Clone, Debug)]
pub struct FgTrackedBuffer {
    segments: FgBufferSegments<FgTrackedUsage<FgBufferUsage>>,
}

impl FgTrackedBuffer {
    /// 偏移 0 处的状态
    #[inline]
    pub fn base(&self) -> &FgTrackedUsage<FgBufferUsage> {
        self.segments.base()
    }

    pub fn prologue(&self) -> Vec<(FgBufferRange, FgBufferUsage, FgBufferUsage)> {
        self.segments
            .partition(&FgBufferRange::WHOLE, |segment| (segment.resting, segment.initial))
            .into_iter()
            .filter_map(|(range, (resting, initial))| initial.map(|initial| (range, resting, initial)))
            .collect()
    }

    fn begin_frame(&mut self) {
        for segment in self.segments.iter_mut() {
            segment.current = segment.frame_start();
        }
    }
}

#[derive(Default)]
pub struct FgUsageTracker {
    images: SecondaryMap<FgImageHandle, FgTrackedImage>,
    buffers: SecondaryMap<FgBufferHandle, FgTrackedBuffer>,
}

// seed & reset
impl FgUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记图像：`initial_range` 内以 `initial` 开始，其余子资源停留在 `resting`
    pub fn seed_image(
        &mut self,
        handle: FgImageHandle,
        shape: FgImageShape,
        initial: FgImageUsage,
        initial_range: &FgImageRange,
        resting: FgImageUsage,
        discard_contents: bool,
    ) {
        let mut cells = FgImageCells::new(shape, FgTrackedUsage::new(resting.access_state()));
        let initial = initial.access_state();
        cells.update(initial_range, |cell| {
            cell.initial = Some(initial);
            cell.current = initial;
        });
        self.images.insert(handle, FgTrackedImage { cells, discard_contents });
    }

    pub fn seed_buffer(&mut self, handle: FgBufferHandle, initial: FgBufferUsage, resting: FgBufferUsage) {
        let mut segments = FgBufferSegments::new(FgTrackedUsage::new(resting.access_state()));
        let initial_range = initial.range;
        let initial = initial.access_state();
        segments.update(&initial_range, |segment| {
            segment.initial = Some(initial);
            segment.current = initial;
        });
        self.buffers.insert(handle, FgTrackedBuffer { segments });
    }

    /// 资源被重建之后，丢弃之前帧留下的状态
    pub fn reset_image(&mut self, handle: FgImageHandle, resting: FgImageUsage) {
        if let Some(tracked) = self.images.get_mut(handle) {
            let resting = resting.access_state();
            for cell in tracked.cells.iter_mut() {
                cell.resting = resting;
                cell.current = cell.frame_start();
            }
        }
    }

    pub fn reset_buffer(&mut self, handle: FgBufferHandle, resting: FgBufferUsage) {
        if let Some(tracked) = self.buffers.get_mut(handle) {
            let resting = resting.access_state();
            for segment in tracked.segments.iter_mut() {
                segment.resting = resting;
                segment.current = segment.frame_start();
            }
        }
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.buffers.clear();
    }
}

// 帧内记录
impl FgUsageTracker {
    /// mip 0 / layer 0 当前的使用方式
    #[inline]
    pub fn previous_image_usage(&self, handle: FgImageHandle) -> Option<FgImageUsage> {
        self.images.get(handle).map(|tracked| tracked.base().current)
    }

    #[inline]
    pub fn previous_buffer_usage(&self, handle: FgBufferHandle) -> Option<FgBufferUsage> {
        self.buffers.get(handle).map(|tracked| tracked.base().current)
    }

    /// `range` 内当前的使用方式，按相同使用方式合并为若干子范围
    pub fn image_usages(&self, handle: FgImageHandle, range: &FgImageRange) -> Option<Vec<(FgImageRange, FgImageUsage)>> {
        self.images.get(handle).map(|tracked| tracked.cells.partition(range, |cell| cell.current))
    }

    pub fn buffer_usages(
        &self,
        handle: FgBufferHandle,
        range: &FgBufferRange,
    ) -> Option<Vec<(FgBufferRange, FgBufferUsage)>> {
        self.buffers.get(handle).map(|tracked| tracked.segments.partition(range, |segment| segment.current))
    }

    /// 覆盖 `range` 内的当前使用方式，返回是否存在该资源
    pub fn record_image_usage(&mut self, handle: FgImageHandle, range: &FgImageRange, usage: FgImageUsage) -> bool {
        match self.images.get_mut(handle) {
            Some(tracked) => {
                let usage = usage.access_state();
                tracked.cells.update(range, |cell| cell.current = usage);
                true
            }
            None => false,
        }
    }

    pub fn record_buffer_usage(&mut self, handle: FgBufferHandle, range: &FgBufferRange, usage: FgBufferUsage) -> bool {
        match self.buffers.get_mut(handle) {
            Some(tracked) => {
                let usage = usage.access_state();
                tracked.segments.update(range, |segment| segment.current = usage);
                true
            }
            None => false,
        }
    }

    pub fn tracked_image(&self, handle: FgImageHandle) -> Option<&FgTrackedImage> {
        self.images.get(handle)
    }

    pub fn tracked_buffer(&self, handle: FgBufferHandle) -> Option<&FgTrackedBuffer> {
        self.buffers.get(handle)
    }

    /// 帧开始：所有子资源回到创建者声明的使用方式，其余子资源从 resting 开始
    pub fn begin_frame(&mut self) {
        for (_, tracked) in self.images.iter_mut() {
            tracked.begin_frame();
        }
        for (_, tracked) in self.buffers.iter_mut() {
            tracked.begin_frame();
        }
    }

    /// 帧结束：最后的使用方式成为下一帧的 resting 状态
    pub fn end_frame(&mut self) {
        for (_, tracked) in self.images.iter_mut() {
            for cell in tracked.cells.iter_mut() {
                cell.resting = cell.current;
            }
        }
        for (_, tracked) in self.buffers.iter_mut() {
            for segment in tracked.segments.iter_mut() {
                segment.resting = segment.current;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn image_handle() -> FgImageHandle {
        let mut keys: SlotMap<FgImageHandle, ()> = SlotMap::with_key();
        keys.insert(())
    }

    fn color(mips: u32) -> FgImageShape {
        FgImageShape::new(vk::ImageAspectFlags::COLOR, mips, 1)
    }

    #[test]
    fn test_record_overwrites_previous() {
        let handle = image_handle();
        let mut tracker = FgUsageTracker::new();
        let shape = color(1);
        tracker.seed_image(
            handle,
            shape,
            FgImageUsage::TRANSFER_DST,
            &shape.full_range(),
            FgImageUsage::UNDEFINED,
            false,
        );

        assert_eq!(tracker.previous_image_usage(handle), Some(FgImageUsage::TRANSFER_DST));
        assert!(tracker.record_image_usage(handle, &shape.full_range(), FgImageUsage::SHADER_READ_FRAGMENT));
        assert_eq!(tracker.previous_image_usage(handle), Some(FgImageUsage::SHADER_READ_FRAGMENT));
    }

    #[test]
    fn test_unknown_handle_not_tracked() {
        let mut keys: SlotMap<FgBufferHandle, ()> = SlotMap::with_key();
        let handle = keys.insert(());
        let mut tracker = FgUsageTracker::new();
        assert_eq!(tracker.previous_buffer_usage(handle), None);
        assert!(!tracker.record_buffer_usage(handle, &FgBufferRange::WHOLE, FgBufferUsage::TRANSFER_DST));
    }

    #[test]
    fn test_frame_carry_forward() {
        let handle = image_handle();
        let mut tracker = FgUsageTracker::new();
        let shape = color(1);
        let full = shape.full_range();
        tracker.seed_image(handle, shape, FgImageUsage::COLOR_ATTACHMENT_WRITE, &full, FgImageUsage::UNDEFINED, false);

        tracker.begin_frame();
        tracker.record_image_usage(handle, &full, FgImageUsage::SHADER_READ_FRAGMENT);
        tracker.end_frame();

        let tracked = tracker.tracked_image(handle).unwrap();
        assert_eq!(tracked.base().resting, FgImageUsage::SHADER_READ_FRAGMENT);

        tracker.begin_frame();
        assert_eq!(tracker.previous_image_usage(handle), Some(FgImageUsage::COLOR_ATTACHMENT_WRITE));

        tracker.reset_image(handle, FgImageUsage::UNDEFINED);
        assert_eq!(tracker.tracked_image(handle).unwrap().base().resting, FgImageUsage::UNDEFINED);
    }

    #[test]
    fn test_mips_tracked_independently() {
        let handle = image_handle();
        let mut tracker = FgUsageTracker::new();
        let shape = color(3);
        let full = shape.full_range();
        tracker.seed_image(handle, shape, FgImageUsage::TRANSFER_DST, &full, FgImageUsage::UNDEFINED, false);

        let mip1 = shape.resolve(&FgImageRange::mip(1)).unwrap();
        tracker.record_image_usage(handle, &mip1, FgImageUsage::TRANSFER_SRC.with_range(FgImageRange::mip(1)));

        let usages = tracker.image_usages(handle, &full).unwrap();
        let summary: Vec<_> = usages.iter().map(|(range, usage)| (range.base_mip_level, range.level_count, usage.access)).collect();
        assert_eq!(
            summary,
            vec![
                (0, 1, vk::AccessFlags2::TRANSFER_WRITE),
                (1, 1, vk::AccessFlags2::TRANSFER_READ),
                (2, 1, vk::AccessFlags2::TRANSFER_WRITE),
            ]
        );
        // 记录的状态不携带范围
        assert_eq!(usages[1].1, FgImageUsage::TRANSFER_SRC);
    }

    #[test]
    fn test_only_initial_range_reenters_each_frame() {
        let handle = image_handle();
        let mut tracker = FgUsageTracker::new();
        let shape = color(2);
        let mip0 = shape.resolve(&FgImageRange::mip(0)).unwrap();
        tracker.seed_image(handle, shape, FgImageUsage::COLOR_ATTACHMENT_WRITE, &mip0, FgImageUsage::UNDEFINED, true);

        let prologue = tracker.tracked_image(handle).unwrap().prologue();
        assert_eq!(prologue.len(), 1);
        assert_eq!(prologue[0].0, mip0);

        // mip 1 没有 initial，不保留内容时从 UNDEFINED 开始
        tracker.record_image_usage(handle, &shape.full_range(), FgImageUsage::SHADER_READ_FRAGMENT);
        tracker.end_frame();
        tracker.begin_frame();
        let usages = tracker.image_usages(handle, &shape.full_range()).unwrap();
        assert_eq!(usages[0].1, FgImageUsage::COLOR_ATTACHMENT_WRITE);
        assert_eq!(usages[1].1.finish_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(usages[1].1.stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);
    }

    #[test]
    fn test_buffer_ranges_tracked_independently() {
        let mut keys: SlotMap<FgBufferHandle, ()> = SlotMap::with_key();
        let handle = keys.insert(());
        let mut tracker = FgUsageTracker::new();
        tracker.seed_buffer(handle, FgBufferUsage::TRANSFER_DST, FgBufferUsage::UNDEFINED);

        let tail = FgBufferRange::new(512, vk::WHOLE_SIZE);
        tracker.record_buffer_usage(handle, &tail, FgBufferUsage::STORAGE_READ_COMPUTE);

        let usages = tracker.buffer_usages(handle, &FgBufferRange::new(256, 512)).unwrap();
        assert_eq!(
            usages,
            vec![
                (FgBufferRange::new(256, 256), FgBufferUsage::TRANSFER_DST),
                (FgBufferRange::new(512, 256), FgBufferUsage::STORAGE_READ_COMPUTE),
            ]
        );
    }
}
