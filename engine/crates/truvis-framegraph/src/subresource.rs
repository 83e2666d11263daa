//! 子资源范围
//!
//! 图像按 aspect × mip × layer 划分，缓冲区按字节区间划分。
//! 同一个 node 可以对同一资源的不同子范围声明不同的使用方式（例如读 mip N-1、写 mip N），
//! 解析时按子资源跟踪状态，barrier 只覆盖真正发生变化的部分。

use ash::vk;

/// 会被拆分跟踪的 aspect
const TRACKED_ASPECTS: [vk::ImageAspectFlags; 3] =
    [vk::ImageAspectFlags::COLOR, vk::ImageAspectFlags::DEPTH, vk::ImageAspectFlags::STENCIL];

/// 图像子资源范围
///
/// 声明时 `aspect` 可以为空（使用图像格式的全部 aspect），count 可以是
/// `REMAINING_MIP_LEVELS` / `REMAINING_ARRAY_LAYERS`；经过 [`FgImageShape::resolve`]
/// 之后所有字段都是具体值。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FgImageRange {
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl Default for FgImageRange {
    fn default() -> Self {
        Self::ALL
    }
}

impl FgImageRange {
    /// 整个图像
    pub const ALL: Self = Self {
        aspect: vk::ImageAspectFlags::empty(),
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    };

    /// 单个 mip 的所有 layer
    #[inline]
    pub const fn mip(level: u32) -> Self {
        Self::mips(level, 1)
    }

    #[inline]
    pub const fn mips(base_mip_level: u32, level_count: u32) -> Self {
        Self {
            aspect: vk::ImageAspectFlags::empty(),
            base_mip_level,
            level_count,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }

    /// 单个 layer 的所有 mip
    #[inline]
    pub const fn layer(layer: u32) -> Self {
        Self::ALL.with_layers(layer, 1)
    }

    #[inline]
    pub const fn with_layers(mut self, base_array_layer: u32, layer_count: u32) -> Self {
        self.base_array_layer = base_array_layer;
        self.layer_count = layer_count;
        self
    }

    #[inline]
    pub const fn with_aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }

    /// 两个已经 resolve 的范围是否有公共子资源
    pub fn overlaps(&self, other: &FgImageRange) -> bool {
        self.aspect.intersects(other.aspect)
            && spans_overlap(self.base_mip_level, self.level_count, other.base_mip_level, other.level_count)
            && spans_overlap(self.base_array_layer, self.layer_count, other.base_array_layer, other.layer_count)
    }

    /// 只对 resolve 之后的范围有意义
    pub fn to_vk(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: self.base_mip_level,
            level_count: self.level_count,
            base_array_layer: self.base_array_layer,
            layer_count: self.layer_count,
        }
    }

    #[inline]
    fn mip_end(&self) -> u32 {
        self.base_mip_level + self.level_count
    }

    #[inline]
    fn layer_end(&self) -> u32 {
        self.base_array_layer + self.layer_count
    }
}

#[inline]
fn spans_overlap(a_base: u32, a_count: u32, b_base: u32, b_count: u32) -> bool {
    let (a_base, a_count, b_base, b_count) = (a_base as u64, a_count as u64, b_base as u64, b_count as u64);
    a_base < b_base + b_count && b_base < a_base + a_count
}

/// 图像的子资源结构
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FgImageShape {
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
}

impl FgImageShape {
    pub fn new(aspect: vk::ImageAspectFlags, mip_levels: u32, array_layers: u32) -> Self {
        Self {
            aspect,
            mip_levels: mip_levels.max(1),
            array_layers: array_layers.max(1),
        }
    }

    pub fn full_range(&self) -> FgImageRange {
        FgImageRange {
            aspect: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }

    /// 把声明的范围变成具体范围，超出图像或为空时返回 None
    pub fn resolve(&self, range: &FgImageRange) -> Option<FgImageRange> {
        let aspect = if range.aspect.is_empty() {
            self.aspect
        } else {
            range.aspect
        };
        if !self.aspect.contains(aspect) {
            return None;
        }
        let (base_mip_level, level_count) =
            resolve_span(range.base_mip_level, range.level_count, vk::REMAINING_MIP_LEVELS, self.mip_levels)?;
        let (base_array_layer, layer_count) =
            resolve_span(range.base_array_layer, range.layer_count, vk::REMAINING_ARRAY_LAYERS, self.array_layers)?;
        Some(FgImageRange {
            aspect,
            base_mip_level,
            level_count,
            base_array_layer,
            layer_count,
        })
    }

    fn aspect_bits(&self) -> impl Iterator<Item = vk::ImageAspectFlags> + '_ {
        TRACKED_ASPECTS.into_iter().filter(|bit| self.aspect.contains(*bit))
    }
}

fn resolve_span(base: u32, count: u32, remaining: u32, total: u32) -> Option<(u32, u32)> {
    if base >= total {
        return None;
    }
    let count = if count == remaining { total - base } else { count };
    if count == 0 || base.checked_add(count)? > total {
        return None;
    }
    Some((base, count))
}

/// 逐子资源存储的图像状态
///
/// 按 (aspect, mip, layer) 展开为一维数组，查询时把值相同的子资源合并为矩形范围。
#[derive(Clone, Debug)]
pub struct FgImageCells<T> {
    shape: FgImageShape,
    aspects: Vec<vk::ImageAspectFlags>,
    cells: Vec<T>,
}

impl<T: Clone> FgImageCells<T> {
    pub fn new(shape: FgImageShape, value: T) -> Self {
        let mut aspects: Vec<_> = shape.aspect_bits().collect();
        if aspects.is_empty() {
            // 未知格式按单一 aspect 跟踪
            aspects.push(shape.aspect);
        }
        let count = aspects.len() * shape.mip_levels as usize * shape.array_layers as usize;
        Self {
            shape,
            aspects,
            cells: vec![value; count],
        }
    }
}

impl<T> FgImageCells<T> {
    #[inline]
    pub fn shape(&self) -> FgImageShape {
        self.shape
    }

    /// 第一个 aspect、mip 0、layer 0
    #[inline]
    pub fn base(&self) -> &T {
        &self.cells[0]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.cells.iter_mut()
    }

    #[inline]
    fn index(&self, aspect_index: usize, mip: u32, layer: u32) -> usize {
        (aspect_index * self.shape.mip_levels as usize + mip as usize) * self.shape.array_layers as usize
            + layer as usize
    }

    fn aspect_indices(&self, mask: vk::ImageAspectFlags) -> Vec<(usize, vk::ImageAspectFlags)> {
        self.aspects.iter().copied().enumerate().filter(|(_, aspect)| mask.intersects(*aspect)).collect()
    }

    /// 对 `range` 内的每一个子资源调用 `f`
    pub fn update(&mut self, range: &FgImageRange, mut f: impl FnMut(&mut T)) {
        for (aspect_index, _) in self.aspect_indices(range.aspect) {
            for mip in range.base_mip_level..range.mip_end() {
                for layer in range.base_array_layer..range.layer_end() {
                    let index = self.index(aspect_index, mip, layer);
                    f(&mut self.cells[index]);
                }
            }
        }
    }

    /// 把 `range` 划分为 `key` 相同的矩形块
    ///
    /// 先在每个 mip 内合并连续的 layer，再把相同 layer 区间的相邻 mip 合并，最后合并只差 aspect 的块。
    pub fn partition<K: PartialEq>(&self, range: &FgImageRange, key: impl Fn(&T) -> K) -> Vec<(FgImageRange, K)> {
        let mut blocks: Vec<(FgImageRange, K)> = Vec::new();

        for (aspect_index, aspect) in self.aspect_indices(range.aspect) {
            // 还能继续向下一个 mip 延伸的块
            let mut open: Vec<(FgImageRange, K)> = Vec::new();
            for mip in range.base_mip_level..range.mip_end() {
                let mut runs: Vec<(u32, u32, K)> = Vec::new();
                for layer in range.base_array_layer..range.layer_end() {
                    let value = key(&self.cells[self.index(aspect_index, mip, layer)]);
                    match runs.last_mut() {
                        Some((_, count, last)) if *last == value => *count += 1,
                        _ => runs.push((layer, 1, value)),
                    }
                }

                let mut next_open = Vec::with_capacity(runs.len());
                for (base_array_layer, layer_count, value) in runs {
                    let extendable = open.iter().position(|(block, block_key)| {
                        block.base_array_layer == base_array_layer
                            && block.layer_count == layer_count
                            && *block_key == value
                    });
                    match extendable {
                        Some(position) => {
                            let (mut block, block_key) = open.swap_remove(position);
                            block.level_count += 1;
                            next_open.push((block, block_key));
                        }
                        None => next_open.push((
                            FgImageRange {
                                aspect,
                                base_mip_level: mip,
                                level_count: 1,
                                base_array_layer,
                                layer_count,
                            },
                            value,
                        )),
                    }
                }
                blocks.append(&mut open);
                open = next_open;
            }
            blocks.append(&mut open);
        }

        let mut merged: Vec<(FgImageRange, K)> = Vec::with_capacity(blocks.len());
        for (block, value) in blocks {
            let same_area = merged.iter_mut().find(|(m, m_key)| {
                m.base_mip_level == block.base_mip_level
                    && m.level_count == block.level_count
                    && m.base_array_layer == block.base_array_layer
                    && m.layer_count == block.layer_count
                    && *m_key == value
            });
            match same_area {
                Some((m, _)) => m.aspect |= block.aspect,
                None => merged.push((block, value)),
            }
        }
        merged.sort_by_key(|(block, _)| (block.base_mip_level, block.base_array_layer, block.aspect.as_raw()));
        merged
    }
}

/// 缓冲区字节区间
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FgBufferRange {
    pub offset: vk::DeviceSize,
    /// `WHOLE_SIZE` 表示到缓冲区末尾
    pub size: vk::DeviceSize,
}

impl Default for FgBufferRange {
    fn default() -> Self {
        Self::WHOLE
    }
}

impl FgBufferRange {
    pub const WHOLE: Self = Self {
        offset: 0,
        size: vk::WHOLE_SIZE,
    };

    #[inline]
    pub const fn new(offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        Self { offset, size }
    }

    /// 不含的结束位置，`WHOLE_SIZE` 对应 `u64::MAX`
    #[inline]
    pub fn end(&self) -> u64 {
        if self.size == vk::WHOLE_SIZE {
            u64::MAX
        } else {
            self.offset.saturating_add(self.size)
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0 || self.offset >= self.end()
    }

    pub fn overlaps(&self, other: &FgBufferRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.offset < other.end() && other.offset < self.end()
    }

    fn from_bounds(offset: u64, end: u64) -> Self {
        let size = if end == u64::MAX { vk::WHOLE_SIZE } else { end - offset };
        Self { offset, size }
    }
}

/// 按字节区间分段存储的缓冲区状态，覆盖 `[0, u64::MAX)`
#[derive(Clone, Debug)]
pub struct FgBufferSegments<T> {
    /// (起始位置, 值)，每段到下一段起点为止
    segments: Vec<(u64, T)>,
}

impl<T: Clone + PartialEq> FgBufferSegments<T> {
    pub fn new(value: T) -> Self {
        Self {
            segments: vec![(0, value)],
        }
    }

    #[inline]
    pub fn base(&self) -> &T {
        &self.segments[0].1
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.segments.iter_mut().map(|(_, value)| value)
    }

    fn split_at(&mut self, at: u64) {
        if at == 0 || at == u64::MAX {
            return;
        }
        let position = self.segments.partition_point(|(start, _)| *start <= at);
        // position >= 1，因为第一段从 0 开始
        let (start, value) = &self.segments[position - 1];
        if *start != at {
            let value = value.clone();
            self.segments.insert(position, (at, value));
        }
    }

    /// 对 `range` 覆盖的每一段调用 `f`，之后合并相邻的相同段
    pub fn update(&mut self, range: &FgBufferRange, mut f: impl FnMut(&mut T)) {
        if range.is_empty() {
            return;
        }
        let end = range.end();
        self.split_at(range.offset);
        self.split_at(end);
        for (start, value) in self.segments.iter_mut() {
            if *start >= range.offset && *start < end {
                f(value);
            }
        }
        self.segments.dedup_by(|later, earlier| later.1 == earlier.1);
    }

    /// 把 `range` 划分为 `key` 相同的连续区间
    pub fn partition<K: PartialEq>(&self, range: &FgBufferRange, key: impl Fn(&T) -> K) -> Vec<(FgBufferRange, K)> {
        let mut parts: Vec<(u64, u64, K)> = Vec::new();
        if range.is_empty() {
            return Vec::new();
        }
        let end = range.end();
        for (index, (start, value)) in self.segments.iter().enumerate() {
            let segment_end = self.segments.get(index + 1).map_or(u64::MAX, |(next, _)| *next);
            let lo = (*start).max(range.offset);
            let hi = segment_end.min(end);
            if lo >= hi {
                continue;
            }
            let value = key(value);
            match parts.last_mut() {
                Some((_, last_end, last)) if *last_end == lo && *last == value => *last_end = hi,
                _ => parts.push((lo, hi, value)),
            }
        }
        parts.into_iter().map(|(lo, hi, value)| (FgBufferRange::from_bounds(lo, hi), value)).collect()
    }
}

/// 一个 node 持有的子资源，用来检查同一 node 的访问是否重叠
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FgSubresource {
    Image(FgImageRange),
    Buffer(FgBufferRange),
}

impl FgSubresource {
    pub fn overlaps(&self, other: &FgSubresource) -> bool {
        match (self, other) {
            (FgSubresource::Image(a), FgSubresource::Image(b)) => a.overlaps(b),
            (FgSubresource::Buffer(a), FgSubresource::Buffer(b)) => a.overlaps(b),
            _ => false,
        }
    }
}
