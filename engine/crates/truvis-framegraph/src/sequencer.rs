//! 执行顺序解析与逐帧录制

use std::collections::HashMap;

use itertools::Itertools;

use crate::backend::FgCommandRecorder;
use crate::barrier::{FgBarrierBatch, FgVkBarrierBatch};
use crate::context::{FgContext, FgState};
use crate::error::{FgError, FgResult};
use crate::graph::FgDependencyGraph;
use crate::handle::{FgNodeHandle, FgResourceHandle};
use crate::node::FgRecordContext;

/// node debug label 的颜色
pub const NODE_LABEL_COLOR: glam::Vec4 = glam::vec4(0.2, 0.6, 0.9, 1.0);

// resolve
impl FgContext {
    /// 计算执行顺序和每个 node 的 barrier
    ///
    /// 同一个资源的使用者按 "创建者 -> 声明顺序中的引用者" 串成依赖链，
    /// 拓扑排序时没有依赖关系的 node 保持插入顺序。
    pub fn resolve(&mut self) -> FgResult<()> {
        let _span = crate::profile_span!("FgContext::resolve");
        match self.state {
            FgState::Resolved => return Ok(()),
            FgState::ResourcesDeclared => {}
            state => return Err(FgError::InvalidState { op: "resolve", state }),
        }

        if let Err(e) = self.resolve_inner() {
            log::error!("framegraph resolve failed: {}", e);
            self.resolver.clear();
            self.execution_order.clear();
            self.dependency_graph = None;
            return Err(e);
        }

        self.state = FgState::Resolved;
        if self.settings.log_execution_plan {
            self.print_execution_plan();
        }
        Ok(())
    }

    fn resolve_inner(&mut self) -> FgResult<()> {
        let (order, graph) = self.sort_nodes()?;
        self.execution_order = order;
        self.dependency_graph = Some(graph);

        self.exports = self
            .export_requests
            .iter()
            .map(|(name, usage)| self.registry.image_handle(name).map(|handle| (handle, *usage)))
            .collect::<FgResult<Vec<_>>>()?;

        self.resolver.set_skip_redundant(self.settings.skip_redundant_barriers);
        self.resolver.begin_frame(&self.registry, &mut self.tracker);
        for &node in &self.execution_order {
            for reference in self.references.iter().filter(|r| r.node == node) {
                self.resolver.declare_reference_by_handle(
                    &self.registry,
                    &mut self.tracker,
                    node,
                    reference.handle,
                    reference.usage,
                )?;
            }
        }
        self.resolver.finish_frame(&self.registry, &mut self.tracker, &self.exports)?;

        log::debug!(
            "framegraph resolved: {} node barriers, {} prologue, {} epilogue",
            self.resolver.barrier_count(),
            self.resolver.prologue().len(),
            self.resolver.epilogue().len()
        );
        Ok(())
    }

    fn sort_nodes(&self) -> FgResult<(Vec<FgNodeHandle>, FgDependencyGraph)> {
        let index_of: HashMap<FgNodeHandle, usize> =
            self.node_order.iter().enumerate().map(|(index, handle)| (*handle, index)).collect();

        // 每个资源的使用链：创建者（或导入者）在前，引用者按声明顺序；同一 node 只保留第一次出现
        let mut chains: HashMap<FgResourceHandle, Vec<usize>> = HashMap::new();
        for (handle, resource) in self.registry.iter_images() {
            if let Some(index) = resource.creator.and_then(|c| index_of.get(&c)) {
                chains.entry(handle.into()).or_default().push(*index);
            }
        }
        for (handle, resource) in self.registry.iter_buffers() {
            if let Some(index) = resource.creator.and_then(|c| index_of.get(&c)) {
                chains.entry(handle.into()).or_default().push(*index);
            }
        }
        for reference in &self.references {
            if let Some(index) = index_of.get(&reference.node) {
                let chain = chains.entry(reference.handle).or_default();
                if !chain.contains(index) {
                    chain.push(*index);
                }
            }
        }

        let graph = FgDependencyGraph::from_chains(
            self.node_order.len(),
            chains.iter().map(|(handle, chain)| (*handle, chain.as_slice())),
        );
        let order = graph.topological_sort().map_err(|remaining| {
            let names = remaining
                .iter()
                .map(|&index| self.node_name(self.node_order[index]).unwrap_or("<unknown>").to_string())
                .collect_vec();
            log::error!("cyclic dependency between nodes: [{}]", names.iter().join(", "));
            FgError::CyclicDependency(names)
        })?;

        Ok((order.into_iter().map(|index| self.node_order[index]).collect(), graph))
    }

    /// 放弃已经解析但没有录制的帧，资源状态保持不变
    pub fn abandon(&mut self) -> FgResult<()> {
        self.ensure_state("abandon", &[FgState::Resolved, FgState::ResourcesDeclared])?;
        self.resolver.clear();
        self.tracker.begin_frame();
        self.state = FgState::ResourcesDeclared;
        Ok(())
    }
}

// record
impl FgContext {
    /// 录制一帧
    ///
    /// 顺序：帧开始 barrier，然后每个 node 的 barrier（一次提交）+ 命令，最后是导出资源的转换。
    /// 还没有解析时会先解析；物理资源全部检查完之后才会向 `recorder` 写入任何内容。
    pub fn record_frame(&mut self, recorder: &mut dyn FgCommandRecorder, frame_index: usize) -> FgResult<()> {
        let _span = crate::profile_span!("FgContext::record_frame");
        if self.state == FgState::ResourcesDeclared {
            self.resolve()?;
        }
        self.ensure_state("record_frame", &[FgState::Resolved])?;

        let prologue = self.resolver.prologue().to_vk(&self.registry)?;
        let node_batches = self
            .execution_order
            .iter()
            .map(|handle| self.resolver.node_barriers(*handle).map(|batch| batch.to_vk(&self.registry)).transpose())
            .collect::<FgResult<Vec<Option<FgVkBarrierBatch>>>>()?;
        let epilogue = self.resolver.epilogue().to_vk(&self.registry)?;

        self.state = FgState::Recording;
        if !prologue.is_empty() {
            recorder.pipeline_barrier(&prologue);
        }

        let empty_batch = FgBarrierBatch::new();
        for (handle, vk_batch) in self.execution_order.iter().zip(node_batches.iter()) {
            let Some(node) = self.nodes.get_mut(*handle) else {
                continue;
            };
            if let Some(vk_batch) = vk_batch {
                if !vk_batch.is_empty() {
                    recorder.pipeline_barrier(vk_batch);
                }
            }

            if self.settings.debug_labels {
                recorder.begin_label(node.name(), NODE_LABEL_COLOR);
            }
            {
                let _node_span = crate::profile_span!("FgNode::record_commands");
                let mut ctx = FgRecordContext {
                    recorder: &mut *recorder,
                    registry: &self.registry,
                    views: &self.image_views,
                    barriers: self.resolver.node_barriers(*handle).unwrap_or(&empty_batch),
                    frame_index,
                    node: *handle,
                };
                node.record_commands(&mut ctx);
            }
            if self.settings.debug_labels {
                recorder.end_label();
            }
        }

        if !epilogue.is_empty() {
            recorder.pipeline_barrier(&epilogue);
        }
        self.state = FgState::Recorded;

        // 本帧最后的使用方式成为下一帧的起点
        self.tracker.end_frame();
        self.resolver.clear();
        self.frame_count += 1;
        self.state = FgState::ResourcesDeclared;
        log::trace!("frame {} recorded", frame_index);
        Ok(())
    }
}
