//! 执行计划的调试输出

use ash::vk;
use itertools::Itertools;

use crate::barrier::FgBarrierBatch;
use crate::context::FgContext;
use crate::handle::{FgNodeHandle, FgResourceHandle};
use crate::registry::FgResourceRegistry;
use crate::subresource::{FgBufferRange, FgImageRange};
use crate::usage::FgUsage;

// 调试方法
impl FgContext {
    /// `node` 依赖的 (先执行的 node, 经由的资源)
    ///
    /// 只在 resolve 之后有内容；同一个 node 经由多个资源依赖时每个资源一项。
    pub fn node_dependencies(&self, node: FgNodeHandle) -> Vec<(FgNodeHandle, FgResourceHandle)> {
        let Some(graph) = &self.dependency_graph else {
            return Vec::new();
        };
        let Some(index) = self.node_order.iter().position(|h| *h == node) else {
            return Vec::new();
        };
        graph
            .edges()
            .iter()
            .filter(|edge| edge.consumer == index)
            .filter_map(|edge| self.node_order.get(edge.producer).map(|producer| (*producer, edge.resource)))
            .unique()
            .collect()
    }

    /// 打印执行计划
    ///
    /// 包括执行顺序、每个 node 持有的资源以及它之前提交的 barrier。
    pub fn print_execution_plan(&self) {
        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              Framegraph Execution Plan                           ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Nodes: {}  |  Execution Order: [{}]",
            self.execution_order.len(),
            self.execution_order.iter().map(|h| self.node_name(*h).unwrap_or("<unknown>")).join(" → ")
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        if self.resolver.prologue().has_barriers() {
            log::info!("");
            log::info!("┌─ Frame Prologue ────────────────────────────────────────────────┐");
            log_barriers(&self.registry, self.resolver.prologue());
            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        for (order, &handle) in self.execution_order.iter().enumerate() {
            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!(
                "│ [{}/{}] Node: \"{}\"",
                order + 1,
                self.execution_order.len(),
                self.node_name(handle).unwrap_or("<unknown>")
            );
            log::info!("├─────────────────────────────────────────────────────────────────┤");

            let created = self
                .registry
                .iter_images()
                .filter(|(_, r)| r.creator == Some(handle))
                .map(|(_, r)| {
                    let verb = if r.is_owned() { "creates" } else { "imports" };
                    format!("{} \"{}\" @ {:?}", verb, r.name, r.initial_usage.start_layout)
                })
                .chain(
                    self.registry
                        .iter_buffers()
                        .filter(|(_, r)| r.creator == Some(handle))
                        .map(|(_, r)| {
                            let verb = if r.is_owned() { "creates" } else { "imports" };
                            format!("{} \"{}\"", verb, r.name)
                        }),
                )
                .collect_vec();
            if !created.is_empty() {
                log::info!("│ Declares: {}", created.join(", "));
            }

            for (producer, resource) in self.node_dependencies(handle) {
                log::info!(
                    "│ Depends on: \"{}\" (\"{}\")",
                    self.node_name(producer).unwrap_or("<unknown>"),
                    self.registry.name_of(resource)
                );
            }

            for reference in self.references.iter().filter(|r| r.node == handle) {
                let name = self.registry.name_of(reference.handle);
                match reference.usage {
                    FgUsage::Image(usage) => log::info!(
                        "│   {} \"{}\"{} @ {:?} (stage: {}, access: {})",
                        if usage.is_write() { "✏️ " } else { "📖" },
                        name,
                        format_image_range(&usage.range),
                        usage.start_layout,
                        format_pipeline_stage(usage.stage),
                        format_access_flags(usage.access)
                    ),
                    FgUsage::Buffer(usage) => log::info!(
                        "│   {} \"{}\"{} (stage: {}, access: {})",
                        if usage.is_write() { "✏️ " } else { "📖" },
                        name,
                        format_buffer_range(&usage.range),
                        format_pipeline_stage(usage.stage),
                        format_access_flags(usage.access)
                    ),
                }
            }

            match self.resolver.node_barriers(handle) {
                Some(barriers) if barriers.has_barriers() => {
                    log::info!("├─────────────────────────────────────────────────────────────────┤");
                    log_barriers(&self.registry, barriers);
                }
                _ => log::info!("│ No barriers required"),
            }
            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        if self.resolver.epilogue().has_barriers() {
            log::info!("");
            log::info!("┌─ Frame Epilogue ────────────────────────────────────────────────┐");
            log_barriers(&self.registry, self.resolver.epilogue());
            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        log::info!("");
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }
}

fn log_barriers(registry: &FgResourceRegistry, barriers: &FgBarrierBatch) {
    log::info!(
        "│ Barriers: {} image, {} buffer",
        barriers.image_barriers.len(),
        barriers.buffer_barriers.len()
    );

    for barrier in &barriers.image_barriers {
        let layout_change = if barrier.has_layout_transition() {
            format!("{:?} → {:?}", barrier.old_layout, barrier.new_layout)
        } else {
            format!("{:?} (no layout change)", barrier.old_layout)
        };
        log::info!(
            "│   🔒 Image \"{}\"{}:",
            registry.name_of(FgResourceHandle::Image(barrier.handle)),
            format_image_range(&barrier.range)
        );
        log::info!("│       Layout: {}", layout_change);
        log::info!(
            "│       Stage:  {} → {}",
            format_pipeline_stage(barrier.src_stage),
            format_pipeline_stage(barrier.dst_stage)
        );
        log::info!(
            "│       Access: {} → {}",
            format_access_flags(barrier.src_access),
            format_access_flags(barrier.dst_access)
        );
    }

    for barrier in &barriers.buffer_barriers {
        log::info!(
            "│   🔒 Buffer \"{}\"{}:",
            registry.name_of(FgResourceHandle::Buffer(barrier.handle)),
            format_buffer_range(&barrier.range())
        );
        log::info!(
            "│       Stage:  {} → {}",
            format_pipeline_stage(barrier.src_stage),
            format_pipeline_stage(barrier.dst_stage)
        );
        log::info!(
            "│       Access: {} → {}",
            format_access_flags(barrier.src_access),
            format_access_flags(barrier.dst_access)
        );
    }
}

const STAGE_NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
    (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
    (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
    (vk::PipelineStageFlags2::DRAW_INDIRECT, "DRAW_INDIRECT"),
    (vk::PipelineStageFlags2::VERTEX_INPUT, "VERTEX_INPUT"),
    (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
    (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
    (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
    (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
    (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
    (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
    (vk::PipelineStageFlags2::TRANSFER, "TRANSFER"),
    (vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR, "RAY_TRACING_SHADER"),
    (vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR, "ACCEL_STRUCT_BUILD"),
    (vk::PipelineStageFlags2::ALL_GRAPHICS, "ALL_GRAPHICS"),
    (vk::PipelineStageFlags2::ALL_COMMANDS, "ALL_COMMANDS"),
];

const ACCESS_NAMES: &[(vk::AccessFlags2, &str)] = &[
    (vk::AccessFlags2::INDIRECT_COMMAND_READ, "INDIRECT_CMD_READ"),
    (vk::AccessFlags2::INDEX_READ, "INDEX_READ"),
    (vk::AccessFlags2::VERTEX_ATTRIBUTE_READ, "VERTEX_ATTR_READ"),
    (vk::AccessFlags2::UNIFORM_READ, "UNIFORM_READ"),
    (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
    (vk::AccessFlags2::SHADER_STORAGE_READ, "STORAGE_READ"),
    (vk::AccessFlags2::SHADER_STORAGE_WRITE, "STORAGE_WRITE"),
    (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACH_READ"),
    (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACH_WRITE"),
    (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_ATTACH_READ"),
    (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_ATTACH_WRITE"),
    (vk::AccessFlags2::TRANSFER_READ, "TRANSFER_READ"),
    (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
    (vk::AccessFlags2::MEMORY_READ, "MEMORY_READ"),
    (vk::AccessFlags2::MEMORY_WRITE, "MEMORY_WRITE"),
    (vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR, "ACCEL_STRUCT_READ"),
    (vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR, "ACCEL_STRUCT_WRITE"),
];

/// 整个图像时为空串，否则形如 ` [mip 1+2, layer 0+*]`
fn format_image_range(range: &FgImageRange) -> String {
    let count = |count: u32, remaining: u32| {
        if count == remaining { "*".to_string() } else { count.to_string() }
    };
    if range.base_mip_level == 0
        && range.level_count == vk::REMAINING_MIP_LEVELS
        && range.base_array_layer == 0
        && range.layer_count == vk::REMAINING_ARRAY_LAYERS
    {
        return String::new();
    }
    format!(
        " [mip {}+{}, layer {}+{}]",
        range.base_mip_level,
        count(range.level_count, vk::REMAINING_MIP_LEVELS),
        range.base_array_layer,
        count(range.layer_count, vk::REMAINING_ARRAY_LAYERS)
    )
}

fn format_buffer_range(range: &FgBufferRange) -> String {
    if *range == FgBufferRange::WHOLE {
        String::new()
    } else if range.size == vk::WHOLE_SIZE {
        format!(" [{}..]", range.offset)
    } else {
        format!(" [{}..{}]", range.offset, range.end())
    }
}

/// 格式化 PipelineStageFlags2 为可读字符串
pub fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
    let names = STAGE_NAMES.iter().filter(|(flag, _)| stage.contains(*flag)).map(|(_, name)| *name).collect_vec();
    if names.is_empty() { format!("{:?}", stage) } else { names.join(" | ") }
}

/// 格式化 AccessFlags2 为可读字符串
pub fn format_access_flags(access: vk::AccessFlags2) -> String {
    if access == vk::AccessFlags2::NONE {
        return "NONE".to_string();
    }
    let names = ACCESS_NAMES.iter().filter(|(flag, _)| access.contains(*flag)).map(|(_, name)| *name).collect_vec();
    if names.is_empty() { format!("{:?}", access) } else { names.join(" | ") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{FgBufferDesc, FgImageDesc};
    use crate::settings::FgSettings;
    use crate::test_utils::{MockAllocator, MockRecorder, TestNode, new_log, test_extent};
    use crate::usage::{FgBufferUsage, FgImageUsage};

    #[test]
    fn test_plan_logged_on_resolve() {
        truvis_crate_tools::init_log::init_test_log();
        let log = new_log();
        let settings = FgSettings {
            log_execution_plan: true,
            ..Default::default()
        };
        let mut ctx = FgContext::new(settings, test_extent());
        let mut allocator = MockAllocator::default();
        ctx.import_image(
            "swapchain",
            MockAllocator::external_image(1, vk::Format::B8G8R8A8_SRGB),
            FgImageUsage::UNDEFINED,
        )
        .unwrap();
        ctx.add_node(
            TestNode::new("cull", &log)
                .create_buffer("draws", FgBufferDesc::new(4096), FgBufferUsage::STORAGE_READ_WRITE_COMPUTE),
        )
        .unwrap();
        ctx.add_node(
            TestNode::new("draw", &log)
                .reference_buffer("draws", FgBufferUsage::INDIRECT_BUFFER)
                .create_image(
                    "color",
                    FgImageDesc::target_sized(vk::Format::R8G8B8A8_UNORM),
                    FgImageUsage::COLOR_ATTACHMENT_WRITE,
                ),
        )
        .unwrap();
        ctx.add_node(
            TestNode::new("blit", &log)
                .reference_image("color", FgImageUsage::TRANSFER_SRC)
                .reference_image("swapchain", FgImageUsage::TRANSFER_DST),
        )
        .unwrap();
        ctx.export_image("swapchain", FgImageUsage::PRESENT).unwrap();

        ctx.build(&mut allocator).unwrap();
        ctx.resolve().unwrap();
        assert_eq!(ctx.epilogue_barriers().len(), 1);
        ctx.record_frame(&mut MockRecorder::default(), 0).unwrap();
        ctx.destroy(&mut allocator);
    }

    #[test]
    fn test_format_stage_lists_each_bit() {
        let stage = vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;
        assert_eq!(format_pipeline_stage(stage), "EARLY_FRAGMENT_TESTS | LATE_FRAGMENT_TESTS");
        assert_eq!(format_pipeline_stage(vk::PipelineStageFlags2::TRANSFER), "TRANSFER");
    }

    #[test]
    fn test_format_access_none() {
        assert_eq!(format_access_flags(vk::AccessFlags2::NONE), "NONE");
        assert_eq!(
            format_access_flags(vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE),
            "STORAGE_READ | STORAGE_WRITE"
        );
    }

    #[test]
    fn test_node_dependencies_follow_resolved_edges() {
        let log = new_log();
        let mut ctx = FgContext::new(FgSettings::default(), test_extent());
        let mut allocator = MockAllocator::default();
        let gbuffer = ctx
            .add_node(TestNode::new("gbuffer", &log).create_image(
                "albedo",
                FgImageDesc::target_sized(vk::Format::R8G8B8A8_UNORM),
                FgImageUsage::COLOR_ATTACHMENT_WRITE,
            ))
            .unwrap();
        let lighting = ctx
            .add_node(
                TestNode::new("lighting", &log)
                    .reference_image("albedo", FgImageUsage::SHADER_READ_FRAGMENT)
                    .import_image(
                        "history",
                        MockAllocator::external_image(7, vk::Format::R16G16B16A16_SFLOAT),
                        FgImageUsage::SHADER_READ_FRAGMENT,
                    ),
            )
            .unwrap();
        let taa = ctx
            .add_node(
                TestNode::new("taa", &log)
                    .reference_image("history", FgImageUsage::COLOR_ATTACHMENT_WRITE)
                    .reference_image("albedo", FgImageUsage::SHADER_READ_FRAGMENT),
            )
            .unwrap();

        ctx.build(&mut allocator).unwrap();
        assert!(ctx.node_dependencies(taa).is_empty());
        ctx.resolve().unwrap();

        let albedo = FgResourceHandle::Image(ctx.registry().image_handle("albedo").unwrap());
        let history = FgResourceHandle::Image(ctx.registry().image_handle("history").unwrap());
        assert!(ctx.node_dependencies(gbuffer).is_empty());
        assert_eq!(ctx.node_dependencies(lighting), vec![(gbuffer, albedo)]);
        let taa_deps = ctx.node_dependencies(taa);
        assert_eq!(taa_deps.len(), 2);
        assert!(taa_deps.contains(&(lighting, history)));
        assert!(taa_deps.contains(&(lighting, albedo)));

        ctx.print_execution_plan();
        ctx.destroy(&mut allocator);
    }

    #[test]
    fn test_range_formatting() {
        assert_eq!(format_image_range(&FgImageRange::ALL), "");
        assert_eq!(format_image_range(&FgImageRange::mip(2)), " [mip 2+1, layer 0+*]");
        assert_eq!(format_buffer_range(&FgBufferRange::WHOLE), "");
        assert_eq!(format_buffer_range(&FgBufferRange::new(256, 64)), " [256..320]");
    }
}
