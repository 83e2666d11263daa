//! Framegraph 错误类型
//!
//! 配置错误（重名、引用未声明资源、阶段错误、循环依赖）都是 node 编写错误，
//! 会让当前 build 直接失败；只有显存分配失败属于可恢复错误。

use std::fmt;

use ash::vk;

use crate::context::FgState;

/// 资源类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FgResourceKind {
    Image,
    Buffer,
}

impl fmt::Display for FgResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FgResourceKind::Image => write!(f, "image"),
            FgResourceKind::Buffer => write!(f, "buffer"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FgError {
    #[error("resource \"{0}\" is already declared in this framegraph")]
    DuplicateResource(String),

    #[error("resource \"{0}\" was never created or imported")]
    ResourceNotFound(String),

    #[error("resource \"{name}\" is a {actual}, expected a {expected}")]
    ResourceKindMismatch {
        name: String,
        expected: FgResourceKind,
        actual: FgResourceKind,
    },

    #[error("node \"{node}\" holds overlapping parts of resource \"{name}\" more than once")]
    DuplicateReference { node: String, name: String },

    #[error("subresource range {range} is outside of resource \"{name}\"")]
    SubresourceOutOfRange { name: String, range: String },

    #[error("cyclic resource dependency between nodes: [{}]", .0.join(", "))]
    CyclicDependency(Vec<String>),

    #[error("{op} is not allowed while the framegraph is {state:?}")]
    InvalidState { op: &'static str, state: FgState },

    #[error("node handle is stale or does not belong to this framegraph")]
    NodeNotFound,

    #[error("resource \"{0}\" has no tracked usage")]
    UsageNotTracked(String),

    #[error("resource \"{0}\" is owned by the framegraph and cannot be rebound")]
    NotImported(String),

    #[error("resource \"{0}\" has no physical backing")]
    ResourceNotBacked(String),

    #[error("resource \"{name}\" was allocated without usage flags {missing}")]
    MissingUsageFlags { name: String, missing: String },

    #[error("size of buffer \"{name}\" overflows for a {width}x{height} target")]
    BufferSizeOverflow { name: String, width: u32, height: u32 },

    #[error("node has no image view #{index} of \"{name}\"")]
    ImageViewNotFound { name: String, index: usize },

    #[error("failed to allocate \"{name}\": {result}")]
    Allocation { name: String, result: vk::Result },
}

impl FgError {
    /// 调用方可以选择重试的错误（显存耗尽），其余错误均表示 framegraph 配置有误
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FgError::Allocation { .. })
    }
}

pub type FgResult<T> = Result<T, FgError>;
