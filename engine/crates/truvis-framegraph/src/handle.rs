use slotmap::new_key_type;

use crate::error::FgResourceKind;

new_key_type! {
    /// Framegraph 内部的 Image Key，资源重建后旧 key 自动失效
    pub struct FgImageHandle;
    /// Framegraph 内部的 Buffer Key
    pub struct FgBufferHandle;
    /// Node Key
    pub struct FgNodeHandle;
}

/// 资源名 intern 之后的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FgResourceHandle {
    Image(FgImageHandle),
    Buffer(FgBufferHandle),
}

impl FgResourceHandle {
    #[inline]
    pub fn kind(&self) -> FgResourceKind {
        match self {
            FgResourceHandle::Image(_) => FgResourceKind::Image,
            FgResourceHandle::Buffer(_) => FgResourceKind::Buffer,
        }
    }
}

impl From<FgImageHandle> for FgResourceHandle {
    fn from(handle: FgImageHandle) -> Self {
        FgResourceHandle::Image(handle)
    }
}

impl From<FgBufferHandle> for FgResourceHandle {
    fn from(handle: FgBufferHandle) -> Self {
        FgResourceHandle::Buffer(handle)
    }
}
