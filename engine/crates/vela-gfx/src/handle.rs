//! 渲染句柄
//!
//! - `RenderHandle`: 可拷贝的轻量句柄，内部为 slotmap 的 (index, version) 加上类型和所属管理器 id
//! - `RenderHandleReference`: 带原子引用计数的句柄，最后一个引用被 drop 时，
//!   句柄会被投递到所属管理器的释放队列，由管理器在帧边界统一处理

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::Sender;
use slotmap::KeyData;

/// 句柄指向的资源类型
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderHandleType {
    #[default]
    Undefined = 0,
    GpuBuffer,
    GpuImage,
    GpuSampler,
    GpuAccelerationStructure,
    DescriptorSet,
    Shader,
    Pipeline,
}

/// 轻量、可拷贝的资源句柄
///
/// `owner` 为发放该句柄的管理器 id，句柄只在该管理器中有效。
/// 默认值为无效句柄。
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RenderHandle {
    key: u64,
    owner: u32,
    kind: RenderHandleType,
}
impl RenderHandle {
    pub const INVALID: Self = Self {
        key: 0,
        owner: 0,
        kind: RenderHandleType::Undefined,
    };

    #[inline]
    pub fn new(kind: RenderHandleType, owner: u32, key: KeyData) -> Self {
        Self {
            key: key.as_ffi(),
            owner,
            kind,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.kind != RenderHandleType::Undefined
    }

    #[inline]
    pub fn kind(&self) -> RenderHandleType {
        self.kind
    }

    #[inline]
    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// slotmap 的 key，用于在所属管理器的 pool 中查找
    #[inline]
    pub fn key_data(&self) -> KeyData {
        KeyData::from_ffi(self.key)
    }

    /// slot 的 index（低 32 位）
    #[inline]
    pub fn index(&self) -> u32 {
        (self.key & 0xffff_ffff) as u32
    }

    /// slot 的 generation（高 32 位）
    #[inline]
    pub fn generation(&self) -> u32 {
        (self.key >> 32) as u32
    }
}
impl fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "RenderHandle(invalid)");
        }
        write!(f, "{:?}({}v{}@{})", self.kind, self.index(), self.generation(), self.owner)
    }
}

/// 为每个管理器实例分配唯一 id，0 保留给无效句柄
pub fn next_owner_id() -> u32 {
    static NEXT_OWNER: AtomicU32 = AtomicU32::new(1);
    NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
}

struct HandleCounter {
    handle: RenderHandle,
    release: Option<Sender<RenderHandle>>,
}
impl Drop for HandleCounter {
    fn drop(&mut self) {
        if let Some(release) = &self.release {
            // 管理器已经销毁时发送会失败，此时资源已经随管理器一起释放
            let _ = release.send(self.handle);
        }
    }
}

/// 带引用计数的句柄
///
/// clone 只增加原子计数。最后一个引用 drop 时通知所属管理器，
/// 真正的后端销毁发生在管理器的帧边界处理中（可能进一步延迟若干帧）。
#[derive(Clone, Default)]
pub struct RenderHandleReference {
    counter: Option<Arc<HandleCounter>>,
}
impl RenderHandleReference {
    pub fn new(handle: RenderHandle, release: Sender<RenderHandle>) -> Self {
        Self {
            counter: Some(Arc::new(HandleCounter {
                handle,
                release: Some(release),
            })),
        }
    }

    /// 不受任何管理器跟踪的引用，drop 时不做任何事
    pub fn untracked(handle: RenderHandle) -> Self {
        Self {
            counter: Some(Arc::new(HandleCounter { handle, release: None })),
        }
    }

    #[inline]
    pub fn invalid() -> Self {
        Self::default()
    }

    #[inline]
    pub fn handle(&self) -> RenderHandle {
        self.counter.as_ref().map(|c| c.handle).unwrap_or_default()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.handle().is_valid()
    }

    #[inline]
    pub fn ref_count(&self) -> usize {
        self.counter.as_ref().map(Arc::strong_count).unwrap_or(0)
    }

    pub fn downgrade(&self) -> WeakRenderHandleReference {
        WeakRenderHandleReference {
            counter: self.counter.as_ref().map(Arc::downgrade),
        }
    }
}
impl fmt::Debug for RenderHandleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RenderHandleReference({:?}, refs: {})", self.handle(), self.ref_count())
    }
}
impl PartialEq for RenderHandleReference {
    fn eq(&self, other: &Self) -> bool {
        self.handle() == other.handle()
    }
}

/// 弱引用，不影响资源生命周期，管理器的名字表使用它
#[derive(Clone, Default)]
pub struct WeakRenderHandleReference {
    counter: Option<Weak<HandleCounter>>,
}
impl WeakRenderHandleReference {
    pub fn upgrade(&self) -> Option<RenderHandleReference> {
        let counter = self.counter.as_ref()?.upgrade()?;
        Some(RenderHandleReference { counter: Some(counter) })
    }

    pub fn is_alive(&self) -> bool {
        self.counter.as_ref().is_some_and(|c| c.strong_count() > 0)
    }
}
