//! 引用计数对象模型
//!
//! 所有设备对象都通过 `Arc` 共享：
//!
//! - `AddRef` 对应 `Arc::clone`，`Release` 对应 drop，引用计数即 `Arc::strong_count`
//! - 计数归零时对象同步析构，计数下溢在类型系统层面不可能发生
//! - 所有权"向下强、向上弱"：资源、视图强引用设备；上下文只弱引用交换链
//!
//! 接口标识是封闭的枚举，`query_interface` 在支持该接口时返回新的强引用。

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::gfx::backend::NativeHandle;

/// 接口标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceId {
    Object,
    DeviceObject,
    Resource,
    Buffer,
    Texture,
    BufferView,
    TextureView,
    Sampler,
    Fence,
    Shader,
    PipelineState,
    ShaderResourceBinding,
    SwapChain,
    RenderDevice,
    /// 可以取得原生句柄的对象（后端扩展能力）
    NativeResource,
}

/// 进程内唯一的对象编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

impl ObjectId {
    /// 分配一个新的编号
    pub fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// 设备对象的公共接口
pub trait DeviceObject: Send + Sync + 'static {
    /// 对象的主接口
    fn interface_id(&self) -> InterfaceId;

    /// 调试名称
    fn name(&self) -> &str;

    /// 唯一编号
    fn unique_id(&self) -> ObjectId;

    /// 原生句柄，没有原生对象时返回 `None`
    fn native_handle(&self) -> Option<NativeHandle> {
        None
    }

    /// 对象是否支持给定接口
    fn supports(&self, id: InterfaceId) -> bool {
        match id {
            InterfaceId::Object | InterfaceId::DeviceObject => true,
            InterfaceId::NativeResource => self.native_handle().is_some(),
            other => other == self.interface_id() || self.extra_interfaces().contains(&other),
        }
    }

    /// 除主接口外还实现的接口
    fn extra_interfaces(&self) -> &'static [InterfaceId] {
        &[]
    }

    /// 类型擦除，供 `query_interface` 向下转换
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// 具体对象类型与其主接口的对应关系
pub trait Interface: DeviceObject + Sized {
    const IID: InterfaceId;
}

/// 查询接口
///
/// 成功时返回同一对象的新强引用，引用计数加一。
pub fn query_interface<T: Interface>(object: &Arc<dyn DeviceObject>) -> Option<Arc<T>> {
    if !object.supports(T::IID) {
        return None;
    }
    Arc::clone(object).into_any().downcast::<T>().ok()
}

/// 当前强引用计数
pub fn reference_count<T: ?Sized>(object: &Arc<T>) -> usize {
    Arc::strong_count(object)
}

/// 为具体类型实现 `DeviceObject` 与 `Interface`
macro_rules! impl_device_object {
    ($ty:ty, $iid:expr, [$($extra:expr),* $(,)?], |$this:ident| $handle:expr) => {
        impl $crate::renderer::object::DeviceObject for $ty {
            fn interface_id(&self) -> $crate::renderer::object::InterfaceId {
                $iid
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn unique_id(&self) -> $crate::renderer::object::ObjectId {
                self.id
            }

            fn native_handle(&self) -> Option<$crate::gfx::backend::NativeHandle> {
                let $this = self;
                $handle
            }

            fn extra_interfaces(&self) -> &'static [$crate::renderer::object::InterfaceId] {
                &[$($extra),*]
            }

            fn into_any(self: std::sync::Arc<Self>) -> std::sync::Arc<dyn std::any::Any + Send + Sync> {
                self
            }
        }

        impl $crate::renderer::object::Interface for $ty {
            const IID: $crate::renderer::object::InterfaceId = $iid;
        }
    };
    // 资源类型：编号、名称、句柄都在 `core` 字段中
    ($ty:ty, $iid:expr, [$($extra:expr),* $(,)?], core) => {
        impl $crate::renderer::object::DeviceObject for $ty {
            fn interface_id(&self) -> $crate::renderer::object::InterfaceId {
                $iid
            }

            fn name(&self) -> &str {
                &self.core.name
            }

            fn unique_id(&self) -> $crate::renderer::object::ObjectId {
                self.core.id
            }

            fn native_handle(&self) -> Option<$crate::gfx::backend::NativeHandle> {
                Some(self.core.handle)
            }

            fn extra_interfaces(&self) -> &'static [$crate::renderer::object::InterfaceId] {
                &[$($extra),*]
            }

            fn into_any(self: std::sync::Arc<Self>) -> std::sync::Arc<dyn std::any::Any + Send + Sync> {
                self
            }
        }

        impl $crate::renderer::object::Interface for $ty {
            const IID: $crate::renderer::object::InterfaceId = $iid;
        }
    };
}

pub(crate) use impl_device_object;

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker {
        id: ObjectId,
        name: String,
    }

    struct Other {
        id: ObjectId,
        name: String,
    }

    impl_device_object!(Marker, InterfaceId::Fence, [], |_p| None);
    impl_device_object!(Other, InterfaceId::Sampler, [InterfaceId::Resource], |o| Some(NativeHandle(o.id.value())));

    #[test]
    fn test_unique_ids() {
        let a = ObjectId::next();
        let b = ObjectId::next();
        assert!(b > a);
    }

    #[test]
    fn test_query_interface_adds_reference() {
        let marker: Arc<dyn DeviceObject> = Arc::new(Marker { id: ObjectId::next(), name: "marker".into() });
        assert_eq!(Arc::strong_count(&marker), 1);

        let typed = query_interface::<Marker>(&marker).unwrap();
        assert_eq!(Arc::strong_count(&marker), 2);
        assert_eq!(typed.name(), "marker");

        drop(typed);
        assert_eq!(Arc::strong_count(&marker), 1);

        assert!(query_interface::<Other>(&marker).is_none());
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_supports() {
        let other = Other { id: ObjectId::next(), name: String::new() };
        assert!(other.supports(InterfaceId::Object));
        assert!(other.supports(InterfaceId::Sampler));
        assert!(other.supports(InterfaceId::Resource));
        assert!(other.supports(InterfaceId::NativeResource));
        assert!(!other.supports(InterfaceId::Texture));

        let marker = Marker { id: ObjectId::next(), name: String::new() };
        assert!(!marker.supports(InterfaceId::NativeResource));
    }

    #[test]
    fn test_matched_add_release_pairs() {
        let marker = Arc::new(Marker { id: ObjectId::next(), name: String::new() });
        let weak = Arc::downgrade(&marker);
        let initial = reference_count(&marker);
        let extra: Vec<_> = (0..8).map(|_| Arc::clone(&marker)).collect();
        assert_eq!(reference_count(&marker), initial + 8);
        drop(extra);
        assert_eq!(reference_count(&marker), initial);

        drop(marker);
        assert!(weak.upgrade().is_none());
    }
}
